// src/control/state_machine.rs

use crate::control::pid::{heading_pid, HeadingGains, PidState};
use crate::types::{CarCommand, ControlConfig, DetectionFrame};
use anyhow::Result;
use tracing::{debug, info};

/// Beyond this range the vehicle drives at full approach speed.
const SLOW_BAND_RADIUS: f64 = 0.25;
/// Speed factor inside the slow band.
const SLOW_BAND_FACTOR: f64 = 0.8;
/// Stop-band radius for a plain capture.
const CAPTURE_RADIUS: f64 = 0.16;
/// Wider stop-band radius while delivering.
const DELIVERY_CAPTURE_RADIUS: f64 = 0.2;
/// Turn commands below offset + margin mean the heading has settled.
const SETTLED_MARGIN: f64 = 0.065;
/// Consecutive close-and-settled frames before declaring capture.
const CLOSE_FRAMES_REQUIRED: u32 = 8;
/// Consecutive target-less frames before falling back to scanning.
const LOST_FRAMES_ALLOWED: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// Rotating in place until the target id shows up.
    Scanning,
    /// Target sighted, driving toward it.
    Identified,
    /// Target inside the grabber; waiting on mission logic.
    Captured,
    /// Driving the captured target to the drop-off.
    Delivering,
    /// Done. Terminal for this loop.
    Delivered,
}

/// Finite-state approach controller. Owns the control state, both
/// hysteresis counters and the PID error history; everything mutates
/// only through [`ApproachStateMachine::update`] and the two explicit
/// mission operations.
pub struct ApproachStateMachine {
    config: ControlConfig,
    gains: HeadingGains,
    state: ControlState,
    pid: PidState,
    no_detection_count: u32,
    close_count: u32,
}

impl ApproachStateMachine {
    pub fn new(config: ControlConfig) -> Self {
        let gains = HeadingGains::from_config(&config);
        Self {
            config,
            gains,
            state: ControlState::Scanning,
            pid: PidState::default(),
            no_detection_count: 0,
            close_count: 0,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Mission handoff once the grabber reports the object secured.
    pub fn begin_delivery(&mut self) {
        if self.state == ControlState::Captured {
            info!("→ delivering captured object");
            self.state = ControlState::Delivering;
        }
    }

    /// Mission handoff once the drop-off confirms receipt.
    pub fn complete_delivery(&mut self) {
        if self.state == ControlState::Delivering {
            info!("✓ object delivered");
            self.state = ControlState::Delivered;
            self.close_count = 0;
            self.no_detection_count = 0;
        }
    }

    /// Advance one detection frame. `delta_t` must be positive; the
    /// caller supplies a minimum step when timestamps are unusable.
    pub fn update(
        &mut self,
        frame: &DetectionFrame,
        delta_t: f64,
        timestamp: f64,
    ) -> Result<CarCommand> {
        match self.state {
            ControlState::Scanning => Ok(self.scan(frame, timestamp)),
            ControlState::Identified => self.approach(frame, delta_t, timestamp, false),
            ControlState::Delivering => self.approach(frame, delta_t, timestamp, true),
            ControlState::Captured | ControlState::Delivered => {
                Ok(CarCommand::stop(timestamp))
            }
        }
    }

    fn scan(&mut self, frame: &DetectionFrame, timestamp: f64) -> CarCommand {
        let target = self.config.target_id;
        if frame.detections.iter().any(|d| d.id == target) {
            info!("→ target {target} sighted, switching to approach");
            self.state = ControlState::Identified;
            // Each approach session starts with clean error history.
            self.pid = PidState::default();
            self.no_detection_count = 0;
            self.close_count = 0;
            return CarCommand::stop(timestamp);
        }
        CarCommand {
            v: 0.0,
            omega: self.config.scan_omega,
            timestamp,
        }
    }

    fn approach(
        &mut self,
        frame: &DetectionFrame,
        delta_t: f64,
        timestamp: f64,
        delivery: bool,
    ) -> Result<CarCommand> {
        let target = self.config.target_id;

        // When several detections carry the target id, the last one in
        // frame order wins. Deliberate and load-bearing: the perception
        // source's enumeration order must be preserved upstream.
        let matched = frame.detections.iter().filter(|d| d.id == target).last();

        let Some(det) = matched else {
            self.no_detection_count += 1;
            debug!(
                "target {target} not in frame ({} of {} allowed)",
                self.no_detection_count, LOST_FRAMES_ALLOWED
            );
            if self.no_detection_count >= LOST_FRAMES_ALLOWED {
                info!("target {target} lost, back to scanning");
                self.state = ControlState::Scanning;
                self.no_detection_count = 0;
                self.close_count = 0;
            }
            return Ok(CarCommand::stop(timestamp));
        };

        self.no_detection_count = 0;

        let out = heading_pid(
            self.config.approach_speed,
            0.0,
            det.theta,
            self.pid,
            delta_t,
            &self.gains,
        )?;
        self.pid = out.next_state();

        let omega = out.omega * self.config.omega_scaling;
        let r_0 = if delivery {
            DELIVERY_CAPTURE_RADIUS
        } else {
            CAPTURE_RADIUS
        };

        let v = if det.r > SLOW_BAND_RADIUS {
            self.close_count = 0;
            out.v
        } else if det.r > r_0 {
            self.close_count = 0;
            SLOW_BAND_FACTOR * out.v
        } else {
            if omega.abs() < self.gains.omega_offset + SETTLED_MARGIN {
                self.close_count += 1;
                debug!(
                    "close and settled ({} of {})",
                    self.close_count, CLOSE_FRAMES_REQUIRED
                );
            }
            if self.close_count >= CLOSE_FRAMES_REQUIRED {
                info!("✓ target {target} captured at r={:.3}", det.r);
                self.close_count = 0;
                self.state = ControlState::Captured;
            }
            0.0
        };

        Ok(CarCommand { v, omega, timestamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Detection;
    use approx::assert_relative_eq;

    const DT: f64 = 1.0 / 30.0;

    fn machine() -> ApproachStateMachine {
        let cfg = crate::types::Config::default().control;
        ApproachStateMachine::new(cfg)
    }

    fn frame(dets: &[(f64, f64, i32)]) -> DetectionFrame {
        DetectionFrame {
            detections: dets
                .iter()
                .map(|&(r, theta, id)| Detection { id, r, theta })
                .collect(),
        }
    }

    fn identified() -> ApproachStateMachine {
        let mut sm = machine();
        sm.update(&frame(&[(1.0, 0.0, 0)]), DT, 0.0).unwrap();
        assert_eq!(sm.state(), ControlState::Identified);
        sm
    }

    #[test]
    fn test_scanning_rotates_in_place() {
        let mut sm = machine();
        let cmd = sm.update(&frame(&[]), DT, 0.0).unwrap();
        assert_eq!(cmd.v, 0.0);
        assert_eq!(cmd.omega, 0.3);
        assert_eq!(sm.state(), ControlState::Scanning);
    }

    #[test]
    fn test_scanning_ignores_other_ids() {
        let mut sm = machine();
        let cmd = sm.update(&frame(&[(0.5, 0.1, 9)]), DT, 0.0).unwrap();
        assert_eq!(sm.state(), ControlState::Scanning);
        assert_eq!(cmd.omega, 0.3);
    }

    #[test]
    fn test_target_sighting_freezes_the_triggering_frame() {
        let mut sm = machine();
        let cmd = sm.update(&frame(&[(0.5, 0.1, 0)]), DT, 0.0).unwrap();
        assert_eq!(sm.state(), ControlState::Identified);
        assert_eq!(cmd, CarCommand::stop(0.0));
    }

    #[test]
    fn test_full_band_matches_pid_output() {
        let mut sm = identified();
        let cmd = sm.update(&frame(&[(0.3, 0.1, 0)]), DT, 1.0).unwrap();

        let expected = heading_pid(0.02, 0.0, 0.1, PidState::default(), DT, &HeadingGains::default())
            .unwrap();
        assert_relative_eq!(cmd.v, 0.02, epsilon = 1e-12);
        assert_relative_eq!(cmd.omega, expected.omega, epsilon = 1e-12);
        assert!(expected.error == -0.1);
        assert_eq!(sm.close_count, 0);
    }

    #[test]
    fn test_slow_band_is_upper_inclusive() {
        let mut sm = identified();
        let cmd = sm.update(&frame(&[(0.25, 0.0, 0)]), DT, 1.0).unwrap();
        assert_relative_eq!(cmd.v, 0.8 * 0.02, epsilon = 1e-12);

        let mut sm = identified();
        let cmd = sm.update(&frame(&[(0.2500001, 0.0, 0)]), DT, 1.0).unwrap();
        assert_relative_eq!(cmd.v, 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_stop_band_starts_at_capture_radius() {
        let mut sm = identified();
        let cmd = sm.update(&frame(&[(0.16, 0.0, 0)]), DT, 1.0).unwrap();
        assert_eq!(cmd.v, 0.0);
        assert_eq!(sm.close_count, 1);
    }

    #[test]
    fn test_capture_after_eight_settled_frames() {
        let mut sm = identified();
        for i in 0..7 {
            sm.update(&frame(&[(0.1, 0.0, 0)]), DT, i as f64).unwrap();
            assert_eq!(sm.state(), ControlState::Identified);
        }
        assert_eq!(sm.close_count, 7);
        sm.update(&frame(&[(0.1, 0.0, 0)]), DT, 7.0).unwrap();
        assert_eq!(sm.state(), ControlState::Captured);
        assert_eq!(sm.close_count, 0);
    }

    #[test]
    fn test_leaving_stop_band_resets_close_count() {
        let mut sm = identified();
        for _ in 0..5 {
            sm.update(&frame(&[(0.1, 0.0, 0)]), DT, 0.0).unwrap();
        }
        assert_eq!(sm.close_count, 5);
        sm.update(&frame(&[(0.3, 0.0, 0)]), DT, 0.0).unwrap();
        assert_eq!(sm.close_count, 0);
        assert_eq!(sm.state(), ControlState::Identified);
    }

    #[test]
    fn test_unsettled_frame_does_not_advance_close_count() {
        let mut sm = identified();
        sm.update(&frame(&[(0.1, 0.0, 0)]), DT, 0.0).unwrap();
        assert_eq!(sm.close_count, 1);
        // Large bearing error: turn command well above the settled bound.
        sm.update(&frame(&[(0.1, 1.0, 0)]), DT, 0.0).unwrap();
        assert_eq!(sm.close_count, 1);
    }

    #[test]
    fn test_lost_target_falls_back_after_four_frames() {
        let mut sm = identified();
        for i in 0..3 {
            let cmd = sm.update(&frame(&[]), DT, i as f64).unwrap();
            assert_eq!(cmd, CarCommand::stop(i as f64));
            assert_eq!(sm.state(), ControlState::Identified);
        }
        sm.update(&frame(&[]), DT, 3.0).unwrap();
        assert_eq!(sm.state(), ControlState::Scanning);
        assert_eq!(sm.no_detection_count, 0);
    }

    #[test]
    fn test_matching_frame_resets_lost_counter() {
        let mut sm = identified();
        for _ in 0..3 {
            sm.update(&frame(&[]), DT, 0.0).unwrap();
        }
        assert_eq!(sm.no_detection_count, 3);
        sm.update(&frame(&[(0.5, 0.0, 0)]), DT, 0.0).unwrap();
        assert_eq!(sm.no_detection_count, 0);
        assert_eq!(sm.state(), ControlState::Identified);
    }

    #[test]
    fn test_last_matching_detection_wins() {
        let mut sm = identified();
        // First match is far, last match is inside the stop band.
        let cmd = sm
            .update(&frame(&[(0.5, 0.2, 0), (0.4, 0.1, 3), (0.1, 0.0, 0)]), DT, 0.0)
            .unwrap();
        assert_eq!(cmd.v, 0.0);
        assert_eq!(sm.close_count, 1);
    }

    #[test]
    fn test_delivery_widens_the_stop_band() {
        let mut sm = identified();
        // r = 0.18 is slow band for capture...
        let cmd = sm.update(&frame(&[(0.18, 0.0, 0)]), DT, 0.0).unwrap();
        assert_relative_eq!(cmd.v, 0.8 * 0.02, epsilon = 1e-12);

        // ...but stop band while delivering.
        let mut sm = identified();
        sm.state = ControlState::Captured;
        sm.begin_delivery();
        assert_eq!(sm.state(), ControlState::Delivering);
        let cmd = sm.update(&frame(&[(0.18, 0.0, 0)]), DT, 0.0).unwrap();
        assert_eq!(cmd.v, 0.0);
    }

    #[test]
    fn test_captured_and_delivered_hold_still() {
        let mut sm = identified();
        sm.state = ControlState::Captured;
        let cmd = sm.update(&frame(&[(0.1, 0.5, 0)]), DT, 2.0).unwrap();
        assert_eq!(cmd, CarCommand::stop(2.0));

        sm.state = ControlState::Delivered;
        let cmd = sm.update(&frame(&[(0.1, 0.5, 0)]), DT, 3.0).unwrap();
        assert_eq!(cmd, CarCommand::stop(3.0));
    }

    #[test]
    fn test_delivery_completion_is_terminal() {
        let mut sm = identified();
        sm.state = ControlState::Delivering;
        sm.complete_delivery();
        assert_eq!(sm.state(), ControlState::Delivered);
        // Seeing the target again changes nothing.
        sm.update(&frame(&[(0.5, 0.0, 0)]), DT, 0.0).unwrap();
        assert_eq!(sm.state(), ControlState::Delivered);
    }

    #[test]
    fn test_pid_state_resets_on_new_approach() {
        let mut sm = identified();
        sm.update(&frame(&[(0.5, 0.4, 0)]), DT, 0.0).unwrap();
        assert!(sm.pid != PidState::default());
        for _ in 0..4 {
            sm.update(&frame(&[]), DT, 0.0).unwrap();
        }
        assert_eq!(sm.state(), ControlState::Scanning);
        sm.update(&frame(&[(0.5, 0.0, 0)]), DT, 0.0).unwrap();
        assert_eq!(sm.pid, PidState::default());
    }
}
