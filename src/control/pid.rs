// src/control/pid.rs

use crate::types::ControlConfig;
use anyhow::{ensure, Result};
use tracing::debug;

/// Heading controller gains plus the two actuator-compensation terms.
#[derive(Debug, Clone, Copy)]
pub struct HeadingGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Anti-windup bound on the accumulated integral error.
    pub integral_clamp: f64,
    /// Added in the direction of the command so small corrections still
    /// overcome motor and wheel friction.
    pub omega_offset: f64,
}

impl HeadingGains {
    pub fn from_config(cfg: &ControlConfig) -> Self {
        Self {
            kp: cfg.kp,
            ki: cfg.ki,
            kd: cfg.kd,
            integral_clamp: cfg.integral_clamp,
            omega_offset: cfg.omega_offset,
        }
    }
}

impl Default for HeadingGains {
    fn default() -> Self {
        Self {
            kp: 0.25,
            ki: 0.4,
            kd: 0.027,
            integral_clamp: 0.04,
            omega_offset: 0.1,
        }
    }
}

/// Error history threaded between controller calls by the owner.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidState {
    pub prev_error: f64,
    pub prev_integral: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PidOutput {
    pub v: f64,
    pub omega: f64,
    pub error: f64,
    pub integral: f64,
    pub derivative: f64,
}

impl PidOutput {
    pub fn next_state(&self) -> PidState {
        PidState {
            prev_error: self.error,
            prev_integral: self.integral,
        }
    }
}

/// Heading PID. Pure: the caller owns the state and threads it forward
/// via [`PidOutput::next_state`]. `delta_t` must be positive.
pub fn heading_pid(
    v0: f64,
    theta_ref: f64,
    theta_hat: f64,
    state: PidState,
    delta_t: f64,
    gains: &HeadingGains,
) -> Result<PidOutput> {
    ensure!(
        delta_t > 0.0,
        "heading PID needs a positive time step, got {delta_t}"
    );

    let error = theta_ref - theta_hat;

    let integral = (state.prev_integral + error * delta_t)
        .clamp(-gains.integral_clamp, gains.integral_clamp);

    let derivative = (error - state.prev_error) / delta_t;

    let mut omega = gains.kp * error + gains.ki * integral + gains.kd * derivative;

    if omega > 0.0 {
        omega += gains.omega_offset;
    } else if omega < 0.0 {
        omega -= gains.omega_offset;
    }

    debug!(
        "PID: omega={omega:.3} e={error:.3} int={integral:.3} der={derivative:.3}"
    );

    Ok(PidOutput {
        v: v0,
        omega,
        error,
        integral,
        derivative,
    })
}
