// src/arbiter.rs

use crate::perception::StopLatch;
use crate::types::CarCommand;
use tracing::debug;

/// Final say before the actuator. The stop latch suppresses forward
/// motion only; the turn rate passes through so the vehicle can still
/// settle its heading while held.
pub struct CommandArbiter {
    latch: StopLatch,
}

impl CommandArbiter {
    pub fn new(latch: StopLatch) -> Self {
        Self { latch }
    }

    pub fn arbitrate(&self, proposed: CarCommand) -> CarCommand {
        if self.latch.is_engaged() {
            debug!("stop latch engaged, suppressing forward motion");
            CarCommand {
                v: 0.0,
                ..proposed
            }
        } else {
            proposed
        }
    }

    /// The one command every shutdown path must end with.
    pub fn shutdown_command(timestamp: f64) -> CarCommand {
        CarCommand::stop(timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_when_latch_clear() {
        let latch = StopLatch::new();
        let arbiter = CommandArbiter::new(latch);
        let cmd = CarCommand {
            v: 0.02,
            omega: -0.4,
            timestamp: 1.5,
        };
        assert_eq!(arbiter.arbitrate(cmd), cmd);
    }

    #[test]
    fn test_latch_suppresses_v_but_not_omega() {
        let latch = StopLatch::new();
        let arbiter = CommandArbiter::new(latch.clone());
        latch.engage();
        let out = arbiter.arbitrate(CarCommand {
            v: 0.02,
            omega: -0.4,
            timestamp: 1.5,
        });
        assert_eq!(out.v, 0.0);
        assert_eq!(out.omega, -0.4);
        assert_eq!(out.timestamp, 1.5);
    }

    #[test]
    fn test_release_restores_passthrough() {
        let latch = StopLatch::new();
        let arbiter = CommandArbiter::new(latch.clone());
        latch.engage();
        latch.release();
        let cmd = CarCommand {
            v: 0.02,
            omega: 0.0,
            timestamp: 0.0,
        };
        assert_eq!(arbiter.arbitrate(cmd), cmd);
    }

    #[test]
    fn test_shutdown_command_is_full_stop() {
        let cmd = CommandArbiter::shutdown_command(9.0);
        assert_eq!(cmd, CarCommand::stop(9.0));
    }
}
