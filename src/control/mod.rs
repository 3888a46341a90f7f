// src/control/mod.rs

mod pid;
mod state_machine;

pub use pid::{heading_pid, HeadingGains, PidOutput, PidState};
pub use state_machine::{ApproachStateMachine, ControlState};
