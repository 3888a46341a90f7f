// src/perception/mod.rs

mod filters;
mod gate;

pub use gate::{PerceptionGate, StopLatch};
