pub mod core;
pub mod tick;

#[cfg(test)]
mod invariants_test;

pub use core::{SchedulerHandle, SchedulerState};
