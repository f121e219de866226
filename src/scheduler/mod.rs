// src/scheduler/mod.rs

pub mod fine_tune;
mod retraining;

pub use fine_tune::{FineTuneOutcome, FineTuner, TrainingExample};
pub use retraining::{
    CycleOutcome, RetrainTrigger, RetrainingScheduler, SchedulerHandle, SchedulerState,
    WakeSource,
};
