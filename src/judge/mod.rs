// src/judge/mod.rs

mod evaluator;
pub mod oracle;
pub mod prompt;

pub use evaluator::{QualityJudge, QualityStats, StatsSource, decide_trigger, quality_trend};
pub use oracle::{OllamaOracle, ScoringOracle};
