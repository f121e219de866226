// src/telemetry.rs

use log::debug;
use metrics::{counter, gauge, histogram};

use crate::models::{QualityLabel, TriggerDecision};

/// State-change events for the dashboard sink.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    ChunksRanked {
        candidates: usize,
        returned: usize,
        explored: usize,
        exploited: usize,
        epsilon: f64,
    },
    RatingRecorded {
        chunk_id: String,
        rating: u8,
        reward: f64,
        bandit_score: f64,
    },
    BanditSnapshot {
        total_interactions: u64,
        chunks_learned: usize,
        queries_learned: usize,
        avg_recent_reward: Option<f64>,
        epsilon: f64,
    },
    JudgeEvaluated {
        label: QualityLabel,
        trigger: TriggerDecision,
        mean_score: f64,
        scores: Vec<u8>,
        evaluation_secs: f64,
    },
    RetrainingRequested {
        accepted: bool,
    },
    CycleSkipped {
        reason: String,
    },
    FineTuningStarted {
        train_examples: usize,
        eval_examples: usize,
    },
    FineTuningCompleted {
        eval_score: f64,
        deployed: bool,
        improvement: f64,
    },
    TrainingFailed {
        reason: String,
    },
    ModelDeployed {
        version: u64,
    },
}

/// Fire-and-forget telemetry. Implementations must never fail the caller.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &TelemetryEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn emit(&self, _event: &TelemetryEvent) {}
}

/// Forwards events to the `metrics` facade. Without an installed recorder
/// every call is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl TelemetrySink for MetricsSink {
    fn emit(&self, event: &TelemetryEvent) {
        debug!("telemetry: {:?}", event);
        match event {
            TelemetryEvent::ChunksRanked {
                candidates,
                explored,
                exploited,
                epsilon,
                ..
            } => {
                counter!("reranker.search.requests", 1);
                histogram!("reranker.search.candidates", *candidates as f64);
                counter!("reranker.bandit.explored", *explored as u64);
                counter!("reranker.bandit.exploited", *exploited as u64);
                gauge!("reranker.bandit.epsilon", *epsilon);
            }
            TelemetryEvent::RatingRecorded { rating, reward, .. } => {
                counter!("reranker.feedback.ratings", 1, "rating" => rating.to_string());
                histogram!("reranker.feedback.reward", *reward);
            }
            TelemetryEvent::BanditSnapshot {
                total_interactions,
                chunks_learned,
                queries_learned,
                avg_recent_reward,
                epsilon,
            } => {
                gauge!("reranker.bandit.total_interactions", *total_interactions as f64);
                gauge!("reranker.bandit.chunks_learned", *chunks_learned as f64);
                gauge!("reranker.bandit.queries_learned", *queries_learned as f64);
                if let Some(avg) = avg_recent_reward {
                    gauge!("reranker.bandit.avg_recent_reward", *avg);
                }
                gauge!("reranker.bandit.epsilon", *epsilon);
            }
            TelemetryEvent::JudgeEvaluated {
                label,
                trigger,
                mean_score,
                evaluation_secs,
                ..
            } => {
                counter!(
                    "reranker.judge.evaluations",
                    1,
                    "label" => label.as_str(),
                    "trigger" => trigger.as_str()
                );
                histogram!("reranker.judge.mean_score", *mean_score);
                histogram!("reranker.judge.evaluation_secs", *evaluation_secs);
            }
            TelemetryEvent::RetrainingRequested { accepted } => {
                counter!(
                    "reranker.retraining.requests",
                    1,
                    "accepted" => if *accepted { "true" } else { "false" }
                );
            }
            TelemetryEvent::CycleSkipped { .. } => {
                counter!("reranker.retraining.skipped", 1);
            }
            TelemetryEvent::FineTuningStarted {
                train_examples,
                eval_examples,
            } => {
                counter!("reranker.retraining.started", 1);
                gauge!("reranker.retraining.train_examples", *train_examples as f64);
                gauge!("reranker.retraining.eval_examples", *eval_examples as f64);
            }
            TelemetryEvent::FineTuningCompleted {
                eval_score,
                deployed,
                improvement,
            } => {
                counter!(
                    "reranker.retraining.completed",
                    1,
                    "deployed" => if *deployed { "true" } else { "false" }
                );
                gauge!("reranker.retraining.eval_score", *eval_score);
                gauge!("reranker.retraining.improvement", *improvement);
            }
            TelemetryEvent::TrainingFailed { .. } => {
                counter!("reranker.retraining.failed", 1);
            }
            TelemetryEvent::ModelDeployed { version } => {
                gauge!("reranker.model.version", *version as f64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_sink_without_recorder_is_silent() {
        let sink = MetricsSink;
        sink.emit(&TelemetryEvent::ModelDeployed { version: 2 });
        sink.emit(&TelemetryEvent::JudgeEvaluated {
            label: QualityLabel::Good,
            trigger: TriggerDecision::None,
            mean_score: 3.8,
            scores: vec![4, 4, 3],
            evaluation_secs: 0.2,
        });
    }
}
