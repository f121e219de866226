// src/judge/evaluator.rs

use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use super::oracle::{ORACLE_SERVICE, ScoringOracle};
use super::prompt::{build_judge_prompt, heuristic_scores, parse_scores};
use crate::config::{
    DECLINE_MARGIN, IMMEDIATE_SCORE_THRESHOLD, JudgeConfig, QUALITY_HISTORY_WINDOW,
    TREND_LABEL_MARGIN, TREND_WINDOW,
};
use crate::errors::with_timeout;
use crate::feedback_log::FeedbackLog;
use crate::models::{
    Chunk, QualityEvaluation, QualityLabel, QualityTrend, TriggerDecision, mean,
};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsSource {
    DurableLog,
    MemoryOnly,
}

/// Judge quality statistics: durable-log aggregates plus the in-memory trend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityStats {
    pub source: StatsSource,
    pub total_evaluations: u64,
    pub average_quality: f64,
    pub min_quality: f64,
    pub max_quality: f64,
    /// Mean oracle latency; only known from the durable log.
    pub average_evaluation_secs: Option<f64>,
    /// Mean of the last five in-memory evaluations.
    pub recent_quality: Option<f64>,
    pub quality_distribution: BTreeMap<String, u64>,
    pub trigger_distribution: BTreeMap<String, u64>,
    pub trend: QualityTrend,
    pub memory_evaluations: usize,
}

/// Scores ranked result lists with an external oracle and decides, from the
/// rolling history of genuine evaluations, whether retraining is needed.
pub struct QualityJudge {
    oracle: Arc<dyn ScoringOracle>,
    log: Arc<dyn FeedbackLog>,
    telemetry: Arc<dyn TelemetrySink>,
    config: JudgeConfig,
    /// Mean scores of genuine evaluations, oldest first.
    history: RwLock<VecDeque<f64>>,
}

impl QualityJudge {
    pub fn new(
        oracle: Arc<dyn ScoringOracle>,
        log: Arc<dyn FeedbackLog>,
        telemetry: Arc<dyn TelemetrySink>,
        config: JudgeConfig,
    ) -> Self {
        Self {
            oracle,
            log,
            telemetry,
            config,
            history: RwLock::new(VecDeque::with_capacity(QUALITY_HISTORY_WINDOW)),
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    /// Mean scores currently in the rolling history, oldest first.
    pub fn history_means(&self) -> Vec<f64> {
        self.history.read().iter().copied().collect()
    }

    /// Restores the rolling history from recent evaluations in the durable log.
    /// Returns how many entries were loaded; log failures leave history empty.
    pub async fn seed_history(&self) -> usize {
        let since = Utc::now() - self.config.history_lookback;
        let recent = match self.log.evaluations_since(since, QUALITY_HISTORY_WINDOW).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Could not load judge history: {:#}", e);
                return 0;
            }
        };

        // Log returns newest first; history is kept oldest first.
        let entries: VecDeque<f64> = recent
            .iter()
            .rev()
            .filter(|e| e.label.is_genuine())
            .map(|e| e.mean_score)
            .collect();
        let loaded = entries.len();
        *self.history.write() = entries;
        if loaded > 0 {
            info!("Loaded {} recent judge evaluations", loaded);
        }
        loaded
    }

    /// Judges one ranked result list. Never fails: an unreachable oracle
    /// yields a heuristic evaluation labeled `error`.
    pub async fn evaluate(&self, query: &str, results: &[Chunk]) -> QualityEvaluation {
        if results.is_empty() {
            let evaluation = QualityEvaluation::no_results(query);
            self.emit(&evaluation);
            return evaluation;
        }

        let started = Instant::now();
        let prompt = build_judge_prompt(query, results);
        let timeout = self.config.oracle_timeout;
        let response = with_timeout(ORACLE_SERVICE, timeout, self.oracle.score(&prompt, timeout)).await;

        let mut evaluation = QualityEvaluation::no_results(query);
        evaluation.video_id = results.first().map(|c| c.video_id.clone());
        evaluation.oracle_model = Some(self.oracle.model_name().to_string());

        match response {
            Err(e) => {
                warn!("Oracle scoring failed ({}), using heuristic scores", e);
                let scores = heuristic_scores(query, results);
                let as_f64: Vec<f64> = scores.iter().map(|s| f64::from(*s)).collect();
                evaluation.mean_score = mean(&as_f64).unwrap_or(3.0);
                evaluation.scores = scores;
                evaluation.label = QualityLabel::Error;
                evaluation.trigger = TriggerDecision::None;
                evaluation.evaluation_secs = started.elapsed().as_secs_f64();
            }
            Ok(text) => {
                let mut scores = parse_scores(&text);
                scores.truncate(results.len());
                let as_f64: Vec<f64> = scores.iter().map(|s| f64::from(*s)).collect();
                let mean_score = mean(&as_f64).unwrap_or(0.0);

                let trigger = {
                    let mut history = self.history.write();
                    history.push_back(mean_score);
                    while history.len() > QUALITY_HISTORY_WINDOW {
                        history.pop_front();
                    }
                    let means: Vec<f64> = history.iter().copied().collect();
                    decide_trigger(&means, mean_score, self.config.fine_tuning_threshold)
                };

                evaluation.scores = scores;
                evaluation.mean_score = mean_score;
                evaluation.label = QualityLabel::from_mean_score(mean_score);
                evaluation.trigger = trigger;
                evaluation.evaluation_secs = started.elapsed().as_secs_f64();

                debug!(
                    "Judged {:?}: scores {:?}, mean {:.2} ({}), trigger {}",
                    query,
                    evaluation.scores,
                    mean_score,
                    evaluation.label.as_str(),
                    trigger.as_str()
                );
                self.persist(&evaluation).await;
            }
        }

        self.emit(&evaluation);
        evaluation
    }

    async fn persist(&self, evaluation: &QualityEvaluation) {
        if let Err(e) = self.log.append_evaluation(evaluation).await {
            warn!("Could not save judge evaluation: {:#}", e);
        }
    }

    fn emit(&self, evaluation: &QualityEvaluation) {
        self.telemetry.emit(&TelemetryEvent::JudgeEvaluated {
            label: evaluation.label,
            trigger: evaluation.trigger,
            mean_score: evaluation.mean_score,
            scores: evaluation.scores.clone(),
            evaluation_secs: evaluation.evaluation_secs,
        });
    }

    /// Aggregates from the durable log over the stats window, falling back to
    /// the in-memory history if the log cannot be queried.
    pub async fn quality_stats(&self) -> QualityStats {
        let means = self.history_means();
        let trend = quality_trend(&means);
        let recent_quality = mean(&means[means.len().saturating_sub(TREND_WINDOW)..]);

        let since = Utc::now() - self.config.stats_lookback;
        match self.log.judge_statistics(since).await {
            Ok(stats) => QualityStats {
                source: StatsSource::DurableLog,
                total_evaluations: stats.total_evaluations,
                average_quality: stats.average_quality,
                min_quality: stats.min_quality,
                max_quality: stats.max_quality,
                average_evaluation_secs: Some(stats.average_evaluation_secs),
                recent_quality,
                quality_distribution: stats.quality_distribution,
                trigger_distribution: stats.trigger_distribution,
                trend,
                memory_evaluations: means.len(),
            },
            Err(e) => {
                warn!("Error getting judge statistics from log: {:#}", e);
                QualityStats {
                    source: StatsSource::MemoryOnly,
                    total_evaluations: means.len() as u64,
                    average_quality: mean(&means).unwrap_or(0.0),
                    min_quality: means.iter().cloned().reduce(f64::min).unwrap_or(0.0),
                    max_quality: means.iter().cloned().reduce(f64::max).unwrap_or(0.0),
                    average_evaluation_secs: None,
                    recent_quality,
                    quality_distribution: BTreeMap::new(),
                    trigger_distribution: BTreeMap::new(),
                    trend,
                    memory_evaluations: means.len(),
                }
            }
        }
    }
}

/// Retraining recommendation for the evaluation scoring `current`.
///
/// `history` holds rolling mean scores, oldest first, including `current`.
/// Acute failure wins over chronic decline: a single very bad score, then a
/// poor recent average, then a declining trend, then a single poor score.
pub fn decide_trigger(history: &[f64], current: f64, threshold: f64) -> TriggerDecision {
    if current < IMMEDIATE_SCORE_THRESHOLD {
        return TriggerDecision::Immediate;
    }

    let n = history.len();
    if n >= TREND_WINDOW {
        let recent_avg = mean(&history[n - TREND_WINDOW..]).unwrap_or(current);
        if recent_avg < threshold {
            return TriggerDecision::Immediate;
        }
        if n >= 2 * TREND_WINDOW {
            let older_avg =
                mean(&history[n - 2 * TREND_WINDOW..n - TREND_WINDOW]).unwrap_or(recent_avg);
            if older_avg - recent_avg > DECLINE_MARGIN {
                return TriggerDecision::Scheduled;
            }
        }
    }

    if current < threshold {
        return TriggerDecision::Monitor;
    }
    TriggerDecision::None
}

/// Last five history means against the five before them.
pub fn quality_trend(history: &[f64]) -> QualityTrend {
    let n = history.len();
    if n < 2 * TREND_WINDOW {
        return QualityTrend::InsufficientData;
    }
    let recent = mean(&history[n - TREND_WINDOW..]).unwrap_or(0.0);
    let older = mean(&history[n - 2 * TREND_WINDOW..n - TREND_WINDOW]).unwrap_or(0.0);
    if recent > older + TREND_LABEL_MARGIN {
        QualityTrend::Improving
    } else if recent < older - TREND_LABEL_MARGIN {
        QualityTrend::Declining
    } else {
        QualityTrend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f64 = 2.5;

    #[test]
    fn very_poor_score_is_immediate() {
        assert_eq!(decide_trigger(&[1.5], 1.5, THRESHOLD), TriggerDecision::Immediate);
        assert_eq!(
            decide_trigger(&[4.5, 4.0, 1.0], 1.0, THRESHOLD),
            TriggerDecision::Immediate
        );
    }

    #[test]
    fn single_mediocre_score_is_monitored() {
        assert_eq!(decide_trigger(&[2.3], 2.3, THRESHOLD), TriggerDecision::Monitor);
        assert_eq!(decide_trigger(&[3.2], 3.2, THRESHOLD), TriggerDecision::None);
    }

    #[test]
    fn poor_recent_average_is_immediate() {
        let history = [2.0, 2.2, 2.4, 2.1, 3.0];
        assert_eq!(decide_trigger(&history, 3.0, THRESHOLD), TriggerDecision::Immediate);
    }

    #[test]
    fn declining_trend_is_scheduled() {
        let history = [4.0, 4.0, 4.0, 4.0, 4.0, 3.3, 3.3, 3.3, 3.3, 3.3];
        assert_eq!(decide_trigger(&history, 3.3, THRESHOLD), TriggerDecision::Scheduled);
    }

    #[test]
    fn trend_labels() {
        assert_eq!(quality_trend(&[4.0; 9]), QualityTrend::InsufficientData);
        assert_eq!(quality_trend(&[3.0; 10]), QualityTrend::Stable);
        let improving = [3.0, 3.0, 3.0, 3.0, 3.0, 3.5, 3.5, 3.5, 3.5, 3.5];
        assert_eq!(quality_trend(&improving), QualityTrend::Improving);
        let declining = [3.5, 3.5, 3.5, 3.5, 3.5, 3.0, 3.0, 3.0, 3.0, 3.0];
        assert_eq!(quality_trend(&declining), QualityTrend::Declining);
    }
}
