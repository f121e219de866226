// src/scheduler/retraining.rs

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use futures::FutureExt;
use log::{error, info, warn};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::fine_tune::{FineTuner, build_training_examples, split_train_eval};
use crate::config::{MIN_CHECK_INTERVAL, SchedulerConfig};
use crate::feedback_log::FeedbackLog;
use crate::registry::ModelRegistry;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

const DEPLOYMENT_LOG_FILE: &str = "deployment_log.jsonl";

/// Lifecycle of one retraining cycle. Every cycle ends back in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    CollectingData,
    Training,
    Evaluating,
    Deploying,
    Discarding,
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSource {
    Timer,
    /// The quality judge asked for immediate retraining.
    Judge,
    Manual,
}

impl WakeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WakeSource::Timer => "timer",
            WakeSource::Judge => "judge",
            WakeSource::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Not enough feedback yet. A normal no-op, not a failure.
    InsufficientData { samples: usize, required: usize },
    CollectionFailed { reason: String },
    TrainingFailed { reason: String },
    Discarded { eval_score: f64 },
    Deployed { version: u64, eval_score: f64 },
    /// Skipped because an earlier failure is still backing off.
    BackedOff { remaining: Duration },
}

impl CycleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CycleOutcome::CollectionFailed { .. } | CycleOutcome::TrainingFailed { .. }
        )
    }
}

#[derive(Serialize)]
struct DeploymentRecord<'a> {
    version: u64,
    timestamp: String,
    model_path: &'a str,
}

/// Turns accumulated feedback into a validated model and installs it in the
/// registry. Owned by a single background task, so at most one cycle runs.
pub struct RetrainingScheduler {
    log: Arc<dyn FeedbackLog>,
    registry: Arc<ModelRegistry>,
    fine_tuner: Arc<dyn FineTuner>,
    telemetry: Arc<dyn TelemetrySink>,
    config: SchedulerConfig,
    state_tx: watch::Sender<SchedulerState>,
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
}

impl RetrainingScheduler {
    pub fn new(
        log: Arc<dyn FeedbackLog>,
        registry: Arc<ModelRegistry>,
        fine_tuner: Arc<dyn FineTuner>,
        telemetry: Arc<dyn TelemetrySink>,
        config: SchedulerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        Self {
            log,
            registry,
            fine_tuner,
            telemetry,
            config,
            state_tx,
            consecutive_failures: 0,
            backoff_until: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: SchedulerState) {
        self.state_tx.send_replace(state);
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        let exponent = self.consecutive_failures.saturating_sub(1).min(16);
        let backoff = self
            .config
            .failure_backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.config.failure_backoff_max);
        self.backoff_until = Some(Instant::now() + backoff);
        warn!(
            "Retraining failed {} time(s) in a row, backing off for {:?}",
            self.consecutive_failures, backoff
        );
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.backoff_until = None;
    }

    /// Runs one collect → train → evaluate → deploy/discard cycle.
    pub async fn run_cycle(&mut self, source: WakeSource) -> CycleOutcome {
        if let Some(until) = self.backoff_until {
            let now = Instant::now();
            if now < until {
                let remaining = until - now;
                info!(
                    "Skipping {} retraining cycle, backing off for another {:?}",
                    source.as_str(),
                    remaining
                );
                self.telemetry.emit(&TelemetryEvent::CycleSkipped {
                    reason: "backoff".to_string(),
                });
                return CycleOutcome::BackedOff { remaining };
            }
        }

        info!("Starting retraining cycle ({})", source.as_str());
        let outcome = self.execute_cycle().await;
        self.set_state(SchedulerState::Idle);

        if outcome.is_failure() {
            self.record_failure();
        } else {
            self.record_success();
        }
        outcome
    }

    async fn execute_cycle(&self) -> CycleOutcome {
        self.set_state(SchedulerState::CollectingData);
        let since = Utc::now() - self.config.collection_window;
        let ratings = match self.log.ratings_since(since).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("Error collecting training data: {:#}", e);
                self.telemetry.emit(&TelemetryEvent::TrainingFailed {
                    reason: format!("collection: {}", e),
                });
                return CycleOutcome::CollectionFailed {
                    reason: format!("{:#}", e),
                };
            }
        };
        info!("Found {} feedback entries in the collection window", ratings.len());

        let required = self.config.min_training_samples;
        if ratings.len() < required {
            info!(
                "Skipping retraining cycle: not enough training data ({} samples, need {})",
                ratings.len(),
                required
            );
            self.telemetry.emit(&TelemetryEvent::CycleSkipped {
                reason: "insufficient_data".to_string(),
            });
            return CycleOutcome::InsufficientData {
                samples: ratings.len(),
                required,
            };
        }

        let examples = build_training_examples(&ratings);
        let (train, eval) = split_train_eval(examples);
        info!(
            "Collected {} training and {} evaluation examples from {} feedback entries",
            train.len(),
            eval.len(),
            ratings.len()
        );
        self.telemetry.emit(&TelemetryEvent::FineTuningStarted {
            train_examples: train.len(),
            eval_examples: eval.len(),
        });

        self.set_state(SchedulerState::Training);
        let base = self.registry.active();
        let output_path = self
            .config
            .models_dir
            .join(format!("reranker-v{}", base.version + 1));

        let timeout = self.config.fine_tune_timeout;
        let training = AssertUnwindSafe(self.fine_tuner.fine_tune(
            Arc::clone(&base.model),
            &train,
            &eval,
            &output_path,
        ))
        .catch_unwind();
        let candidate = match tokio::time::timeout(timeout, training).await {
            Ok(Ok(Ok(candidate))) => candidate,
            Ok(Ok(Err(e))) => return self.training_failed(e.to_string()),
            Ok(Err(_)) => return self.training_failed("fine-tuning panicked".to_string()),
            Err(_) => return self.training_failed(format!("fine-tuning timed out after {:?}", timeout)),
        };
        drop(base);

        self.set_state(SchedulerState::Evaluating);
        let eval_score = candidate.eval_score;
        let threshold = self.config.improvement_threshold;
        let improvement = eval_score - threshold;

        // Single-metric threshold, no smoothing. Noisy eval scores can flap.
        if eval_score > threshold {
            info!(
                "Candidate model shows improvement: {:.4} > {}",
                eval_score, threshold
            );
            self.set_state(SchedulerState::Deploying);
            let installed = self.registry.install(candidate.model, eval_score);
            if let Err(e) = append_deployment_record(
                &self.config.models_dir,
                installed.version,
                &output_path,
            ) {
                warn!("Could not write deployment log: {:#}", e);
            }
            info!("Deployed model version {}", installed.version);
            self.telemetry.emit(&TelemetryEvent::FineTuningCompleted {
                eval_score,
                deployed: true,
                improvement,
            });
            self.telemetry.emit(&TelemetryEvent::ModelDeployed {
                version: installed.version,
            });
            CycleOutcome::Deployed {
                version: installed.version,
                eval_score,
            }
        } else {
            info!(
                "Candidate model discarded: {:.4} <= {}",
                eval_score, threshold
            );
            self.set_state(SchedulerState::Discarding);
            drop(candidate);
            self.telemetry.emit(&TelemetryEvent::FineTuningCompleted {
                eval_score,
                deployed: false,
                improvement,
            });
            CycleOutcome::Discarded { eval_score }
        }
    }

    fn training_failed(&self, reason: String) -> CycleOutcome {
        error!("Retraining cycle failed: {}", reason);
        self.telemetry.emit(&TelemetryEvent::TrainingFailed {
            reason: reason.clone(),
        });
        CycleOutcome::TrainingFailed { reason }
    }

    /// Moves the scheduler onto a background task and returns its handle.
    pub fn spawn(self) -> SchedulerHandle {
        // Depth 1: duplicate wakes coalesce, at most one waits behind a running cycle.
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let (command_tx, command_rx) = mpsc::channel(8);
        let state_rx = self.state_tx.subscribe();
        let telemetry = Arc::clone(&self.telemetry);

        let task = tokio::spawn(self.run(wake_rx, command_rx));

        SchedulerHandle {
            trigger: RetrainTrigger { wake_tx, telemetry },
            command_tx,
            state_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut wake_rx: mpsc::Receiver<WakeSource>,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
    ) {
        let check_interval = self.config.check_interval.max(MIN_CHECK_INTERVAL);
        let mut ticker = tokio::time::interval(check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_cycle = Instant::now();
        info!(
            "Retraining scheduler started (every {:?}, checked every {:?})",
            self.config.retrain_interval, check_interval
        );

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(SchedulerCommand::RunOnce { reply }) => {
                            let outcome = self.run_cycle(WakeSource::Manual).await;
                            last_cycle = Instant::now();
                            if reply.send(outcome).is_err() {
                                warn!("Manual retraining requester went away before the result");
                            }
                        }
                        Some(SchedulerCommand::Shutdown) | None => break,
                    }
                }

                Some(source) = wake_rx.recv() => {
                    let outcome = self.run_cycle(source).await;
                    last_cycle = Instant::now();
                    info!("Retraining cycle ({}) finished: {:?}", source.as_str(), outcome);
                }

                _ = ticker.tick() => {
                    if last_cycle.elapsed() >= self.config.retrain_interval {
                        let outcome = self.run_cycle(WakeSource::Timer).await;
                        last_cycle = Instant::now();
                        info!("Scheduled retraining cycle finished: {:?}", outcome);
                    }
                }
            }
        }

        info!("Retraining scheduler has shut down");
    }
}

enum SchedulerCommand {
    RunOnce {
        reply: oneshot::Sender<CycleOutcome>,
    },
    Shutdown,
}

/// Cheap, cloneable wake-up for the scheduler loop.
#[derive(Clone)]
pub struct RetrainTrigger {
    wake_tx: mpsc::Sender<WakeSource>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl RetrainTrigger {
    /// Requests a cycle without waiting. Returns `false` if a wake is already
    /// pending or the scheduler is gone.
    pub fn request(&self, source: WakeSource) -> bool {
        let accepted = match self.wake_tx.try_send(source) {
            Ok(()) => {
                info!("Retraining requested ({})", source.as_str());
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                info!("Retraining already pending, coalescing {} wake", source.as_str());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Retraining scheduler is not running, dropping {} wake", source.as_str());
                false
            }
        };
        self.telemetry
            .emit(&TelemetryEvent::RetrainingRequested { accepted });
        accepted
    }
}

/// Control handle for a spawned [`RetrainingScheduler`].
pub struct SchedulerHandle {
    trigger: RetrainTrigger,
    command_tx: mpsc::Sender<SchedulerCommand>,
    state_rx: watch::Receiver<SchedulerState>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn trigger(&self) -> RetrainTrigger {
        self.trigger.clone()
    }

    pub fn wake(&self) -> bool {
        self.trigger.request(WakeSource::Manual)
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_rx.clone()
    }

    /// Runs one cycle on the scheduler task and waits for its outcome.
    pub async fn run_once(&self) -> Result<CycleOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::RunOnce { reply })
            .await
            .map_err(|_| anyhow!("Retraining scheduler has shut down"))?;
        outcome
            .await
            .context("Retraining scheduler dropped the cycle result")
    }

    /// Stops the loop after any in-flight cycle and waits for the task to end.
    pub async fn shutdown(self) -> Result<()> {
        if self.command_tx.send(SchedulerCommand::Shutdown).await.is_err() {
            warn!("Retraining scheduler already stopped");
        }
        self.task.await.context("Retraining scheduler task panicked")
    }
}

fn append_deployment_record(models_dir: &Path, version: u64, model_path: &Path) -> Result<()> {
    std::fs::create_dir_all(models_dir)
        .with_context(|| format!("Failed to create {}", models_dir.display()))?;
    let model_path = model_path.display().to_string();
    let record = DeploymentRecord {
        version,
        timestamp: Utc::now().to_rfc3339(),
        model_path: &model_path,
    };
    let line = serde_json::to_string(&record)?;
    let path = models_dir.join(DEPLOYMENT_LOG_FILE);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    writeln!(file, "{}", line).with_context(|| format!("Failed to append to {}", path.display()))?;
    Ok(())
}
