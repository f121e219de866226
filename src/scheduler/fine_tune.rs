// src/scheduler/fine_tune.rs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::config::{EVAL_FRACTION_DIVISOR, MIN_EVAL_EXAMPLES};
use crate::embedding::EmbeddingModel;
use crate::errors::ExternalError;
use crate::models::{RatingRow, rating_to_reward};

pub const FINE_TUNE_SERVICE: &str = "fine-tuning routine";

/// A (query, chunk text) pair labeled with the target similarity in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub query: String,
    pub text: String,
    pub label: f64,
}

/// A trained candidate and its evaluation score on the held-out examples.
pub struct FineTuneOutcome {
    pub model: Arc<dyn EmbeddingModel>,
    pub eval_score: f64,
}

/// Fine-tunes `base` into a candidate model written under `output_path`.
#[async_trait]
pub trait FineTuner: Send + Sync {
    async fn fine_tune(
        &self,
        base: Arc<dyn EmbeddingModel>,
        train: &[TrainingExample],
        eval: &[TrainingExample],
        output_path: &Path,
    ) -> Result<FineTuneOutcome, ExternalError>;
}

/// One example per rating, labeled `(rating - 1) / 4`. Clear preferences
/// (4+ or 2-) appear twice.
pub fn build_training_examples(ratings: &[RatingRow]) -> Vec<TrainingExample> {
    let mut examples = Vec::with_capacity(ratings.len() * 2);
    for row in ratings {
        let example = TrainingExample {
            query: row.query.clone(),
            text: row.chunk_text.clone(),
            label: rating_to_reward(row.rating),
        };
        if row.rating >= 4 || row.rating <= 2 {
            examples.push(example.clone());
        }
        examples.push(example);
    }
    examples
}

/// Training uses every example; evaluation uses the last `max(10, n / 5)`
/// of them (at most all).
pub fn split_train_eval(
    examples: Vec<TrainingExample>,
) -> (Vec<TrainingExample>, Vec<TrainingExample>) {
    let eval_size = MIN_EVAL_EXAMPLES
        .max(examples.len() / EVAL_FRACTION_DIVISOR)
        .min(examples.len());
    let eval = examples[examples.len() - eval_size..].to_vec();
    (examples, eval)
}
