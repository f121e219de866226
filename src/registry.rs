// src/registry.rs

use chrono::{DateTime, Utc};
use log::info;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::embedding::EmbeddingModel;

/// An immutable, versioned handle to a trained embedding model.
pub struct ModelVersion {
    pub version: u64,
    pub model: Arc<dyn EmbeddingModel>,
    pub created_at: DateTime<Utc>,
    /// Evaluation score that got this version deployed; `None` for the base model.
    pub eval_score: Option<f64>,
}

impl fmt::Debug for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelVersion")
            .field("version", &self.version)
            .field("model_id", &self.model.model_id())
            .field("created_at", &self.created_at)
            .field("eval_score", &self.eval_score)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub version: u64,
    pub base_model: String,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub eval_score: Option<f64>,
}

/// Holds the single active model version.
///
/// Readers clone the `Arc` and keep using that version for the rest of their
/// request; an install is one pointer swap under a write lock held only for
/// the swap itself.
pub struct ModelRegistry {
    active: RwLock<Arc<ModelVersion>>,
    base_model: String,
}

impl ModelRegistry {
    /// Starts at version 1 with the base model.
    pub fn new(base: Arc<dyn EmbeddingModel>) -> Self {
        let base_model = base.model_id().to_string();
        let initial = ModelVersion {
            version: 1,
            model: base,
            created_at: Utc::now(),
            eval_score: None,
        };
        Self {
            active: RwLock::new(Arc::new(initial)),
            base_model,
        }
    }

    pub fn active(&self) -> Arc<ModelVersion> {
        self.active.read().clone()
    }

    pub fn current_version(&self) -> u64 {
        self.active.read().version
    }

    /// Installs `model` as the next version (current + 1) and returns it.
    /// The superseded version stays alive for readers still holding it.
    pub fn install(&self, model: Arc<dyn EmbeddingModel>, eval_score: f64) -> Arc<ModelVersion> {
        let mut active = self.active.write();
        let next = Arc::new(ModelVersion {
            version: active.version + 1,
            model,
            created_at: Utc::now(),
            eval_score: Some(eval_score),
        });
        let previous = std::mem::replace(&mut *active, next.clone());
        drop(active);

        info!(
            "Model registry: v{} ({}) superseded by v{} ({})",
            previous.version,
            previous.model.model_id(),
            next.version,
            next.model.model_id()
        );
        next
    }

    pub fn info(&self) -> ModelInfo {
        let active = self.active();
        ModelInfo {
            version: active.version,
            base_model: self.base_model.clone(),
            model_id: active.model.model_id().to_string(),
            created_at: active.created_at,
            eval_score: active.eval_score,
        }
    }
}
