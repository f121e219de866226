// src/reinforcement/mod.rs

// Module declarations
mod bandit;
mod reward_store;
mod types;

// Public re-exports
pub use bandit::{BanditReranker, load_snapshot, save_snapshot};
pub use reward_store::RewardStore;

// Core types used across ranking and feedback
pub use types::{
    BanditSnapshot, BanditStats, BestChunk, RankedChunk, RewardUpdate, SelectionType,
};
