//! Core domain model and contracts for promptfix.

pub mod history;
pub mod protocol;
pub mod strategy;

pub use history::HistoryEntry;
pub use protocol::*;
pub use strategy::{Strategy, StrategyMode};
