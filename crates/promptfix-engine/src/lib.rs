//! Generation orchestration for promptfix: directive building, the retrying
//! upstream call, response parsing, and the session state machine.

pub mod gate;
pub mod history;
pub mod llm;
pub mod orchestrator;

pub use gate::{GateState, TokenGate};
pub use history::{HistoryCache, HISTORY_CAPACITY};
pub use orchestrator::{Orchestrator, Outcome, Settings, VERIFICATION_REQUIRED_MESSAGE};

use promptfix_adapters::config::Config;
use promptfix_adapters::history::FileHistoryStore;
use promptfix_core::protocol::HistoryPersistence;

/// Session wired against the real gateway and on-disk history.
pub type GatewaySession = Orchestrator<llm::GatewayClient>;

/// History cache backed by the platform data directory. Falls back to an
/// in-memory-only cache when no data directory exists.
pub fn open_history() -> HistoryCache {
    let store: Box<dyn HistoryPersistence> = match FileHistoryStore::default_location() {
        Some(store) => Box::new(store),
        None => {
            tracing::warn!("no data directory available; history will not be saved");
            Box::new(NoHistory)
        }
    };
    HistoryCache::load(store)
}

/// Build a session from loaded config: gateway client, history, and settings.
pub fn open_session(config: &Config) -> anyhow::Result<GatewaySession> {
    let client = llm::GatewayClient::from_config(config)?;
    Ok(Orchestrator::new(
        client,
        Settings::from_config(config),
        open_history(),
    ))
}

struct NoHistory;

impl HistoryPersistence for NoHistory {
    fn load(&self) -> Vec<promptfix_core::history::HistoryEntry> {
        Vec::new()
    }

    fn save(&self, _entries: &[promptfix_core::history::HistoryEntry]) -> anyhow::Result<()> {
        Ok(())
    }
}
