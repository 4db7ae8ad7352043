use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One past successful initial generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Original intent; the dedup key.
    pub intent: String,
    pub optimized_output: String,
    #[serde(default)]
    pub refinement_questions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        intent: impl Into<String>,
        optimized_output: impl Into<String>,
        refinement_questions: Vec<String>,
    ) -> Self {
        Self {
            intent: intent.into(),
            optimized_output: optimized_output.into(),
            refinement_questions,
            created_at: Utc::now(),
        }
    }
}
