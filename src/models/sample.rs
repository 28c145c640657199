use serde::{Deserialize, Serialize};

/// One foreground observation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundSample {
    pub identifier: String,
    pub display_name: String,
    pub observed_at_millis: i64,
}

impl ForegroundSample {
    /// A sample whose label has not been resolved yet; the identifier stands in for it.
    pub fn new(identifier: &str, observed_at_millis: i64) -> Self {
        Self {
            identifier: identifier.to_string(),
            display_name: identifier.to_string(),
            observed_at_millis,
        }
    }
}

/// A usage-service row: an identifier and when it was last in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub identifier: String,
    pub last_time_used_millis: i64,
}

impl UsageRecord {
    pub fn new(identifier: &str, last_time_used_millis: i64) -> Self {
        Self {
            identifier: identifier.to_string(),
            last_time_used_millis,
        }
    }
}
