use crate::error::UsageError;
use crate::models::UsageRecord;

/// Platform usage-tracking service.
pub trait UsageService: Send + Sync {
    /// Usage records for activity in `[begin_millis, end_millis]`.
    fn query_usage(&self, begin_millis: i64, end_millis: i64) -> Result<Vec<UsageRecord>, UsageError>;

    /// Whether usage access is currently granted.
    fn has_permission(&self) -> bool;

    /// Ask the platform to grant usage access. Best-effort; the grant may arrive later or never.
    fn request_permission(&self);
}

/// Best-effort lookup of a human-readable name for an identifier.
pub trait LabelResolver: Send + Sync {
    fn resolve_label(&self, identifier: &str) -> Option<String>;
}
