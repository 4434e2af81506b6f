//! Per-object outcomes collected over a batch.

use std::fmt;

/// Why an object was left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The lock could not be acquired within `lock_timeout` (SQLSTATE 55P03)
    LockTimeoutExceeded,
    /// Any other per-object failure after the batch was allowed to continue
    Failed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockTimeoutExceeded => write!(f, "lock timeout exceeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An object a batch could not mutate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedObject {
    /// Qualified object, e.g. `public.orders`
    pub object: String,
    /// What was being done to it, e.g. the trigger name or index name
    pub detail: String,
    /// Why it was skipped
    pub reason: SkipReason,
    /// Server message
    pub message: String,
}

impl SkippedObject {
    /// Object skipped because its lock was not available in time
    pub fn lock_timeout(
        object: impl Into<String>,
        detail: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            detail: detail.into(),
            reason: SkipReason::LockTimeoutExceeded,
            message: message.into(),
        }
    }

    /// Object whose statement failed for another reason
    pub fn failed(
        object: impl Into<String>,
        detail: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            detail: detail.into(),
            reason: SkipReason::Failed,
            message: message.into(),
        }
    }
}

impl fmt::Display for SkippedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}: {}",
            self.object, self.detail, self.reason, self.message
        )
    }
}

/// Print the end-of-run summary of skipped objects
pub fn print_skipped_summary(skipped: &[SkippedObject]) {
    if skipped.is_empty() {
        return;
    }
    println!("\n{} object(s) were skipped:", skipped.len());
    for object in skipped {
        println!("  {object}");
    }
    println!("Run the operation again to retry them.");
}
