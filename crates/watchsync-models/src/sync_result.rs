use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many non-fatal error messages a run retains for display.
pub const MAX_RETAINED_ERRORS: usize = 10;

/// Aggregate outcome of one reconciliation run. Transient; never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncResult {
    pub added_to_trakt: u32,
    pub added_to_plex: u32,
    pub ratings_synced: u32,
    pub unmatched: u32,
    pub dry_run: bool,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    /// First `MAX_RETAINED_ERRORS` non-fatal errors, in occurrence order.
    pub errors: Vec<String>,
    /// Count of errors dropped once the retained list was full.
    pub errors_truncated: u32,
}

impl SyncResult {
    /// Record a non-fatal error, keeping retention bounded.
    pub fn push_error(&mut self, message: impl Into<String>) {
        if self.errors.len() < MAX_RETAINED_ERRORS {
            self.errors.push(message.into());
        } else {
            self.errors_truncated += 1;
        }
    }

    pub fn total_errors(&self) -> u32 {
        self.errors.len() as u32 + self.errors_truncated
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_retention_is_bounded() {
        let mut result = SyncResult::default();
        for i in 0..25 {
            result.push_error(format!("error {}", i));
        }
        assert_eq!(result.errors.len(), MAX_RETAINED_ERRORS);
        assert_eq!(result.errors[0], "error 0");
        assert_eq!(result.errors_truncated, 15);
        assert_eq!(result.total_errors(), 25);
    }
}
