use serde::{Deserialize, Serialize};

pub const REASON_NOT_FOUND: &str = "key not found";
pub const REASON_ALREADY_MIGRATED: &str = "already migrated";
pub const REASON_CORRUPTED: &str = "corrupted data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Succeeded,
    Skipped,
    Failed,
}

/// Outcome of migrating one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub key: String,
    pub status: MigrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MigrationRecord {
    pub fn succeeded(key: &str) -> Self {
        Self::new(key, MigrationStatus::Succeeded, None)
    }

    pub fn skipped(key: &str, reason: impl Into<String>) -> Self {
        Self::new(key, MigrationStatus::Skipped, Some(reason.into()))
    }

    pub fn failed(key: &str, reason: impl Into<String>) -> Self {
        Self::new(key, MigrationStatus::Failed, Some(reason.into()))
    }

    fn new(key: &str, status: MigrationStatus, reason: Option<String>) -> Self {
        MigrationRecord {
            key: key.to_string(),
            status,
            reason,
        }
    }
}

/// Aggregate of a batch migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub results: Vec<MigrationRecord>,
}

impl MigrationSummary {
    pub fn push(&mut self, record: MigrationRecord) {
        self.total += 1;
        match record.status {
            MigrationStatus::Succeeded => self.succeeded += 1,
            MigrationStatus::Skipped => self.skipped += 1,
            MigrationStatus::Failed => self.failed += 1,
        }
        self.results.push(record);
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    pub fn get(&self, key: &str) -> Option<&MigrationRecord> {
        self.results.iter().find(|r| r.key == key)
    }
}

impl FromIterator<MigrationRecord> for MigrationSummary {
    fn from_iter<I: IntoIterator<Item = MigrationRecord>>(iter: I) -> Self {
        let mut summary = MigrationSummary::default();
        for record in iter {
            summary.push(record);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let summary: MigrationSummary = vec![
            MigrationRecord::succeeded("a"),
            MigrationRecord::failed("b", REASON_CORRUPTED),
            MigrationRecord::skipped("c", REASON_NOT_FOUND),
            MigrationRecord::succeeded("d"),
        ]
        .into_iter()
        .collect();

        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.is_clean());
        assert_eq!(summary.get("b").unwrap().reason.as_deref(), Some(REASON_CORRUPTED));
    }

    #[test]
    fn test_record_json_shape() {
        let json = serde_json::to_string(&MigrationRecord::succeeded("k")).unwrap();
        assert_eq!(json, r#"{"key":"k","status":"succeeded"}"#);

        let json = serde_json::to_string(&MigrationRecord::skipped("k", REASON_ALREADY_MIGRATED))
            .unwrap();
        assert_eq!(
            json,
            r#"{"key":"k","status":"skipped","reason":"already migrated"}"#
        );
    }
}
