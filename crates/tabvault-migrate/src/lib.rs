//! tabvault-migrate: moving legacy plaintext records into encrypted envelopes
//!
//! Migration of one key:
//!   1. read the physical record (absent → skipped)
//!   2. already an envelope → skipped (idempotent, safe for racing tabs)
//!   3. unparseable → failed, nothing mutated
//!   4. seal and atomically replace the raw record (a tab that lost the race
//!      observes the envelope and reports skipped)
//!   5. read back and decrypt; a mismatch is a logged, counted warning and is
//!      never rolled back
//!
//! Also: batch migration with per-key isolation, rollback to plaintext,
//! verbatim backup/restore of physical records, and key-name sensitivity
//! recommendations.

pub mod backup;
pub mod manager;
pub mod metrics;
pub mod recommend;
pub mod record;

pub use backup::{BackupSnapshot, RestoreOptions, RestoreReport};
pub use manager::{KeyState, MigrateOptions, MigrationManager};
pub use metrics::MigrationMetrics;
pub use recommend::{get_migration_recommendations, Priority, Recommendation};
pub use record::{MigrationRecord, MigrationStatus, MigrationSummary};
