//! Storage layer for contacts, campaigns and schedules
//!
//! SQLite holds everything a run reads and writes. Access goes through the
//! [`repository::ScheduleRepository`] trait.

pub mod checkpoint;
pub mod repository;
pub mod zip;

use anyhow::{Context, Result};

use crate::config::DatabaseConfig;

pub use checkpoint::{CheckpointStatus, RunCheckpoint};
pub use repository::{
    create_mock_repository, create_sqlite_repository, MockScheduleRepository, ScheduleRepository,
    SharedScheduleRepository, SqliteScheduleRepository,
};
pub use zip::{create_zip_resolver, SharedZipResolver, ZipPrefixRange, ZipPrefixTable, ZipResolver};

/// Open the configured SQLite database, creating the schema if needed
pub fn open_repository(config: &DatabaseConfig) -> Result<SharedScheduleRepository> {
    create_sqlite_repository(&config.sqlite_path).with_context(|| {
        format!(
            "Failed to open scheduler database: {}",
            config.sqlite_path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sqlite_initialization() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            sqlite_path: dir.path().join("nested").join("scheduler.db"),
        };

        let repo = open_repository(&config).unwrap();
        assert_eq!(repo.count_contacts().unwrap(), 0);
        assert!(config.sqlite_path.exists());
    }
}
