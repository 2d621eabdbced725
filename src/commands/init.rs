use anyhow::Result;

use email_scheduler::config::Config;
use email_scheduler::storage::open_repository;

/// Create the database file and schema
pub fn init(config: &Config) -> Result<()> {
    let repo = open_repository(&config.database)?;
    let contacts = repo.count_contacts()?;
    let schedules = repo.count_schedules()?;

    println!("Database ready: {}", config.database.sqlite_path.display());
    println!("  Contacts:  {contacts}");
    println!("  Schedules: {schedules}");
    println!("  State rules loaded: {}", config.state_rules.len());

    tracing::info!(
        path = %config.database.sqlite_path.display(),
        contacts,
        schedules,
        "Database initialized"
    );
    Ok(())
}
