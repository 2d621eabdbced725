pub mod generate;
pub mod init;
pub mod run;

// Re-export command functions for convenience
pub use generate::generate_contacts;
pub use init::init;
pub use run::{run, RunParams};
