//! CLI command implementations.

mod config;
mod doctor;
mod init;
mod list;
mod run;
mod status;

pub use config::run_config;
pub use doctor::run_doctor;
pub use init::run_init;
pub use list::run_list;
pub use run::run_pipeline;
pub use status::run_status;
