//! Local-first personal CRM: an entity store with live queries, a security
//! gate in front of it, and JSON snapshot backups to disk or Google Drive.

pub mod backup;
pub mod companies;
pub mod config;
pub mod contacts;
pub mod custom_fields;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod events;
pub mod id;
pub mod interactions;
pub mod live;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod notifications;
pub mod profile;
pub mod reminders;
pub mod repo;
pub mod security;
pub mod settings;
pub mod state;
pub mod tags;
pub mod time;

pub use error::{AppError, AppResult, ErrorKind};
pub use logging::{init_logging, init_with_file_sink};
pub use state::AppState;
