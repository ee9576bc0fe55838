pub mod alert;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod monitor;
pub mod paths;
pub mod source;
pub mod store;
pub mod strategy;
pub mod token_db;
pub mod types;

pub use error::{FetchError, PulseError, Result};
