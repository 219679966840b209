pub mod chain;
pub mod config;
pub mod database;
pub mod error;

pub use error::LedgerError;
