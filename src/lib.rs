pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod ingestion;
pub mod query;
pub mod search;
