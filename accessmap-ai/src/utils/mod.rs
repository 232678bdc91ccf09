//! Utility modules for accessmap-ai

pub mod db_retry;

pub use db_retry::retry_write;
