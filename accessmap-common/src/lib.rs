//! # AccessMap Common Library
//!
//! Shared code for AccessMap services including:
//! - Database bootstrap (schema, pragmas)
//! - Event types (AccessMapEvent) and the broadcast event bus
//! - Configuration loading and root folder resolution
//! - Geodesy helpers (coordinate validation, great-circle distance)
//! - Timestamp utilities

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod geo;
pub mod time;

pub use error::{Error, Result};
pub use crate::geo::GeoPoint;
