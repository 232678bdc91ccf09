//! Test Helper Utilities
//!
//! Shared utilities for testing accessmap-ai

#![allow(dead_code)]

pub mod db_utils;
pub mod stub_extractor;

pub use db_utils::{create_test_db, create_test_state, test_pipeline_config};
pub use stub_extractor::{flag_set, jpeg_bytes, png_bytes, StubExtractor};
