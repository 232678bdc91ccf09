//! Pipeline services
//!
//! - Submission: extract, resolve, append, recompute
//! - Query: near-me reads with visibility filtering
//! - Maintenance: reassignment and replay

pub mod entrance_locks;
pub mod entrance_resolver;
pub mod image_store;
pub mod maintenance;
pub mod query_service;
pub mod submission;

pub use entrance_locks::EntranceLocks;
pub use entrance_resolver::{select_entrance, validate_location, EntranceResolver, ResolutionError};
pub use image_store::{ImageStore, StoredImage};
pub use maintenance::{MaintenanceError, MaintenanceService, ReassignmentOutcome, RecomputeSummary};
pub use query_service::{EntranceDetail, NearbyEntrance, NearbyPage, QueryError, QueryService, VisibilityPolicy};
pub use submission::{SubmissionError, SubmissionReceipt, SubmissionRequest, SubmissionService};
