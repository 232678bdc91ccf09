//! HTTP API handlers for accessmap-ai
//!
//! JSON over HTTP plus an SSE stream of pipeline events. Each submodule
//! exposes a `*_routes()` builder merged in [`crate::build_router`].

pub mod accessibility;
pub mod admin;
pub mod entrances;
pub mod health;
pub mod observations;
pub mod sse;

pub use accessibility::accessibility_routes;
pub use admin::admin_routes;
pub use entrances::entrance_routes;
pub use health::health_routes;
pub use observations::observation_routes;
pub use sse::event_stream;
