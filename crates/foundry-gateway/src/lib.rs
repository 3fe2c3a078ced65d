//! Foundry Gateway - HTTP review surface
//!
//! Humans review queued protected-file writes here, and can watch the
//! deployment table and the build loop.
//!
//! # Routes
//!
//! ```text
//! GET  /health
//! GET  /api/approvals              pending approvals
//! GET  /api/approvals/all
//! GET  /api/approvals/:id
//! POST /api/approvals/:id/approve  404 unless pending
//! POST /api/approvals/:id/deny     404 unless pending
//! POST /api/approvals/clear        {"removed": n}
//! GET  /api/instances
//! GET  /api/loop
//! POST /api/loop/stop
//! ```

pub mod error;
pub mod gateway;

pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayState};

/// Gateway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
