//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers)
//!     → security middleware (request.rs snapshot, validation)
//!     → server.rs handlers (health, redirect, forward to data backend)
//!     → response.rs (error contract, upstream response cleanup)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestDescriptor, RequestId, RequestIdExt, X_REQUEST_ID};
pub use server::{build_router, AppState, HttpServer};
