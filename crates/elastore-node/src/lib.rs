//! # Elastore Node
//!
//! Runs one elastore storage node.
//!
//! This crate provides:
//! - **Configuration**: defaults, config file, `ELASTORE_*` environment and flags
//! - **Lifecycle**: start, graceful shutdown with relocation drain
//! - **Diagnostics**: `GET /health` and `GET /stats` over HTTP
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   CLI / env / config file  →  Config    │
//! ├─────────────────────────────────────────┤
//! │   Diagnostics server (axum)             │
//! ├─────────────────────────────────────────┤
//! │   elastore-core StorageService          │
//! └─────────────────────────────────────────┘
//! ```

pub mod config;
pub mod routes;
pub mod server;

pub use config::{load_config, ConfigOverrides};
pub use routes::create_router;
pub use server::run_node;
