//! # Elastore Core
//!
//! Client-facing contract of the elastore storage service.
//!
//! This crate provides:
//! - **Result envelopes**: [`Status`] and [`StatusOr`] for every fallible call
//! - **Storage service**: buckets, objects, directory and prefix operations
//! - **File handles**: partial reads and writes, truncation, metadata, sealing
//! - **Subscriptions**: change notifications for buckets, keys and prefixes
//! - **Object stores**: per-bucket backing stores shared through the metadata service
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     StorageService    │   FileHandle    │
//! ├─────────────────────────────────────────┤
//! │              Storage core               │
//! ├─────────────┬─────────────┬─────────────┤
//! │   Memory    │ Spill files │ BlockStore  │
//! └─────────────┴─────────────┴─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use elastore_core::{Config, StorageService};
//!
//! let service = StorageService::new(Config::new("meta:4381"));
//! service.start().await.into_result()?;
//! service.create_bucket("data").await.into_result()?;
//! let file = service.create("data", "logs/a.txt", false).await.into_result()?;
//! file.write(b"hello", 0, 5).await.into_result()?;
//! ```

pub mod bucket;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod file;
pub mod metadata_service;
pub mod object_store;
pub mod service;
pub mod status;
pub mod subscription;

mod engine;
mod object;

pub use bucket::MAX_KEY_LEN;
pub use config::Config;
pub use descriptor::ObjectDescriptor;
pub use engine::{ServiceStats, RELOCATION_WATERMARK};
pub use error::{Result, StorageError};
pub use file::FileHandle;
pub use metadata_service::{LocalMetadataService, MetadataService};
pub use object::MAX_METADATA_LEN;
pub use object_store::{MemoryConnector, ObjectStoreConfig, ObjectStoreConnector, SecretKey};
pub use service::{StorageService, StorageServiceBuilder};
pub use status::{Status, StatusCode, StatusOr};
pub use subscription::{ChangeKind, ChangeNotification, SubscriptionEvent, SubscriptionType};
