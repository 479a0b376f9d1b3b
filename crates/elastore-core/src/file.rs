//! File handles
//!
//! A [`FileHandle`] is a capability on one open object. Cloning it is cheap
//! and every clone refers to the same object; the object's state lives in
//! the storage core, not in the handle.
//!
//! ```text
//! Open(writeable) ──seal──▶ Sealed ──▶ released
//! Open(read-only) ────────────────────▶ released
//! ```

use crate::{
    engine::StorageCore,
    object::ObjectEntry,
    status::{Status, StatusOr},
};
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Handle on an open object
#[derive(Clone)]
pub struct FileHandle {
    core: Arc<StorageCore>,
    entry: Arc<ObjectEntry>,
    identifier: String,
    writeable: bool,
}

impl FileHandle {
    pub(crate) fn new(core: Arc<StorageCore>, entry: Arc<ObjectEntry>, writeable: bool) -> Self {
        let location = entry.location();
        Self {
            core,
            entry,
            identifier: format!("{}/{}", location.bucket, location.key),
            writeable,
        }
    }

    /// `bucket/key` at the time the handle was opened
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether writes through this handle can succeed: it was opened
    /// writeable and the object has not been sealed or deleted since.
    pub async fn is_writeable(&self) -> bool {
        self.writeable && matches!(self.core.is_sealed(&self.entry).await, Ok(false))
    }

    /// Current size, including every completed write
    pub async fn size(&self) -> StatusOr<u64> {
        self.core.size(&self.entry).await.into()
    }

    pub async fn is_sealed(&self) -> StatusOr<bool> {
        self.core.is_sealed(&self.entry).await.into()
    }

    pub async fn metadata(&self) -> StatusOr<String> {
        self.core.metadata(&self.entry).await.into()
    }

    /// Read up to `length` bytes at `position` into `buffer`.
    ///
    /// Returns fewer bytes only at end of object, and `0` at or past it.
    /// `length` larger than `buffer` fails with `InvalidArgument`.
    #[instrument(skip(self, buffer), fields(file = %self.identifier))]
    pub async fn read(&self, buffer: &mut [u8], position: u64, length: u64) -> StatusOr<u64> {
        self.core
            .read(&self.entry, buffer, position, length)
            .await
            .into()
    }

    /// Write `buffer[..length]` at `position`, growing the object if needed
    #[instrument(skip(self, buffer), fields(file = %self.identifier))]
    pub async fn write(&self, buffer: &[u8], position: u64, length: u64) -> Status {
        self.core
            .write(
                &self.entry,
                &self.identifier,
                self.writeable,
                buffer,
                position,
                length,
            )
            .await
            .into()
    }

    /// Set the size; growing zero-fills
    #[instrument(skip(self), fields(file = %self.identifier))]
    pub async fn truncate(&self, size: u64) -> Status {
        self.core
            .truncate(&self.entry, &self.identifier, self.writeable, size)
            .await
            .into()
    }

    /// Replace the metadata; with `seal`, also seal in the same step
    #[instrument(skip(self, value), fields(file = %self.identifier))]
    pub async fn set_metadata(&self, value: &str, seal: bool) -> Status {
        self.core
            .set_metadata(&self.entry, &self.identifier, self.writeable, value, seal)
            .await
            .into()
    }

    /// Make the object immutable. Sealing twice succeeds.
    #[instrument(skip(self), fields(file = %self.identifier))]
    pub async fn seal(&self) -> Status {
        self.core
            .seal(&self.entry, &self.identifier, self.writeable)
            .await
            .into()
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("identifier", &self.identifier)
            .field("writeable", &self.writeable)
            .finish()
    }
}
