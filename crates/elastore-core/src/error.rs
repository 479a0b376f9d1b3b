//! Error types for the elastore-core crate

use crate::status::StatusCode;
use elastore_blockstore::BlockStoreError;
use thiserror::Error;

/// Result type alias using `StorageError`
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors raised inside the storage core.
///
/// These never cross the service boundary as-is: `StorageService` and
/// `FileHandle` translate them into a [`Status`](crate::Status) envelope.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Bucket not found
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// Bucket already exists
    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    /// Object not found
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// Object already exists
    #[error("object already exists: {bucket}/{key}")]
    ObjectAlreadyExists { bucket: String, key: String },

    /// No such subscription registered
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Invalid bucket name
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    /// Invalid object key
    #[error("invalid object key: {0}")]
    InvalidObjectKey(String),

    /// Any other malformed request
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Mutation of a sealed or read-only object
    #[error("object is not writeable: {identifier} ({reason})")]
    NotWriteable {
        identifier: String,
        reason: &'static str,
    },

    /// Local memory or storage budget cannot make room
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Service stopped, metadata service or backing store unreachable
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A bulk operation only partly completed
    #[error("partial failure: {0}")]
    PartialFailure(String),

    /// Local disk error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Block store error
    #[error("block store error: {0}")]
    BlockStore(#[from] BlockStoreError),

    /// Broken internal invariant
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Shorthand for [`StorageError::ObjectNotFound`]
    pub fn object_not_found(bucket: &str, key: &str) -> Self {
        Self::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    /// Shorthand for [`StorageError::ObjectAlreadyExists`]
    pub fn object_already_exists(bucket: &str, key: &str) -> Self {
        Self::ObjectAlreadyExists {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    /// The envelope kind this error is reported as
    pub fn code(&self) -> StatusCode {
        match self {
            Self::BucketNotFound(_)
            | Self::ObjectNotFound { .. }
            | Self::SubscriptionNotFound(_) => StatusCode::NotFound,
            Self::BucketAlreadyExists(_) | Self::ObjectAlreadyExists { .. } => {
                StatusCode::AlreadyExists
            }
            Self::InvalidBucketName(_) | Self::InvalidObjectKey(_) | Self::InvalidArgument(_) => {
                StatusCode::InvalidArgument
            }
            Self::NotWriteable { .. } => StatusCode::NotWriteable,
            Self::ResourceExhausted(_) => StatusCode::ResourceExhausted,
            Self::Unavailable(_) => StatusCode::Unavailable,
            Self::BlockStore(e) => match e {
                BlockStoreError::NotFound(_) | BlockStoreError::Corrupted { .. } => {
                    StatusCode::Internal
                }
                BlockStoreError::BlockTooLarge { .. } => StatusCode::ResourceExhausted,
                _ => StatusCode::Unavailable,
            },
            Self::PartialFailure(_) | Self::Io(_) | Self::Internal(_) => StatusCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            StorageError::object_not_found("b", "k").code(),
            StatusCode::NotFound
        );
        assert_eq!(
            StorageError::BucketAlreadyExists("b".into()).code(),
            StatusCode::AlreadyExists
        );
        assert_eq!(
            StorageError::InvalidBucketName("x".into()).code(),
            StatusCode::InvalidArgument
        );
        assert_eq!(
            StorageError::Io(std::io::Error::other("disk")).code(),
            StatusCode::Internal
        );
        assert_eq!(
            StorageError::BlockStore(BlockStoreError::Connection("refused".into())).code(),
            StatusCode::Unavailable
        );
    }
}
