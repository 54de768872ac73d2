use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Possible errors encountered while answering a block-view query.
///
/// Everything after query start is reported through [`Observer::error`]
/// exactly once and abandons the query. `Cancelled` is the exception: it is
/// used internally to unwind an aborted query and never reaches the
/// observer. The `io::Error` is shared behind an `Arc` so one failed read
/// can be broadcast to every waiter of the cache entry.
///
/// [`Observer::error`]: crate::Observer::error
#[derive(Error, Debug, Clone)]
pub enum BlockViewError {
    #[error("Invalid argument: {}", .0)]
    InvalidArgument(String),
    #[error("Error occurred: {}", .0)]
    IoError(Arc<io::Error>),
    #[error("Block decompression failed: {}", .0)]
    Decompression(String),
    #[error("The file was invalid: {}", .0)]
    InvalidFile(String),
    #[error("The index traversal left unread nodes.")]
    TraversalIncomplete,
    #[error("The query was cancelled.")]
    Cancelled,
}

impl From<io::Error> for BlockViewError {
    fn from(error: io::Error) -> Self {
        BlockViewError::IoError(Arc::new(error))
    }
}
