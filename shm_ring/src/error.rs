//! Error types for ring channels.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Creating, mapping or unlinking the backing segment failed.
    #[error("shared memory {name}: {source}")]
    Region { name: String, source: io::Error },

    /// The segment does not hold a ring of the expected request/response types.
    #[error("ring layout mismatch in {0}")]
    LayoutMismatch(String),

    /// The segment exists but its creator has not finished initializing it.
    #[error("ring {0} is not initialized yet")]
    NotReady(String),

    /// A blocking wait observed the shutdown token.
    #[error("wait cancelled by shutdown")]
    Cancelled,

    /// The owning side dropped the ring.
    #[error("server disconnected")]
    ServerDisconnected,

    /// A semaphore, mutex or condition variable call failed.
    #[error("synchronization primitive failed: {0}")]
    Sync(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
