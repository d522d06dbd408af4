//! Error types for the file service.

use crate::protocol::{ClientId, SectorLimits, SectorNumber};
use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Channel(#[from] shm_ring::Error),

    /// The client asked for a sector outside its session limits.
    #[error("sector {sector} is outside the session limits {limits}")]
    SectorOutOfRange {
        sector: SectorNumber,
        limits: SectorLimits,
    },

    /// The server answered the registration with an empty range.
    #[error("registration of client {0} was rejected")]
    RegistrationRejected(ClientId),

    #[error("pid file {}: {source}", .path.display())]
    PidFile { path: PathBuf, source: io::Error },

    /// Setting up the channel of a new session failed.
    #[error("session setup for client {client} failed: {source}")]
    SessionSetup {
        client: ClientId,
        source: shm_ring::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
