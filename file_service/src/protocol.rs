//! Wire types and shared memory names used by clients and the server.

use shm_ring::{RingChannel, Serial};
use std::fmt;

/// Size of one sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Segment clients open to register.
pub const REGISTRAR_NAME: &str = "/fs_registrar";

/// Per-client channels are named `<prefix>.<client id>`.
pub const CHANNEL_PREFIX: &str = "/fs_ringbuffer";

pub const REGISTRAR_SLOT_COUNT: u32 = 10;
pub const SESSION_SLOT_COUNT: u32 = 10;

/// Identifies a client. By convention the client's process id.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub i32);

unsafe impl Serial for ClientId {}

impl ClientId {
    /// The id of the calling process.
    pub fn current() -> Self {
        Self(std::process::id() as i32)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub type SectorNumber = i32;

/// Inclusive range of sectors a session may read.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorLimits {
    pub start: i32,
    pub end: i32,
}

unsafe impl Serial for SectorLimits {}

impl SectorLimits {
    /// Answer to a registration the server could not establish.
    pub const EMPTY: Self = Self { start: 0, end: -1 };

    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, sector: SectorNumber) -> bool {
        self.start <= sector && sector <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

impl fmt::Display for SectorLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Contents of one sector.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SectorData {
    pub data: [u8; SECTOR_SIZE],
}

unsafe impl Serial for SectorData {}

impl SectorData {
    pub const fn zeroed() -> Self {
        Self {
            data: [0; SECTOR_SIZE],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Default for SectorData {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for SectorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.data.iter().take(32).position(|&b| b == 0).unwrap_or(32);
        f.debug_struct("SectorData")
            .field("head", &String::from_utf8_lossy(&self.data[..shown]))
            .finish_non_exhaustive()
    }
}

/// Registration: client id in, sector limits out.
pub type RegistrationChannel = RingChannel<ClientId, SectorLimits>;

/// Session: sector number in, sector contents out.
pub type SessionChannel = RingChannel<SectorNumber, SectorData>;

/// Name of the private channel of `client`.
pub fn channel_name(prefix: &str, client: ClientId) -> String {
    format!("{}.{}", prefix, client)
}
