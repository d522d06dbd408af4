//! Sector range assignment for new sessions.

use crate::protocol::{ClientId, SectorLimits};

/// Decides which sectors a newly registered client may read.
pub trait RangePolicy: Send {
    fn assign(&mut self, client: ClientId) -> SectorLimits;
}

impl<F> RangePolicy for F
where
    F: FnMut(ClientId) -> SectorLimits + Send,
{
    fn assign(&mut self, client: ClientId) -> SectorLimits {
        self(client)
    }
}

/// `[-id, id]`: a range symmetric around zero sized by the client id.
#[derive(Debug, Clone, Copy, Default)]
pub struct MirroredRange;

impl RangePolicy for MirroredRange {
    fn assign(&mut self, client: ClientId) -> SectorLimits {
        let id = client.0.saturating_abs();
        SectorLimits::new(-id, id)
    }
}

/// Every client may read the whole source.
#[derive(Debug, Clone, Copy)]
pub struct WholeSource {
    pub sector_count: u64,
}

impl RangePolicy for WholeSource {
    fn assign(&mut self, _client: ClientId) -> SectorLimits {
        match self.sector_count {
            0 => SectorLimits::EMPTY,
            n => SectorLimits::new(0, clamp_sector(n - 1)),
        }
    }
}

/// Splits the source into contiguous windows handed out in registration
/// order, starting over at sector 0 once the source is exhausted.
#[derive(Debug, Clone)]
pub struct Partitioned {
    window: u64,
    sector_count: u64,
    next: u64,
}

impl Partitioned {
    pub fn new(window: u64, sector_count: u64) -> Self {
        assert!(window > 0, "partition window must be > 0");
        Self {
            window,
            sector_count,
            next: 0,
        }
    }
}

impl RangePolicy for Partitioned {
    fn assign(&mut self, _client: ClientId) -> SectorLimits {
        if self.sector_count == 0 {
            return SectorLimits::EMPTY;
        }
        if self.next >= self.sector_count {
            self.next = 0;
        }
        let start = self.next;
        let end = (start + self.window).min(self.sector_count) - 1;
        self.next = end + 1;
        SectorLimits::new(clamp_sector(start), clamp_sector(end))
    }
}

fn clamp_sector(n: u64) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
