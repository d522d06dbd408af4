//! Client side of the file service.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    ClientId, RegistrationChannel, SectorData, SectorLimits, SectorNumber, SessionChannel,
    channel_name,
};
use shm_ring::Shutdown;

/// A registered session.
pub struct FsClient {
    id: ClientId,
    limits: SectorLimits,
    channel: SessionChannel,
    shutdown: Shutdown,
}

impl FsClient {
    /// Registers `id` with the server and opens the session channel.
    ///
    /// `shutdown` cancels this call and every later read.
    pub fn register(config: &ClientConfig, id: ClientId, shutdown: Shutdown) -> Result<Self> {
        let limits = {
            let registrar = unsafe { RegistrationChannel::open(&config.registrar_name) }?;
            registrar.request(id, &shutdown)?
        };
        if limits.is_empty() {
            return Err(Error::RegistrationRejected(id));
        }

        let channel = unsafe { SessionChannel::open(channel_name(&config.channel_prefix, id)) }?;
        tracing::debug!(client = %id, %limits, channel = channel.name(), "registered");
        Ok(Self {
            id,
            limits,
            channel,
            shutdown,
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn limits(&self) -> SectorLimits {
        self.limits
    }

    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    /// Reads one sector. Sectors outside the session limits are refused
    /// without contacting the server.
    pub fn read_sector(&self, sector: SectorNumber) -> Result<SectorData> {
        if !self.limits.contains(sector) {
            return Err(Error::SectorOutOfRange {
                sector,
                limits: self.limits,
            });
        }
        Ok(self.channel.request(sector, &self.shutdown)?)
    }
}
