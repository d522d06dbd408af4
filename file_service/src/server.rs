//! The daemon side: registrar, per-session workers and the file server.
//!
//! ```text
//! client ──► registration ring ──► Registrar ──spawns──► SessionWorker
//! client ──► session ring ──► SessionWorker ──► WorkList ──► FileServer
//! ```
//!
//! Each session owns a ring channel and one WorkList node. The FileServer
//! is the only thread that touches the data source.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::policy::RangePolicy;
use crate::protocol::{
    ClientId, RegistrationChannel, SectorData, SectorLimits, SectorNumber, SessionChannel,
    channel_name,
};
use crate::source::DataSource;
use crate::worklist::{Cancelled, NodeHandle, WorkList};
use shm_ring::{SharedRegion, Shutdown};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// One sector lookup travelling from a session worker to the file server.
#[derive(Debug, Clone, Copy)]
pub struct SectorJob {
    pub sector: SectorNumber,
    pub data: SectorData,
}

type SectorWorkList = WorkList<SectorJob>;

// =============================================================================
// FileService
// =============================================================================

/// A running daemon: the registrar thread and the file server thread.
pub struct FileService {
    shutdown: Shutdown,
    registrar_name: String,
    registrar: Option<JoinHandle<Result<()>>>,
    file_server: Option<JoinHandle<()>>,
}

impl FileService {
    /// Creates the registration channel and starts serving.
    ///
    /// Fails if the registration segment cannot be created, including when
    /// another service already uses the name.
    pub fn start(
        config: ServerConfig,
        source: Box<dyn DataSource>,
        policy: Box<dyn RangePolicy>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let channel = unsafe {
            RegistrationChannel::create(&config.registrar_name, config.registrar_capacity)
        }?;
        let registrar_name = channel.name().to_string();
        let worklist = Arc::new(SectorWorkList::new());

        let file_server = FileServer {
            source,
            worklist: worklist.clone(),
            shutdown: shutdown.clone(),
        };
        let file_server = thread::Builder::new()
            .name("file-server".into())
            .spawn(move || file_server.run())?;

        let registrar = Registrar {
            channel,
            sessions: Sessions {
                channel_prefix: config.channel_prefix,
                session_capacity: config.session_capacity,
                policy,
                worklist,
                shutdown: shutdown.clone(),
                active: HashMap::new(),
            },
        };
        let registrar = match thread::Builder::new()
            .name("registrar".into())
            .spawn(move || registrar.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                shutdown.trigger();
                let _ = file_server.join();
                return Err(e.into());
            }
        };

        tracing::info!(registrar = %registrar_name, "file service started");
        Ok(Self {
            shutdown,
            registrar_name,
            registrar: Some(registrar),
            file_server: Some(file_server),
        })
    }

    pub fn registrar_name(&self) -> &str {
        &self.registrar_name
    }

    /// A clone of the token stopping this service.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Blocks until the service stopped. Returns the error that made the
    /// registrar give up, if any.
    pub fn wait(mut self) -> Result<()> {
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        let mut result = Ok(());
        if let Some(registrar) = self.registrar.take() {
            match registrar.join() {
                Ok(r) => result = r,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        // The registrar triggers shutdown on its way out.
        if let Some(file_server) = self.file_server.take() {
            if let Err(panic) = file_server.join() {
                std::panic::resume_unwind(panic);
            }
        }
        tracing::info!(registrar = %self.registrar_name, "file service stopped");
        result
    }
}

impl Drop for FileService {
    fn drop(&mut self) {
        if self.registrar.is_some() || self.file_server.is_some() {
            self.shutdown.trigger();
            if let Err(e) = self.join() {
                tracing::error!(error = %e, "file service failed");
            }
        }
    }
}

// =============================================================================
// Registrar
// =============================================================================

struct Registrar {
    channel: RegistrationChannel,
    sessions: Sessions,
}

impl Registrar {
    fn run(self) -> Result<()> {
        let Registrar {
            channel,
            mut sessions,
        } = self;
        let shutdown = sessions.shutdown.clone();
        let mut fatal = None;

        tracing::info!(name = channel.name(), "registrar serving");
        let served = channel.serve(&shutdown, |ex| {
            let client = ex.request();
            let limits = match sessions.register(client) {
                Ok(limits) => limits,
                Err(e) => {
                    tracing::error!(%client, error = %e, "session setup failed, shutting down");
                    fatal.get_or_insert(e);
                    shutdown.trigger();
                    SectorLimits::EMPTY
                }
            };
            ex.respond(limits);
        });

        shutdown.trigger();
        sessions.join_all();
        drop(channel);
        tracing::info!("registrar stopped");

        served?;
        fatal.map_or(Ok(()), Err)
    }
}

struct Session {
    limits: SectorLimits,
    worker: JoinHandle<()>,
}

/// Registrar-side session bookkeeping.
struct Sessions {
    channel_prefix: String,
    session_capacity: u32,
    policy: Box<dyn RangePolicy>,
    worklist: Arc<SectorWorkList>,
    shutdown: Shutdown,
    active: HashMap<ClientId, Session>,
}

impl Sessions {
    fn register(&mut self, client: ClientId) -> Result<SectorLimits> {
        if let Some(session) = self.active.get(&client) {
            if !session.worker.is_finished() {
                tracing::debug!(%client, limits = %session.limits, "client already registered");
                return Ok(session.limits);
            }
            if let Some(stale) = self.active.remove(&client) {
                join_session(client, stale.worker);
            }
        }

        let limits = self.policy.assign(client);
        if limits.is_empty() {
            tracing::info!(%client, "no sectors for client, registration refused");
            return Ok(limits);
        }

        let name = channel_name(&self.channel_prefix, client);
        let channel = self
            .create_channel(&name)
            .map_err(|source| Error::SessionSetup { client, source })?;
        let node = self.worklist.insert();

        let worker = SessionWorker {
            client,
            limits,
            channel,
            node,
            worklist: self.worklist.clone(),
            shutdown: self.shutdown.clone(),
        };
        // On failure the closure drops the worker, which tears the session down.
        let worker = thread::Builder::new()
            .name(format!("session-{client}"))
            .spawn(move || worker.run())?;

        tracing::info!(%client, %limits, channel = %name, "registered client");
        self.active.insert(client, Session { limits, worker });
        Ok(limits)
    }

    fn create_channel(&self, name: &str) -> shm_ring::Result<SessionChannel> {
        match unsafe { SessionChannel::create(name, self.session_capacity) } {
            Err(shm_ring::Error::Region { source, .. })
                if source.kind() == io::ErrorKind::AlreadyExists =>
            {
                // Left behind by a daemon that did not shut down cleanly.
                tracing::warn!(name, "replacing stale session channel");
                SharedRegion::unlink(name).map_err(|source| shm_ring::Error::Region {
                    name: name.to_string(),
                    source,
                })?;
                unsafe { SessionChannel::create(name, self.session_capacity) }
            }
            other => other,
        }
    }

    fn join_all(&mut self) {
        for (client, session) in self.active.drain() {
            join_session(client, session.worker);
        }
    }
}

/// Joins a session worker. Returns `false` and logs if it panicked.
fn join_session(client: ClientId, worker: JoinHandle<()>) -> bool {
    let clean = worker.join().is_ok();
    if !clean {
        tracing::error!(%client, "session worker panicked");
    }
    clean
}

// =============================================================================
// SessionWorker
// =============================================================================

/// Serves one client's channel by forwarding lookups to the file server.
///
/// Dropping the worker removes its node and unlinks its channel.
struct SessionWorker {
    client: ClientId,
    limits: SectorLimits,
    channel: SessionChannel,
    node: NodeHandle,
    worklist: Arc<SectorWorkList>,
    shutdown: Shutdown,
}

impl SessionWorker {
    fn run(self) {
        tracing::debug!(client = %self.client, channel = self.channel.name(), "session started");
        let served = self.channel.serve(&self.shutdown, |ex| match self.fetch(ex.request()) {
            Some(data) => ex.respond(data),
            None => ex.refuse(),
        });
        match served {
            Ok(()) => tracing::debug!(client = %self.client, "session ended"),
            Err(e) => tracing::error!(client = %self.client, error = %e, "session failed"),
        }
    }

    /// `None` when shutdown cut the lookup short.
    fn fetch(&self, sector: SectorNumber) -> Option<SectorData> {
        if !self.limits.contains(sector) {
            tracing::warn!(
                client = %self.client,
                sector,
                limits = %self.limits,
                "sector outside session limits"
            );
            return Some(SectorData::zeroed());
        }

        let job = SectorJob {
            sector,
            data: SectorData::zeroed(),
        };
        match self.worklist.mark_work(self.node, job, &self.shutdown) {
            Ok(job) => Some(job.data),
            Err(Cancelled) => None,
        }
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        self.worklist.remove(self.node);
    }
}

// =============================================================================
// FileServer
// =============================================================================

struct FileServer {
    source: Box<dyn DataSource>,
    worklist: Arc<SectorWorkList>,
    shutdown: Shutdown,
}

impl FileServer {
    fn run(mut self) {
        tracing::info!(sectors = ?self.source.sector_count(), "file server started");
        let mut last = None;
        let mut served = 0u64;

        while let Ok(mut claim) = self.worklist.scan_for_work(last, &self.shutdown) {
            let sector = claim.job().sector;
            claim.job_mut().data = match self.source.lookup(sector) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(sector, error = %e, "sector lookup failed");
                    SectorData::zeroed()
                }
            };
            last = Some(claim.handle());
            claim.complete();
            served += 1;
        }

        tracing::info!(served, "file server stopped");
    }
}
