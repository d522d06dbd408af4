//! A sector file service over shared memory ring channels.
//!
//! Clients register through a well-known [`RegistrationChannel`] and get a
//! private [`SessionChannel`] plus the range of sectors they may read. Each
//! session is served by its own worker thread; all workers funnel their
//! lookups through a [`WorkList`] into one file server thread that owns
//! the [`DataSource`].
//!
//! ```text
//! FsClient ──register──► Registrar ──► SessionWorker ─┐
//! FsClient ──read──────► SessionWorker ──► WorkList ──┴─► FileServer ──► DataSource
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod pidfile;
pub mod policy;
pub mod protocol;
pub mod server;
pub mod signals;
pub mod source;
pub mod worklist;

pub use client::FsClient;
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use policy::{MirroredRange, Partitioned, RangePolicy, WholeSource};
pub use protocol::{
    ClientId, RegistrationChannel, SECTOR_SIZE, SectorData, SectorLimits, SectorNumber,
    SessionChannel,
};
pub use server::FileService;
pub use shm_ring::Shutdown;
pub use source::{DataSource, FileSource, PatternSource, SourceSpec};
pub use worklist::WorkList;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the stderr log subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
