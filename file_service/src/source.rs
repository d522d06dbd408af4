//! Where sector contents come from.

use crate::protocol::{SECTOR_SIZE, SectorData, SectorNumber};
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Backing store of the file server. Only the file server thread calls it.
pub trait DataSource: Send {
    fn lookup(&mut self, sector: SectorNumber) -> io::Result<SectorData>;

    /// Number of sectors, when the source has a fixed size.
    fn sector_count(&self) -> Option<u64>;
}

fn sector_offset(sector: SectorNumber) -> io::Result<u64> {
    u64::try_from(sector)
        .map(|s| s * SECTOR_SIZE as u64)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("negative sector {sector}")))
}

// =============================================================================
// PatternSource
// =============================================================================

const PATTERN_HEADER: &str = "Sector ";
const PATTERN_CONTENT: &str = ": The quick brown fox jumped over the lazy dog.";
const PATTERN_END: &str = "end.";

/// Generates the test pattern: every sector reads
/// `Sector NNN: The quick brown fox jumped over the lazy dog....end.`,
/// with the number zero-padded to the width of the sector count.
#[derive(Debug, Clone)]
pub struct PatternSource {
    sector_count: u64,
    digits: usize,
}

impl PatternSource {
    pub fn new(sector_count: u64) -> Self {
        Self {
            sector_count,
            digits: sector_count.to_string().len(),
        }
    }

    /// Renders one sector. Sectors past the count are rendered the same way.
    pub fn render(&self, sector: u64) -> SectorData {
        let text = format!(
            "{PATTERN_HEADER}{sector:0width$}{PATTERN_CONTENT}",
            width = self.digits
        );
        let mut out = SectorData {
            data: [b'.'; SECTOR_SIZE],
        };
        let len = text.len().min(SECTOR_SIZE - PATTERN_END.len());
        out.data[..len].copy_from_slice(&text.as_bytes()[..len]);
        out.data[SECTOR_SIZE - PATTERN_END.len()..].copy_from_slice(PATTERN_END.as_bytes());
        out
    }
}

impl DataSource for PatternSource {
    fn lookup(&mut self, sector: SectorNumber) -> io::Result<SectorData> {
        let offset = sector_offset(sector)?;
        Ok(self.render(offset / SECTOR_SIZE as u64))
    }

    fn sector_count(&self) -> Option<u64> {
        Some(self.sector_count)
    }
}

// =============================================================================
// FileSource
// =============================================================================

/// Reads sectors from a regular file. Reads past the end are zero-filled.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for FileSource {
    fn lookup(&mut self, sector: SectorNumber) -> io::Result<SectorData> {
        let offset = sector_offset(sector)?;
        let mut out = SectorData::zeroed();
        let mut filled = 0;
        while filled < SECTOR_SIZE {
            let n = match self.file.read_at(&mut out.data[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            filled += n;
        }
        Ok(out)
    }

    fn sector_count(&self) -> Option<u64> {
        Some(self.len.div_ceil(SECTOR_SIZE as u64))
    }
}

// =============================================================================
// SourceSpec
// =============================================================================

/// Command-line name of a data source: `pattern:<sectors>` or a file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Pattern(u64),
    File(PathBuf),
}

impl FromStr for SourceSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix("pattern:") {
            Some(count) => count
                .parse()
                .map(SourceSpec::Pattern)
                .map_err(|e| format!("invalid sector count {count:?}: {e}")),
            None if s.is_empty() => Err("empty data source".to_string()),
            None => Ok(SourceSpec::File(PathBuf::from(s))),
        }
    }
}

impl SourceSpec {
    pub fn open(&self) -> io::Result<Box<dyn DataSource>> {
        Ok(match self {
            SourceSpec::Pattern(count) => Box::new(PatternSource::new(*count)),
            SourceSpec::File(path) => Box::new(FileSource::open(path)?),
        })
    }
}
