//! Telemetry ingestion.
//!
//! Reads newline-delimited JSON records from an injected set of sources.
//! Ingestion never fails: a line that does not parse, a truncated final line,
//! or a source that cannot be opened is counted in [`IngestStats`] and
//! skipped.

use std::fs;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::event::Event;

/// Extension of telemetry files picked up by directory discovery.
pub const TELEMETRY_EXTENSION: &str = "jsonl";

/// Something that can be opened as a stream of telemetry lines.
pub trait RecordSource: std::fmt::Debug {
    /// Human-readable name used in logs.
    fn name(&self) -> String;

    /// Open the source for reading.
    fn open(&self) -> io::Result<Box<dyn BufRead>>;
}

/// A telemetry file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Create a source for the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for FileSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> io::Result<Box<dyn BufRead>> {
        let file = fs::File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// In-memory telemetry, mainly for tests and embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySource {
    name: String,
    contents: String,
}

impl MemorySource {
    /// Create a source from raw newline-delimited text.
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

impl RecordSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> io::Result<Box<dyn BufRead>> {
        Ok(Box::new(Cursor::new(self.contents.clone().into_bytes())))
    }
}

/// Where telemetry comes from.
///
/// A directory is re-listed on every call to [`TelemetrySource::sources`], so
/// files written since the last scan are seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetrySource {
    /// Every `*.jsonl` file directly inside a directory.
    Directory(PathBuf),
    /// An explicit list of files.
    Files(Vec<PathBuf>),
    /// In-memory sources.
    Memory(Vec<MemorySource>),
}

impl TelemetrySource {
    /// Materialize the current list of sources.
    #[must_use]
    pub fn sources(&self) -> Vec<Box<dyn RecordSource>> {
        match self {
            Self::Directory(dir) => discover_sources(dir)
                .into_iter()
                .map(|s| Box::new(s) as Box<dyn RecordSource>)
                .collect(),
            Self::Files(paths) => paths
                .iter()
                .map(|p| Box::new(FileSource::new(p.clone())) as Box<dyn RecordSource>)
                .collect(),
            Self::Memory(sources) => sources
                .iter()
                .map(|s| Box::new(s.clone()) as Box<dyn RecordSource>)
                .collect(),
        }
    }

    /// Lazily iterate every record of every source.
    #[must_use]
    pub fn records(&self) -> Records {
        Records::new(self.sources())
    }

    /// Read everything into memory.
    #[must_use]
    pub fn ingest(&self) -> Ingested {
        let mut records = self.records();
        let events: Vec<Event> = records.by_ref().collect();
        Ingested {
            events,
            stats: records.stats().clone(),
        }
    }
}

/// List telemetry files in a directory, sorted by path.
///
/// A missing or unreadable directory yields no sources.
#[must_use]
pub fn discover_sources(dir: &Path) -> Vec<FileSource> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Telemetry directory not readable");
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .map(|ext| ext == TELEMETRY_EXTENSION)
                    .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths.into_iter().map(FileSource::new).collect()
}

/// Ingestion accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Sources opened successfully.
    pub sources_read: u32,
    /// Sources that could not be opened.
    pub sources_skipped: u32,
    /// Records parsed.
    pub records: u64,
    /// Lines dropped because they did not parse (or could not be read).
    pub skipped_malformed: u64,
}

/// Result of eager ingestion.
#[derive(Debug, Clone, Default)]
pub struct Ingested {
    /// Parsed events in read order.
    pub events: Vec<Event>,
    /// Accounting for the run.
    pub stats: IngestStats,
}

/// Lazy iterator over the records of a list of sources.
///
/// Sources are opened one at a time, in order. [`Records::stats`] reflects
/// everything consumed so far.
pub struct Records {
    pending: std::vec::IntoIter<Box<dyn RecordSource>>,
    current: Option<(String, Box<dyn BufRead>)>,
    line: Vec<u8>,
    stats: IngestStats,
}

impl Records {
    /// Create an iterator over the given sources.
    #[must_use]
    pub fn new(sources: Vec<Box<dyn RecordSource>>) -> Self {
        Self {
            pending: sources.into_iter(),
            current: None,
            line: Vec::new(),
            stats: IngestStats::default(),
        }
    }

    /// Accounting so far.
    #[must_use]
    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    fn open_next(&mut self) -> bool {
        for source in self.pending.by_ref() {
            let name = source.name();
            match source.open() {
                Ok(reader) => {
                    self.stats.sources_read += 1;
                    debug!(source = %name, "Reading telemetry source");
                    self.current = Some((name, reader));
                    return true;
                }
                Err(e) => {
                    self.stats.sources_skipped += 1;
                    warn!(source = %name, error = %e, "Skipping unreadable telemetry source");
                }
            }
        }
        false
    }
}

impl Iterator for Records {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        loop {
            if self.current.is_none() && !self.open_next() {
                return None;
            }
            let Some((name, reader)) = self.current.as_mut() else {
                return None;
            };

            self.line.clear();
            match reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    self.current = None;
                }
                Ok(_) => {
                    let trimmed = trim_line(&self.line);
                    if trimmed.is_empty() {
                        continue;
                    }
                    match Event::from_json_line(trimmed) {
                        Ok(event) => {
                            self.stats.records += 1;
                            return Some(event);
                        }
                        Err(e) => {
                            self.stats.skipped_malformed += 1;
                            debug!(source = %name, error = %e, "Dropping malformed record");
                        }
                    }
                }
                Err(e) => {
                    // The rest of this source is unreachable.
                    self.stats.skipped_malformed += 1;
                    warn!(source = %name, error = %e, "Read failed, abandoning source");
                    self.current = None;
                }
            }
        }
    }
}

fn trim_line(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
