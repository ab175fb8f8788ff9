//! Recording sessions
//!
//! The recorder rolls over to a new archive, `M<unix seconds>.ndf`, at a
//! fixed period. Archives that follow each other closely belong to one
//! session; a pause longer than the gap threshold starts the next one.
//!
//! The gap is measured from the end of the session so far (archive start
//! plus decoded duration) to the start of the next archive. A gap exactly
//! at the threshold keeps the session going.

use crate::config::TimingConfig;
use crate::formats::container::parse_archive_name;
use crate::recording::Recording;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Default pause in seconds that separates two sessions
pub const DEFAULT_SESSION_GAP: f64 = 3600.0;

/// One archive file with its start time taken from the name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Archive {
    pub path: PathBuf,
    /// UNIX seconds encoded in the file name
    pub start: i64,
    /// Seconds of recorded data, if any record decoded
    pub duration: Option<f64>,
}

impl Archive {
    /// Archive for `path`, or `None` if the name carries no start time
    pub fn from_path(path: &Path, duration: Option<f64>) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?;
        let start = parse_archive_name(stem)?;
        Some(Self {
            path: path.to_path_buf(),
            start,
            duration,
        })
    }

    /// UNIX time at which the archive's data ends
    pub fn end(&self) -> f64 {
        self.start as f64 + self.duration.unwrap_or(0.0)
    }
}

/// Chronologically ordered archives without a long pause between them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    start: i64,
    end: f64,
    archives: Vec<Archive>,
}

impl Session {
    fn new(archive: Archive) -> Self {
        Self {
            start: archive.start,
            end: archive.end(),
            archives: vec![archive],
        }
    }

    fn push(&mut self, archive: Archive) {
        self.end = self.end.max(archive.end());
        self.archives.push(archive);
    }

    /// UNIX start of the first archive
    pub fn start(&self) -> i64 {
        self.start
    }

    /// UNIX time at which the last data of the session ends
    pub fn end(&self) -> f64 {
        self.end
    }

    /// Output directory name, `session_<start>`
    pub fn name(&self) -> String {
        format!("session_{}", self.start)
    }

    pub fn archives(&self) -> &[Archive] {
        &self.archives
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.archives.iter().map(|a| a.path.as_path())
    }
}

/// Split archives into sessions wherever the pause exceeds `gap_secs`
///
/// Archives are sorted by start time first; equal starts keep path order.
pub fn group_archives(mut archives: Vec<Archive>, gap_secs: f64) -> Vec<Session> {
    archives.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.path.cmp(&b.path)));

    let mut sessions: Vec<Session> = Vec::new();
    for archive in archives {
        if let Some(session) = sessions.last_mut() {
            if archive.start as f64 - session.end <= gap_secs {
                session.push(archive);
                continue;
            }
        }
        sessions.push(Session::new(archive));
    }
    sessions
}

/// Group NDF files into sessions, decoding each file for its duration
///
/// Files whose name carries no `M<unix seconds>` start are left out with a
/// warning. A file that cannot be read still joins a session, with no
/// duration.
pub fn group_sessions(paths: &[PathBuf], gap_secs: f64, timing: &TimingConfig) -> Vec<Session> {
    let archives: Vec<Archive> = paths
        .iter()
        .filter_map(|path| {
            let mut archive = match Archive::from_path(path, None) {
                Some(archive) => archive,
                None => {
                    log::warn!("{:?}: name carries no archive start time, not grouped", path);
                    return None;
                }
            };
            archive.duration = match Recording::open(path) {
                Ok(recording) => recording.duration(timing),
                Err(e) => {
                    log::warn!("{:?}: no duration ({})", path, e);
                    None
                }
            };
            Some(archive)
        })
        .collect();

    let sessions = group_archives(archives, gap_secs);
    log::info!("Grouped {} files into {} sessions", paths.len(), sessions.len());
    sessions
}
