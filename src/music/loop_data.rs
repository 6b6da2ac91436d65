//! Loop point lookup for replacement song files
//!
//! A song file's loop points may live in several places. They are tried in
//! order and the first readable one wins:
//! 1. the saved record in the app's loop-data folder
//! 2. a `<file>.p4g` sidecar next to the song
//! 3. a `songs/<name>.p4g` sidecar next to the song (preset packages)
//! 4. a `<file>.txth` text sidecar, for raw files only
//! 5. otherwise a zeroed record is written to the loop-data folder

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::constants::loops;
use crate::error::{MusicDataError, StoreError};
use crate::music::model::checked_sample;
use crate::paths::AppPaths;
use crate::persistence::{self, Document, DocumentStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopPoints {
    pub loopstart: u32,
    pub loopend: u32,
}

impl LoopPoints {
    /// Both samples inside the accepted loop range
    pub fn checked(self) -> Result<LoopPoints, MusicDataError> {
        checked_sample(self.loopstart.into())?;
        checked_sample(self.loopend.into())?;
        Ok(self)
    }
}

/// On-disk loop data shape: `{ "settings": { "loopstart", "loopend" } }`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRecord {
    pub settings: LoopPoints,
}

impl LoopRecord {
    pub fn new(loopstart: u32, loopend: u32) -> Self {
        Self {
            settings: LoopPoints { loopstart, loopend },
        }
    }

    pub fn to_document(self, path: &Path) -> Result<Document, StoreError> {
        persistence::to_document(path, &self)
    }
}

/// Where resolved loop points came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSource {
    Saved,
    Sidecar,
    SongsFolder,
    Txth,
    Created,
}

/// `<file><suffix>`, keeping the original extension
fn with_suffix(file: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(file.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Sidecar loop data path next to a song file
pub fn sidecar_path(song_file: &Path) -> PathBuf {
    with_suffix(song_file, loops::SIDECAR_SUFFIX)
}

fn songs_folder_path(song_file: &Path) -> Option<PathBuf> {
    let name = song_file.file_name()?;
    let mut file = name.to_os_string();
    file.push(loops::SIDECAR_SUFFIX);
    let dir = song_file.parent().unwrap_or_else(|| Path::new(""));
    Some(dir.join(loops::SONGS_FOLDER).join(file))
}

fn is_raw(song_file: &Path) -> bool {
    song_file
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(loops::RAW_EXTENSION))
}

/// A record whose samples are out of range counts as missing
fn read_record(store: &dyn DocumentStore, path: &Path) -> Option<LoopPoints> {
    let points = persistence::load::<LoopRecord>(store, path, true).ok()?.settings;
    points
        .checked()
        .inspect_err(|e| warn!(path = %path.display(), error = %e, "Ignoring loop data"))
        .ok()
}

/// Leading run of ASCII digits, after any whitespace
fn leading_digits(value: &str) -> Option<&str> {
    let value = value.trim_start();
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    (end > 0).then(|| &value[..end])
}

/// Parse `loop_start_sample = N` / `loop_end_sample = N` lines. Only the
/// leading digits of a value count, so trailing comments are fine. Keys
/// without a number stay at zero. `None` if a sample is out of range.
pub fn parse_txth(contents: &str) -> Option<LoopPoints> {
    let mut points = LoopPoints::default();
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let Some(digits) = leading_digits(value) else {
            continue;
        };
        let sample = digits
            .parse::<i64>()
            .map_err(|_| MusicDataError::LoopOutOfRange(i64::MAX))
            .and_then(checked_sample)
            .ok()?;
        match key.trim() {
            loops::TXTH_START_KEY => points.loopstart = sample,
            loops::TXTH_END_KEY => points.loopend = sample,
            _ => {}
        }
    }
    Some(points)
}

fn read_txth(song_file: &Path) -> Option<LoopPoints> {
    let path = with_suffix(song_file, loops::TXTH_SUFFIX);
    match fs::read_to_string(&path) {
        Ok(contents) => {
            let points = parse_txth(&contents);
            if points.is_none() {
                warn!(path = %path.display(), "Ignoring txth with out of range loop samples");
            }
            points
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!(path = %path.display(), "Raw files require a txth file present!");
            None
        }
        Err(e) => {
            persistence::log_io_error(&path, &e);
            None
        }
    }
}

/// Resolve loop points for `song_file`. Never fails: any unreadable source
/// falls through to the next one, and the last resort is a zeroed record.
pub fn resolve(store: &dyn DocumentStore, paths: &AppPaths, song_file: &Path) -> (LoopPoints, LoopSource) {
    let name = song_file.file_name().unwrap_or_default().to_string_lossy();
    let saved = paths.loop_data_file(song_file);

    if let Some(points) = read_record(store, &saved) {
        debug!(song = %name, "Loaded saved loop data");
        return (points, LoopSource::Saved);
    }

    if let Some(points) = read_record(store, &sidecar_path(song_file)) {
        debug!(song = %name, "Loaded local loop data");
        return (points, LoopSource::Sidecar);
    }

    if let Some(points) = songs_folder_path(song_file).and_then(|path| read_record(store, &path)) {
        debug!(song = %name, "Loaded songs folder loop data");
        return (points, LoopSource::SongsFolder);
    }

    if is_raw(song_file)
        && let Some(points) = read_txth(song_file)
    {
        debug!(song = %name, "Loaded txth loop data");
        return (points, LoopSource::Txth);
    }

    let record = LoopRecord::default();
    match persistence::save(store, &saved, &record) {
        Ok(()) => debug!(song = %name, "New loop data created"),
        Err(e) => error!(song = %name, error = %e, "Failed to load or create loop data!"),
    }
    (record.settings, LoopSource::Created)
}
