//! Song and MusicData documents
//!
//! Mutations never touch `self`; each one returns the updated document so the
//! session can substitute it and notify observers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::constants::{loops, music};
use crate::error::MusicDataError;
use crate::music::loop_data::LoopPoints;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: String,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub original_file: Option<String>,
    #[serde(default)]
    pub replacement_file_path: Option<PathBuf>,
    #[serde(default)]
    pub loop_start_sample: u32,
    #[serde(default)]
    pub loop_end_sample: u32,
    #[serde(default)]
    pub output_file_path: String,
    #[serde(default)]
    pub extra_data: Option<String>,
}

impl Song {
    pub fn is_hidden(&self) -> bool {
        self.category == music::HIDDEN_CATEGORY
    }

    /// Assign or remove the replacement file, keeping the enabled flag and
    /// loop points consistent with it.
    pub fn set_replacement(&mut self, file: Option<PathBuf>, loop_points: LoopPoints) {
        match file {
            Some(file) => {
                self.is_enabled = true;
                self.loop_start_sample = loop_points.loopstart;
                self.loop_end_sample = loop_points.loopend;
                self.replacement_file_path = Some(file);
            }
            None => self.clear(),
        }
    }

    pub fn clear(&mut self) {
        self.replacement_file_path = None;
        self.is_enabled = false;
        self.loop_start_sample = 0;
        self.loop_end_sample = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicData {
    pub game: String,
    pub songs: Vec<Song>,
}

/// Check a loop sample against the accepted range
pub fn checked_sample(sample: i64) -> Result<u32, MusicDataError> {
    u32::try_from(sample)
        .ok()
        .filter(|s| *s < loops::MAX_SAMPLE)
        .ok_or(MusicDataError::LoopOutOfRange(sample))
}

impl MusicData {
    pub fn song(&self, id: &str) -> Option<&Song> {
        self.songs.iter().find(|song| song.id == id)
    }

    fn updated(&self, id: &str, apply: impl FnOnce(&mut Song)) -> Result<MusicData, MusicDataError> {
        let mut next = self.clone();
        let song = next
            .songs
            .iter_mut()
            .find(|song| song.id == id)
            .ok_or_else(|| MusicDataError::SongNotFound(id.to_string()))?;
        apply(song);
        Ok(next)
    }

    /// Set (or with `None`, remove) a song's replacement file.
    /// `loop_points` are the resolved loop points for the new file.
    pub fn with_replacement(
        &self,
        id: &str,
        file: Option<&Path>,
        loop_points: LoopPoints,
    ) -> Result<MusicData, MusicDataError> {
        self.updated(id, |song| {
            match file {
                Some(file) => info!(
                    song = %song.name,
                    file = %file.file_name().unwrap_or_default().to_string_lossy(),
                    "Replacing song"
                ),
                None => info!(song = %song.name, "Removed replacement"),
            }
            song.set_replacement(file.map(Path::to_path_buf), loop_points);
        })
    }

    /// Overwrite a song's loop points. Start is not required to precede end.
    pub fn with_loop(&self, id: &str, start: i64, end: i64) -> Result<MusicData, MusicDataError> {
        let start = checked_sample(start)?;
        let end = checked_sample(end)?;
        self.updated(id, |song| {
            song.loop_start_sample = start;
            song.loop_end_sample = end;
        })
    }

    /// Every song back to the "no replacement" state
    pub fn cleared(&self) -> MusicData {
        let mut next = self.clone();
        next.songs.iter_mut().for_each(Song::clear);
        next
    }
}
