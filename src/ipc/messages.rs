//! IPC message types for GUI ↔ manager process communication

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{AppConfig, GameSupport, GamesConfig};
use crate::music::{MusicData, Song};
use crate::session::Setting;

/// Requests sent from the GUI to the manager process
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all_fields = "camelCase")]
pub enum Request {
    /// CSS class of the selected game's theme
    GameTheme,

    /// Names of every available theme
    AppThemes,

    /// Current music data (may be empty)
    MusicData,

    GamesConfig,

    AppConfig,

    /// Encoded format and accepted extensions for the selected game
    GameSupport,

    /// Assign a replacement file to a song (replies with the updated song)
    SetReplacement { song_id: String, file_path: PathBuf },

    RemoveReplacement { song_id: String },

    /// Change loop points. For batch songs `song_id` is the song file path
    /// and the loop data is written next to it.
    SetLoop {
        song_id: String,
        #[serde(default)]
        is_batch: bool,
        start_sample: i64,
        end_sample: i64,
    },

    /// Change one setting (replies with both configs)
    ChangeConfig { setting: Setting },

    /// Apply a preset file, optionally clearing current songs first
    LoadPreset {
        path: PathBuf,
        #[serde(default)]
        clear_first: bool,
    },

    /// Start over from cleared songs or the game's default music data
    NewPreset {
        #[serde(default)]
        from_default: bool,
    },

    SavePreset { path: PathBuf },

    /// Save everything and run the converter for the selected game
    GenerateBuild,

    /// Export the replaced songs through the converter and write a
    /// song-pack preset at `path` pointing at them
    ExportPreset { path: PathBuf },

    /// Encode every song file in a folder for the selected game
    BatchConvert { folder: PathBuf },

    /// Extract the selected game's original music
    ExtractMusic,

    /// Write every queued save now
    Flush,

    /// Health check
    Ping,

    /// Request graceful shutdown
    Shutdown,
}

/// Replies to a single request
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all_fields = "camelCase")]
pub enum Response {
    Theme(String),
    Themes(Vec<String>),
    MusicData(Option<MusicData>),
    GamesConfig(GamesConfig),
    AppConfig(AppConfig),
    GameSupport(GameSupport),
    Song(Option<Song>),
    Success(bool),
    Configs {
        app_config: AppConfig,
        games_config: GamesConfig,
    },

    /// Health check response
    Pong,

    /// Acknowledgment that request was processed
    Ready,

    /// Error occurred; nothing was changed
    Error(String),
}

/// Settings whose change the GUI must apply immediately
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    /// Present when the music data was replaced; the inner value may be empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_data: Option<Option<MusicData>>,
}

/// Unsolicited updates pushed to every connected GUI
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all_fields = "camelCase")]
pub enum Notification {
    MusicDataChanged { updated_music_data: Option<MusicData> },
    ConfigChanged { updated_settings: UpdatedSettings },
}

/// Everything the manager writes to a client socket
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Reply(Response),
    Event(Notification),
}
