//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Application directory layout (relative to the data root)
pub mod layout {
    /// Directory name under the platform data dir when no --root is given
    pub const APP_DIR: &str = "phos-music-manager";

    /// Settings folder (configs, per-game music data, app.log)
    pub const SETTINGS: &str = "settings";

    /// Saved loop data records, inside the settings folder
    pub const LOOP_DATA: &str = "loop-data";

    /// Default converter output folder
    pub const MUSIC_BUILD: &str = "music-build";

    /// External tools folder
    pub const DEPENDENCIES: &str = "dependencies";
}

/// Persisted document file names
pub mod files {
    pub const APP_CONFIG: &str = "app-config.json";
    pub const GAMES_CONFIG: &str = "games-config.json";
    pub const APP_LOG: &str = "app.log";
    pub const DEFAULT_MUSIC_DATA: &str = "default-music-data.json";
    pub const CURRENT_MUSIC_DATA: &str = "current-music-data.json";

    /// Converter support manifest, published next to the converter executable
    pub const GAME_SUPPORT: &str = "game-support.json";

    /// Extracted original songs, under `<converter dir>/<game>/`
    pub const ORIGINAL_SONGS: &str = "original-songs";

    /// Default built-in converter location, relative to the dependencies folder
    pub const DEFAULT_CONVERTER: &str =
        "phos-music-converter/release-build/PhosMusicConverterCMD.exe";
}

/// Debounced save queue tuning
pub mod save {
    /// Debounce window before a queued document is written
    pub const DELAY_MS: u64 = 1500;

    /// Total write attempts per flush before the entry is dropped
    pub const MAX_ATTEMPTS: u32 = 3;
}

/// Loop data lookup
pub mod loops {
    /// Suffix appended to a song file to find its loop data document
    pub const SIDECAR_SUFFIX: &str = ".p4g";

    /// Suffix of the text sidecar carrying raw-format loop points
    pub const TXTH_SUFFIX: &str = ".txth";

    /// Extension (lowercase, no dot) of raw PCM style song files
    pub const RAW_EXTENSION: &str = "raw";

    /// Package-relative folder searched next to the song file
    pub const SONGS_FOLDER: &str = "songs";

    pub const TXTH_START_KEY: &str = "loop_start_sample";
    pub const TXTH_END_KEY: &str = "loop_end_sample";

    /// Loop samples must stay below this bound (signed 32-bit max)
    pub const MAX_SAMPLE: u32 = 2_147_483_647;
}

/// Music data conventions
pub mod music {
    /// Category excluded from normal listing
    pub const HIDDEN_CATEGORY: &str = "hidden";

    /// Category given to hidden songs enabled by a legacy song pack
    pub const LEGACY_PACK_CATEGORY: &str = "Song Preset";

    /// Sentinel preset value that restores the game's default music data
    pub const DEFAULT_PRESET: &str = "default";

    /// Preset file folder holding song-pack audio files
    pub const PRESET_SONGS_FOLDER: &str = "songs";
}

/// Logging
pub mod logging {
    /// In-memory log history cap (written to app.log on flush)
    pub const MAX_HISTORY: usize = 2000;
}

/// IPC socket location
pub mod ipc {
    /// Socket path relative to XDG_RUNTIME_DIR or the cache dir
    pub const SOCKET: &str = "phos-music-manager/manager.sock";

    /// Maximum message size (10 MB) to prevent DoS via memory exhaustion
    pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

    /// Buffered notifications per client before the slowest one lags
    pub const EVENT_CAPACITY: usize = 64;
}
