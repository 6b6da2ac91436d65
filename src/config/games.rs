//! Game registry: supported games, their settings and the selected game

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::config::theme::Theme;
use crate::error::{ConfigError, StoreError};
use crate::paths::AppPaths;
use crate::persistence::{self, DocumentStore};

pub const PERSONA_4_GOLDEN: &str = "Persona 4 Golden";
pub const PERSONA_5: &str = "Persona 5";
pub const PERSONA_3_FES: &str = "Persona 3 FES";
pub const PERSONA_4: &str = "Persona 4";
pub const KINGDOM_HEARTS_3: &str = "Kingdom Hearts 3";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamesConfig {
    #[serde(default)]
    pub selected_game: Option<String>,
    pub games: Vec<GameEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEntry {
    pub name: String,
    pub theme: String,
    #[serde(default)]
    pub installed: bool,
    /// Custom converter name; `None` means the built-in converter
    #[serde(default)]
    pub tool: Option<String>,
    pub settings: GameSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSettings {
    #[serde(default)]
    pub music_data_path: Option<PathBuf>,
    #[serde(default)]
    pub game_directory: Option<PathBuf>,
    #[serde(default)]
    pub output_directory: Option<PathBuf>,
    #[serde(default)]
    pub low_performance: bool,
    #[serde(default)]
    pub encoded_format: Option<String>,
    /// Extensions with their leading dot, e.g. ".wav"
    #[serde(default)]
    pub supported_filetypes: Vec<String>,
}

fn game(name: &str, theme: Theme) -> GameEntry {
    GameEntry {
        name: name.to_string(),
        theme: theme.name().to_string(),
        installed: false,
        tool: None,
        settings: GameSettings::default(),
    }
}

impl Default for GamesConfig {
    fn default() -> Self {
        let mut p4g = game(PERSONA_4_GOLDEN, Theme::DefaultDark);
        p4g.settings.encoded_format = Some(".raw".to_string());
        p4g.settings.supported_filetypes = vec![".wav".to_string(), ".raw".to_string()];

        Self {
            selected_game: None,
            games: vec![
                p4g,
                game(PERSONA_5, Theme::RoyalRed),
                game(PERSONA_3_FES, Theme::PhosTeal),
                game(PERSONA_4, Theme::ClassicOrange),
                game(KINGDOM_HEARTS_3, Theme::RoyalRed),
            ],
        }
    }
}

impl GamesConfig {
    /// Load the games config, creating the default one when the file is
    /// missing or unparseable. Unreadable files fall back to in-memory
    /// defaults without overwriting them.
    pub fn load(store: &dyn DocumentStore, paths: &AppPaths) -> Self {
        let path = paths.games_config();
        match persistence::load::<GamesConfig>(store, &path, true) {
            Ok(config) => {
                debug!(games = config.games.len(), "Games config loaded");
                config
            }
            Err(e) if e.is_not_found() || e.is_malformed() => Self::recreate(store, &path),
            Err(e) => {
                error!(error = %e, "Failed to load games config, using defaults for this session");
                Self::default()
            }
        }
    }

    fn recreate(store: &dyn DocumentStore, path: &Path) -> Self {
        let config = Self::default();
        match persistence::save(store, path, &config) {
            Ok(()) => info!(path = %path.display(), "Created new games config"),
            Err(e) => error!(error = %e, "Failed to create new games config!"),
        }
        config
    }

    pub fn to_document(&self, paths: &AppPaths) -> Result<Value, StoreError> {
        persistence::to_document(&paths.games_config(), self)
    }

    pub fn current_game(&self) -> Option<&str> {
        self.selected_game.as_deref()
    }

    pub fn game_names(&self) -> Vec<&str> {
        self.games.iter().map(|game| game.name.as_str()).collect()
    }

    pub fn game(&self, name: &str) -> Option<&GameEntry> {
        self.games.iter().find(|game| game.name == name)
    }

    pub fn current_entry(&self) -> Result<&GameEntry, ConfigError> {
        let name = self.current_game().ok_or(ConfigError::NoGameSelected)?;
        self.game(name)
            .ok_or_else(|| ConfigError::GameNotFound(name.to_string()))
    }

    pub fn current_entry_mut(&mut self) -> Result<&mut GameEntry, ConfigError> {
        let name = self
            .selected_game
            .clone()
            .ok_or(ConfigError::NoGameSelected)?;
        self.games
            .iter_mut()
            .find(|game| game.name == name)
            .ok_or(ConfigError::GameNotFound(name))
    }

    /// Theme name of the selected game
    pub fn current_theme(&self) -> Option<&str> {
        self.current_entry().ok().map(|game| game.theme.as_str())
    }

    /// Select `name`. Returns whether the selection actually changed.
    pub fn select(&mut self, name: &str) -> Result<bool, ConfigError> {
        if self.game(name).is_none() {
            error!(game = %name, available = ?self.game_names(), "Game not found in games list!");
            return Err(ConfigError::GameNotFound(name.to_string()));
        }
        let changed = self.current_game() != Some(name);
        self.selected_game = Some(name.to_string());
        Ok(changed)
    }

    /// Validate and apply a theme to the selected game
    pub fn set_theme(&mut self, name: &str) -> Result<Theme, ConfigError> {
        let theme = Theme::from_name(name).ok_or_else(|| ConfigError::InvalidTheme(name.to_string()))?;
        self.current_entry_mut()?.theme = theme.name().to_string();
        Ok(theme)
    }
}
