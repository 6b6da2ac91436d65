//! Converter support manifest: which games the built-in converter handles,
//! their encoded output format and accepted input extensions.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::games::GameEntry;
use crate::constants::files;
use crate::error::{ConfigError, StoreError};
use crate::persistence::{self, DocumentStore};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SupportManifest {
    pub games: Vec<SupportEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportEntry {
    pub name: String,
    #[serde(default)]
    pub encoded_format: Option<String>,
    #[serde(default)]
    pub supported_filetypes: Vec<String>,
    /// Game flag passed to the converter's `-g` option
    #[serde(default)]
    pub flag: Option<String>,
}

/// Resolved support for the selected game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSupport {
    pub encoded_format: Option<String>,
    /// Extensions without the leading dot, ready for a file picker filter
    pub supported_filetypes: Vec<String>,
    pub game_flag: Option<String>,
}

impl SupportManifest {
    /// The manifest sits next to the converter executable
    pub fn path_for(converter: &Path) -> PathBuf {
        converter
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(files::GAME_SUPPORT)
    }

    pub fn load(store: &dyn DocumentStore, converter: &Path) -> Result<Self, StoreError> {
        persistence::load(store, &Self::path_for(converter), false)
    }

    pub fn game(&self, name: &str) -> Option<&SupportEntry> {
        self.games.iter().find(|entry| entry.name == name)
    }
}

fn strip_dots(types: &[String]) -> Vec<String> {
    types
        .iter()
        .map(|t| t.strip_prefix('.').unwrap_or(t).to_string())
        .collect()
}

/// Support for `game`: from its own settings when it uses a custom tool,
/// otherwise from the converter manifest.
pub fn resolve(game: &GameEntry, manifest: Option<&SupportManifest>) -> Result<GameSupport, ConfigError> {
    if game.tool.is_some() {
        return Ok(GameSupport {
            encoded_format: game.settings.encoded_format.clone(),
            supported_filetypes: strip_dots(&game.settings.supported_filetypes),
            game_flag: None,
        });
    }

    let manifest = manifest.ok_or_else(|| {
        ConfigError::SupportUnavailable("converter support manifest was not loaded".to_string())
    })?;
    let entry = manifest.game(&game.name).ok_or_else(|| {
        ConfigError::SupportUnavailable(format!("'{}' is not in the converter support manifest", game.name))
    })?;

    Ok(GameSupport {
        encoded_format: entry.encoded_format.clone(),
        supported_filetypes: strip_dots(&entry.supported_filetypes),
        game_flag: entry.flag.clone(),
    })
}
