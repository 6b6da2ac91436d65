//! Session: the one owner of configs and music data for a running manager
//!
//! Every mutation follows the same shape: compute the new document from the
//! current one, substitute it, queue it for saving and tell observers. A
//! failed mutation leaves the session untouched.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::support::{self, GameSupport, SupportManifest};
use crate::config::{AppConfig, GameEntry, GamesConfig, Theme};
use crate::constants::ipc::EVENT_CAPACITY;
use crate::converter::{self, BuildPlan};
use crate::error::{ConfigError, MusicDataError, PresetError, SessionError};
use crate::ipc::{Notification, UpdatedSettings};
use crate::logging::LogControl;
use crate::music::loop_data::{self, LoopRecord};
use crate::music::model::checked_sample;
use crate::music::preset::{self, Preset};
use crate::music::{MusicData, Song};
use crate::paths::AppPaths;
use crate::persistence::{self, DocumentStore};
use crate::save_queue::{FlushReport, SaveQueue};

/// A named setting change requested by the GUI
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "name", content = "value", rename_all = "snake_case")]
pub enum Setting {
    MusicData(PathBuf),
    GameDirectory(PathBuf),
    OutputDirectory(PathBuf),
    PerformanceMode(bool),
    GameTheme(String),
    CurrentGame(String),
    ShowDebug(bool),
}

/// A song-pack export, ready to run without holding the session
pub struct SongPackExport {
    plan: BuildPlan,
    preset_path: PathBuf,
    encoded_format: String,
    music: MusicData,
    store: Arc<dyn DocumentStore>,
}

impl SongPackExport {
    pub fn plan(&self) -> &BuildPlan {
        &self.plan
    }

    /// Export the encoded songs through the converter, then write the preset
    /// and its loop records. Returns whether the converter succeeded.
    pub async fn run(self) -> anyhow::Result<bool> {
        if !converter::run(&self.plan).await? {
            return Ok(false);
        }
        preset::export_song_pack(self.store.as_ref(), &self.music, &self.encoded_format, &self.preset_path)?;
        Ok(true)
    }
}

pub struct Session {
    paths: AppPaths,
    store: Arc<dyn DocumentStore>,
    saves: SaveQueue,
    app: AppConfig,
    games: GamesConfig,
    support: Option<SupportManifest>,
    music: Option<MusicData>,
    events: broadcast::Sender<Notification>,
    log: Option<LogControl>,
}

impl Session {
    /// Load configs, the converter support manifest and the selected game's
    /// music data. Load failures degrade to defaults or empty music data.
    pub fn load(paths: AppPaths, saves: SaveQueue, log: Option<LogControl>) -> Self {
        let store = Arc::clone(saves.store());
        let app = AppConfig::load(store.as_ref(), &paths);
        let games = GamesConfig::load(store.as_ref(), &paths);

        let support = app.dependencies.converter_path.as_deref().and_then(|converter| {
            SupportManifest::load(store.as_ref(), converter)
                .inspect_err(|e| error!(error = %e, "Failed to load converter support file!"))
                .ok()
        });

        if let Some(log) = &log {
            log.set_debug(app.settings.show_debug_messages);
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut session = Self {
            paths,
            store,
            saves,
            app,
            games,
            support,
            music: None,
            events,
            log,
        };
        session.load_music_data();
        session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.app
    }

    pub fn games_config(&self) -> &GamesConfig {
        &self.games
    }

    pub fn music_data(&self) -> Option<&MusicData> {
        self.music.as_ref()
    }

    /// CSS class for the selected game's theme
    pub fn theme_css(&self) -> &'static str {
        let theme = self.games.current_theme();
        debug!(game = ?self.games.current_game(), theme = ?theme, "Sending theme");
        Theme::css_for(theme)
    }

    pub fn themes(&self) -> Vec<String> {
        Theme::names()
    }

    pub fn game_support(&self) -> Result<GameSupport, ConfigError> {
        let entry = self.games.current_entry()?;
        let support = support::resolve(entry, self.support.as_ref())
            .inspect_err(|e| error!(error = %e, "Failed to find game support!"))?;
        debug!(
            game = %entry.name,
            encoded_format = ?support.encoded_format,
            supported = ?support.supported_filetypes,
            "Resolved game support"
        );
        Ok(support)
    }

    // Music data loading

    /// Current music data for the selected game: the configured document,
    /// else a fresh copy of the game's default music data, else nothing.
    fn load_music_data(&mut self) {
        self.music = None;
        let Some(game) = self.games.current_game().map(str::to_string) else {
            debug!("No game selected, music data set to null");
            return;
        };

        let configured = self
            .games
            .current_entry()
            .ok()
            .and_then(|entry| entry.settings.music_data_path.clone());
        if let Some(path) = configured {
            match persistence::load::<MusicData>(self.store.as_ref(), &path, true) {
                Ok(music) => {
                    debug!(game = %game, "Music data loaded");
                    self.music = Some(music);
                    return;
                }
                Err(e) => warn!(game = %game, error = %e, "Configured music data unavailable"),
            }
        }

        let default_path = self.paths.default_music_data(&game);
        let defaults = match persistence::load::<MusicData>(self.store.as_ref(), &default_path, true) {
            Ok(defaults) => defaults,
            Err(e) if e.is_not_found() => {
                error!(game = %game, "No default music data found!");
                return;
            }
            Err(e) => {
                error!(game = %game, error = %e, "Failed to load default music data!");
                return;
            }
        };

        let current = MusicData {
            game: game.clone(),
            songs: defaults.songs,
        };
        let current_path = self.paths.current_music_data(&game);
        if let Err(e) = persistence::save(self.store.as_ref(), &current_path, &current) {
            error!(game = %game, error = %e, "Failed to set music data!");
            return;
        }
        if let Ok(entry) = self.games.current_entry_mut() {
            entry.settings.music_data_path = Some(current_path);
        }
        self.queue_games_config();
        info!(game = %game, "Created new music data");
        self.music = Some(current);
    }

    // Save + notify helpers

    fn notify(&self, notification: Notification) {
        // No subscribers is fine; the GUI may not be connected yet
        let _ = self.events.send(notification);
    }

    fn queue_games_config(&self) {
        match self.games.to_document(&self.paths) {
            Ok(document) => self.saves.enqueue(self.paths.games_config(), document),
            Err(e) => error!(error = %e, "Failed to queue games config"),
        }
    }

    fn queue_app_config(&self) {
        match self.app.to_document(&self.paths) {
            Ok(document) => self.saves.enqueue(self.paths.app_config(), document),
            Err(e) => error!(error = %e, "Failed to queue app config"),
        }
    }

    fn games_changed(&self, updated: Option<UpdatedSettings>) {
        self.queue_games_config();
        if let Some(updated_settings) = updated {
            debug!("Sending new updated config settings");
            self.notify(Notification::ConfigChanged { updated_settings });
        }
    }

    /// Substitute the music data, queue it for saving and push it to the GUI
    fn replace_music_data(&mut self, music: MusicData) {
        let path = self
            .games
            .current_entry()
            .ok()
            .and_then(|entry| entry.settings.music_data_path.clone());
        match path.map(|path| persistence::to_document(&path, &music).map(|doc| (path, doc))) {
            Some(Ok((path, document))) => self.saves.enqueue(path, document),
            Some(Err(e)) => error!(error = %e, "Failed to queue music data"),
            None => warn!("No music data path set, changes are not saved"),
        }

        debug!("Sending new music data");
        self.music = Some(music);
        self.notify(Notification::MusicDataChanged {
            updated_music_data: self.music.clone(),
        });
    }

    fn current_music(&self) -> Result<&MusicData, MusicDataError> {
        self.music.as_ref().ok_or(MusicDataError::NoMusicData)
    }

    // Game registry

    /// Switch games. Pending saves are written first so the reload reads
    /// what is on disk. Returns whether the game changed.
    pub async fn select_game(&mut self, name: &str) -> Result<bool, SessionError> {
        if self.games.game(name).is_none() {
            error!(game = %name, "Game not found in games list!");
            return Err(ConfigError::GameNotFound(name.to_string()).into());
        }
        if self.games.current_game() == Some(name) {
            return Ok(false);
        }

        self.saves.flush_all(false).await;
        self.games.select(name)?;
        debug!(game = %name, "Game changed");
        self.load_music_data();

        self.games_changed(Some(UpdatedSettings {
            theme: Some(Theme::css_for(self.games.current_theme()).to_string()),
            music_data: Some(self.music.clone()),
        }));
        Ok(true)
    }

    /// Point the selected game at another music data document and load it
    pub async fn set_music_data_path(&mut self, path: PathBuf) -> Result<Option<MusicData>, SessionError> {
        self.games.current_entry()?;
        self.saves.flush_all(false).await;

        self.games.current_entry_mut()?.settings.music_data_path = Some(path);
        self.load_music_data();

        self.games_changed(Some(UpdatedSettings {
            theme: None,
            music_data: Some(self.music.clone()),
        }));
        Ok(self.music.clone())
    }

    fn update_game(&mut self, apply: impl FnOnce(&mut GameEntry)) -> Result<GameEntry, SessionError> {
        let entry = self.games.current_entry_mut()?;
        apply(entry);
        let updated = entry.clone();
        self.games_changed(None);
        Ok(updated)
    }

    pub fn set_game_directory(&mut self, dir: PathBuf) -> Result<GameEntry, SessionError> {
        self.update_game(|game| game.settings.game_directory = Some(dir))
    }

    pub fn set_output_directory(&mut self, dir: PathBuf) -> Result<GameEntry, SessionError> {
        self.update_game(|game| game.settings.output_directory = Some(dir))
    }

    pub fn set_low_performance(&mut self, enabled: bool) -> Result<GameEntry, SessionError> {
        self.update_game(|game| game.settings.low_performance = enabled)
    }

    /// Apply a theme to the selected game; unknown names are rejected
    pub fn set_theme(&mut self, name: &str) -> Result<&'static str, SessionError> {
        let theme = self.games.set_theme(name)?;
        self.games_changed(Some(UpdatedSettings {
            theme: Some(theme.css().to_string()),
            music_data: None,
        }));
        Ok(theme.css())
    }

    pub fn set_show_debug(&mut self, enabled: bool) -> bool {
        self.app.settings.show_debug_messages = enabled;
        if let Some(log) = &self.log {
            log.set_debug(enabled);
        }
        self.queue_app_config();
        enabled
    }

    pub async fn change_config(&mut self, setting: Setting) -> Result<(), SessionError> {
        match setting {
            Setting::MusicData(path) => {
                self.set_music_data_path(path).await?;
            }
            Setting::GameDirectory(dir) => {
                self.set_game_directory(dir)?;
            }
            Setting::OutputDirectory(dir) => {
                self.set_output_directory(dir)?;
            }
            Setting::PerformanceMode(enabled) => {
                self.set_low_performance(enabled)?;
            }
            Setting::GameTheme(name) => {
                self.set_theme(&name)?;
            }
            Setting::CurrentGame(name) => {
                self.select_game(&name).await?;
            }
            Setting::ShowDebug(enabled) => {
                self.set_show_debug(enabled);
            }
        }
        Ok(())
    }

    // Music data mutations

    /// Assign a replacement file, resolving its loop points. Returns the
    /// updated song.
    pub fn set_replacement(&mut self, song_id: &str, file: &Path) -> Result<Song, SessionError> {
        let music = self.current_music()?;
        if music.song(song_id).is_none() {
            return Err(MusicDataError::SongNotFound(song_id.to_string()).into());
        }

        let (points, source) = loop_data::resolve(self.store.as_ref(), &self.paths, file);
        debug!(song = %song_id, ?source, "Resolved loop data");
        let next = music.with_replacement(song_id, Some(file), points)?;
        let song = next.song(song_id).cloned();
        self.replace_music_data(next);
        song.ok_or_else(|| MusicDataError::SongNotFound(song_id.to_string()).into())
    }

    pub fn remove_replacement(&mut self, song_id: &str) -> Result<(), SessionError> {
        let next = self
            .current_music()?
            .with_replacement(song_id, None, Default::default())?;
        self.replace_music_data(next);
        Ok(())
    }

    /// Overwrite a song's loop points and mirror them into the loop data
    /// record of its replacement file
    pub fn set_loop(&mut self, song_id: &str, start: i64, end: i64) -> Result<(), SessionError> {
        let next = self.current_music()?.with_loop(song_id, start, end)?;

        if let Some(song) = next.song(song_id)
            && let Some(file) = &song.replacement_file_path
        {
            let path = self.paths.loop_data_file(file);
            let record = LoopRecord::new(song.loop_start_sample, song.loop_end_sample);
            match record.to_document(&path) {
                Ok(document) => self.saves.enqueue(path, document),
                Err(e) => error!(error = %e, "Failed to queue loop data"),
            }
        }

        self.replace_music_data(next);
        Ok(())
    }

    /// Loop points for a batch-converted song file, written straight to the
    /// sidecar next to it. Music data is not involved.
    pub fn set_batch_loop(&self, song_file: &str, start: i64, end: i64) -> Result<(), SessionError> {
        let record = LoopRecord::new(checked_sample(start)?, checked_sample(end)?);
        let path = loop_data::sidecar_path(Path::new(song_file));
        let document = record.to_document(&path)?;
        self.store
            .write(&path, &document)
            .inspect_err(|e| error!(error = %e, "Batch song loop update failed!"))?;
        Ok(())
    }

    // Presets

    fn default_music_data(&self, game: &str) -> Result<MusicData, PresetError> {
        let path = self.paths.default_music_data(game);
        persistence::load::<MusicData>(self.store.as_ref(), &path, true).map_err(|e| {
            if e.is_not_found() {
                PresetError::DefaultMissing(game.to_string())
            } else {
                PresetError::Store(e)
            }
        })
    }

    fn merged(&self, preset: &Preset, music: &MusicData) -> Result<MusicData, SessionError> {
        let game = self.games.current_game().ok_or(ConfigError::NoGameSelected)?;
        Ok(preset::apply(preset, game, music, || self.default_music_data(game))?)
    }

    /// Apply a preset to the current music data
    pub fn apply_preset(&mut self, preset: &Preset) -> Result<MusicData, SessionError> {
        let music = self.music.as_ref().ok_or(PresetError::NoMusicData)?;
        let next = self.merged(preset, music)?;
        self.replace_music_data(next.clone());
        Ok(next)
    }

    /// Load a preset file; with `clear_first` every song is cleared before
    /// the preset is applied. Either both steps apply or neither does.
    pub fn load_preset(&mut self, path: &Path, clear_first: bool) -> Result<MusicData, SessionError> {
        let preset = preset::load_file(self.store.as_ref(), path)?;
        let music = self.music.as_ref().ok_or(PresetError::NoMusicData)?;

        let base = if clear_first {
            self.merged(&Preset::Clear, music)?
        } else {
            music.clone()
        };
        let next = self.merged(&preset, &base)?;
        self.replace_music_data(next.clone());
        Ok(next)
    }

    pub fn new_preset(&mut self, from_default: bool) -> Result<MusicData, SessionError> {
        let preset = if from_default { Preset::Default } else { Preset::Clear };
        let next = self.apply_preset(&preset)?;
        info!(from_default, "New preset created");
        Ok(next)
    }

    pub fn save_preset(&self, path: &Path) -> Result<(), SessionError> {
        let music = self.music.as_ref().ok_or(PresetError::NoMusicData)?;
        preset::save_file(self.store.as_ref(), music, path)?;
        Ok(())
    }

    // Persistence + build

    pub async fn flush(&self, include_auxiliary: bool) -> FlushReport {
        self.saves.flush_all(include_auxiliary).await
    }

    /// Write every pending save and resolve the converter invocation for the
    /// selected game. The caller runs the plan without holding the session.
    pub async fn prepare_build(&self) -> Result<BuildPlan, SessionError> {
        let game = self.games.current_entry()?;
        self.saves.flush_all(false).await;

        let support = if game.tool.is_none() {
            self.game_support()
        } else {
            support::resolve(game, None)
        };
        let plan = converter::plan(
            &self.app,
            game,
            support,
            &self.paths,
            self.app.settings.show_debug_messages,
        )?;
        Ok(plan)
    }

    /// Snapshot the music data and resolve the converter export for a
    /// song-pack preset at `path`. Pending saves are written first.
    pub async fn prepare_export(&self, path: &Path) -> Result<SongPackExport, SessionError> {
        let music = self.music.clone().ok_or(PresetError::NoMusicData)?;
        let game = self.games.current_entry()?;
        let support = self.game_support()?;
        let encoded_format = support
            .encoded_format
            .clone()
            .ok_or_else(|| ConfigError::EncodedFormatMissing(game.name.clone()))?;

        self.saves.flush_all(false).await;
        let plan = converter::plan_export(
            &self.app,
            game,
            &support,
            &preset::songs_folder(path),
            self.app.settings.show_debug_messages,
        )?;

        Ok(SongPackExport {
            plan,
            preset_path: path.to_path_buf(),
            encoded_format,
            music,
            store: Arc::clone(&self.store),
        })
    }

    /// Converter invocation that encodes every song file in `folder`
    pub fn prepare_batch(&self, folder: &Path) -> Result<BuildPlan, SessionError> {
        let game = self.games.current_entry()?;
        let support = self.game_support()?;
        let plan = converter::plan_batch(&self.app, game, &support, folder, self.app.settings.show_debug_messages)?;
        Ok(plan)
    }

    /// Converter invocation that extracts the selected game's original music
    pub fn prepare_extract(&self) -> Result<BuildPlan, SessionError> {
        let game = self.games.current_entry()?;
        let plan = converter::plan_extract(&self.app, game, self.app.settings.show_debug_messages)?;
        Ok(plan)
    }
}
