//! On-disk layout of the application data root

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{files, layout, loops};

#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform data dir (falls back to the working directory)
    pub fn default_root() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(layout::APP_DIR);
        path
    }

    /// Create every application directory that is expected to exist
    pub fn create_all(&self) -> Result<()> {
        for dir in [
            self.build_dir(),
            self.dependencies_dir(),
            self.loop_data_dir(),
            self.settings_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_dir(&self) -> PathBuf {
        self.root.join(layout::SETTINGS)
    }

    pub fn loop_data_dir(&self) -> PathBuf {
        self.settings_dir().join(layout::LOOP_DATA)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join(layout::MUSIC_BUILD)
    }

    pub fn dependencies_dir(&self) -> PathBuf {
        self.root.join(layout::DEPENDENCIES)
    }

    pub fn app_config(&self) -> PathBuf {
        self.settings_dir().join(files::APP_CONFIG)
    }

    pub fn games_config(&self) -> PathBuf {
        self.settings_dir().join(files::GAMES_CONFIG)
    }

    pub fn app_log(&self) -> PathBuf {
        self.settings_dir().join(files::APP_LOG)
    }

    pub fn default_converter(&self) -> PathBuf {
        self.dependencies_dir().join(files::DEFAULT_CONVERTER)
    }

    pub fn default_music_data(&self, game: &str) -> PathBuf {
        self.settings_dir().join(game).join(files::DEFAULT_MUSIC_DATA)
    }

    pub fn current_music_data(&self, game: &str) -> PathBuf {
        self.settings_dir().join(game).join(files::CURRENT_MUSIC_DATA)
    }

    /// Saved loop data record for a song file, keyed by its base name
    pub fn loop_data_file(&self, song_file: &Path) -> PathBuf {
        let mut name = song_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(loops::SIDECAR_SUFFIX);
        self.loop_data_dir().join(name)
    }

    /// Default converter output folder for a game or tool name
    pub fn build_output(&self, name: &str) -> PathBuf {
        self.build_dir().join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_data_file_uses_base_name() {
        let paths = AppPaths::new("/data");
        assert_eq!(
            paths.loop_data_file(Path::new("/music/packs/track01.wav")),
            PathBuf::from("/data/settings/loop-data/track01.wav.p4g")
        );
    }

    #[test]
    fn test_per_game_documents() {
        let paths = AppPaths::new("/data");
        assert_eq!(
            paths.current_music_data("Persona 4 Golden"),
            PathBuf::from("/data/settings/Persona 4 Golden/current-music-data.json")
        );
        assert_eq!(
            paths.default_music_data("Persona 5"),
            PathBuf::from("/data/settings/Persona 5/default-music-data.json")
        );
    }

    #[test]
    fn test_create_all() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        paths.create_all().unwrap();
        assert!(paths.loop_data_dir().is_dir());
        assert!(paths.build_dir().is_dir());
        assert!(paths.dependencies_dir().is_dir());
    }
}
