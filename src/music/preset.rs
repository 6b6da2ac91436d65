//! Presets: bulk song replacements applied to the current music data
//!
//! A preset document is decoded into one `Preset` variant, trying each known
//! shape in priority order:
//! - `null` clears every song
//! - `"default"` restores the game's default music data
//! - an object with `game` is a music-data or song-pack document (by `type`)
//! - an object with `songpack` is a legacy pack
//!
//! Anything else is an invalid preset.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::constants::{loops, music};
use crate::error::{PresetError, StoreError};
use crate::music::loop_data::{LoopPoints, LoopRecord};
use crate::music::model::{MusicData, Song};
use crate::persistence::{self, Document, DocumentStore};

const TYPE_MUSIC_DATA: &str = "music-data";
const TYPE_SONG_PACK: &str = "song-pack";

/// Song entry of a song-pack preset, matched by `outputFilePath`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackSong {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub replacement_file_path: Option<PathBuf>,
    #[serde(default)]
    pub loop_start_sample: u32,
    #[serde(default)]
    pub loop_end_sample: u32,
    pub output_file_path: String,
    #[serde(default)]
    pub extra_data: Option<String>,
}

/// Song entry of a legacy pack, matched by `id`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacySong {
    pub id: String,
    #[serde(rename = "fileName")]
    pub file_name: PathBuf,
    #[serde(rename = "loopstartSample", default)]
    pub loop_start_sample: u32,
    #[serde(rename = "loopendSample", default)]
    pub loop_end_sample: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Preset {
    Clear,
    Default,
    MusicData {
        game: String,
        songs: Vec<Song>,
    },
    SongPack {
        game: String,
        name: Option<String>,
        songs: Vec<PackSong>,
    },
    Legacy {
        songs: Vec<LegacySong>,
    },
}

#[derive(Deserialize)]
struct GameDocument {
    game: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    songs: Value,
}

#[derive(Deserialize)]
struct LegacyDocument {
    songpack: Vec<LegacySong>,
}

fn invalid(what: impl std::fmt::Display) -> PresetError {
    PresetError::Invalid(what.to_string())
}

/// Reject a preset carrying loop samples the model cannot hold
fn check_loops(points: impl IntoIterator<Item = (u32, u32)>) -> Result<(), PresetError> {
    for (loopstart, loopend) in points {
        LoopPoints { loopstart, loopend }.checked().map_err(invalid)?;
    }
    Ok(())
}

impl Preset {
    pub fn decode(document: &Value) -> Result<Preset, PresetError> {
        match document {
            Value::Null => return Ok(Preset::Clear),
            Value::String(s) if s == music::DEFAULT_PRESET => return Ok(Preset::Default),
            Value::Object(object) => {
                if object.get("game").is_some_and(|game| !game.is_null()) {
                    return Self::decode_game_document(document);
                }
                if object.get("songpack").is_some_and(|pack| !pack.is_null()) {
                    let legacy: LegacyDocument = serde_json::from_value(document.clone()).map_err(invalid)?;
                    check_loops(legacy.songpack.iter().map(|s| (s.loop_start_sample, s.loop_end_sample)))?;
                    return Ok(Preset::Legacy { songs: legacy.songpack });
                }
            }
            _ => {}
        }
        error!("Invalid preset was selected!");
        Err(invalid("unrecognized preset shape"))
    }

    fn decode_game_document(document: &Value) -> Result<Preset, PresetError> {
        let doc: GameDocument = serde_json::from_value(document.clone()).map_err(invalid)?;
        match doc.kind.as_deref() {
            Some(TYPE_MUSIC_DATA) => {
                let songs: Vec<Song> = serde_json::from_value(doc.songs).map_err(invalid)?;
                check_loops(songs.iter().map(|s| (s.loop_start_sample, s.loop_end_sample)))?;
                Ok(Preset::MusicData { game: doc.game, songs })
            }
            Some(TYPE_SONG_PACK) => {
                let songs: Vec<PackSong> = serde_json::from_value(doc.songs).map_err(invalid)?;
                check_loops(songs.iter().map(|s| (s.loop_start_sample, s.loop_end_sample)))?;
                Ok(Preset::SongPack {
                    game: doc.game,
                    name: doc.name,
                    songs,
                })
            }
            other => Err(invalid(format!("unknown preset type {other:?}"))),
        }
    }

    /// Game a game-scoped preset was made for
    pub fn game(&self) -> Option<&str> {
        match self {
            Preset::MusicData { game, .. } | Preset::SongPack { game, .. } => Some(game),
            _ => None,
        }
    }

    /// Re-root relative song paths against the folder of `preset_file`.
    /// Song packs keep their audio in a `songs` subfolder; legacy packs
    /// reference files next to the preset.
    pub fn rerooted(mut self, preset_file: &Path) -> Preset {
        let preset_dir = preset_file.parent().unwrap_or_else(|| Path::new(""));
        match &mut self {
            Preset::SongPack { songs, .. } => {
                for song in songs {
                    if let Some(file) = song.replacement_file_path.take() {
                        song.replacement_file_path = Some(songs_folder(preset_file).join(file));
                    }
                }
            }
            Preset::Legacy { songs } => {
                for song in songs.iter_mut() {
                    song.file_name = preset_dir.join(&song.file_name);
                }
                warn!("Legacy Song Packs might have songs misplaced or missing!");
            }
            _ => {}
        }
        self
    }
}

/// Read a preset file chosen by the user and re-root its song paths
pub fn load_file(store: &dyn DocumentStore, path: &Path) -> Result<Preset, PresetError> {
    let document = store.read(path, false).inspect_err(|e| {
        error!(path = %path.display(), error = %e, "Could not parse preset file!");
    })?;
    Ok(Preset::decode(&document)?.rerooted(path))
}

/// Preset document for `music`, named after the file stem of `path`
pub fn to_document(music: &MusicData, path: &Path) -> Result<Document, StoreError> {
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let songs = persistence::to_document(path, &music.songs)?;
    Ok(json!({
        "game": music.game,
        "name": name,
        "type": TYPE_MUSIC_DATA,
        "songs": songs,
    }))
}

/// Write the current music data as a music-data preset
pub fn save_file(store: &dyn DocumentStore, music: &MusicData, path: &Path) -> Result<(), StoreError> {
    store.write(path, &to_document(music, path)?)?;
    info!(path = %path.display(), "Preset saved");
    Ok(())
}

/// Song-pack entries for every enabled, replaced song of `music`, pointing at
/// the converter's exported `<stem><encoded_format>` files, plus one loop
/// record per distinct exported file name.
pub fn song_pack_songs(music: &MusicData, encoded_format: &str) -> (Vec<PackSong>, BTreeMap<String, LoopRecord>) {
    let mut songs = Vec::new();
    let mut loops = BTreeMap::new();

    for song in music.songs.iter().filter(|song| song.is_enabled) {
        let Some(replacement) = &song.replacement_file_path else {
            continue;
        };
        let stem = replacement.file_stem().unwrap_or_default().to_string_lossy();
        let file = format!("{stem}{encoded_format}");

        loops
            .entry(file.clone())
            .or_insert_with(|| LoopRecord::new(song.loop_start_sample, song.loop_end_sample));
        songs.push(PackSong {
            name: song.name.clone(),
            category: song.category.clone(),
            replacement_file_path: Some(PathBuf::from(file)),
            loop_start_sample: song.loop_start_sample,
            loop_end_sample: song.loop_end_sample,
            output_file_path: song.output_file_path.clone(),
            extra_data: song.extra_data.clone(),
        });
    }
    (songs, loops)
}

/// Write a song-pack preset for `music` at `path`, with loop records in the
/// `songs` folder the converter exported into. Returns the song count.
pub fn export_song_pack(
    store: &dyn DocumentStore,
    music: &MusicData,
    encoded_format: &str,
    path: &Path,
) -> Result<usize, StoreError> {
    let (songs, loops) = song_pack_songs(music, encoded_format);
    let songs_dir = songs_folder(path);
    for (file, record) in loops {
        let loop_path = songs_dir.join(format!("{file}{}", loops::SIDECAR_SUFFIX));
        store.write(&loop_path, &record.to_document(&loop_path)?)?;
    }

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let document = json!({
        "game": music.game,
        "name": name,
        "type": TYPE_SONG_PACK,
        "songs": persistence::to_document(path, &songs)?,
    });
    store.write(path, &document)?;
    info!(path = %path.display(), songs = songs.len(), "Song Pack Preset exported");
    Ok(songs.len())
}

/// Folder holding a song pack's audio files, next to the preset file
pub fn songs_folder(preset_path: &Path) -> PathBuf {
    preset_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(music::PRESET_SONGS_FOLDER)
}

/// Apply `preset` to `current` for `game`, returning the merged music data.
/// `current` is left untouched on failure. `load_default` is only called
/// for the default preset.
pub fn apply(
    preset: &Preset,
    game: &str,
    current: &MusicData,
    load_default: impl FnOnce() -> Result<MusicData, PresetError>,
) -> Result<MusicData, PresetError> {
    if let Some(preset_game) = preset.game()
        && preset_game != game
    {
        error!(preset_game, "Song Pack Preset is for a different game!");
        return Err(PresetError::WrongGame {
            preset: preset_game.to_string(),
            current: game.to_string(),
        });
    }

    let mut next = current.clone();
    match preset {
        Preset::Clear => next = current.cleared(),
        Preset::Default => next.songs = load_default()?.songs,
        Preset::MusicData { songs, .. } => {
            next.songs = songs.clone();
            info!("Music Data Preset loaded");
        }
        Preset::SongPack { name, songs, .. } => {
            for pack_song in songs {
                merge_pack_song(&mut next, pack_song);
            }
            info!(pack = name.as_deref().unwrap_or_default(), "Song Pack loaded");
        }
        Preset::Legacy { songs } => {
            for legacy in songs {
                merge_legacy_song(&mut next, legacy);
            }
            info!("Legacy Song Pack Preset loaded");
        }
    }
    Ok(next)
}

fn merge_pack_song(music: &mut MusicData, pack_song: &PackSong) {
    let existing = music
        .songs
        .iter_mut()
        .find(|song| song.output_file_path == pack_song.output_file_path);

    match existing {
        Some(song) => {
            song.is_enabled = true;
            song.name = pack_song.name.clone();
            song.category = pack_song.category.clone();
            song.replacement_file_path = pack_song.replacement_file_path.clone();
            song.loop_start_sample = pack_song.loop_start_sample;
            song.loop_end_sample = pack_song.loop_end_sample;
            song.extra_data = pack_song.extra_data.clone();
            debug!(song = %pack_song.name, "Song Pack: replacing song");
        }
        None => {
            // extraData comes from the pack entry, not its outputFilePath
            let id = music.songs.len().to_string();
            music.songs.push(Song {
                id,
                is_enabled: true,
                name: pack_song.name.clone(),
                category: pack_song.category.clone(),
                original_file: None,
                replacement_file_path: pack_song.replacement_file_path.clone(),
                loop_start_sample: pack_song.loop_start_sample,
                loop_end_sample: pack_song.loop_end_sample,
                output_file_path: pack_song.output_file_path.clone(),
                extra_data: pack_song.extra_data.clone(),
            });
            debug!(song = %pack_song.name, "New song added by Song Pack");
        }
    }
}

fn merge_legacy_song(music: &mut MusicData, legacy: &LegacySong) {
    let Some(song) = music.songs.iter_mut().find(|song| song.id == legacy.id) else {
        return;
    };
    song.is_enabled = true;
    if song.is_hidden() {
        song.category = music::LEGACY_PACK_CATEGORY.to_string();
    }
    song.replacement_file_path = Some(legacy.file_name.clone());
    song.loop_start_sample = legacy.loop_start_sample;
    song.loop_end_sample = legacy.loop_end_sample;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music::loop_data::LoopPoints;
    use crate::music::model::fixtures::{music_data, song};
    use crate::persistence::testing::MemoryStore;

    fn no_default() -> Result<MusicData, PresetError> {
        panic!("default music data should not be loaded")
    }

    fn pack(game: &str, songs: Value) -> Preset {
        Preset::decode(&json!({ "game": game, "type": "song-pack", "name": "Pack", "songs": songs })).unwrap()
    }

    #[test]
    fn test_decode_priority() {
        assert_eq!(Preset::decode(&Value::Null).unwrap(), Preset::Clear);
        assert_eq!(Preset::decode(&json!("default")).unwrap(), Preset::Default);
        assert!(matches!(
            Preset::decode(&json!({ "game": "P4G", "type": "music-data", "songs": [], "songpack": [] })).unwrap(),
            Preset::MusicData { .. }
        ));
        assert!(matches!(
            Preset::decode(&json!({ "songpack": [{ "id": "3", "fileName": "a.raw" }] })).unwrap(),
            Preset::Legacy { .. }
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_shapes() {
        for doc in [json!("other"), json!(42), json!({ "songs": [] }), json!({ "game": "P4G", "songs": [] })] {
            assert!(matches!(Preset::decode(&doc), Err(PresetError::Invalid(_))), "{doc}");
        }
    }

    #[test]
    fn test_clear_preset() {
        let mut current = music_data("P4G", 5);
        for s in &mut current.songs {
            s.set_replacement(Some(PathBuf::from("/a.wav")), LoopPoints { loopstart: 1, loopend: 9 });
        }

        let next = apply(&Preset::Clear, "P4G", &current, no_default).unwrap();

        assert_eq!(next.songs.len(), 5);
        assert!(next.songs.iter().all(|s| {
            !s.is_enabled && s.replacement_file_path.is_none() && s.loop_start_sample == 0 && s.loop_end_sample == 0
        }));
    }

    #[test]
    fn test_default_preset_replaces_song_list() {
        let current = music_data("P4G", 5);
        let next = apply(&Preset::Default, "P4G", &current, || Ok(music_data("P4G", 2))).unwrap();
        assert_eq!(next.songs.len(), 2);
        assert_eq!(next.game, "P4G");
    }

    #[test]
    fn test_default_preset_missing_leaves_data() {
        let current = music_data("P4G", 5);
        let result = apply(&Preset::Default, "P4G", &current, || {
            Err(PresetError::DefaultMissing("P4G".to_string()))
        });
        assert!(matches!(result, Err(PresetError::DefaultMissing(_))));
    }

    #[test]
    fn test_song_pack_adds_new_song() {
        let current = MusicData {
            game: "P4G".to_string(),
            songs: vec![song("0", "a")],
        };
        let preset = pack(
            "P4G",
            json!([{ "name": "New", "category": "Battle", "outputFilePath": "b", "replacementFilePath": "/b.wav", "extraData": "x" }]),
        );

        let next = apply(&preset, "P4G", &current, no_default).unwrap();

        assert_eq!(next.songs.len(), 2);
        let added = &next.songs[1];
        assert_eq!(added.id, "1");
        assert!(added.is_enabled);
        assert_eq!(added.original_file, None);
        assert_eq!(added.extra_data.as_deref(), Some("x"));
    }

    #[test]
    fn test_song_pack_overwrites_existing_song() {
        let mut old = song("0", "x");
        old.name = "Old".to_string();
        let current = MusicData {
            game: "P4G".to_string(),
            songs: vec![old],
        };
        let preset = pack(
            "P4G",
            json!([{ "name": "New", "category": "Town", "outputFilePath": "x", "replacementFilePath": "/n.wav", "loopStartSample": 4, "loopEndSample": 8 }]),
        );

        let next = apply(&preset, "P4G", &current, no_default).unwrap();

        assert_eq!(next.songs.len(), 1);
        let merged = &next.songs[0];
        assert_eq!(merged.name, "New");
        assert_eq!(merged.category, "Town");
        assert!(merged.is_enabled);
        assert_eq!((merged.loop_start_sample, merged.loop_end_sample), (4, 8));
        assert_eq!(merged.original_file, Some("x.orig".to_string()));
    }

    #[test]
    fn test_wrong_game_is_rejected() {
        let current = music_data("P4G", 2);
        let preset = pack("P5", json!([{ "name": "New", "outputFilePath": "zzz" }]));

        let result = apply(&preset, "P4G", &current, no_default);

        assert!(matches!(result, Err(PresetError::WrongGame { .. })));
        assert_eq!(current, music_data("P4G", 2));
    }

    #[test]
    fn test_music_data_preset_replaces_songs() {
        let current = music_data("P4G", 3);
        let preset = Preset::MusicData {
            game: "P4G".to_string(),
            songs: vec![song("9", "z")],
        };
        let next = apply(&preset, "P4G", &current, no_default).unwrap();
        assert_eq!(next.songs, vec![song("9", "z")]);
    }

    #[test]
    fn test_legacy_pack_updates_matching_ids_only() {
        let mut current = music_data("P4G", 2);
        current.songs[1].category = "hidden".to_string();
        let preset = Preset::decode(&json!({
            "songpack": [
                { "id": "1", "fileName": "/pack/one.raw", "loopstartSample": 10, "loopendSample": 20 },
                { "id": "7", "fileName": "/pack/seven.raw" }
            ]
        }))
        .unwrap();

        let next = apply(&preset, "P4G", &current, no_default).unwrap();

        assert_eq!(next.songs.len(), 2);
        let updated = &next.songs[1];
        assert!(updated.is_enabled);
        assert_eq!(updated.category, "Song Preset");
        assert_eq!(updated.replacement_file_path.as_deref(), Some(Path::new("/pack/one.raw")));
        assert_eq!((updated.loop_start_sample, updated.loop_end_sample), (10, 20));
        assert!(!next.songs[0].is_enabled);
    }

    #[test]
    fn test_load_file_reroots_paths() {
        let store = MemoryStore::new();
        store.insert(
            "/presets/pack.songs",
            json!({ "game": "P4G", "type": "song-pack", "songs": [{ "outputFilePath": "x", "replacementFilePath": "a.wav" }] }),
        );
        store.insert("/presets/old.p4g", json!({ "songpack": [{ "id": "0", "fileName": "b.raw" }] }));

        let Preset::SongPack { songs, .. } = load_file(&store, Path::new("/presets/pack.songs")).unwrap() else {
            panic!("expected song pack");
        };
        assert_eq!(songs[0].replacement_file_path.as_deref(), Some(Path::new("/presets/songs/a.wav")));

        let Preset::Legacy { songs } = load_file(&store, Path::new("/presets/old.p4g")).unwrap() else {
            panic!("expected legacy pack");
        };
        assert_eq!(songs[0].file_name, PathBuf::from("/presets/b.raw"));
    }

    #[test]
    fn test_decode_rejects_out_of_range_loops() {
        let too_big = json!({ "game": "P4G", "type": "song-pack", "songs": [
            { "outputFilePath": "x", "loopStartSample": 0, "loopEndSample": 2_147_483_647u32 }
        ] });
        assert!(matches!(Preset::decode(&too_big), Err(PresetError::Invalid(_))));

        let legacy = json!({ "songpack": [{ "id": "0", "fileName": "a.raw", "loopstartSample": 3_000_000_000u32 }] });
        assert!(matches!(Preset::decode(&legacy), Err(PresetError::Invalid(_))));

        let mut data = music_data("P4G", 1);
        data.songs[0].loop_end_sample = u32::MAX;
        let doc = to_document(&data, Path::new("/p/mix.songs")).unwrap();
        assert!(matches!(Preset::decode(&doc), Err(PresetError::Invalid(_))));
    }

    #[test]
    fn test_export_song_pack_writes_preset_and_loops() {
        let store = MemoryStore::new();
        let mut data = music_data("P4G", 4);
        let points = LoopPoints { loopstart: 10, loopend: 20 };
        data.songs[0].set_replacement(Some(PathBuf::from("/music/battle.wav")), points);
        data.songs[1].set_replacement(Some(PathBuf::from("/other/battle.wav")), LoopPoints { loopstart: 1, loopend: 2 });
        data.songs[2].set_replacement(Some(PathBuf::from("/music/town.flac")), points);
        data.songs[2].is_enabled = false;
        data.songs[0].extra_data = Some("extra".to_string());

        let count = export_song_pack(&store, &data, ".raw", Path::new("/presets/Mix.songs")).unwrap();

        assert_eq!(count, 2);
        let doc = store.get("/presets/Mix.songs").unwrap();
        assert_eq!(doc["name"], "Mix");
        assert_eq!(doc["type"], "song-pack");
        assert_eq!(doc["game"], "P4G");
        assert_eq!(doc["songs"][0]["replacementFilePath"], "battle.raw");
        assert_eq!(doc["songs"][0]["outputFilePath"], "out/0.raw");
        assert_eq!(doc["songs"][0]["extraData"], "extra");
        assert_eq!(doc["songs"][0]["loopStartSample"], 10);

        // One loop record per exported file, first song wins
        assert_eq!(
            store.get("/presets/songs/battle.raw.p4g"),
            Some(json!({ "settings": { "loopstart": 10, "loopend": 20 } }))
        );
        assert_eq!(store.get("/presets/songs/town.raw.p4g"), None);
        assert_eq!(store.total_writes(), 2);

        let Preset::SongPack { songs, .. } = load_file(&store, Path::new("/presets/Mix.songs")).unwrap() else {
            panic!("expected song pack");
        };
        assert_eq!(songs[1].replacement_file_path.as_deref(), Some(Path::new("/presets/songs/battle.raw")));
    }

    #[test]
    fn test_save_file_writes_music_data_preset() {
        let store = MemoryStore::new();
        save_file(&store, &music_data("P4G", 2), Path::new("/presets/My Mix.songs")).unwrap();

        let doc = store.get("/presets/My Mix.songs").unwrap();
        assert_eq!(doc["name"], "My Mix");
        assert_eq!(doc["type"], "music-data");
        assert_eq!(doc["songs"].as_array().unwrap().len(), 2);

        let reloaded = Preset::decode(&doc).unwrap();
        assert_eq!(reloaded.game(), Some("P4G"));
    }
}
