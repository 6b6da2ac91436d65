//! Music data: the per-game song list, loop point lookup and presets

pub mod loop_data;
pub mod model;
pub mod preset;

pub use loop_data::{LoopPoints, LoopRecord};
pub use model::{MusicData, Song};
pub use preset::Preset;
