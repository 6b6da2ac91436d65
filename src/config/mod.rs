//! Configuration management for the music manager
//!
//! This module provides the persisted config documents:
//! - **app**: global settings and converter dependencies
//! - **games**: the game registry and per-game settings
//! - **support**: the converter's per-game support manifest
//! - **theme**: the enumerated UI themes

pub mod app;
pub mod games;
pub mod support;
pub mod theme;

// Re-export commonly used types
pub use app::AppConfig;
pub use games::{GameEntry, GamesConfig};
pub use support::{GameSupport, SupportManifest};
pub use theme::Theme;
