//! Music build: resolving and running the external converter

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::support::GameSupport;
use crate::config::games::PERSONA_4_GOLDEN;
use crate::config::{AppConfig, GameEntry};
use crate::constants::files::ORIGINAL_SONGS;
use crate::error::ConfigError;
use crate::paths::AppPaths;

/// A fully resolved converter invocation
#[derive(Debug, Clone, PartialEq)]
pub struct BuildPlan {
    /// Converter name used in log lines
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
}

const BUILTIN_LABEL: &str = "Phos Music Converter";

fn music_data_path(game: &GameEntry) -> Result<PathBuf, ConfigError> {
    game.settings
        .music_data_path
        .clone()
        .ok_or_else(|| ConfigError::MusicDataPathMissing(game.name.clone()))
}

fn game_flag(game: &GameEntry, support: &GameSupport) -> Result<String, ConfigError> {
    support
        .game_flag
        .clone()
        .ok_or_else(|| ConfigError::GameFlagMissing(game.name.clone()))
}

/// Built-in converter run from its own folder, with the shared `-v`/`-l` tail
fn builtin(
    app: &AppConfig,
    mut args: Vec<OsString>,
    output_dir: PathBuf,
    verbose: bool,
    low_performance: bool,
) -> Result<BuildPlan, ConfigError> {
    let program = app
        .dependencies
        .converter_path
        .clone()
        .ok_or(ConfigError::ConverterPathMissing)?;
    if verbose {
        args.push("-v".into());
    }
    if low_performance {
        args.push("-l".into());
    }

    Ok(BuildPlan {
        label: BUILTIN_LABEL.to_string(),
        working_dir: program.parent().map(Path::to_path_buf),
        program,
        args,
        output_dir,
    })
}

/// Resolve how to build `game`'s music.
/// `support` is only consulted for the built-in converter.
pub fn plan(
    app: &AppConfig,
    game: &GameEntry,
    support: Result<GameSupport, ConfigError>,
    paths: &AppPaths,
    verbose: bool,
) -> Result<BuildPlan, ConfigError> {
    let music_data = music_data_path(game)?;

    let Some(tool_name) = &game.tool else {
        let flag = game_flag(game, &support?)?;
        let output_dir = game
            .settings
            .output_directory
            .clone()
            .unwrap_or_else(|| paths.build_output(&game.name));
        let args = vec![
            "build".into(),
            "-g".into(),
            flag.into(),
            "-i".into(),
            music_data.into(),
            "-o".into(),
            output_dir.clone().into(),
        ];
        return builtin(app, args, output_dir, verbose, game.settings.low_performance);
    };

    let tool = app.tool(tool_name).ok_or_else(|| ConfigError::ToolNotFound {
        tool: tool_name.clone(),
        game: game.name.clone(),
    })?;
    let program = tool
        .path
        .clone()
        .ok_or_else(|| ConfigError::ToolPathMissing(tool_name.clone()))?;
    let output_dir = game
        .settings
        .output_directory
        .clone()
        .unwrap_or_else(|| paths.build_output(tool_name));

    Ok(BuildPlan {
        label: tool_name.clone(),
        args: vec!["-i".into(), music_data.into(), "-o".into(), output_dir.clone().into()],
        working_dir: program.parent().map(Path::to_path_buf),
        program,
        output_dir,
    })
}

/// Export the game's replacement songs, encoded, into `export_dir`.
/// Always uses the built-in converter.
pub fn plan_export(
    app: &AppConfig,
    game: &GameEntry,
    support: &GameSupport,
    export_dir: &Path,
    verbose: bool,
) -> Result<BuildPlan, ConfigError> {
    let music_data = music_data_path(game)?;
    let flag = game_flag(game, support)?;
    let args = vec![
        "export".into(),
        "-g".into(),
        flag.into(),
        "-i".into(),
        music_data.into(),
        "-o".into(),
        export_dir.into(),
    ];
    builtin(app, args, export_dir.to_path_buf(), verbose, game.settings.low_performance)
}

/// Encode every song file in `folder` in place for `game`
pub fn plan_batch(
    app: &AppConfig,
    game: &GameEntry,
    support: &GameSupport,
    folder: &Path,
    verbose: bool,
) -> Result<BuildPlan, ConfigError> {
    let flag = game_flag(game, support)?;
    if support.encoded_format.is_none() {
        return Err(ConfigError::EncodedFormatMissing(game.name.clone()));
    }
    let args = vec!["batch".into(), "-g".into(), flag.into(), "-f".into(), folder.into()];
    builtin(app, args, folder.to_path_buf(), verbose, game.settings.low_performance)
}

/// Game archive holding the original music, relative to the game directory
fn original_music_archive(game: &str) -> Option<&'static str> {
    match game {
        PERSONA_4_GOLDEN => Some("SND/BGM.xwb"),
        _ => None,
    }
}

/// Extract `game`'s original songs into `<converter dir>/<game>/original-songs`
pub fn plan_extract(app: &AppConfig, game: &GameEntry, verbose: bool) -> Result<BuildPlan, ConfigError> {
    let game_dir = game
        .settings
        .game_directory
        .clone()
        .ok_or_else(|| ConfigError::GameDirectoryMissing(game.name.clone()))?;
    let archive = original_music_archive(&game.name)
        .ok_or_else(|| ConfigError::ExtractUnsupported(game.name.clone()))?;
    let converter = app
        .dependencies
        .converter_path
        .as_deref()
        .ok_or(ConfigError::ConverterPathMissing)?;
    let output_dir = converter
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(&game.name)
        .join(ORIGINAL_SONGS);

    let args = vec![
        "extract".into(),
        "-i".into(),
        game_dir.join(archive).into(),
        "-o".into(),
        output_dir.clone().into(),
    ];
    builtin(app, args, output_dir, verbose, false)
}

async fn forward_lines(label: &str, stream: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(converter = %label, "{line}"),
            Ok(None) => break,
            Err(e) => {
                error!(converter = %label, error = %e, "Failed to read converter output");
                break;
            }
        }
    }
}

/// Run the converter, forwarding its output to the log.
/// Returns whether it exited with status 0.
pub async fn run(plan: &BuildPlan) -> Result<bool> {
    info!(converter = %plan.label, output = %plan.output_dir.display(), "Building output");

    let mut command = Command::new(&plan.program);
    command
        .args(&plan.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &plan.working_dir {
        command.current_dir(dir);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to start {}", plan.program.display()))?;
    let stdout = child.stdout.take().context("converter stdout not captured")?;
    let stderr = child.stderr.take().context("converter stderr not captured")?;

    let (status, (), ()) = tokio::join!(
        child.wait(),
        forward_lines(&plan.label, stdout),
        forward_lines(&plan.label, stderr)
    );
    let status = status.context("Failed to wait for converter")?;

    if status.success() {
        debug!(converter = %plan.label, "Converter exited successfully");
        Ok(true)
    } else {
        error!(converter = %plan.label, %status, "Converter encountered problems!");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GamesConfig;
    use crate::config::app::Tool;

    fn paths() -> AppPaths {
        AppPaths::new("/data")
    }

    fn game() -> GameEntry {
        let mut game = GamesConfig::default().games[0].clone();
        game.settings.music_data_path = Some(PathBuf::from("/data/settings/P4G/current.json"));
        game
    }

    fn support(flag: Option<&str>) -> Result<GameSupport, ConfigError> {
        Ok(GameSupport {
            encoded_format: Some(".raw".to_string()),
            supported_filetypes: vec!["wav".to_string()],
            game_flag: flag.map(str::to_string),
        })
    }

    fn args(plan: &BuildPlan) -> Vec<String> {
        plan.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_builtin_converter_plan() {
        let app = AppConfig::default_for(&paths());
        let mut game = game();
        game.settings.low_performance = true;

        let plan = plan(&app, &game, support(Some("p4g")), &paths(), true).unwrap();

        assert_eq!(plan.program, paths().default_converter());
        assert_eq!(plan.working_dir.as_deref(), paths().default_converter().parent());
        assert_eq!(plan.output_dir, PathBuf::from("/data/music-build/Persona 4 Golden"));
        assert_eq!(
            args(&plan),
            vec![
                "build",
                "-g",
                "p4g",
                "-i",
                "/data/settings/P4G/current.json",
                "-o",
                "/data/music-build/Persona 4 Golden",
                "-v",
                "-l"
            ]
        );
    }

    #[test]
    fn test_builtin_converter_needs_game_flag() {
        let app = AppConfig::default_for(&paths());
        let result = plan(&app, &game(), support(None), &paths(), false);
        assert!(matches!(result, Err(ConfigError::GameFlagMissing(_))));
    }

    #[test]
    fn test_missing_music_data_path() {
        let app = AppConfig::default_for(&paths());
        let mut game = game();
        game.settings.music_data_path = None;
        let result = plan(&app, &game, support(Some("p4g")), &paths(), false);
        assert!(matches!(result, Err(ConfigError::MusicDataPathMissing(_))));
    }

    #[test]
    fn test_custom_tool_plan() {
        let mut app = AppConfig::default_for(&paths());
        app.dependencies.tools.push(Tool {
            name: "Other".to_string(),
            path: Some(PathBuf::from("/tools/other/run.exe")),
        });
        let mut game = game();
        game.tool = Some("Other".to_string());
        game.settings.output_directory = Some(PathBuf::from("/mods/out"));

        let plan = plan(&app, &game, Err(ConfigError::SupportUnavailable("n/a".into())), &paths(), true).unwrap();

        assert_eq!(plan.program, PathBuf::from("/tools/other/run.exe"));
        assert_eq!(plan.working_dir, Some(PathBuf::from("/tools/other")));
        assert_eq!(args(&plan), vec!["-i", "/data/settings/P4G/current.json", "-o", "/mods/out"]);
    }

    #[test]
    fn test_export_plan() {
        let app = AppConfig::default_for(&paths());
        let support = support(Some("p4g")).unwrap();

        let plan = plan_export(&app, &game(), &support, Path::new("/presets/songs"), false).unwrap();

        assert_eq!(plan.program, paths().default_converter());
        assert_eq!(plan.working_dir.as_deref(), paths().default_converter().parent());
        assert_eq!(plan.output_dir, PathBuf::from("/presets/songs"));
        assert_eq!(
            args(&plan),
            vec!["export", "-g", "p4g", "-i", "/data/settings/P4G/current.json", "-o", "/presets/songs"]
        );
    }

    #[test]
    fn test_batch_plan_needs_encoded_format() {
        let app = AppConfig::default_for(&paths());
        let mut game = game();
        game.settings.low_performance = true;
        let mut support = support(Some("p4g")).unwrap();

        let plan = plan_batch(&app, &game, &support, Path::new("/music/batch"), true).unwrap();
        assert_eq!(args(&plan), vec!["batch", "-g", "p4g", "-f", "/music/batch", "-v", "-l"]);

        support.encoded_format = None;
        let result = plan_batch(&app, &game, &support, Path::new("/music/batch"), true);
        assert!(matches!(result, Err(ConfigError::EncodedFormatMissing(_))));
    }

    #[test]
    fn test_extract_plan() {
        let app = AppConfig::default_for(&paths());
        let mut game = game();
        assert!(matches!(plan_extract(&app, &game, false), Err(ConfigError::GameDirectoryMissing(_))));

        game.settings.game_directory = Some(PathBuf::from("/games/p4g"));
        let plan = plan_extract(&app, &game, true).unwrap();
        let expected_out = paths()
            .default_converter()
            .parent()
            .unwrap()
            .join("Persona 4 Golden/original-songs");
        assert_eq!(plan.output_dir, expected_out);
        assert_eq!(
            args(&plan),
            vec![
                "extract".to_string(),
                "-i".to_string(),
                "/games/p4g/SND/BGM.xwb".to_string(),
                "-o".to_string(),
                expected_out.to_string_lossy().into_owned(),
                "-v".to_string()
            ]
        );

        let mut p5 = GamesConfig::default().games[1].clone();
        p5.settings.game_directory = Some(PathBuf::from("/games/p5"));
        assert!(matches!(plan_extract(&app, &p5, false), Err(ConfigError::ExtractUnsupported(_))));
    }

    #[test]
    fn test_custom_tool_must_be_configured() {
        let app = AppConfig::default_for(&paths());
        let mut game = game();

        game.tool = Some("Missing".to_string());
        let result = plan(&app, &game, support(None), &paths(), false);
        assert!(matches!(result, Err(ConfigError::ToolNotFound { .. })));

        game.tool = Some("Example".to_string());
        let result = plan(&app, &game, support(None), &paths(), false);
        assert!(matches!(result, Err(ConfigError::ToolPathMissing(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_exit_status() {
        let ok = BuildPlan {
            label: "sh".to_string(),
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), "echo converting; echo warn >&2".into()],
            working_dir: None,
            output_dir: PathBuf::from("/tmp"),
        };
        assert!(run(&ok).await.unwrap());

        let failing = BuildPlan {
            args: vec!["-c".into(), "exit 3".into()],
            ..ok
        };
        assert!(!run(&failing).await.unwrap());
    }

    #[tokio::test]
    async fn test_run_missing_program_is_an_error() {
        let plan = BuildPlan {
            label: "missing".to_string(),
            program: PathBuf::from("/definitely/not/here"),
            args: Vec::new(),
            working_dir: None,
            output_dir: PathBuf::from("/tmp"),
        };
        assert!(run(&plan).await.is_err());
    }
}
