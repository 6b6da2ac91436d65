//! IPC request handling for the manager process

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::{Mutex, Notify, broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::constants::ipc::EVENT_CAPACITY;
use crate::converter::{self, BuildPlan};
use crate::error::SessionError;
use crate::ipc::{ManagerServer, Request, Response, ServerMessage, read_frame, write_message};
use crate::session::{Session, SongPackExport};

/// Accept GUI connections until the task is dropped
pub async fn serve(server: ManagerServer, session: Arc<Mutex<Session>>, shutdown: Arc<Notify>) -> Result<()> {
    info!(socket = %server.path().display(), "IPC listener started");

    loop {
        let stream = server.accept().await?;
        info!("GUI connected to manager process");

        let session = Arc::clone(&session);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            handle_client(stream, session, shutdown).await;
            info!("GUI disconnected from manager process");
        });
    }
}

/// Serve one client: requests are handled in order, replies and session
/// notifications are written by a separate task.
pub async fn handle_client<S>(stream: S, session: Arc<Mutex<Session>>, shutdown: Arc<Notify>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let (reply_tx, reply_rx) = mpsc::channel(EVENT_CAPACITY);
    let events = session.lock().await.subscribe();
    let writer_task = tokio::spawn(write_loop(writer, reply_rx, events));

    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = ?e, "IPC connection closed or error");
                break;
            }
        };

        let (response, stop) = match serde_json::from_slice::<Request>(&frame) {
            Ok(Request::Shutdown) => {
                info!("Received shutdown request via IPC");
                (Response::Ready, true)
            }
            Ok(request) => (dispatch(request, &session).await, false),
            Err(e) => {
                warn!(error = %e, "Received bad request");
                (Response::Error(format!("invalid request: {e}")), false)
            }
        };

        if reply_tx.send(ServerMessage::Reply(response)).await.is_err() {
            break;
        }
        if stop {
            shutdown.notify_one();
            break;
        }
    }

    drop(reply_tx);
    if let Err(e) = writer_task.await {
        error!(error = %e, "IPC writer task failed");
    }
}

async fn write_loop<W: AsyncWrite>(
    mut writer: WriteHalf<W>,
    mut replies: mpsc::Receiver<ServerMessage>,
    mut events: broadcast::Receiver<crate::ipc::Notification>,
) {
    loop {
        let message = tokio::select! {
            biased;
            reply = replies.recv() => match reply {
                Some(reply) => reply,
                None => break,
            },
            event = events.recv() => match event {
                Ok(event) => ServerMessage::Event(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "GUI fell behind, notifications dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if let Err(e) = write_message(&mut writer, &message).await {
            warn!(error = ?e, "Failed to send message to GUI");
            break;
        }
    }
}

fn reply<T>(result: Result<T, SessionError>, ok: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => ok(value),
        Err(e) => {
            error!(error = %e, "Request failed");
            Response::Error(e.to_string())
        }
    }
}

/// Run one request against the session
pub async fn dispatch(request: Request, session: &Mutex<Session>) -> Response {
    // Converter runs happen outside the session lock
    match &request {
        Request::GenerateBuild => {
            let plan = session.lock().await.prepare_build().await;
            return run_converter(plan).await;
        }
        Request::BatchConvert { folder } => {
            let plan = session.lock().await.prepare_batch(folder);
            return run_converter(plan).await;
        }
        Request::ExtractMusic => {
            let plan = session.lock().await.prepare_extract();
            return run_converter(plan).await;
        }
        Request::ExportPreset { path } => {
            let export = session.lock().await.prepare_export(path).await;
            return export_preset(export).await;
        }
        _ => {}
    }

    let mut session = session.lock().await;
    match request {
        Request::GameTheme => Response::Theme(session.theme_css().to_string()),
        Request::AppThemes => Response::Themes(session.themes()),
        Request::MusicData => {
            debug!(game = ?session.games_config().current_game(), "Sending music data");
            Response::MusicData(session.music_data().cloned())
        }
        Request::GamesConfig => Response::GamesConfig(session.games_config().clone()),
        Request::AppConfig => Response::AppConfig(session.app_config().clone()),
        Request::GameSupport => reply(session.game_support().map_err(Into::into), Response::GameSupport),
        Request::SetReplacement { song_id, file_path } => {
            reply(session.set_replacement(&song_id, &file_path), |song| Response::Song(Some(song)))
        }
        Request::RemoveReplacement { song_id } => {
            reply(session.remove_replacement(&song_id), |()| Response::Success(true))
        }
        Request::SetLoop {
            song_id,
            is_batch,
            start_sample,
            end_sample,
        } => {
            let result = if is_batch {
                session.set_batch_loop(&song_id, start_sample, end_sample)
            } else {
                session.set_loop(&song_id, start_sample, end_sample)
            };
            reply(result, |()| Response::Success(true))
        }
        Request::ChangeConfig { setting } => {
            let result = session.change_config(setting).await;
            reply(result, |()| Response::Configs {
                app_config: session.app_config().clone(),
                games_config: session.games_config().clone(),
            })
        }
        Request::LoadPreset { path, clear_first } => {
            reply(session.load_preset(&path, clear_first), |music| Response::MusicData(Some(music)))
        }
        Request::NewPreset { from_default } => {
            reply(session.new_preset(from_default), |music| Response::MusicData(Some(music)))
        }
        Request::SavePreset { path } => reply(session.save_preset(&path), |()| Response::Success(true)),
        Request::Flush => {
            let report = session.flush(false).await;
            Response::Success(report.failed == 0)
        }
        Request::Ping => Response::Pong,
        Request::GenerateBuild
        | Request::BatchConvert { .. }
        | Request::ExtractMusic
        | Request::ExportPreset { .. }
        | Request::Shutdown => Response::Ready,
    }
}

async fn run_converter(plan: Result<BuildPlan, SessionError>) -> Response {
    let plan = match plan {
        Ok(plan) => plan,
        Err(e) => {
            error!(error = %e, "Converter cannot run");
            return Response::Error(e.to_string());
        }
    };

    match converter::run(&plan).await {
        Ok(success) => Response::Success(success),
        Err(e) => {
            error!(converter = %plan.label, error = ?e, "Converter failed to start");
            Response::Success(false)
        }
    }
}

async fn export_preset(export: Result<SongPackExport, SessionError>) -> Response {
    let export = match export {
        Ok(export) => export,
        Err(e) => {
            error!(error = %e, "Failed to export Song Pack Preset");
            return Response::Error(e.to_string());
        }
    };

    match export.run().await {
        Ok(success) => Response::Success(success),
        Err(e) => {
            error!(error = ?e, "Failed to export Song Pack Preset");
            Response::Success(false)
        }
    }
}
