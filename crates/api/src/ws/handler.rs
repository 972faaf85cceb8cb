use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use tracing::{debug, info, warn};

use scribe_db::{JobPatch, JobStatus};
use scribe_transcription::audio::AudioConverter;
use scribe_transcription::{StreamPipeline, TranscriptionConfig};

use crate::state::AppState;

/// Policy violation (unknown/duplicate job id).
const CLOSE_POLICY: u16 = 1008;
/// Server-side failure (converter construction).
const CLOSE_INTERNAL: u16 = 1011;

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_stream_socket(socket, state, job_id))
}

fn transcription_config(state: &AppState) -> TranscriptionConfig {
    let audio = &state.settings.audio;
    TranscriptionConfig {
        vad_energy_threshold: audio.vad_energy_threshold,
        vad_aggressiveness: audio.vad_aggressiveness,
        vad_min_speech_frames: audio.vad_min_speech_frames,
        vad_max_silence_frames: audio.vad_max_silence_frames,
        worker_count: audio.stt_workers,
        drain_timeout: std::time::Duration::from_secs(audio.drain_timeout_secs),
        join_timeout: std::time::Duration::from_secs(audio.join_timeout_secs),
        prompt_context_max_chars: audio.prompt_context_max_chars,
        hallucination_ban_phrase: audio.hallucination_ban_phrase.clone(),
    }
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

async fn send_json(socket: &mut WebSocket, payload: &serde_json::Value) -> Result<(), ()> {
    socket
        .send(Message::text(payload.to_string()))
        .await
        .map_err(|_| ())
}

enum Claim {
    NotFound,
    AlreadyConnected,
    Session(
        scribe_transcription::audio::AudioFormat,
        Option<u32>,
        Option<u16>,
        Option<String>,
    ),
}

/// Marks the session claimed without holding the map guard across any
/// suspension point.
fn claim_session(state: &AppState, job_id: &str) -> Claim {
    match state.active_streams.get_mut(job_id) {
        None => Claim::NotFound,
        Some(mut entry) => {
            if entry.claimed {
                Claim::AlreadyConnected
            } else {
                entry.claimed = true;
                Claim::Session(
                    entry.audio_format,
                    entry.sample_rate,
                    entry.channels,
                    entry.room_id.clone(),
                )
            }
        }
    }
}

/// `WS /ws/v1/stream/{job_id}`: binary audio in, JSON events out. The
/// pipeline finalizes exactly once, on whatever path the socket exits.
async fn handle_stream_socket(mut socket: WebSocket, state: AppState, job_id: String) {
    // Claim the pending session; the same handler removes it on exit.
    let (audio_format, sample_rate, channels, room_id) =
        match claim_session(&state, &job_id) {
            Claim::NotFound => {
                warn!(%job_id, "socket for unknown job id");
                state
                    .manager
                    .log_error(&job_id, "websocket_stream", "존재하지 않는 Job ID")
                    .await;
                close_with(socket, CLOSE_POLICY, "Job ID not found").await;
                return;
            }
            Claim::AlreadyConnected => {
                warn!(%job_id, "second socket for an already-connected job");
                close_with(socket, CLOSE_POLICY, "Job already has an active connection").await;
                return;
            }
            Claim::Session(format, rate, channels, room) => (format, rate, channels, room),
        };

    info!(%job_id, format = audio_format.as_str(), "stream socket connected");
    if let Err(e) = state
        .manager
        .update_status(&job_id, JobStatus::Processing, JobPatch::default())
        .await
    {
        warn!(%job_id, error = %e, "processing status write failed");
    }

    let _ = send_json(
        &mut socket,
        &serde_json::json!({
            "type": "connection_success",
            "message": format!("Job {job_id}에 성공적으로 연결되었습니다."),
        }),
    )
    .await;

    let converter = match AudioConverter::new(audio_format, sample_rate, channels) {
        Ok(converter) => converter,
        Err(e) => {
            state
                .manager
                .log_error(&job_id, "websocket_stream", &e.to_string())
                .await;
            if let Err(status_err) = state
                .manager
                .update_status(
                    &job_id,
                    JobStatus::Failed,
                    JobPatch::default().with_error_message(e.to_string()),
                )
                .await
            {
                warn!(%job_id, error = %status_err, "failure status write failed");
            }
            let _ = send_json(
                &mut socket,
                &serde_json::json!({ "type": "error", "message": e.to_string() }),
            )
            .await;
            close_with(socket, CLOSE_INTERNAL, "audio converter init failed").await;
            state.active_streams.remove(&job_id);
            return;
        }
    };

    let mut pipeline = StreamPipeline::new(
        job_id.clone(),
        state.manager.clone(),
        state.summarizer.clone(),
        state.recognizer.clone(),
        converter,
        transcription_config(&state),
    );
    pipeline.start();

    'session: loop {
        match socket.recv().await {
            Some(Ok(Message::Binary(data))) => match pipeline.process_chunk(&data).await {
                Ok(events) => {
                    for event in events {
                        if send_json(&mut socket, &event.to_json()).await.is_err() {
                            // Disconnect during send is a normal exit.
                            debug!(%job_id, "client went away mid-send");
                            break 'session;
                        }
                    }
                }
                Err(e) => {
                    // Per-packet loss; the stream continues.
                    debug!(%job_id, error = %e, "audio packet dropped");
                }
            },
            Some(Ok(Message::Ping(data))) => {
                let _ = socket.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                info!(%job_id, "stream socket closed by client");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(%job_id, error = %e, "stream socket error");
                break;
            }
        }
    }

    let terminal = pipeline.finalize().await;
    let _ = send_json(&mut socket, &terminal.to_json()).await;

    if let Some(room_id) = room_id {
        state.manager.check_and_trigger_room_summary(&room_id).await;
    }

    state.active_streams.remove(&job_id);
    info!(%job_id, "stream socket session ended");
}
