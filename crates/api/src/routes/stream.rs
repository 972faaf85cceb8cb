use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use scribe_db::JobKind;
use scribe_transcription::audio::AudioFormat;

use crate::error::ApiError;
use crate::state::{AppState, StreamSession};

#[derive(Debug, Deserialize)]
pub struct CreateStreamRequest {
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub room_id: Option<String>,
    pub member_id: Option<String>,
    pub cure_seq: Option<i64>,
    pub cust_seq: Option<i64>,
    pub patient_seq: Option<i64>,
    pub mode: Option<String>,
}

fn default_audio_format() -> String {
    "pcm".to_string()
}

/// `POST /api/v1/stream/create`: creates a REALTIME job and registers a
/// pending stream session for the socket to claim. With both room and
/// member supplied, an active duplicate connection is rejected with 409.
pub async fn create_stream_job(
    State(state): State<AppState>,
    Json(body): Json<CreateStreamRequest>,
) -> Result<Response, ApiError> {
    let format = AudioFormat::parse(&body.audio_format)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let job_id = uuid::Uuid::new_v4().to_string();
    let mut metadata = bson::doc! {
        "audio_format": format.as_str(),
    };
    if let Some(rate) = body.sample_rate {
        metadata.insert("sample_rate", rate as i64);
    }
    if let Some(channels) = body.channels {
        metadata.insert("channels", channels as i32);
    }
    if let Some(mode) = &body.mode {
        metadata.insert("mode", mode.as_str());
    }
    if let Some(cure_seq) = body.cure_seq {
        metadata.insert("cure_seq", cure_seq);
    }
    if let Some(cust_seq) = body.cust_seq {
        metadata.insert("cust_seq", cust_seq);
    }
    if let Some(patient_seq) = body.patient_seq {
        metadata.insert("patient_seq", patient_seq);
    }

    let mut conference_info = None;
    let mut warning = None;

    match (&body.room_id, &body.member_id) {
        (Some(room_id), Some(member_id)) => {
            if let Some(existing) = state.manager.check_member_exists(room_id, member_id).await? {
                if existing.status.is_active() {
                    info!(
                        %room_id, %member_id,
                        existing_job_id = %existing.job_id,
                        "duplicate member connection rejected"
                    );
                    return Ok((
                        StatusCode::CONFLICT,
                        Json(serde_json::json!({
                            "error": "duplicate_member",
                            "message": format!(
                                "member {member_id} already has an active job in room {room_id}"
                            ),
                            "existing_job_id": existing.job_id,
                        })),
                    )
                        .into_response());
                }
                warning = Some(format!(
                    "member {member_id} has a previous job in room {room_id} ({})",
                    existing.status
                ));
            }

            state.manager.get_or_create_room(room_id).await?;
            metadata.insert("room_id", room_id.as_str());
            metadata.insert("member_id", member_id.as_str());
            state
                .manager
                .create_job_with_room(&job_id, JobKind::Realtime, room_id, member_id, metadata)
                .await?;

            let member_count = state
                .manager
                .get_room_info(room_id)
                .await?
                .and_then(|info| info.get("member_count").cloned())
                .unwrap_or_default();
            conference_info = Some(serde_json::json!({
                "room_id": room_id,
                "member_id": member_id,
                "member_count": member_count,
            }));
        }
        (None, None) => {
            state
                .manager
                .create_job(&job_id, JobKind::Realtime, metadata)
                .await?;
        }
        _ => {
            return Err(ApiError::Validation(
                "room_id and member_id must be provided together".to_string(),
            ));
        }
    }

    state.active_streams.insert(
        job_id.clone(),
        StreamSession {
            audio_format: format,
            sample_rate: body.sample_rate,
            channels: body.channels,
            room_id: body.room_id.clone(),
            member_id: body.member_id.clone(),
            created_at: Utc::now(),
            claimed: false,
        },
    );
    info!(%job_id, format = format.as_str(), "stream job created");

    let mut response = serde_json::json!({
        "job_id": job_id,
        "job_type": "REALTIME",
        "status": "pending",
        "audio_config": {
            "format": format.as_str(),
            "sample_rate": body.sample_rate,
            "channels": body.channels,
        },
    });
    if let Some(map) = response.as_object_mut() {
        if let Some(info) = conference_info {
            map.insert("conference_info".to_string(), info);
        }
        if let Some(text) = warning {
            warn!(%text, "stream created with warning");
            map.insert("warning".to_string(), text.into());
        }
    }

    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// `GET /api/v1/stream/room/{room_id}`: room record with member roster
/// and per-status job counts.
pub async fn get_room_info(
    State(state): State<AppState>,
    UrlPath(room_id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.manager.get_room_info(&room_id).await? {
        Some(info) => Ok(Json(info)),
        None => Err(ApiError::NotFound(format!("room {room_id} not found"))),
    }
}

/// `GET /api/v1/stream/health`
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let audio = &state.settings.audio;
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_streams": state.active_streams.len(),
        "vad": {
            "energy_threshold": audio.vad_energy_threshold,
            "aggressiveness": audio.vad_aggressiveness,
            "min_speech_frames": audio.vad_min_speech_frames,
            "max_silence_frames": audio.vad_max_silence_frames,
        },
    }))
}
