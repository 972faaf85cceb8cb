use std::convert::Infallible;
use std::path::Path;

use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use scribe_db::JobKind;
use scribe_services::TaskQueue;
use scribe_services::tasks::{TASK_BATCH_PIPELINE, batch_pipeline_args};

use crate::error::ApiError;
use crate::state::AppState;

/// `POST /api/v1/conversation/request`: multipart audio upload; creates
/// a BATCH job and schedules the pipeline on the background executor.
pub async fn create_conversation_request(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let mut file_name = String::new();
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut extras = bson::Document::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("broken multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                file_name = field.file_name().unwrap_or("audio").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("file read failed: {e}")))?;
                file_bytes = Some(bytes.to_vec());
            }
            "cure_seq" | "cust_seq" | "patient_seq" => {
                if let Ok(text) = field.text().await {
                    if let Ok(value) = text.parse::<i64>() {
                        extras.insert(name, value);
                    }
                }
            }
            "mode" => {
                if let Ok(text) = field.text().await {
                    extras.insert("mode", text);
                }
            }
            _ => {}
        }
    }

    let Some(contents) = file_bytes else {
        return Err(ApiError::Validation("missing `file` field".to_string()));
    };

    let job_id = uuid::Uuid::new_v4().to_string();
    let extension = Path::new(&file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let temp_path = Path::new(&state.settings.storage.temp_audio_dir)
        .join(format!("{job_id}.{extension}"));

    tokio::fs::write(&temp_path, &contents)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to store upload: {e}")))?;

    let mut metadata = bson::doc! {
        "filename": file_name.clone(),
        "file_size": contents.len() as i64,
        "file_path": temp_path.to_string_lossy().to_string(),
    };
    metadata.extend(extras);

    if let Err(e) = state
        .manager
        .create_job(&job_id, JobKind::Batch, metadata)
        .await
    {
        if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
            warn!(error = %cleanup, "orphan upload cleanup failed");
        }
        error!(%job_id, error = %e, "batch job creation failed");
        return Err(e.into());
    }

    state
        .queue
        .enqueue(
            TASK_BATCH_PIPELINE,
            batch_pipeline_args(&job_id, &temp_path.to_string_lossy()),
        )
        .await;
    info!(%job_id, file = %file_name, "batch job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "job_id": job_id,
            "job_type": "BATCH",
            "status": "pending",
            "message": "작업이 성공적으로 요청되었습니다.",
        })),
    ))
}

/// `GET /api/v1/conversation/result/{job_id}`: current job record,
/// cache-first.
pub async fn get_conversation_result(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state.manager.get_job(&job_id).await?;
    Ok(Json(job))
}

/// `GET /api/v1/conversation/stream-events/{job_id}`: SSE backfill of stored
/// segments first (marked historical), then live bus events until a
/// terminal event or disconnect.
pub async fn stream_events(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // 404 before the stream starts.
    let job = state.manager.get_job(&job_id).await?;

    let (tx, rx) = mpsc::channel::<Event>(64);
    tokio::spawn(run_event_stream(state, job_id, job, tx));

    let stream = ReceiverStream::new(rx).map(Ok);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn run_event_stream(
    state: AppState,
    job_id: String,
    job: serde_json::Value,
    tx: mpsc::Sender<Event>,
) {
    let status = job
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("PENDING")
        .to_string();

    // Backfill: everything already durable, flagged as historical.
    let segments = match state.manager.get_segments(&job_id).await {
        Ok(segments) => segments,
        Err(e) => {
            error!(%job_id, error = %e, "segment backfill failed");
            Vec::new()
        }
    };
    info!(%job_id, count = segments.len(), "SSE backfill starting");

    for segment in &segments {
        let payload = serde_json::json!({
            "type": "transcript_segment",
            "text": segment.segment_text,
            "segment_number": segment.segment_number,
            "relative_time_sec": segment.start_time,
            "is_historical": true,
            "status": status,
        });
        if send_event(&tx, "transcript_segment", &payload).await.is_err() {
            return;
        }
    }

    // Already finished: synthesize the terminal event and end the stream.
    if status == "COMPLETED" {
        info!(%job_id, "job already completed, sending stored summary");
        let payload = serde_json::json!({
            "type": "final_summary",
            "summary": job.get("structured_summary").cloned().unwrap_or_default(),
            "total_segments": segments.len(),
            "is_historical": true,
            "status": "COMPLETED",
        });
        let _ = send_event(&tx, "final_summary", &payload).await;
        return;
    }

    // Live phase.
    info!(%job_id, "SSE live subscription starting");
    let mut events = state.manager.subscribe_events(&job_id).await;
    while let Some(payload) = events.recv().await {
        let event_type = payload
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("message")
            .to_string();
        if send_event(&tx, &event_type, &payload).await.is_err() {
            break;
        }
        if event_type == "final_summary" {
            info!(%job_id, "terminal event delivered, closing SSE stream");
            break;
        }
    }
}

async fn send_event(
    tx: &mpsc::Sender<Event>,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<(), ()> {
    let event = Event::default().event(event_type).data(payload.to_string());
    tx.send(event).await.map_err(|_| ())
}

/// `GET /api/v1/conversation/errors/{job_id}`: error log listing; 404
/// only when the job itself is unknown.
pub async fn get_job_errors(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let errors = state.manager.get_errors(&job_id).await?;

    if errors.is_empty() {
        // Distinguish "no errors" from "no such job".
        state.manager.get_job(&job_id).await?;
        return Ok(Json(serde_json::json!({
            "job_id": job_id,
            "errors": [],
            "message": "에러 로그가 없습니다.",
        })));
    }

    let views: Vec<serde_json::Value> = errors.iter().map(|e| e.to_view()).collect();
    Ok(Json(serde_json::json!({
        "job_id": job_id,
        "errors": views,
        "error_count": views.len(),
    })))
}
