use std::sync::Arc;

use anyhow::Context;
use dashmap::DashMap;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use scribe_api::state::AppState;
use scribe_api::tasks::{LocalTaskQueue, TaskContext, spawn_task_runner};
use scribe_config::Settings;
use scribe_db::MongoJobStore;
use scribe_services::{JobManager, OllamaSummarizer, RedisEventBus, RedisJobCache, TaskQueue};
use scribe_transcription::Recognizer;
use scribe_transcription::asr::{HttpRecognizer, MockRecognizer};

fn build_recognizer(settings: &Settings) -> anyhow::Result<Arc<dyn Recognizer>> {
    match settings.stt.engine.as_str() {
        "http" => Ok(Arc::new(HttpRecognizer::new(
            settings.stt.endpoint.clone(),
            settings.stt.language.clone(),
        ))),
        "mock" => Ok(Arc::new(MockRecognizer::new("모의 인식 결과"))),
        #[cfg(feature = "local-whisper")]
        "local_whisper" => {
            let model_path = settings
                .stt
                .model_path
                .as_deref()
                .context("stt.model_path is required for the local_whisper engine")?;
            Ok(Arc::new(
                scribe_transcription::asr::local_whisper::LocalWhisperRecognizer::new(
                    model_path,
                    settings.stt.language.clone(),
                )?,
            ))
        }
        other => anyhow::bail!("unknown stt engine: {other}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Arc::new(Settings::load().context("settings load failed")?);

    tokio::fs::create_dir_all(&settings.storage.temp_audio_dir)
        .await
        .context("temp audio directory")?;

    // Durable store.
    let mongo = mongodb::Client::with_uri_str(&settings.mongo.uri)
        .await
        .context("mongodb connection")?;
    let db = mongo.database(&settings.mongo.database);
    scribe_db::indexes::ensure_indexes(&db)
        .await
        .context("index creation")?;
    let store = Arc::new(MongoJobStore::new(db));

    // Cache + event bus.
    let redis_client =
        redis::Client::open(settings.redis.url.clone()).context("redis client")?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client.clone())
        .await
        .context("redis connection")?;
    let cache = Arc::new(RedisJobCache::new(redis_conn.clone()));
    let bus = Arc::new(RedisEventBus::new(redis_client, redis_conn));

    // Background task executor.
    let (queue, task_rx) = LocalTaskQueue::new();
    let queue: Arc<dyn TaskQueue> = Arc::new(queue);

    let manager = Arc::new(JobManager::new(store, cache, bus, Arc::clone(&queue)));

    // A recognizer that cannot load is fatal at startup.
    let recognizer = build_recognizer(&settings)?;
    {
        let recognizer = Arc::clone(&recognizer);
        tokio::task::spawn_blocking(move || recognizer.load())
            .await
            .context("recognizer load task")?
            .context("recognizer load failed")?;
    }

    let summarizer: Arc<dyn scribe_services::Summarizer> = Arc::new(OllamaSummarizer::new(
        settings.llm.base_url.clone(),
        settings.llm.model.clone(),
        std::time::Duration::from_secs(settings.llm.timeout_secs),
    ));
    if !summarizer.check_connection().await {
        warn!("summarizer unreachable at startup, summaries will fail until it comes back");
    }

    spawn_task_runner(
        task_rx,
        TaskContext {
            manager: Arc::clone(&manager),
            recognizer: Arc::clone(&recognizer),
            summarizer: Arc::clone(&summarizer),
            queue: Arc::clone(&queue),
        },
    );

    let state = AppState {
        settings: Arc::clone(&settings),
        manager,
        recognizer,
        summarizer,
        queue,
        active_streams: Arc::new(DashMap::new()),
    };

    let app = scribe_api::build_router(state);
    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "scribe api listening");
    axum::serve(listener, app).await.context("server exited")?;

    Ok(())
}
