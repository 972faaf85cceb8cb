use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

const JOB_KEY_PREFIX: &str = "job:";

/// Fast read mirror of job records. Strictly best-effort: the job manager
/// logs cache failures and continues against the durable store.
#[async_trait]
pub trait JobCache: Send + Sync + 'static {
    async fn put_job(&self, job_id: &str, view: &serde_json::Value) -> anyhow::Result<()>;

    async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<serde_json::Value>>;

    /// Shallow-merges `patch` into the cached record. A miss is not an
    /// error; the next read-through repopulates the mirror.
    async fn merge_job(
        &self,
        job_id: &str,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<()>;
}

pub struct RedisJobCache {
    conn: ConnectionManager,
}

impl RedisJobCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(job_id: &str) -> String {
        format!("{JOB_KEY_PREFIX}{job_id}")
    }
}

#[async_trait]
impl JobCache for RedisJobCache {
    async fn put_job(&self, job_id: &str, view: &serde_json::Value) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::key(job_id), view.to_string())
            .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key(job_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn merge_job(
        &self,
        job_id: &str,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<()> {
        let Some(mut current) = self.get_job(job_id).await? else {
            return Ok(());
        };
        if let Some(map) = current.as_object_mut() {
            for (key, value) in patch {
                map.insert(key.clone(), value.clone());
            }
        }
        self.put_job(job_id, &current).await
    }
}
