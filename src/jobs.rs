//! Bounded webhook ingestion queue drained by a single background worker.

use crate::{
    error::SyncError,
    models::Marketplace,
    sync::{IngestOutcome, SyncService, WebhookEvent},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

type Statuses = Arc<Mutex<HashMap<Uuid, JobInfo>>>;

#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<Job>,
    statuses: Statuses,
}

struct Job {
    id: Uuid,
    event: WebhookEvent,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: IngestOutcome },
    Failed { error: String, kind: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub marketplace: Marketplace,
    pub topic: String,
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: JobState,
}

impl IngestQueue {
    pub fn spawn(sync: SyncService, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses: Statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                set_state(&statuses_bg, job.id, JobState::Running).await;
                let marketplace = job.event.marketplace;
                let topic = job.event.topic.clone();

                let state = match sync.ingest_webhook(job.event).await {
                    Ok(result) => JobState::Completed { result },
                    Err(err) => {
                        warn!(
                            target: "channel_sync.jobs",
                            job_id = %job.id,
                            %marketplace,
                            topic = %topic,
                            error = %err,
                            "webhook ingestion failed"
                        );
                        failed(&err)
                    }
                };
                set_state(&statuses_bg, job.id, state).await;
            }
        });

        (Self { tx, statuses }, handle)
    }

    /// Queues `event` and returns its job record. Fails fast when the queue
    /// is full so the sender retries the delivery later.
    pub async fn enqueue(&self, event: WebhookEvent) -> Result<JobInfo, SyncError> {
        let info = JobInfo {
            id: Uuid::new_v4(),
            marketplace: event.marketplace,
            topic: event.topic.clone(),
            received_at: Utc::now(),
            state: JobState::Queued,
        };
        self.statuses.lock().await.insert(info.id, info.clone());

        if let Err(err) = self.tx.try_send(Job { id: info.id, event }) {
            self.statuses.lock().await.remove(&info.id);
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "ingest queue is full",
                mpsc::error::TrySendError::Closed(_) => "ingest worker is not running",
            };
            return Err(SyncError::Storage(reason.into()));
        }
        info!(
            target: "channel_sync.jobs",
            job_id = %info.id,
            marketplace = %info.marketplace,
            topic = %info.topic,
            "webhook queued"
        );
        Ok(info)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        self.statuses.lock().await.get(&id).cloned()
    }
}

async fn set_state(statuses: &Statuses, id: Uuid, state: JobState) {
    if let Some(info) = statuses.lock().await.get_mut(&id) {
        info.state = state;
    }
}

fn failed(err: &SyncError) -> JobState {
    let kind = serde_json::to_value(err.kind())
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    JobState::Failed {
        error: err.to_string(),
        kind,
    }
}
