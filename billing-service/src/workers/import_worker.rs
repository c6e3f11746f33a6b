//! Asynchronous import processing.
//!
//! Import requests return as soon as the batch record exists; the rows are
//! handed to a worker task through an in-process queue and the caller polls
//! the batch status. There is no cancellation: once a job reaches the
//! worker it runs to completion or records a failure.

use crate::models::{ImportKind, ImportRow};
use crate::services::database::Database;
use crate::services::imports::process_import_batch;
use crate::services::metrics::ERRORS_TOTAL;
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

/// One queued import job.
#[derive(Debug)]
pub struct ImportJob {
    pub batch_id: Uuid,
    pub kind: ImportKind,
    pub rows: Vec<ImportRow>,
}

/// Handle for enqueuing import jobs onto the worker task.
#[derive(Clone)]
pub struct ImportQueue {
    sender: mpsc::UnboundedSender<ImportJob>,
}

impl ImportQueue {
    /// Spawn the worker task and return the queue handle.
    pub fn start(db: Arc<Database>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(db, receiver));
        Self { sender }
    }

    /// Hand a job to the worker. Fails only when the worker task is gone.
    pub fn enqueue(&self, job: ImportJob) -> Result<(), AppError> {
        info!(batch_id = %job.batch_id, kind = job.kind.as_str(), "Import job enqueued");
        self.sender
            .send(job)
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("import worker is not running")))
    }
}

async fn run_worker(db: Arc<Database>, mut receiver: mpsc::UnboundedReceiver<ImportJob>) {
    info!("Import worker started");

    while let Some(job) = receiver.recv().await {
        let batch_id = job.batch_id;
        if let Err(e) = process_import_batch(&db, job.batch_id, job.kind, &job.rows).await {
            // The batch record already carries the failure detail; this is
            // the operational trace.
            ERRORS_TOTAL.with_label_values(&["import_worker"]).inc();
            error!(batch_id = %batch_id, error = %e, "Import batch processing failed");
        }
    }

    info!("Import worker stopped");
}
