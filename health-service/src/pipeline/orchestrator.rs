use super::{LabPipeline, PipelineOutcome};
use crate::config::PipelineConfig;
use crate::models::{LabBiomarkerValue, LabResult, ProcessingStatus};
use crate::services::database::Database;
use crate::services::storage::Storage;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use service_core::error::AppError;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionJob {
    pub result_id: Uuid,
}

/// Producer side of the extraction queue, held in `AppState`.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<ExtractionJob>,
}

impl JobQueue {
    pub fn enqueue(&self, job: ExtractionJob) -> Result<(), AppError> {
        let result_id = job.result_id;
        self.tx.try_send(job).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "Job queue full",
                TrySendError::Closed(_) => "Job queue closed",
            };
            tracing::warn!(result_id = %result_id, reason, "Failed to enqueue extraction job");
            AppError::InternalError(anyhow::anyhow!(reason))
        })?;

        metrics::counter!("lab_extraction_jobs_enqueued_total").increment(1);
        Ok(())
    }

    /// Enqueue, logging instead of failing. The result stays `pending` and is
    /// picked up again by the startup sweep.
    pub fn enqueue_or_log(&self, result_id: Uuid) {
        if self.enqueue(ExtractionJob { result_id }).is_ok() {
            tracing::info!(result_id = %result_id, "Extraction job enqueued");
        }
    }
}

pub struct WorkerOrchestrator {
    config: PipelineConfig,
    db: Database,
    storage: Arc<dyn Storage>,
    pipeline: Arc<LabPipeline>,
    job_rx: mpsc::Receiver<ExtractionJob>,
    shutdown_token: CancellationToken,
}

impl WorkerOrchestrator {
    pub fn new(
        config: PipelineConfig,
        db: Database,
        storage: Arc<dyn Storage>,
        pipeline: Arc<LabPipeline>,
    ) -> (Self, JobQueue) {
        let (tx, job_rx) = mpsc::channel(config.queue_size.max(1));

        let orchestrator = Self {
            config,
            db,
            storage,
            pipeline,
            job_rx,
            shutdown_token: CancellationToken::new(),
        };

        (orchestrator, JobQueue { tx })
    }

    /// Spawn the worker loops. Returns the token that stops them.
    pub fn start(self) -> CancellationToken {
        let shutdown = self.shutdown_token.clone();

        if !self.config.enabled {
            tracing::info!("Extraction pipeline disabled by configuration");
            return shutdown;
        }

        tracing::info!(
            worker_count = self.config.worker_count,
            queue_size = self.config.queue_size,
            "Starting extraction worker pool"
        );

        let worker = Arc::new(Worker {
            db: self.db,
            storage: self.storage,
            pipeline: self.pipeline,
            max_retry: Duration::from_secs(self.config.max_retry_seconds),
        });

        spawn_worker_loops(
            self.config.worker_count,
            self.job_rx,
            shutdown.clone(),
            move |worker_id, job| {
                let worker = worker.clone();
                async move { worker.process_job(worker_id, job).await }
            },
        );

        shutdown
    }
}

/// Run `count` long-lived workers that share one receiver. At most `count`
/// jobs are in flight; a full queue pushes back on producers.
fn spawn_worker_loops<F, Fut>(
    count: usize,
    job_rx: mpsc::Receiver<ExtractionJob>,
    token: CancellationToken,
    handle: F,
) -> Vec<JoinHandle<()>>
where
    F: Fn(usize, ExtractionJob) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let job_rx = Arc::new(Mutex::new(job_rx));

    (0..count.max(1))
        .map(|worker_id| {
            let job_rx = job_rx.clone();
            let token = token.clone();
            let handle = handle.clone();

            tokio::spawn(async move {
                loop {
                    let job = tokio::select! {
                        _ = token.cancelled() => break,
                        job = async { job_rx.lock().await.recv().await } => job,
                    };

                    let Some(job) = job else {
                        break;
                    };

                    tracing::debug!(
                        worker_id,
                        result_id = %job.result_id,
                        "Extraction job picked up"
                    );
                    handle(worker_id, job).await;
                }

                tracing::debug!(worker_id, "Extraction worker stopped");
            })
        })
        .collect()
}

/// Re-enqueue results left `pending` or `processing` by a previous run.
pub async fn requeue_unfinished(db: &Database, queue: &JobQueue) -> Result<usize, AppError> {
    let unfinished = db
        .list_results_with_status(&[ProcessingStatus::Pending, ProcessingStatus::Processing])
        .await?;

    let mut count = 0;
    for result in unfinished.iter().filter(|r| r.pdf_storage_key.is_some()) {
        if queue
            .enqueue(ExtractionJob {
                result_id: result.id,
            })
            .is_err()
        {
            break;
        }
        count += 1;
    }

    if count > 0 {
        tracing::info!(count, "Re-enqueued unfinished lab results");
    }
    Ok(count)
}

struct Worker {
    db: Database,
    storage: Arc<dyn Storage>,
    pipeline: Arc<LabPipeline>,
    max_retry: Duration,
}

impl Worker {
    async fn process_job(&self, worker_id: usize, job: ExtractionJob) {
        let result_id = job.result_id;
        let start = Instant::now();

        let result = match self.db.find_result(result_id).await {
            Ok(Some(result)) => result,
            Ok(None) => {
                tracing::warn!(result_id = %result_id, "Lab result vanished before processing");
                return;
            }
            Err(e) => {
                tracing::error!(result_id = %result_id, error = %e, "Failed to load lab result");
                return;
            }
        };

        tracing::info!(worker_id, result_id = %result_id, "Processing lab result");

        let outcome = async {
            self.db
                .set_result_status(result_id, ProcessingStatus::Processing)
                .await?;
            let outcome = self.run(&result).await?;
            self.persist(&result, &outcome).await?;
            Ok::<_, AppError>(outcome)
        }
        .await;

        let status = match outcome {
            Ok(outcome) => outcome.status,
            Err(e) => {
                tracing::error!(
                    worker_id,
                    result_id = %result_id,
                    error = %e,
                    "Lab result processing failed"
                );
                if let Err(e) = self
                    .db
                    .set_result_status(result_id, ProcessingStatus::Failed)
                    .await
                {
                    tracing::error!(result_id = %result_id, error = %e, "Failed to mark result failed");
                }
                ProcessingStatus::Failed
            }
        };

        metrics::counter!("lab_results_processed_total", "status" => status.as_str())
            .increment(1);
        metrics::histogram!("lab_extraction_duration_seconds").record(start.elapsed().as_secs_f64());

        tracing::info!(
            worker_id,
            result_id = %result_id,
            status = status.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Lab result processing finished"
        );
    }

    async fn run(&self, result: &LabResult) -> Result<PipelineOutcome, AppError> {
        let key = result
            .pdf_storage_key
            .clone()
            .ok_or_else(|| AppError::bad_request("Lab result has no PDF attached"))?;

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_retry),
            ..Default::default()
        };

        let pdf = retry(backoff, || {
            let storage = self.storage.clone();
            let key = key.clone();
            async move {
                storage.download(&key).await.map_err(|e| {
                    tracing::warn!(key = %key, error = %e, "PDF download failed, retrying");
                    backoff::Error::transient(e)
                })
            }
        })
        .await?;

        let expected = self
            .db
            .expected_panel_biomarkers(result.id)
            .await?
            .map(|panel| super::expected_codes(&panel))
            .unwrap_or_default();

        self.pipeline
            .process_pdf(&pdf, &expected, result.id)
            .await
            .map_err(AppError::InternalError)
    }

    async fn persist(&self, result: &LabResult, outcome: &PipelineOutcome) -> Result<(), AppError> {
        let values = biomarker_rows(result, outcome);
        self.db
            .complete_result(result.id, outcome.status, outcome.confidence, &values)
            .await
    }
}

/// Rows for `lab_biomarker_values`, dated on the result's creation day.
pub(crate) fn biomarker_rows(result: &LabResult, outcome: &PipelineOutcome) -> Vec<LabBiomarkerValue> {
    let date = result.created_at.date_naive();
    outcome
        .biomarkers
        .iter()
        .map(|b| LabBiomarkerValue {
            id: Uuid::new_v4(),
            result_id: result.id,
            user_id: result.user_id,
            biomarker_code: b.code.clone(),
            biomarker_name: b.name.clone(),
            value: b.value,
            unit: b.unit.clone(),
            reference_range_low: b.reference_range_low,
            reference_range_high: b.reference_range_high,
            status: b.status().as_str().to_string(),
            confidence: Some(b.confidence),
            date,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ExtractedBiomarker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_biomarker_rows_status_and_date() {
        let result = LabResult::pending(Uuid::new_v4(), None, "k.pdf".to_string());
        let outcome = PipelineOutcome {
            biomarkers: vec![
                ExtractedBiomarker {
                    code: "GLU".into(),
                    name: "Glucosa".into(),
                    value: 130.0,
                    unit: "mg/dL".into(),
                    reference_range_low: Some(70.0),
                    reference_range_high: Some(100.0),
                    confidence: 0.9,
                },
                ExtractedBiomarker {
                    code: "TSH".into(),
                    name: "TSH".into(),
                    value: 2.0,
                    unit: "mIU/L".into(),
                    reference_range_low: None,
                    reference_range_high: Some(4.0),
                    confidence: 0.95,
                },
            ],
            confidence: 0.9,
            status: ProcessingStatus::Verified,
        };

        let rows = biomarker_rows(&result, &outcome);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, "flagged");
        assert_eq!(rows[1].status, "normal");
        assert!(rows.iter().all(|r| r.date == result.created_at.date_naive()));
        assert!(rows.iter().all(|r| r.user_id == result.user_id));
    }

    async fn peak_concurrency(worker_count: usize, jobs: usize) -> (usize, usize) {
        let (tx, rx) = mpsc::channel(jobs);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));

        let handles = spawn_worker_loops(worker_count, rx, CancellationToken::new(), {
            let (active, peak, processed) = (active.clone(), peak.clone(), processed.clone());
            move |_, _job| {
                let (active, peak, processed) = (active.clone(), peak.clone(), processed.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    processed.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        for _ in 0..jobs {
            tx.send(ExtractionJob {
                result_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        }
        drop(tx);

        for handle in handles {
            handle.await.unwrap();
        }

        (peak.load(Ordering::SeqCst), processed.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_single_worker_runs_jobs_one_at_a_time() {
        let (peak, processed) = peak_concurrency(1, 4).await;
        assert_eq!(peak, 1);
        assert_eq!(processed, 4);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_worker_count() {
        let (peak, processed) = peak_concurrency(2, 6).await;
        assert!(peak <= 2, "peak concurrency {} exceeded worker count", peak);
        assert_eq!(processed, 6);
    }

    #[tokio::test]
    async fn test_idle_workers_stop_on_cancel() {
        let (_tx, rx) = mpsc::channel::<ExtractionJob>(1);
        let token = CancellationToken::new();
        let handles = spawn_worker_loops(3, rx, token.clone(), |_, _| async {});

        token.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_queue_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let queue = JobQueue { tx };
        let id = Uuid::new_v4();

        assert!(queue.enqueue(ExtractionJob { result_id: id }).is_ok());
        assert!(queue.enqueue(ExtractionJob { result_id: id }).is_err());

        drop(rx);
        assert!(queue.enqueue(ExtractionJob { result_id: id }).is_err());
    }
}
