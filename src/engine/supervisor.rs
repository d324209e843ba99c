//! Job supervisor: at most one active job, each on its own thread and runtime

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::engine::job::TransformJob;
use crate::engine::progress::{deliver_outcome, NoOpProgressSink};
use crate::engine::JobPolicy;
use crate::ports::{ProbePort, ProgressSink, TransformEngine};

struct ActiveJob {
    id: JobId,
    cancel: CancellationToken,
    /// Fires after the job thread has torn everything down
    finished: oneshot::Receiver<()>,
}

/// Owns the single active transform job
///
/// Submitting a new request supersedes the active one: the old job is
/// cancelled and fully torn down before the new one starts.
pub struct JobSupervisor {
    probe: Arc<dyn ProbePort>,
    engine: Arc<dyn TransformEngine>,
    policy: JobPolicy,
    active: Mutex<Option<ActiveJob>>,
    next_id: AtomicU64,
}

impl JobSupervisor {
    pub fn new(
        probe: Arc<dyn ProbePort>,
        engine: Arc<dyn TransformEngine>,
        policy: JobPolicy,
    ) -> Self {
        Self {
            probe,
            engine,
            policy,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn policy(&self) -> &JobPolicy {
        &self.policy
    }

    /// Validate, supersede the active job, then start the new one
    pub async fn submit(&self, request: TransformRequest) -> Result<JobHandle, DomainError> {
        request.validate()?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!(job_id = %previous.id, "Superseding active job");
            Self::teardown(previous).await;
        }

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(JobPhase::NotStarted);
        let (finished_tx, finished_rx) = oneshot::channel();

        let job = TransformJob::new(
            id,
            request,
            Arc::clone(&self.probe),
            Arc::clone(&self.engine),
            self.policy.clone(),
            cancel.clone(),
            phase_tx,
            events_tx.clone(),
        );
        spawn_job_thread(job, events_tx, finished_tx)?;

        *active = Some(ActiveJob {
            id,
            cancel: cancel.clone(),
            finished: finished_rx,
        });
        debug!(job_id = %id, "Job submitted");

        Ok(JobHandle {
            id,
            events: events_rx,
            phase: phase_rx,
            cancel,
            finished: false,
        })
    }

    /// Cancel the active job and wait for its teardown; no-op when idle
    pub async fn cancel_active(&self) {
        let mut active = self.active.lock().await;
        if let Some(job) = active.take() {
            info!(job_id = %job.id, "Cancelling active job");
            Self::teardown(job).await;
        }
    }

    pub async fn shutdown(&self) {
        self.cancel_active().await;
    }

    /// Id of the job that has not finished tearing down, if any
    pub async fn active_job(&self) -> Option<JobId> {
        let mut active = self.active.lock().await;
        let finished = match active.as_mut() {
            Some(job) => !matches!(
                job.finished.try_recv(),
                Err(oneshot::error::TryRecvError::Empty)
            ),
            None => return None,
        };
        if finished {
            *active = None;
            None
        } else {
            active.as_ref().map(|job| job.id)
        }
    }

    async fn teardown(job: ActiveJob) {
        job.cancel.cancel();
        // A closed channel also means the thread is gone
        let _ = job.finished.await;
        debug!(job_id = %job.id, "Job torn down");
    }
}

impl Drop for JobSupervisor {
    fn drop(&mut self) {
        if let Some(job) = self.active.get_mut().take() {
            job.cancel.cancel();
        }
    }
}

fn spawn_job_thread(
    job: TransformJob,
    events: mpsc::UnboundedSender<JobEvent>,
    finished: oneshot::Sender<()>,
) -> Result<(), DomainError> {
    let id = job.id();
    std::thread::Builder::new()
        .name(format!("transform-{}", id))
        .spawn(move || {
            let outcome = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => {
                    let outcome = runtime.block_on(job.run());
                    // Sessions and timers go away with the runtime
                    drop(runtime);
                    outcome
                }
                Err(err) => job.abandon(DomainError::Internal(format!(
                    "failed to build job runtime: {}",
                    err
                ))),
            };
            let _ = events.send(JobEvent::Finished(outcome));
            let _ = finished.send(());
        })
        .map_err(|err| DomainError::Internal(format!("failed to spawn job thread: {}", err)))?;
    Ok(())
}

/// Caller's view of one submitted job
pub struct JobHandle {
    id: JobId,
    events: mpsc::UnboundedReceiver<JobEvent>,
    phase: watch::Receiver<JobPhase>,
    cancel: CancellationToken,
    finished: bool,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Latest lifecycle phase
    pub fn phase(&self) -> JobPhase {
        *self.phase.borrow()
    }

    /// Cancel this job only; no effect once it has finished
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next progress or terminal event; `None` after the terminal event
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        if self.finished {
            return None;
        }
        match self.events.recv().await {
            Some(event) => {
                if matches!(event, JobEvent::Finished(_)) {
                    self.finished = true;
                }
                Some(event)
            }
            None => {
                self.finished = true;
                Some(JobEvent::Finished(JobOutcome::Failed(DomainError::Internal(
                    "job ended without reporting an outcome".to_string(),
                ))))
            }
        }
    }

    /// Wait for the terminal outcome, discarding progress
    pub async fn wait(self) -> JobOutcome {
        self.wait_with(&NoOpProgressSink).await
    }

    /// Wait for the terminal outcome, forwarding every event to `sink`
    pub async fn wait_with(mut self, sink: &dyn ProgressSink) -> JobOutcome {
        while let Some(event) = self.next_event().await {
            match event {
                JobEvent::Progress(fraction) => sink.on_progress(self.id, fraction),
                JobEvent::Finished(outcome) => {
                    deliver_outcome(sink, self.id, &outcome);
                    return outcome;
                }
            }
        }
        // next_event always yields a Finished before None
        JobOutcome::Failed(DomainError::Internal(
            "job event stream ended early".to_string(),
        ))
    }
}
