//! Worker
//!
//! Hosts interview jobs in one process. The worker prewarms the process once,
//! then takes jobs off a channel and runs them one at a time, each inside its
//! own `job` span.

use anyhow::Context;
use interviewer_core::metrics::UsageSummary;
use interviewer_core::orchestrator::{
    ActiveSession, EntrypointError, OrchestratorConfig, SessionOrchestrator,
};
use interviewer_core::prewarm::{self, JobProcess};
use interviewer_core::runtime::{JobContext, Room, SessionFactory};
use interviewer_core::vad::VadOptions;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, info, info_span, warn};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Loads process-wide resources before the first job.
pub type PrewarmFn = Arc<dyn Fn(Arc<JobProcess>) -> BoxFuture<anyhow::Result<()>> + Send + Sync>;

/// Brings one job up to an active session.
pub type EntrypointFn =
    Arc<dyn Fn(JobContext) -> BoxFuture<Result<ActiveSession, EntrypointError>> + Send + Sync>;

/// The two callbacks a worker process registers.
#[derive(Clone)]
pub struct WorkerOptions {
    pub prewarm: PrewarmFn,
    pub entrypoint: EntrypointFn,
}

impl WorkerOptions {
    /// Prewarms the energy VAD and runs each job through a fresh
    /// [`SessionOrchestrator`].
    pub fn interview(config: OrchestratorConfig, vad: VadOptions) -> Self {
        Self {
            prewarm: Arc::new(move |proc: Arc<JobProcess>| -> BoxFuture<anyhow::Result<()>> {
                Box::pin(async move {
                    prewarm::prewarm(&proc, vad).await?;
                    Ok(())
                })
            }),
            entrypoint: Arc::new(
                move |ctx: JobContext| -> BoxFuture<Result<ActiveSession, EntrypointError>> {
                    let orchestrator = SessionOrchestrator::new(config.clone());
                    Box::pin(async move { orchestrator.entrypoint(&ctx).await })
                },
            ),
        }
    }
}

/// A job dispatched to the worker: the room to join and the runtime that
/// hosts its session.
pub struct JobRequest {
    pub room: Arc<dyn Room>,
    pub sessions: Arc<dyn SessionFactory>,
}

/// What a worker run did, returned when it stops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerReport {
    pub completed: usize,
    pub failed: usize,
    /// Usage of every session that reached its end, in job order.
    pub usage: Vec<UsageSummary>,
}

pub struct Worker {
    options: WorkerOptions,
    proc: Arc<JobProcess>,
}

impl Worker {
    pub fn new(options: WorkerOptions) -> Self {
        Self {
            options,
            proc: Arc::new(JobProcess::new()),
        }
    }

    pub fn process(&self) -> Arc<JobProcess> {
        self.proc.clone()
    }

    /// Prewarms, then serves jobs until the channel closes or `shutdown`
    /// resolves. A prewarm failure is fatal; a job failure is not.
    pub async fn run(
        &self,
        mut jobs: mpsc::Receiver<JobRequest>,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<WorkerReport> {
        (self.options.prewarm)(self.proc.clone())
            .await
            .context("Prewarm failed")?;
        info!("Worker ready, waiting for jobs");

        tokio::pin!(shutdown);
        let mut report = WorkerReport::default();

        loop {
            let request = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting jobs");
                    break;
                }
                request = jobs.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let ctx = JobContext {
                room: request.room,
                proc: self.proc.clone(),
                sessions: request.sessions,
            };
            let span = info_span!("job", room = %ctx.room.name());

            let mut active = match (self.options.entrypoint)(ctx).instrument(span.clone()).await {
                Ok(active) => active,
                Err(e) => {
                    // Already logged with its cause chain by the orchestrator.
                    warn!(parent: &span, error = %e, "Job failed");
                    report.failed += 1;
                    continue;
                }
            };

            let participant = active.participant().identity.clone();
            tokio::select! {
                summary = active.closed().instrument(span.clone()) => {
                    info!(parent: &span, %participant, "Job finished");
                    report.completed += 1;
                    report.usage.push(summary);
                }
                _ = &mut shutdown => {
                    info!(parent: &span, "Shutdown requested while a session was active");
                    break;
                }
            }
        }

        info!(
            completed = report.completed,
            failed = report.failed,
            "Worker stopped"
        );
        Ok(report)
    }
}
