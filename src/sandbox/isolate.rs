//! The isolate: a dedicated thread that exclusively owns a V8 engine.
//!
//! V8 handles are `!Send`, so they never leave this thread. The host side
//! holds an [`Isolate`] handle that submits jobs over a channel and awaits
//! the reply on a `oneshot`, racing it against the job's deadline. When the
//! deadline wins, the running script is terminated from the host.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use serde_json::Value as Json;
use tokio::sync::oneshot;

use crate::error::{Result, SandboxError};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::io::LogEntry;
use crate::sandbox::limits::Terminator;
use crate::sandbox::marshal::Variables;
use crate::sandbox::runtime::{JobError, JobReport, Runtime};

/// Stack of the isolate thread. V8 bounds script recursion well below it.
const ISOLATE_STACK_SIZE: usize = 16 * 1024 * 1024;

/// How long the host waits for a terminated script to unwind.
pub(crate) const TERMINATION_GRACE: Duration = Duration::from_millis(250);

/// Limits a job is classified against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JobLimits {
    pub(crate) timeout_ms: u64,
    pub(crate) memory_limit_mb: u32,
}

struct Job {
    id: u64,
    source: String,
    variables: Variables,
    reply: oneshot::Sender<JobReport>,
}

/// What a finished job sends back to the host.
#[derive(Debug)]
pub(crate) struct JobOutcome {
    pub(crate) result: Result<Json>,
    /// Console output of this job.
    pub(crate) logs: Vec<LogEntry>,
    /// V8 heap in use when the job finished, in bytes.
    pub(crate) memory_used: usize,
}

impl JobOutcome {
    fn from_report(report: JobReport, limits: JobLimits) -> Self {
        Self {
            result: report.result.map_err(|err| classify(err, limits)),
            logs: report.logs,
            memory_used: report.memory_used,
        }
    }
}

/// Terminates a job whose future is dropped before the reply arrived.
struct CancelOnDrop {
    terminator: Arc<Terminator>,
    job: u64,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(job = self.job, "execution cancelled");
            self.terminator.terminate();
        }
    }
}

/// Host handle to an isolate thread.
pub(crate) struct Isolate {
    jobs: Option<mpsc::Sender<Job>>,
    terminator: Arc<Terminator>,
    thread: Option<JoinHandle<()>>,
    next_job: u64,
}

impl fmt::Debug for Isolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolate")
            .field("running", &self.jobs.is_some())
            .field("terminator", &self.terminator)
            .field("next_job", &self.next_job)
            .finish()
    }
}

impl Isolate {
    /// Start the isolate thread and build its environment.
    pub(crate) fn spawn(config: &SandboxConfig) -> Result<Self> {
        let terminator = Arc::new(Terminator::default());
        let (jobs, inbox) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<anyhow::Result<()>>(1);
        let memory_limit = config.memory_limit_bytes();
        let published = Arc::clone(&terminator);

        let thread = thread::Builder::new()
            .name("snippet-isolate".to_string())
            .stack_size(ISOLATE_STACK_SIZE)
            .spawn(move || isolate_main(memory_limit, published, inbox, ready_tx))
            .map_err(|e| SandboxError::RuntimeInit(anyhow!("failed to spawn isolate thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = thread.join();
                return Err(SandboxError::RuntimeInit(err));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(SandboxError::RuntimeInit(anyhow!(
                    "isolate thread exited during startup"
                )));
            }
        }

        tracing::debug!(memory_limit_mb = config.memory_limit_mb(), "isolate started");
        Ok(Self {
            jobs: Some(jobs),
            terminator,
            thread: Some(thread),
            next_job: 1,
        })
    }

    /// Run `source` on the isolate thread.
    ///
    /// If no reply arrives before the deadline the script is terminated and
    /// the job reported as timed out.
    pub(crate) async fn run(
        &mut self,
        source: String,
        variables: Variables,
        limits: JobLimits,
    ) -> Result<JobOutcome> {
        let id = self.next_job;
        self.next_job += 1;

        let jobs = self.jobs.as_ref().ok_or(SandboxError::NotInitialized)?;
        let (reply, mut receiver) = oneshot::channel();
        jobs.send(Job {
            id,
            source,
            variables,
            reply,
        })
        .map_err(|_| SandboxError::RuntimeInit(anyhow!("isolate thread has stopped")))?;

        let mut guard = CancelOnDrop {
            terminator: Arc::clone(&self.terminator),
            job: id,
            armed: true,
        };
        let deadline = Duration::from_millis(limits.timeout_ms);

        let report = tokio::select! {
            biased;
            report = &mut receiver => report,
            _ = tokio::time::sleep(deadline) => {
                tracing::debug!(job = id, timeout_ms = limits.timeout_ms, "deadline reached, terminating script");
                self.terminator.terminate();
                match tokio::time::timeout(TERMINATION_GRACE, receiver).await {
                    Ok(report) => report,
                    Err(_) => {
                        guard.armed = false;
                        tracing::warn!(job = id, "script did not stop within the grace period");
                        return Err(SandboxError::Timeout(limits.timeout_ms));
                    }
                }
            }
        };
        guard.armed = false;

        let report = report
            .map_err(|_| SandboxError::ExecutionError("isolate dropped the job".to_string()))?;
        Ok(JobOutcome::from_report(report, limits))
    }

    /// Stop the thread and release the engine.
    pub(crate) fn shutdown(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            // a script left behind by a dropped execution would block the join
            self.terminator.terminate();
            if thread.join().is_err() {
                tracing::warn!("isolate thread panicked");
            }
            tracing::debug!("isolate stopped");
        }
    }
}

impl Drop for Isolate {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build an engine and publish its handle.
fn start(memory_limit: usize, terminator: &Terminator) -> anyhow::Result<Runtime> {
    let runtime = Runtime::new(memory_limit)?;
    terminator.publish(runtime.thread_safe_handle());
    Ok(runtime)
}

fn isolate_main(
    memory_limit: usize,
    terminator: Arc<Terminator>,
    inbox: mpsc::Receiver<Job>,
    ready: mpsc::SyncSender<anyhow::Result<()>>,
) {
    let mut runtime = match start(memory_limit, &terminator) {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    while let Ok(Job {
        id,
        source,
        variables,
        reply,
    }) = inbox.recv()
    {
        let started = Instant::now();
        let (report, poisoned) =
            match panic::catch_unwind(AssertUnwindSafe(|| runtime.run(&source, &variables))) {
                Ok(report) => {
                    let poisoned = matches!(report.result, Err(JobError::OutOfMemory));
                    (report, poisoned)
                }
                Err(_) => {
                    tracing::error!(job = id, "engine panicked");
                    let report =
                        JobReport::failed(JobError::Script("Error: internal engine error".to_string()));
                    (report, true)
                }
            };
        tracing::trace!(
            job = id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            memory_used = report.memory_used,
            "job finished"
        );
        // the host may have stopped waiting
        let _ = reply.send(report);

        if poisoned {
            // a heap that hit its ceiling stays near it; start over
            terminator.clear();
            drop(runtime);
            runtime = match start(memory_limit, &terminator) {
                Ok(runtime) => runtime,
                Err(err) => {
                    tracing::error!(error = %err, "failed to rebuild isolate");
                    return;
                }
            };
            tracing::debug!(job = id, "isolate rebuilt");
        }
    }
    terminator.clear();
}

/// Map an engine failure onto the public error kinds.
pub(crate) fn classify(err: JobError, limits: JobLimits) -> SandboxError {
    match err {
        JobError::Script(message) => SandboxError::ExecutionError(message),
        JobError::OutOfMemory => SandboxError::MemoryExceeded(limits.memory_limit_mb),
        JobError::Terminated => SandboxError::Timeout(limits.timeout_ms),
    }
}
