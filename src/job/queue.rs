//! # Job Queue
//!
//! [`SessionHandle`] owns a connected [`Session`] on a worker thread and
//! runs submitted jobs one at a time, in submission order.
//!
//! ```text
//! submit_job ──▶ mpsc ──▶ worker thread ──▶ PrintJobController::run ──▶ Session
//!     │                        │
//!     └── JobId                └── progress / results ──▶ shared job table
//! ```
//!
//! The caller keeps only job ids. Progress, cancellation and results go
//! through the shared job table, so the handle can be used from any thread.
//! The table remembers the last [`FINISHED_JOBS_KEPT`] finished jobs; older
//! ids become unknown.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{CancelToken, JobControl, JobId, Payload, PrintJob, PrintJobController, Progress};
use crate::error::{PeripageError, SessionBusyError};
use crate::transport::Session;

/// Finished jobs whose results stay available.
pub const FINISHED_JOBS_KEPT: usize = 64;

/// What `submit_job` does while another job holds the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueuePolicy {
    /// Wait in line
    #[default]
    Queue,
    /// Reject with [`SessionBusyError`]
    FailFast,
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Done(PrintJob),
}

struct Entry {
    status: JobStatus,
    cancel: CancelToken,
    progress: Progress,
    subscribers: Vec<mpsc::Sender<Progress>>,
}

impl Entry {
    fn publish(&mut self, progress: Progress) {
        self.progress = progress;
        self.subscribers.retain(|tx| tx.send(progress).is_ok());
    }

    fn complete(&mut self, job: PrintJob) {
        self.publish(job.progress());
        self.status = JobStatus::Done(job);
        // Dropping the senders ends every ProgressStream
        self.subscribers.clear();
    }
}

#[derive(Default)]
struct Table {
    entries: HashMap<JobId, Entry>,
    /// Queued or running, in submission order
    active: VecDeque<JobId>,
    /// Finished, oldest first
    done: VecDeque<JobId>,
}

impl Table {
    fn complete(&mut self, id: JobId, job: PrintJob) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.complete(job);
        self.active.retain(|active| *active != id);
        self.done.push_back(id);

        while self.done.len() > FINISHED_JOBS_KEPT {
            if let Some(evicted) = self.done.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }
}

struct Jobs {
    table: Mutex<Table>,
    finished: Condvar,
}

impl Jobs {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Submission {
    id: JobId,
    payload: Payload,
    deadline: Option<Instant>,
}

/// Progress updates for one job, ending when the job does.
///
/// The first item is the progress at subscription time.
pub struct ProgressStream {
    rx: mpsc::Receiver<Progress>,
}

impl Iterator for ProgressStream {
    type Item = Progress;

    fn next(&mut self) -> Option<Progress> {
        self.rx.recv().ok()
    }
}

/// Serializes print jobs onto one printer session.
///
/// ## Example
///
/// ```
/// use peripage::job::{PrintJobController, QueuePolicy, SessionHandle};
/// use peripage::encode::{ChunkConfig, EncodeOptions};
/// use peripage::render::MonochromeRaster;
/// use peripage::transport::mock::MockPrinter;
/// use peripage::transport::{Session, SessionConfig};
///
/// let printer = MockPrinter::new();
/// let mut session = Session::new(SessionConfig::immediate())?;
/// session.connect(&mut printer.connector(), "mock")?;
///
/// let controller = PrintJobController::new(EncodeOptions::default(), ChunkConfig::new(182));
/// let handle = SessionHandle::spawn(session, controller, QueuePolicy::Queue);
///
/// let id = handle.submit_job(MonochromeRaster::blank(384, 24))?;
/// let job = handle.wait(id).unwrap();
/// assert!(job.is_success());
///
/// let session = handle.shutdown()?;
/// # Ok::<(), peripage::PeripageError>(())
/// ```
pub struct SessionHandle {
    submissions: Option<mpsc::Sender<Submission>>,
    worker: Option<thread::JoinHandle<Session>>,
    jobs: Arc<Jobs>,
    policy: QueuePolicy,
}

impl SessionHandle {
    /// Move `session` onto a worker thread.
    pub fn spawn(session: Session, controller: PrintJobController, policy: QueuePolicy) -> Self {
        let jobs = Arc::new(Jobs {
            table: Mutex::new(Table::default()),
            finished: Condvar::new(),
        });
        let (tx, rx) = mpsc::channel();

        let worker_jobs = jobs.clone();
        let worker = thread::spawn(move || run_worker(session, controller, rx, worker_jobs));

        Self {
            submissions: Some(tx),
            worker: Some(worker),
            jobs,
            policy,
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Queue a raster or text for printing.
    pub fn submit_job(&self, payload: impl Into<Payload>) -> Result<JobId, SessionBusyError> {
        self.submit(payload.into(), None)
    }

    /// Queue a job, failing it with a timeout if it has not finished
    /// `timeout` after submission.
    pub fn submit_job_with_timeout(
        &self,
        payload: impl Into<Payload>,
        timeout: Duration,
    ) -> Result<JobId, SessionBusyError> {
        self.submit(payload.into(), Some(Instant::now() + timeout))
    }

    fn submit(&self, payload: Payload, deadline: Option<Instant>) -> Result<JobId, SessionBusyError> {
        let id = JobId::new();
        let mut table = self.jobs.lock();

        if self.policy == QueuePolicy::FailFast
            && let Some(active) = table.active.front()
        {
            return Err(SessionBusyError {
                active: active.to_string(),
            });
        }

        table.entries.insert(
            id,
            Entry {
                status: JobStatus::Queued,
                cancel: CancelToken::new(),
                progress: PrintJob::cancelled(id).progress(),
                subscribers: Vec::new(),
            },
        );
        table.active.push_back(id);

        let sent = self
            .submissions
            .as_ref()
            .is_some_and(|tx| tx.send(Submission { id, payload, deadline }).is_ok());
        if !sent {
            tracing::warn!(job = %id, "session worker is gone; cancelling job");
            table.complete(id, PrintJob::cancelled(id));
            self.jobs.finished.notify_all();
        } else {
            tracing::debug!(job = %id, "job queued");
        }

        Ok(id)
    }

    /// Follow a job's progress. `None` for an unknown id.
    pub fn subscribe_progress(&self, id: JobId) -> Option<ProgressStream> {
        let mut table = self.jobs.lock();
        let entry = table.entries.get_mut(&id)?;

        let (tx, rx) = mpsc::channel();
        // Cannot fail: the receiver is alive
        let _ = tx.send(entry.progress);
        if !matches!(entry.status, JobStatus::Done(_)) {
            entry.subscribers.push(tx);
        }
        Some(ProgressStream { rx })
    }

    /// Cancel a job. A queued job completes as `Cancelled` without touching
    /// the printer; a running one stops before its next packet.
    ///
    /// Returns `false` if the job is unknown or already finished.
    pub fn cancel(&self, id: JobId) -> bool {
        let mut table = self.jobs.lock();
        let Some(entry) = table.entries.get(&id) else {
            return false;
        };

        let queued = match entry.status {
            JobStatus::Queued => true,
            JobStatus::Running => false,
            JobStatus::Done(_) => return false,
        };
        entry.cancel.cancel();
        if queued {
            table.complete(id, PrintJob::cancelled(id));
            self.jobs.finished.notify_all();
        }
        true
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.lock().entries.get(&id).map(|entry| entry.status.clone())
    }

    /// The finished job, or `None` while it is still queued or running.
    pub fn result(&self, id: JobId) -> Option<PrintJob> {
        match self.status(id)? {
            JobStatus::Done(job) => Some(job),
            _ => None,
        }
    }

    /// Block until the job finishes. `None` for an unknown id.
    pub fn wait(&self, id: JobId) -> Option<PrintJob> {
        let mut table = self.jobs.lock();
        loop {
            if let JobStatus::Done(job) = &table.entries.get(&id)?.status {
                return Some(job.clone());
            }
            table = self
                .jobs
                .finished
                .wait(table)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Finish every queued job, stop the worker and hand back the session.
    pub fn shutdown(mut self) -> Result<Session, PeripageError> {
        self.submissions.take();
        match self.worker.take().map(thread::JoinHandle::join) {
            Some(Ok(session)) => Ok(session),
            _ => Err(PeripageError::Job("session worker panicked".to_string())),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.submissions.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(
    mut session: Session,
    controller: PrintJobController,
    submissions: mpsc::Receiver<Submission>,
    jobs: Arc<Jobs>,
) -> Session {
    for Submission { id, payload, deadline } in submissions {
        let cancel = {
            let mut table = jobs.lock();
            let Some(entry) = table.entries.get_mut(&id) else {
                continue;
            };
            if matches!(entry.status, JobStatus::Done(_)) {
                continue;
            }
            entry.status = JobStatus::Running;
            entry.cancel.clone()
        };

        let sink_jobs = jobs.clone();
        let control = JobControl {
            cancel,
            deadline,
            progress: Some(Arc::new(move |progress: Progress| {
                if let Some(entry) = sink_jobs.lock().entries.get_mut(&progress.job) {
                    entry.publish(progress);
                }
            })),
        };

        let job = controller.run(id, &payload, &mut session, &control);

        jobs.lock().complete(id, job);
        jobs.finished.notify_all();
    }

    tracing::debug!(state = ?session.state(), "session worker stopped");
    session
}
