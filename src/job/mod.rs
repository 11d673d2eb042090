//! # Print Jobs
//!
//! Runs one print end to end over a connected [`Session`]:
//!
//! ```text
//! raster / text → encode → FrameChunker → send packet ─┬─▶ flush → Success
//!                                            ▲          │
//!                                            └─ cancel? deadline? ──▶ Cancelled / Failed
//! ```
//!
//! Cancellation stops writing at the next packet boundary. Packets already
//! in flight are settled with [`Session::settle`], which collects their acks
//! but never retransmits.
//!
//! The controller never closes the session. A failed or cancelled job leaves
//! it to the caller to decide whether the session is still usable
//! ([`Session::state`]).

pub mod queue;

pub use queue::{JobStatus, ProgressStream, QueuePolicy, SessionHandle};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::PeripageConfig;
use crate::encode::{self, ChunkConfig, CommandFrame, EncodeOptions, FrameChunker};
use crate::error::{PeripageError, TransportError};
use crate::render::MonochromeRaster;
use crate::transport::{Acked, Session};

/// Unique identifier of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Acknowledged progress of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub job: JobId,
    pub bytes_acked: usize,
    pub total_bytes: usize,
    pub packets_acked: usize,
}

impl Progress {
    /// Fraction acknowledged, 0.0 to 1.0.
    pub fn fraction(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_acked as f32 / self.total_bytes as f32
    }
}

/// Category of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Encoding,
    Config,
    Timeout,
    LinkDropped,
    Nack,
    InvalidState,
}

impl From<&PeripageError> for FailureKind {
    fn from(err: &PeripageError) -> Self {
        match err {
            PeripageError::Encoding(_) | PeripageError::Image(_) => FailureKind::Encoding,
            PeripageError::Config(_) => FailureKind::Config,
            PeripageError::Transport(e) => FailureKind::from(e),
            PeripageError::Connection(_) | PeripageError::Io(_) => FailureKind::LinkDropped,
            PeripageError::SessionBusy(_) | PeripageError::Job(_) => FailureKind::InvalidState,
        }
    }
}

impl From<&TransportError> for FailureKind {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Timeout => FailureKind::Timeout,
            TransportError::LinkDropped(_) => FailureKind::LinkDropped,
            TransportError::Nack { .. } => FailureKind::Nack,
            TransportError::InvalidState(_) => FailureKind::InvalidState,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub reason: String,
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failed(JobFailure),
    Cancelled,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            JobResult::Failed(failure) => Some(failure.kind),
            _ => None,
        }
    }
}

/// What a job prints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Raster(MonochromeRaster),
    /// Built-in-font text, see [`encode::encode_text`]
    Text(String),
}

impl From<MonochromeRaster> for Payload {
    fn from(raster: MonochromeRaster) -> Self {
        Payload::Raster(raster)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

/// A finished print job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub id: JobId,
    pub total_bytes: usize,
    /// Payload bytes the printer has confirmed, never decreasing
    pub bytes_acked: usize,
    pub packets_acked: usize,
    pub result: JobResult,
}

impl PrintJob {
    pub(crate) fn cancelled(id: JobId) -> Self {
        Self {
            id,
            total_bytes: 0,
            bytes_acked: 0,
            packets_acked: 0,
            result: JobResult::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            job: self.id,
            bytes_acked: self.bytes_acked,
            total_bytes: self.total_bytes,
            packets_acked: self.packets_acked,
        }
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Callback receiving progress after every acknowledgment.
pub type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

/// Caller-side controls for one job.
#[derive(Clone, Default)]
pub struct JobControl {
    pub cancel: CancelToken,
    pub deadline: Option<Instant>,
    pub progress: Option<ProgressSink>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn on_progress<F>(mut self, sink: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(sink));
        self
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl fmt::Debug for JobControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobControl")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Runs print jobs with fixed encoder and link settings.
///
/// ## Example
///
/// ```
/// use peripage::encode::{ChunkConfig, EncodeOptions};
/// use peripage::job::{JobControl, PrintJobController};
/// use peripage::render::MonochromeRaster;
/// use peripage::transport::mock::MockPrinter;
/// use peripage::transport::{Session, SessionConfig};
///
/// let printer = MockPrinter::new();
/// let mut session = Session::new(SessionConfig::immediate())?;
/// session.connect(&mut printer.connector(), "mock")?;
///
/// let controller = PrintJobController::new(EncodeOptions::default(), ChunkConfig::new(182));
/// let job = controller.print_image(&MonochromeRaster::blank(384, 48), &mut session, &JobControl::new());
///
/// assert!(job.is_success());
/// assert_eq!(job.bytes_acked, job.total_bytes);
/// # Ok::<(), peripage::PeripageError>(())
/// ```
#[derive(Debug, Clone)]
pub struct PrintJobController {
    encode: EncodeOptions,
    chunk: ChunkConfig,
}

impl PrintJobController {
    pub fn new(encode: EncodeOptions, chunk: ChunkConfig) -> Self {
        Self { encode, chunk }
    }

    pub fn from_config(config: &PeripageConfig) -> Self {
        Self::new(config.encode_options(), config.chunk_config())
    }

    /// Print `raster` over `session`. Never panics on printer errors; the
    /// outcome is in [`PrintJob::result`].
    pub fn print_image(
        &self,
        raster: &MonochromeRaster,
        session: &mut Session,
        control: &JobControl,
    ) -> PrintJob {
        let frames = encode::encode(raster, &self.encode);
        self.send_frames(JobId::new(), frames, session, control)
    }

    /// Print `text` in the printer's built-in font.
    pub fn print_text(&self, text: &str, session: &mut Session, control: &JobControl) -> PrintJob {
        let frames = encode::encode_text(text, &self.encode);
        self.send_frames(JobId::new(), frames, session, control)
    }

    pub(crate) fn run(
        &self,
        id: JobId,
        payload: &Payload,
        session: &mut Session,
        control: &JobControl,
    ) -> PrintJob {
        let frames = match payload {
            Payload::Raster(raster) => encode::encode(raster, &self.encode),
            Payload::Text(text) => encode::encode_text(text, &self.encode),
        };
        self.send_frames(id, frames, session, control)
    }

    fn send_frames(
        &self,
        id: JobId,
        frames: Result<Vec<CommandFrame>, PeripageError>,
        session: &mut Session,
        control: &JobControl,
    ) -> PrintJob {
        let mut job = PrintJob {
            id,
            total_bytes: 0,
            bytes_acked: 0,
            packets_acked: 0,
            result: JobResult::Success,
        };

        let frames = match frames {
            Ok(frames) => frames,
            Err(e) => return finish(job, failure(&e)),
        };
        let chunker = match FrameChunker::new(&frames, self.chunk) {
            Ok(chunker) => chunker,
            Err(e) => return finish(job, failure(&PeripageError::from(e))),
        };

        job.total_bytes = chunker.total_bytes();
        tracing::info!(
            job = %id,
            bytes = job.total_bytes,
            packets = chunker.packet_count(),
            "print job started"
        );

        for packet in &chunker {
            if control.cancel.is_cancelled() {
                match session.settle() {
                    Ok(acked) => record(&mut job, &acked, control),
                    Err(_) => record(&mut job, &session.take_acked(), control),
                }
                return finish(job, JobResult::Cancelled);
            }
            if control.expired() {
                return finish(job, deadline_exceeded());
            }

            match session.send(&packet) {
                Ok(acked) => record(&mut job, &acked, control),
                Err(e) => {
                    record(&mut job, &session.take_acked(), control);
                    return finish(job, failure(&PeripageError::from(e)));
                }
            }
        }

        if control.expired() {
            return finish(job, deadline_exceeded());
        }
        match session.flush() {
            Ok(acked) => record(&mut job, &acked, control),
            Err(e) => {
                record(&mut job, &session.take_acked(), control);
                return finish(job, failure(&PeripageError::from(e)));
            }
        }

        finish(job, JobResult::Success)
    }
}

fn record(job: &mut PrintJob, acked: &[Acked], control: &JobControl) {
    if acked.is_empty() {
        return;
    }
    job.bytes_acked += acked.iter().map(|a| a.len).sum::<usize>();
    job.packets_acked += acked.len();
    if let Some(sink) = &control.progress {
        sink(job.progress());
    }
}

fn failure(err: &PeripageError) -> JobResult {
    JobResult::Failed(JobFailure {
        kind: FailureKind::from(err),
        reason: err.to_string(),
    })
}

fn deadline_exceeded() -> JobResult {
    JobResult::Failed(JobFailure {
        kind: FailureKind::Timeout,
        reason: "job deadline exceeded".to_string(),
    })
}

fn finish(mut job: PrintJob, result: JobResult) -> PrintJob {
    match &result {
        JobResult::Success => tracing::info!(job = %job.id, bytes = job.bytes_acked, "print job done"),
        JobResult::Cancelled => tracing::info!(job = %job.id, bytes = job.bytes_acked, "print job cancelled"),
        JobResult::Failed(f) => tracing::warn!(
            job = %job.id,
            bytes = job.bytes_acked,
            kind = ?f.kind,
            reason = %f.reason,
            "print job failed"
        ),
    }
    job.result = result;
    job
}
