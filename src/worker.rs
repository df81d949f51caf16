use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info, warn};

use crate::{
    config::Config,
    error::BatchError,
    slam::{frame::FrameSource, results::Snapshot, system::System},
};

/// Progress messages a slow consumer may miss before the worker starts dropping them
const PROGRESS_CAPACITY: usize = 4;

/// Cooperative cancellation flag shared with a running batch
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Cancelled,
    FrameLimit,
    /// The source failed; everything before the failing frame is kept
    SourceFailed(String),
    /// The engine refused a frame, e.g. one of another resolution; earlier frames are kept
    FrameRejected { frame_index: u32, error: String },
}

#[derive(Debug, Clone)]
pub enum Progress {
    /// Periodic update; may be dropped when the consumer lags behind
    Frame {
        frames_processed: u32,
        total: Option<usize>,
        snapshot: Snapshot,
    },
    /// Always the last message of a run, never dropped
    Finished {
        reason: StopReason,
        snapshot: Snapshot,
    },
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub reason: StopReason,
    pub snapshot: Snapshot,
}

/// Runs `source` to completion on the calling thread.
///
/// Cancellation is checked before every frame. Cancellation, end of stream,
/// source failures and rejected frames all finish with the snapshot of what was
/// processed so far; only an invalid `config` is an error.
pub fn run_batch<S: FrameSource + ?Sized>(
    source: &mut S,
    config: Config,
    max_frames: Option<u32>,
    cancel: &CancelToken,
    progress: &Sender<Progress>,
) -> Result<BatchOutcome, BatchError> {
    let interval = config.progress_interval.max(1);
    let total = source.len_hint();
    let mut system = System::new(config)?;
    if let Some((width, height)) = source.dimensions() {
        debug!("batch over {width}x{height} frames, {total:?} expected");
    }

    let reason = loop {
        if cancel.is_cancelled() {
            info!("batch cancelled after {} frames", system.frames_processed());
            break StopReason::Cancelled;
        }
        if max_frames.map_or(false, |max| system.frames_processed() >= max) {
            break StopReason::FrameLimit;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break StopReason::EndOfStream,
            Err(e) => {
                warn!("frame source failed, finishing early: {e}");
                break StopReason::SourceFailed(e.to_string());
            }
        };
        if let Err(e) = system.track_monocular(&frame) {
            let frame_index = system.frames_processed();
            warn!("frame {frame_index} rejected, finishing early: {e}");
            break StopReason::FrameRejected {
                frame_index,
                error: e.to_string(),
            };
        }

        let frames_processed = system.frames_processed();
        // one slot always stays free so the final message never blocks
        let has_room = progress
            .capacity()
            .map_or(true, |capacity| progress.len() + 1 < capacity);
        if frames_processed % interval == 0 && has_room {
            let message = Progress::Frame {
                frames_processed,
                total,
                snapshot: system.snapshot(),
            };
            match progress.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("progress consumer lagging, update dropped"),
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    };

    let snapshot = system.snapshot();
    info!(
        "batch finished ({reason:?}): {} frames, {} map points, {} scene losses",
        system.frames_processed(),
        snapshot.point_cloud.len(),
        snapshot.scene_loss_marks.len()
    );
    // nobody listening is fine, the outcome is returned as well
    let _ = progress.try_send(Progress::Finished {
        reason: reason.clone(),
        snapshot: snapshot.clone(),
    });

    Ok(BatchOutcome { reason, snapshot })
}

/// A batch running on its own thread
pub struct BatchHandle {
    progress: Receiver<Progress>,
    cancel: CancelToken,
    join: JoinHandle<Result<BatchOutcome, BatchError>>,
}

impl BatchHandle {
    pub fn progress(&self) -> &Receiver<Progress> {
        &self.progress
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Waits for the worker and returns its final outcome.
    pub fn join(self) -> Result<BatchOutcome, BatchError> {
        self.join.join().map_err(|_| BatchError::Panicked)?
    }
}

/// Moves `source` onto a dedicated worker thread and starts tracking.
pub fn spawn_batch<S>(mut source: S, config: Config, max_frames: Option<u32>) -> Result<BatchHandle, BatchError>
where
    S: FrameSource + Send + 'static,
{
    let (sender, receiver) = bounded(PROGRESS_CAPACITY);
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();

    let join = std::thread::Builder::new()
        .name("vomap-batch".into())
        .spawn(move || run_batch(&mut source, config, max_frames, &worker_cancel, &sender))
        .map_err(BatchError::Spawn)?;

    Ok(BatchHandle {
        progress: receiver,
        cancel,
        join,
    })
}
