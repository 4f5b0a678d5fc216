//! The caller's side of a running batch: outcomes, progress, cancellation.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::chunk::{ChunkOutcome, ChunkState};
use crate::error::FailureReason;

/// Cancels a running batch. Clonable; every clone cancels the same batch.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self(Arc::new(tx)), rx)
    }

    /// Stop starting new work. Chunks not yet terminal finish as
    /// `Failed(Cancelled)`; already-terminal outcomes are unaffected.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Running counters for one batch, published as they change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub hashed: usize,
    pub already_present: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub uploads_started: usize,
    pub bytes_uploaded: u64,
}

impl BatchProgress {
    pub fn finished(&self) -> usize {
        self.already_present + self.uploaded + self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.finished() == self.total
    }
}

/// Stream of per-asset outcomes. Yields exactly one item per submitted
/// asset, then ends.
pub struct UploadStream {
    outcomes: mpsc::UnboundedReceiver<ChunkOutcome>,
    cancel: CancelHandle,
    progress: watch::Receiver<BatchProgress>,
    total: usize,
}

impl UploadStream {
    pub(crate) fn new(
        outcomes: mpsc::UnboundedReceiver<ChunkOutcome>,
        cancel: CancelHandle,
        progress: watch::Receiver<BatchProgress>,
        total: usize,
    ) -> Self {
        Self {
            outcomes,
            cancel,
            progress,
            total,
        }
    }

    /// Number of assets in the batch.
    pub fn batch_size(&self) -> usize {
        self.total
    }

    pub async fn next_outcome(&mut self) -> Option<ChunkOutcome> {
        self.outcomes.recv().await
    }

    /// Drain the stream.
    pub async fn collect_all(mut self) -> Vec<ChunkOutcome> {
        let mut all = Vec::with_capacity(self.total);
        while let Some(outcome) = self.outcomes.recv().await {
            all.push(outcome);
        }
        all
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Watch the batch counters. The last published value is always readable.
    pub fn progress(&self) -> watch::Receiver<BatchProgress> {
        self.progress.clone()
    }
}

impl Stream for UploadStream {
    type Item = ChunkOutcome;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.outcomes.poll_recv(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.total))
    }
}

/// Totals over a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub uploaded: usize,
    pub already_present: usize,
    pub failed_io: usize,
    pub failed_network: usize,
    pub cancelled: usize,
    pub bytes_uploaded: u64,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[ChunkOutcome]) -> Self {
        let mut s = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for o in outcomes {
            match &o.state {
                ChunkState::Uploaded => {
                    s.uploaded += 1;
                    s.bytes_uploaded += o.size;
                }
                ChunkState::AlreadyPresent => s.already_present += 1,
                ChunkState::Failed(FailureReason::Io(_)) => s.failed_io += 1,
                ChunkState::Failed(FailureReason::Network(_)) => s.failed_network += 1,
                ChunkState::Failed(FailureReason::Cancelled) => s.cancelled += 1,
                _ => {}
            }
        }
        s
    }

    pub fn failed(&self) -> usize {
        self.failed_io + self.failed_network + self.cancelled
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn outcome(state: ChunkState, size: u64) -> ChunkOutcome {
        ChunkOutcome {
            asset: "x".into(),
            reference: None,
            size,
            created_at: SystemTime::now(),
            history: vec![ChunkState::Pending, state.clone()],
            state,
        }
    }

    #[test]
    fn summary_counts_by_terminal_state() {
        let outcomes = vec![
            outcome(ChunkState::Uploaded, 10),
            outcome(ChunkState::Uploaded, 5),
            outcome(ChunkState::AlreadyPresent, 7),
            outcome(ChunkState::Failed(FailureReason::Io("eacces".into())), 0),
            outcome(ChunkState::Failed(FailureReason::Cancelled), 0),
        ];
        let s = BatchSummary::from_outcomes(&outcomes);
        assert_eq!(s.total, 5);
        assert_eq!(s.uploaded, 2);
        assert_eq!(s.already_present, 1);
        assert_eq!(s.failed(), 2);
        assert_eq!(s.bytes_uploaded, 15);
        assert!(!s.all_succeeded());
    }

    #[test]
    fn cancel_handle_is_shared() {
        let (handle, rx) = CancelHandle::new();
        let other = handle.clone();
        assert!(!handle.is_cancelled());
        other.cancel();
        assert!(handle.is_cancelled());
        assert!(*rx.borrow());
    }

    #[test]
    fn progress_completion() {
        let p = BatchProgress {
            total: 3,
            uploaded: 1,
            already_present: 1,
            failed: 1,
            ..BatchProgress::default()
        };
        assert!(p.is_complete());
    }
}
