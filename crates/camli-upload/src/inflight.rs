//! In-flight transfer table.
//!
//! One entry per reference currently being sent. The first caller to claim a
//! reference owns the transfer; later callers (from the same or another
//! batch) follow it and receive its outcome instead of sending the bytes
//! again. Entries are removed as soon as the transfer resolves.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use camli_core::ContentReference;

use crate::error::NetworkError;
use crate::store::UploadReceipt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Stored(UploadReceipt),
    Failed(NetworkError),
    Cancelled,
}

type Slot = watch::Sender<Option<TransferOutcome>>;

#[derive(Debug, Clone, Default)]
pub struct InFlight {
    transfers: Arc<DashMap<ContentReference, Slot>>,
}

pub enum Claim {
    /// The caller sends the bytes and must resolve the guard.
    Owner(TransferGuard),
    /// Someone else is sending; wait on [`Follower::outcome`].
    Follower(Follower),
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, reference: &ContentReference) -> Claim {
        match self.transfers.entry(reference.clone()) {
            Entry::Occupied(slot) => Claim::Follower(Follower {
                rx: slot.get().subscribe(),
            }),
            Entry::Vacant(slot) => {
                let (tx, _) = watch::channel(None);
                slot.insert(tx);
                Claim::Owner(TransferGuard {
                    table: self.clone(),
                    reference: reference.clone(),
                    resolved: false,
                })
            }
        }
    }

    fn resolve(&self, reference: &ContentReference, outcome: TransferOutcome) {
        if let Some((_, tx)) = self.transfers.remove(reference) {
            tx.send_replace(Some(outcome));
        }
    }

    pub fn contains(&self, reference: &ContentReference) -> bool {
        self.transfers.contains_key(reference)
    }

    /// Tasks waiting on someone else's transfer of `reference`.
    pub fn followers(&self, reference: &ContentReference) -> usize {
        self.transfers
            .get(reference)
            .map_or(0, |slot| slot.receiver_count())
    }

    /// Transfers currently running.
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

/// Ownership of one transfer. Dropping it unresolved (a panicking task)
/// releases followers with a failure.
pub struct TransferGuard {
    table: InFlight,
    reference: ContentReference,
    resolved: bool,
}

impl TransferGuard {
    pub fn reference(&self) -> &ContentReference {
        &self.reference
    }

    pub fn finish(mut self, outcome: TransferOutcome) {
        self.resolved = true;
        self.table.resolve(&self.reference, outcome);
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        if !self.resolved {
            self.table.resolve(
                &self.reference,
                TransferOutcome::Failed(NetworkError::Unreachable(
                    "transfer abandoned".to_string(),
                )),
            );
        }
    }
}

pub struct Follower {
    rx: watch::Receiver<Option<TransferOutcome>>,
}

impl Follower {
    pub async fn outcome(mut self) -> TransferOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or(TransferOutcome::Cancelled),
            Err(_) => TransferOutcome::Failed(NetworkError::Unreachable(
                "transfer abandoned".to_string(),
            )),
        }
    }
}
