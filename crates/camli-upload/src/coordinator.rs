//! Upload coordinator: drives a batch of assets to terminal states.
//!
//! A batch runs in three phases on a driver task:
//!
//!   1. hash    every chunk is read and hashed, bounded by the permit pool
//!   2. check   distinct references go to the presence checker, paged
//!   3. send    one transfer per absent reference, bounded by the same pool
//!
//! Chunks sharing a reference form a group. The group's first chunk carries
//! the bytes; the rest drop their payload and take the group's outcome.
//! Every submitted asset produces exactly one outcome on the stream, whatever
//! happens to its neighbours.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

use camli_core::config::UploadSettings;
use camli_core::{CamliConfig, ContentReference, DigestAlgorithm, Hasher};

use crate::chunk::{Chunk, ChunkOutcome, ChunkState};
use crate::error::{ChunkError, ConfigError, FailureReason};
use crate::inflight::{Claim, InFlight, TransferOutcome};
use crate::presence::{Presence, PresenceChecker, PresenceMap};
use crate::source::{AssetHandle, AssetSource};
use crate::store::{BlobStore, UploadReceipt};
use crate::stream::{BatchProgress, CancelHandle, UploadStream};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadConfig {
    /// Maximum reads/uploads running at once, across every batch of one
    /// coordinator and its clones.
    pub concurrency: usize,
    /// Maximum references per presence request.
    pub presence_batch_size: usize,
    pub digest: DigestAlgorithm,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            presence_batch_size: 1000,
            digest: DigestAlgorithm::default(),
        }
    }
}

impl UploadConfig {
    pub fn from_settings(settings: &UploadSettings) -> Result<Self, ConfigError> {
        let config = Self {
            concurrency: settings.concurrency as usize,
            presence_batch_size: settings.presence_batch_size as usize,
            digest: settings.digest.parse()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidSetting(
                "upload.concurrency",
                "must be at least 1".to_string(),
            ));
        }
        if self.presence_batch_size == 0 {
            return Err(ConfigError::InvalidSetting(
                "upload.presence_batch_size",
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Cheap to clone; clones share the in-flight table and the permit pool, so
/// concurrent batches never send the same reference twice and together stay
/// under `concurrency`.
#[derive(Clone)]
pub struct UploadCoordinator {
    source: Arc<dyn AssetSource>,
    store: Arc<dyn BlobStore>,
    config: UploadConfig,
    hasher: Hasher,
    inflight: InFlight,
    permits: Arc<Semaphore>,
}

impl UploadCoordinator {
    pub fn new(
        source: Arc<dyn AssetSource>,
        store: Arc<dyn BlobStore>,
        config: UploadConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            source,
            store,
            hasher: Hasher::new(config.digest),
            config,
            inflight: InFlight::new(),
            permits: Arc::new(Semaphore::new(config.concurrency)),
        })
    }

    pub fn from_config(
        config: &CamliConfig,
        source: Arc<dyn AssetSource>,
        store: Arc<dyn BlobStore>,
    ) -> Result<Self, ConfigError> {
        Self::new(source, store, UploadConfig::from_settings(&config.upload)?)
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    /// Queue a batch and start driving it. Returns immediately; outcomes
    /// arrive on the stream as chunks finish.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit_batch<I, A>(&self, assets: I) -> UploadStream
    where
        I: IntoIterator<Item = A>,
        A: Into<AssetHandle>,
    {
        let chunks: Vec<Chunk> = assets
            .into_iter()
            .map(|a| Chunk::new(a.into()))
            .collect();
        let total = chunks.len();

        let (cancel, cancel_rx) = CancelHandle::new();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = watch::channel(BatchProgress {
            total,
            ..BatchProgress::default()
        });

        let run = BatchRun {
            source: self.source.clone(),
            store: self.store.clone(),
            hasher: self.hasher,
            permits: self.permits.clone(),
            concurrency: self.config.concurrency,
            presence: PresenceChecker::new(self.store.clone(), self.config.presence_batch_size),
            inflight: self.inflight.clone(),
            cancel: cancel_rx,
            outcomes: outcome_tx,
            progress: progress_tx,
            assets: chunks.iter().map(|c| c.asset().clone()).collect(),
            reported: vec![false; total],
            slots: chunks.into_iter().map(Some).collect(),
        };
        tokio::spawn(run.drive());

        UploadStream::new(outcome_rx, cancel, progress_rx, total)
    }

    /// Submit and wait for every outcome.
    pub async fn upload_batch<I, A>(&self, assets: I) -> Vec<ChunkOutcome>
    where
        I: IntoIterator<Item = A>,
        A: Into<AssetHandle>,
    {
        self.submit_batch(assets).collect_all().await
    }
}

// ── Batch driver ──────────────────────────────────────────────────────────────

struct BatchRun {
    source: Arc<dyn AssetSource>,
    store: Arc<dyn BlobStore>,
    hasher: Hasher,
    permits: Arc<Semaphore>,
    concurrency: usize,
    presence: PresenceChecker,
    inflight: InFlight,
    cancel: watch::Receiver<bool>,
    outcomes: mpsc::UnboundedSender<ChunkOutcome>,
    progress: watch::Sender<BatchProgress>,
    assets: Vec<AssetHandle>,
    /// Chunks not yet reported. A slot is emptied when its outcome is sent.
    slots: Vec<Option<Chunk>>,
    reported: Vec<bool>,
}

/// Chunk indices sharing one reference. The first index carries the bytes.
type Groups = BTreeMap<ContentReference, Vec<usize>>;

impl BatchRun {
    async fn drive(mut self) {
        let started = Instant::now();
        tracing::info!(
            assets = self.slots.len(),
            concurrency = self.concurrency,
            "upload batch started"
        );

        self.hash_all().await;
        let groups = self.group_by_reference();

        if !groups.is_empty() {
            match self.check_presence(&groups).await {
                Some(presence) => {
                    let absent = self.settle_present(groups, &presence);
                    self.transfer_all(absent).await;
                }
                None => self.fail_remaining(FailureReason::Cancelled),
            }
        }
        self.report_stragglers();

        let p = *self.progress.borrow();
        tracing::info!(
            total = p.total,
            uploaded = p.uploaded,
            already_present = p.already_present,
            failed = p.failed,
            bytes = p.bytes_uploaded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upload batch finished"
        );
    }

    // ── Phase 1: hash ─────────────────────────────────────────────────────────

    async fn hash_all(&mut self) {
        let mut tasks = JoinSet::new();

        for idx in 0..self.slots.len() {
            let Some(mut chunk) = self.slots[idx].take() else {
                continue;
            };
            let source = self.source.clone();
            let hasher = self.hasher;
            let permits = self.permits.clone();
            let mut cancel = self.cancel.clone();

            tasks.spawn(async move {
                let was_cancelled = tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => true,
                    result = hash_chunk(&mut chunk, source.as_ref(), &hasher, &permits) => {
                        if let Err(e) = result {
                            tracing::warn!(error = %e, "asset skipped");
                        }
                        false
                    }
                };
                if was_cancelled {
                    chunk.fail(FailureReason::Cancelled);
                }
                (idx, chunk)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, chunk)) if chunk.state().is_terminal() => self.emit(idx, chunk),
                Ok((idx, chunk)) => {
                    self.progress.send_modify(|p| p.hashed += 1);
                    self.slots[idx] = Some(chunk);
                }
                Err(e) => tracing::error!(error = %e, "hashing task died"),
            }
        }
    }

    fn group_by_reference(&mut self) -> Groups {
        let mut groups = Groups::new();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let Some(chunk) = slot else { continue };
            let Some(reference) = chunk.reference().cloned() else {
                continue;
            };
            advance(chunk, ChunkState::Checking);
            groups.entry(reference).or_default().push(idx);
        }
        groups
    }

    // ── Phase 2: check ────────────────────────────────────────────────────────

    /// `None` if the batch was cancelled while waiting.
    async fn check_presence(&mut self, groups: &Groups) -> Option<PresenceMap> {
        let query: BTreeSet<ContentReference> = groups.keys().cloned().collect();
        let mut cancel = self.cancel.clone();

        let result = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return None,
            r = self.presence.check(&query) => r,
        };

        match result {
            Ok(map) => {
                let present = map.values().filter(|p| **p == Presence::Present).count();
                tracing::info!(
                    distinct = query.len(),
                    present,
                    absent = query.len() - present,
                    "presence checked"
                );
                Some(map)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    distinct = query.len(),
                    "presence check failed, treating every reference as absent"
                );
                Some(PresenceMap::new())
            }
        }
    }

    /// Finish the groups the store already holds; return the rest.
    fn settle_present(&mut self, groups: Groups, presence: &PresenceMap) -> Groups {
        let mut absent = Groups::new();
        for (reference, members) in groups {
            if presence.get(&reference) != Some(&Presence::Present) {
                absent.insert(reference, members);
                continue;
            }
            for idx in members {
                if let Some(mut chunk) = self.slots[idx].take() {
                    advance(&mut chunk, ChunkState::AlreadyPresent);
                    self.emit(idx, chunk);
                }
            }
        }
        absent
    }

    // ── Phase 3: send ─────────────────────────────────────────────────────────

    async fn transfer_all(&mut self, groups: Groups) {
        let mut tasks = JoinSet::new();
        let mut members_by_task = Vec::with_capacity(groups.len());

        for (reference, members) in groups {
            let Some(body) = self.prepare_group(&members) else {
                continue;
            };
            let claim = self.inflight.claim(&reference);
            let owner = matches!(claim, Claim::Owner(_));
            if owner {
                self.progress.send_modify(|p| p.uploads_started += 1);
            } else {
                tracing::debug!(
                    reference = reference.short(),
                    "reference already being sent, following"
                );
            }

            let task = members_by_task.len();
            members_by_task.push((reference.clone(), members, owner));
            let transfer = Transfer {
                store: self.store.clone(),
                permits: self.permits.clone(),
                inflight: self.inflight.clone(),
                cancel: self.cancel.clone(),
                reference,
                body,
            };
            tasks.spawn(async move { (task, transfer.run(claim).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            let (task, (outcome, sent)) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!(error = %e, "upload task died");
                    continue;
                }
            };
            let (reference, members, owner) = &members_by_task[task];
            if sent.is_some() && !*owner {
                self.progress.send_modify(|p| p.uploads_started += 1);
            }
            if let (TransferOutcome::Stored(UploadReceipt::Created), Some(len)) = (&outcome, sent) {
                self.progress.send_modify(|p| p.bytes_uploaded += len);
            }
            self.settle_group(reference, members, outcome);
        }
    }

    /// Move a group to `Uploading` and hand back the bytes to send. Only the
    /// first member keeps its payload.
    fn prepare_group(&mut self, members: &[usize]) -> Option<Bytes> {
        let mut body = None;
        for &idx in members {
            let Some(chunk) = self.slots[idx].as_mut() else {
                continue;
            };
            if body.is_none() {
                body = chunk.payload().cloned();
            } else {
                chunk.discard_duplicate_payload();
            }
            advance(chunk, ChunkState::Uploading);
        }
        if body.is_none() {
            tracing::error!("absent group has no payload");
        }
        body
    }

    fn settle_group(
        &mut self,
        reference: &ContentReference,
        members: &[usize],
        outcome: TransferOutcome,
    ) {
        match &outcome {
            TransferOutcome::Stored(receipt) => tracing::debug!(
                reference = reference.short(),
                ?receipt,
                chunks = members.len(),
                "blob stored"
            ),
            TransferOutcome::Failed(e) => tracing::warn!(
                reference = reference.short(),
                error = %e,
                chunks = members.len(),
                "upload failed"
            ),
            TransferOutcome::Cancelled => {}
        }

        for &idx in members {
            let Some(mut chunk) = self.slots[idx].take() else {
                continue;
            };
            match &outcome {
                TransferOutcome::Stored(UploadReceipt::Created) => {
                    advance(&mut chunk, ChunkState::Uploaded)
                }
                TransferOutcome::Stored(UploadReceipt::AlreadyPresent) => {
                    advance(&mut chunk, ChunkState::AlreadyPresent)
                }
                TransferOutcome::Failed(e) => chunk.fail(FailureReason::from(e)),
                TransferOutcome::Cancelled => chunk.fail(FailureReason::Cancelled),
            }
            self.emit(idx, chunk);
        }
    }

    // ── Reporting ─────────────────────────────────────────────────────────────

    fn emit(&mut self, idx: usize, mut chunk: Chunk) {
        if !chunk.state().is_terminal() {
            chunk.fail(FailureReason::Io("chunk left unfinished".to_string()));
        }
        chunk.release();
        self.reported[idx] = true;

        let state = chunk.state().clone();
        self.progress.send_modify(|p| match &state {
            ChunkState::Uploaded => p.uploaded += 1,
            ChunkState::AlreadyPresent => p.already_present += 1,
            _ => p.failed += 1,
        });
        if let Some(reason) = state.failure() {
            if *reason != FailureReason::Cancelled {
                tracing::warn!(asset = %chunk.asset(), %reason, "chunk failed");
            }
        }

        // A dropped stream just means nobody is listening any more.
        let _ = self.outcomes.send(chunk.into_outcome());
    }

    fn fail_remaining(&mut self, reason: FailureReason) {
        for idx in 0..self.slots.len() {
            if let Some(mut chunk) = self.slots[idx].take() {
                chunk.fail(reason.clone());
                self.emit(idx, chunk);
            }
        }
    }

    /// Report chunks lost to a dead task so the stream stays one-per-asset.
    fn report_stragglers(&mut self) {
        for idx in 0..self.reported.len() {
            if self.reported[idx] {
                continue;
            }
            let chunk = match self.slots[idx].take() {
                Some(mut chunk) => {
                    chunk.fail(FailureReason::Network("upload task aborted".to_string()));
                    chunk
                }
                None => {
                    let mut chunk = Chunk::new(self.assets[idx].clone());
                    chunk.fail(FailureReason::Io("hashing task aborted".to_string()));
                    chunk
                }
            };
            self.emit(idx, chunk);
        }
    }
}

fn advance(chunk: &mut Chunk, next: ChunkState) {
    if let Err(e) = chunk.transition(next) {
        tracing::error!(asset = %chunk.asset(), error = %e, "chunk state machine violated");
    }
}

async fn hash_chunk(
    chunk: &mut Chunk,
    source: &dyn AssetSource,
    hasher: &Hasher,
    permits: &Semaphore,
) -> Result<(), ChunkError> {
    let Ok(_permit) = permits.acquire().await else {
        chunk.fail(FailureReason::Cancelled);
        return Ok(());
    };
    chunk.materialize(source, hasher).await?;
    Ok(())
}

/// One group's upload. Holds the representative payload until the group
/// resolves, whether this task sends it or follows another batch's transfer.
struct Transfer {
    store: Arc<dyn BlobStore>,
    permits: Arc<Semaphore>,
    inflight: InFlight,
    cancel: watch::Receiver<bool>,
    reference: ContentReference,
    body: Bytes,
}

impl Transfer {
    /// Returns the outcome and, if this task sent the body, its length.
    ///
    /// A followed transfer that ends `Cancelled` was cancelled by its own
    /// batch, not this one: claim the reference again and carry on.
    async fn run(mut self, mut claim: Claim) -> (TransferOutcome, Option<u64>) {
        loop {
            match claim {
                Claim::Owner(guard) => {
                    let len = self.body.len() as u64;
                    let outcome = tokio::select! {
                        biased;
                        _ = cancelled(&mut self.cancel) => TransferOutcome::Cancelled,
                        o = send_blob(
                            self.store.as_ref(),
                            &self.permits,
                            &self.reference,
                            self.body,
                        ) => o,
                    };
                    guard.finish(outcome.clone());
                    return (outcome, Some(len));
                }
                Claim::Follower(follower) => {
                    let outcome = tokio::select! {
                        biased;
                        _ = cancelled(&mut self.cancel) => return (TransferOutcome::Cancelled, None),
                        o = follower.outcome() => o,
                    };
                    if outcome != TransferOutcome::Cancelled {
                        return (outcome, None);
                    }
                    tracing::debug!(
                        reference = self.reference.short(),
                        "followed transfer was cancelled, claiming it"
                    );
                    claim = self.inflight.claim(&self.reference);
                }
            }
        }
    }
}

async fn send_blob(
    store: &dyn BlobStore,
    permits: &Semaphore,
    reference: &ContentReference,
    body: Bytes,
) -> TransferOutcome {
    let Ok(_permit) = permits.acquire().await else {
        return TransferOutcome::Cancelled;
    };
    match store.upload(reference, body).await {
        Ok(receipt) => TransferOutcome::Stored(receipt),
        Err(e) => TransferOutcome::Failed(e),
    }
}

/// Resolves once the batch is cancelled. Never resolves if every cancel
/// handle is gone without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}
