//! Transaction
//!
//! A [`Transaction`] accumulates everything one logical change needs before it
//! is sent to the backend:
//!
//! - a [`MutationTree`] of staged writes
//! - asynchronous preconditions that must settle before the commit
//! - a reversion stack (most recent first) that undoes local side effects
//! - completion callbacks fired in registration order with the outcome
//!
//! # Lifecycle
//!
//! ```text
//! waiting ──commit──▶ performing ──▶ completed
//!    │                    └────────▶ failed ──revert──▶ (reverted)
//!    ├──revert──▶ (reverted)
//!    ├──cancel──▶ cancelled
//!    └──merged into another transaction──▶ merged
//! ```
//!
//! A finished transaction cannot be reused. Dropping one that still holds
//! staged work without committing, merging, reverting or cancelling it is a
//! bug and is reported when the last handle goes away.
//!
//! `Transaction` is a cheap handle; clones refer to the same unit of work.

use crate::config::RealtimeContext;
use crate::db::Backend;
use crate::models::{Node, SourceLink};
use crate::representer::{CodingError, Representer};
use crate::transaction::{
    ConflictResolver, FileOutcome, MergeStrategy, Metadata, MutationTree, TransactionError,
    UpdateNode,
};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

type Precondition = Box<dyn FnOnce(Transaction) -> BoxFuture<'static, anyhow::Result<()>> + Send>;
type Reversion = Arc<dyn Fn() + Send + Sync>;
type Completion = Box<dyn FnOnce(bool) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Waiting,
    Performing,
    Completed,
    Failed,
    Cancelled,
    Merged,
}

/// What a successful commit reports
#[derive(Debug, Default)]
pub struct CommitOutcome {
    /// Upload results for every staged blob, in staging order
    pub files: Vec<FileOutcome>,
}

impl CommitOutcome {
    pub fn failed_files(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|file| !file.is_uploaded())
    }
}

struct ScheduledMerge {
    other: Transaction,
    resolver: ConflictResolver,
}

struct TransactionInner {
    id: Uuid,
    tree: MutationTree,
    state: TransactionState,
    reverted: bool,
    preconditions: Vec<Precondition>,
    reversions: Vec<Reversion>,
    file_reversions: HashMap<Node, Vec<Reversion>>,
    completions: Vec<Completion>,
    scheduled_merges: Vec<ScheduledMerge>,
    merged_into: Option<Transaction>,
}

impl TransactionInner {
    fn is_invalidated(&self) -> bool {
        self.reverted
            || matches!(
                self.state,
                TransactionState::Completed
                    | TransactionState::Failed
                    | TransactionState::Cancelled
                    | TransactionState::Merged
            )
    }

    fn has_operations(&self) -> bool {
        !self.tree.is_empty() || !self.preconditions.is_empty() || !self.scheduled_merges.is_empty()
    }

    fn take_all_reversions(&mut self) -> Vec<Reversion> {
        let mut reversions = std::mem::take(&mut self.reversions);
        reversions.extend(self.file_reversions.drain().flat_map(|(_, list)| list));
        reversions
    }
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        if !self.is_invalidated() && self.has_operations() && !std::thread::panicking() {
            tracing::error!(
                "Transaction {} dropped in state {:?} with {} staged write(s) and {} precondition(s)",
                self.id,
                self.state,
                self.tree.len(),
                self.preconditions.len()
            );
            debug_assert!(
                false,
                "Transaction {} must be committed, merged, reverted or cancelled before it is dropped",
                self.id
            );
        }
    }
}

#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Mutex<TransactionInner>>,
    context: RealtimeContext,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Transaction")
            .field("id", &inner.id)
            .field("state", &inner.state)
            .field("reverted", &inner.reverted)
            .field("writes", &inner.tree.len())
            .field("preconditions", &inner.preconditions.len())
            .finish()
    }
}

impl Transaction {
    pub fn new(context: &RealtimeContext) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TransactionInner {
                id: Uuid::new_v4(),
                tree: MutationTree::new(),
                state: TransactionState::Waiting,
                reverted: false,
                preconditions: Vec::new(),
                reversions: Vec::new(),
                file_reversions: HashMap::new(),
                completions: Vec::new(),
                scheduled_merges: Vec::new(),
                merged_into: None,
            })),
            context: context.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransactionInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.lock().id
    }

    pub fn context(&self) -> &RealtimeContext {
        &self.context
    }

    pub fn state(&self) -> TransactionState {
        self.lock().state
    }

    pub fn is_reverted(&self) -> bool {
        self.lock().reverted
    }

    pub fn is_invalidated(&self) -> bool {
        self.lock().is_invalidated()
    }

    /// Anything staged, pending or scheduled
    pub fn has_operations(&self) -> bool {
        self.lock().has_operations()
    }

    pub fn pending_preconditions(&self) -> usize {
        self.lock().preconditions.len()
    }

    /// Copy of the writes staged so far
    pub fn staged(&self) -> MutationTree {
        self.lock().tree.clone()
    }

    /// Both handles refer to the same transaction
    pub fn ptr_eq(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The transaction staging calls actually reach
    ///
    /// Once this transaction is scheduled for a deferred merge, its staging
    /// calls are redirected to the receiver.
    fn target(&self) -> Transaction {
        let mut current = self.clone();
        loop {
            let next = {
                let inner = current.lock();
                assert!(
                    !inner.is_invalidated(),
                    "Transaction {} is finished ({:?}) and cannot be modified",
                    inner.id,
                    inner.state
                );
                inner.merged_into.clone()
            };
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    fn stage(&self, terminal: UpdateNode) {
        assert!(
            terminal.location().is_rooted(),
            "Cannot stage a write at detached node {}",
            terminal.location()
        );
        self.target().lock().tree.stage(terminal);
    }

    pub fn add_value(&self, node: &Node, value: impl Into<Value>) {
        self.stage(UpdateNode::value(node.clone(), Some(value.into())));
    }

    pub fn remove_value(&self, node: &Node) {
        self.stage(UpdateNode::value(node.clone(), None));
    }

    pub fn add_file(&self, node: &Node, data: Vec<u8>, metadata: Metadata) {
        self.stage(UpdateNode::file(node.clone(), Some(data), metadata));
    }

    pub fn remove_file(&self, node: &Node) {
        self.stage(UpdateNode::file(node.clone(), None, Metadata::new()));
    }

    /// Stage a link record at `location`
    pub fn add_link(&self, location: &Node, link: &SourceLink) {
        self.add_value(location, link.to_value());
    }

    /// Encode `value` and stage it at `node`
    pub fn encode<T>(
        &self,
        value: &T,
        node: &Node,
        representer: &dyn Representer<T>,
    ) -> Result<(), CodingError> {
        match representer.encode(value)? {
            Some(encoded) => self.add_value(node, encoded),
            None => self.remove_value(node),
        }
        Ok(())
    }

    /// Register work that must settle before the commit proceeds
    ///
    /// The action receives the transaction that is draining it and may stage
    /// writes or register further preconditions.
    pub fn add_precondition<F, Fut>(&self, action: F)
    where
        F: FnOnce(Transaction) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let precondition: Precondition = Box::new(move |transaction| action(transaction).boxed());
        self.target().lock().preconditions.push(precondition);
    }

    /// Push an undo action; the most recent one runs first
    pub fn add_reversion(&self, reversion: impl Fn() + Send + Sync + 'static) {
        self.target()
            .lock()
            .reversions
            .insert(0, Arc::new(reversion));
    }

    /// Undo action run only if the blob staged at `node` fails to upload
    pub fn add_file_reversion(&self, node: &Node, reversion: impl Fn() + Send + Sync + 'static) {
        self.target()
            .lock()
            .file_reversions
            .entry(node.clone())
            .or_default()
            .insert(0, Arc::new(reversion));
    }

    /// Called once with the final outcome
    pub fn add_completion(&self, completion: impl FnOnce(bool) + Send + 'static) {
        self.target().lock().completions.push(Box::new(completion));
    }

    /// A closure replaying the reversion stack as it is right now
    pub fn current_reversion(&self) -> impl Fn() + Send + Sync + 'static {
        let reversions = self.lock().reversions.clone();
        move || reversions.iter().for_each(|reversion| reversion())
    }

    /// Merge `other` into this transaction using a predefined strategy
    pub fn merge(&self, other: &Transaction, strategy: MergeStrategy) {
        self.merge_with(other, strategy.into_resolver());
    }

    /// Merge `other` into this transaction
    ///
    /// If `other` still has preconditions they move here and `other` is only
    /// folded in during this transaction's commit, after they settle.
    /// Otherwise the trees merge immediately and `other` becomes `merged`.
    ///
    /// # Panics
    ///
    /// Panics when merging a transaction into itself, or when `other` is
    /// already finished or scheduled into another transaction.
    pub fn merge_with(
        &self,
        other: &Transaction,
        resolver: impl FnMut(UpdateNode, UpdateNode) -> UpdateNode + Send + 'static,
    ) {
        let target = self.target();
        assert!(
            !self.ptr_eq(other) && !target.ptr_eq(other),
            "Cannot merge transaction {} into itself",
            other.id()
        );

        let deferred = {
            let mut theirs = other.lock();
            assert!(
                theirs.merged_into.is_none() && !theirs.is_invalidated(),
                "Transaction {} is already merged or finished",
                theirs.id
            );
            if theirs.preconditions.is_empty() {
                None
            } else {
                theirs.merged_into = Some(target.clone());
                Some(std::mem::take(&mut theirs.preconditions))
            }
        };

        match deferred {
            Some(preconditions) => {
                tracing::debug!(
                    "Scheduling merge of transaction {} into {} after {} precondition(s)",
                    other.id(),
                    target.id(),
                    preconditions.len()
                );
                let mut ours = target.lock();
                ours.preconditions.extend(preconditions);
                ours.scheduled_merges.push(ScheduledMerge {
                    other: other.clone(),
                    resolver: Box::new(resolver),
                });
            }
            None => target.merge_now(other, Box::new(resolver)),
        }
    }

    fn merge_now(&self, other: &Transaction, mut resolver: ConflictResolver) {
        let (tree, completions, reversions, file_reversions, nested) = {
            let mut theirs = other.lock();
            theirs.state = TransactionState::Merged;
            theirs.merged_into = None;
            (
                std::mem::take(&mut theirs.tree),
                std::mem::take(&mut theirs.completions),
                std::mem::take(&mut theirs.reversions),
                std::mem::take(&mut theirs.file_reversions),
                std::mem::take(&mut theirs.scheduled_merges),
            )
        };
        tracing::debug!(
            "Merging transaction {} ({} writes) into {}",
            other.id(),
            tree.len(),
            self.id()
        );

        {
            let mut ours = self.lock();
            ours.tree.merge(tree, &mut *resolver);
            ours.completions.extend(completions);
            if !reversions.is_empty() {
                ours.reversions.insert(
                    0,
                    Arc::new(move || reversions.iter().for_each(|reversion| reversion())),
                );
            }
            for (node, list) in file_reversions {
                ours.file_reversions.entry(node).or_default().extend(list);
            }
        }

        for scheduled in nested {
            self.merge_now(&scheduled.other, scheduled.resolver);
        }
    }

    fn apply_scheduled_merges(&self) {
        let scheduled = std::mem::take(&mut self.lock().scheduled_merges);
        for merge in scheduled {
            self.merge_now(&merge.other, merge.resolver);
        }
    }

    /// Run preconditions wave by wave until none are left
    async fn drain_preconditions(&self) -> Vec<anyhow::Error> {
        let max_waves = self.context.config().max_precondition_waves;
        let mut errors = Vec::new();
        let mut wave = 0;

        loop {
            let batch = std::mem::take(&mut self.lock().preconditions);
            if batch.is_empty() {
                break;
            }
            wave += 1;
            if wave > max_waves {
                errors.push(anyhow::anyhow!(
                    "Preconditions still pending after {} waves",
                    max_waves
                ));
                break;
            }

            tracing::debug!(
                "Transaction {}: running {} precondition(s) (wave {})",
                self.id(),
                batch.len(),
                wave
            );
            let results = join_all(batch.into_iter().map(|action| action(self.clone()))).await;
            errors.extend(results.into_iter().filter_map(Result::err));
        }

        errors
    }

    /// Resolve preconditions, fold in scheduled merges and send the tree to the backend
    ///
    /// With `revert_on_error` the reversion stack runs before a failure is
    /// reported. Without it the local state stays as staged, and
    /// [`revert`](Self::revert) may still be called afterwards.
    ///
    /// # Panics
    ///
    /// Panics if the transaction is not `waiting`, or was merged into another.
    pub async fn commit(&self, revert_on_error: bool) -> Result<CommitOutcome, TransactionError> {
        {
            let inner = self.lock();
            assert!(
                inner.merged_into.is_none() && inner.state != TransactionState::Merged,
                "Transaction {} was merged into another transaction and cannot be committed",
                inner.id
            );
            assert!(
                inner.state == TransactionState::Waiting && !inner.reverted,
                "Transaction {} cannot be committed in state {:?}",
                inner.id,
                inner.state
            );
        }

        let errors = self.drain_preconditions().await;
        self.apply_scheduled_merges();

        if !errors.is_empty() {
            tracing::warn!(
                "Transaction {} rejected by {} precondition(s)",
                self.id(),
                errors.len()
            );
            self.lock().state = TransactionState::Failed;
            if revert_on_error {
                self.run_reversions();
            }
            self.invalidate(false);
            return Err(TransactionError::PreconditionsFailed { errors });
        }

        let tree = {
            let mut inner = self.lock();
            inner.state = TransactionState::Performing;
            inner.tree.clone()
        };

        if tree.is_empty() {
            tracing::warn!("Transaction {} committed with nothing staged", self.id());
            self.lock().state = TransactionState::Completed;
            self.invalidate(true);
            return Ok(CommitOutcome::default());
        }

        let backend = Arc::clone(self.context.backend());
        let (values, files) = if self.context.config().upload_files_concurrently {
            tokio::join!(commit_values(&backend, &tree), upload_files(&backend, &tree))
        } else {
            let values = commit_values(&backend, &tree).await;
            (values, upload_files(&backend, &tree).await)
        };

        if revert_on_error {
            for file in files.iter().filter(|file| !file.is_uploaded()) {
                self.run_file_reversions(file.location());
            }
        }

        match values {
            Ok(()) => {
                tracing::info!(
                    "Transaction {} committed {} write(s)",
                    self.id(),
                    tree.len()
                );
                self.lock().state = TransactionState::Completed;
                self.invalidate(true);
                Ok(CommitOutcome { files })
            }
            Err(source) => {
                tracing::warn!("Transaction {} failed: {:#}", self.id(), source);
                self.lock().state = TransactionState::Failed;
                if revert_on_error {
                    self.run_reversions();
                }
                self.invalidate(false);
                Err(TransactionError::CommitFailed { source, files })
            }
        }
    }

    /// Undo every local side effect registered so far
    ///
    /// From `waiting` this also finishes the transaction: completions fire
    /// with `false`.
    ///
    /// # Panics
    ///
    /// Panics unless the transaction is `waiting` or `failed` and not yet reverted.
    pub fn revert(&self) {
        let state = {
            let inner = self.lock();
            assert!(
                matches!(
                    inner.state,
                    TransactionState::Waiting | TransactionState::Failed
                ) && !inner.reverted
                    && inner.merged_into.is_none(),
                "Cannot revert transaction {} in state {:?}",
                inner.id,
                inner.state
            );
            inner.state
        };

        if state == TransactionState::Waiting {
            // Deferred merges still pointing here finish with us
            self.apply_scheduled_merges();
        }
        self.run_reversions();
        if state == TransactionState::Waiting {
            self.invalidate(false);
        }
    }

    /// Abandon the transaction without undoing local side effects
    ///
    /// # Panics
    ///
    /// Panics unless the transaction is `waiting`.
    pub fn cancel(&self) {
        {
            let mut inner = self.lock();
            assert!(
                inner.state == TransactionState::Waiting
                    && !inner.reverted
                    && inner.merged_into.is_none(),
                "Cannot cancel transaction {} in state {:?}",
                inner.id,
                inner.state
            );
            inner.state = TransactionState::Cancelled;
        }
        self.apply_scheduled_merges();
        tracing::debug!("Transaction {} cancelled", self.id());
        self.invalidate(false);
    }

    fn run_reversions(&self) {
        let reversions = {
            let mut inner = self.lock();
            inner.reverted = true;
            inner.take_all_reversions()
        };
        tracing::debug!(
            "Reverting transaction {} ({} action(s))",
            self.id(),
            reversions.len()
        );
        reversions.iter().for_each(|reversion| reversion());
    }

    fn run_file_reversions(&self, node: &Node) {
        let reversions = self.lock().file_reversions.remove(node).unwrap_or_default();
        reversions.iter().for_each(|reversion| reversion());
    }

    /// Fire completions and drop everything that can no longer run
    ///
    /// Reversions survive a failure that was not reverted, so the caller can
    /// still call `revert`.
    fn invalidate(&self, success: bool) {
        let completions = {
            let mut inner = self.lock();
            inner.preconditions.clear();
            if success || inner.reverted || inner.state != TransactionState::Failed {
                inner.take_all_reversions();
            }
            std::mem::take(&mut inner.completions)
        };
        completions
            .into_iter()
            .for_each(|completion| completion(success));
    }
}

async fn commit_values(backend: &Arc<dyn Backend>, tree: &MutationTree) -> anyhow::Result<()> {
    if tree.values().is_empty() {
        return Ok(());
    }
    backend.commit(tree).await
}

async fn upload_files(backend: &Arc<dyn Backend>, tree: &MutationTree) -> Vec<FileOutcome> {
    join_all(tree.files().into_iter().map(|file| async move {
        match backend.upload(file).await {
            Ok(metadata) => FileOutcome::Uploaded {
                location: file.location.clone(),
                metadata,
            },
            Err(error) => {
                tracing::warn!("Upload to {} failed: {:#}", file.location, error);
                FileOutcome::Failed {
                    location: file.location.clone(),
                    error,
                }
            }
        }
    }))
    .await
}
