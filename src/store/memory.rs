use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use ulid::Ulid;

use super::journal::{self, Journal, JournalOp};
use super::{Collection, Predicate, Record, ScopeGuard, ScopeLocks, Store, StoreError, StoreResult, UnitOfWork, Write};

// ── Group-commit journal channel ─────────────────────────

enum JournalCommand {
    Append {
        ops: Vec<JournalOp>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Vec<JournalOp>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<JournalOp>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the journal and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then pays for a single fsync for the whole batch.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { ops, response } => {
                let mut batch = vec![(ops, response)];
                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { ops, response }) => batch.push((ops, response)),
                        Ok(other) => {
                            flush_and_respond(&mut journal, &mut batch);
                            handle_non_append(&mut journal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                if !batch.is_empty() {
                    flush_and_respond(&mut journal, &mut batch);
                }
            }
            other => handle_non_append(&mut journal, other),
        }
    }
}

fn flush_and_respond(journal: &mut Journal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(journal, batch);
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(journal: &mut Journal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (ops, _) in batch {
        if let Err(e) = journal.record(ops) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = journal.sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { snapshot, response } => {
            let _ = response.send(journal.snapshot(&snapshot));
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.commits_since_snapshot());
        }
        JournalCommand::Append { .. } => unreachable!(),
    }
}

/// Reference [`Store`]: one concurrent map per collection, optionally
/// backed by a [`Journal`].
pub struct InMemoryStore {
    availability: DashMap<Ulid, Record>,
    classes: DashMap<Ulid, Record>,
    enrollments: DashMap<Ulid, Record>,
    sessions: DashMap<Ulid, Record>,
    scope_locks: Arc<ScopeLocks>,
    /// Validate-journal-apply runs under this lock, so commits are linearized.
    commit_lock: Mutex<()>,
    journal_tx: Option<mpsc::Sender<JournalCommand>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// A purely in-memory store.
    pub fn new() -> Self {
        Self {
            availability: DashMap::new(),
            classes: DashMap::new(),
            enrollments: DashMap::new(),
            sessions: DashMap::new(),
            scope_locks: Arc::new(ScopeLocks::new()),
            commit_lock: Mutex::new(()),
            journal_tx: None,
        }
    }

    /// Replay the journal at `path` and keep appending to it.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let frames = journal::load(path)?;
        let journal = Journal::open(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, rx));

        let mut store = Self::new();
        for frame in frames {
            for op in frame {
                store.apply(op);
            }
        }
        tracing::debug!(
            path = %path.display(),
            classes = store.classes.len(),
            sessions = store.sessions.len(),
            "journal replayed"
        );
        store.journal_tx = Some(tx);
        Ok(store)
    }

    fn table(&self, collection: Collection) -> &DashMap<Ulid, Record> {
        match collection {
            Collection::Availability => &self.availability,
            Collection::Classes => &self.classes,
            Collection::Enrollments => &self.enrollments,
            Collection::Sessions => &self.sessions,
        }
    }

    pub fn record_count(&self, collection: Collection) -> usize {
        self.table(collection).len()
    }

    /// Scope locks currently held or awaited.
    pub fn live_scope_locks(&self) -> usize {
        self.scope_locks.len()
    }

    fn apply(&self, op: JournalOp) {
        match op {
            JournalOp::Put(record) => {
                self.table(record.collection()).insert(record.id(), record);
            }
            JournalOp::Remove { collection, id } => {
                self.table(collection).remove(&id);
            }
        }
    }

    /// Check every write against current state (and earlier writes of the
    /// same unit) and turn it into journal ops. Nothing is applied here.
    fn resolve(&self, unit: UnitOfWork) -> StoreResult<Vec<JournalOp>> {
        let mut present: HashMap<(Collection, Ulid), bool> = HashMap::new();
        let mut ops = Vec::with_capacity(unit.len());
        for write in unit.into_writes() {
            let (collection, id) = (write.collection(), write.id());
            let exists = present
                .get(&(collection, id))
                .copied()
                .unwrap_or_else(|| self.table(collection).contains_key(&id));
            match write {
                Write::Create(_) if exists => return Err(StoreError::AlreadyExists { collection, id }),
                Write::Update(_) | Write::Delete { .. } if !exists => {
                    return Err(StoreError::NotFound { collection, id });
                }
                Write::Create(record) | Write::Update(record) | Write::Upsert(record) => {
                    present.insert((collection, id), true);
                    ops.push(JournalOp::Put(record));
                }
                Write::Delete { .. } => {
                    present.insert((collection, id), false);
                    ops.push(JournalOp::Remove { collection, id });
                }
            }
        }
        Ok(ops)
    }

    async fn journal_append(&self, ops: &[JournalOp]) -> StoreResult<()> {
        let Some(tx) = &self.journal_tx else { return Ok(()) };
        let (response, rx) = oneshot::channel();
        tx.send(JournalCommand::Append { ops: ops.to_vec(), response })
            .await
            .map_err(|_| StoreError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))
    }

    /// Rewrite the journal as one snapshot frame of the current state.
    pub async fn compact(&self) -> StoreResult<()> {
        let Some(tx) = &self.journal_tx else { return Ok(()) };
        let _commit = self.commit_lock.lock().await;
        let snapshot: Vec<JournalOp> = Collection::ALL
            .iter()
            .flat_map(|c| self.table(*c).iter().map(|e| JournalOp::Put(e.value().clone())).collect::<Vec<_>>())
            .collect();
        let (response, rx) = oneshot::channel();
        tx.send(JournalCommand::Compact { snapshot, response })
            .await
            .map_err(|_| StoreError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(tx) = &self.journal_tx else { return 0 };
        let (response, rx) = oneshot::channel();
        if tx.send(JournalCommand::AppendsSinceCompact { response }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_by_id(&self, collection: Collection, id: Ulid) -> StoreResult<Option<Record>> {
        Ok(self.table(collection).get(&id).map(|e| e.value().clone()))
    }

    async fn find(&self, collection: Collection, predicate: Predicate<'_>) -> StoreResult<Vec<Record>> {
        let mut hits: Vec<Record> = self
            .table(collection)
            .iter()
            .filter(|e| predicate(e.value()))
            .map(|e| e.value().clone())
            .collect();
        hits.sort_by_key(Record::id);
        Ok(hits)
    }

    async fn commit(&self, unit: UnitOfWork) -> StoreResult<()> {
        if unit.is_empty() {
            return Ok(());
        }
        let _commit = self.commit_lock.lock().await;
        let ops = self.resolve(unit)?;
        self.journal_append(&ops).await?;
        for op in ops {
            self.apply(op);
        }
        Ok(())
    }

    async fn lock_scopes(&self, scopes: &[Ulid]) -> ScopeGuard {
        let mut ids = scopes.to_vec();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lock = self.scope_locks.entry(id).or_default().clone();
            guards.push((id, lock.lock_owned().await));
        }
        ScopeGuard::new(guards, self.scope_locks.clone())
    }
}
