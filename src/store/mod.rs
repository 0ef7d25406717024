//! The storage collaborator contract and its reference implementation.
//!
//! The engine only ever talks to [`Store`]. Records are plain entity values
//! wrapped in [`Record`]; [`Entity`] gives a typed view over them.

mod journal;
mod memory;

pub use journal::{Journal, JournalOp};
pub use memory::InMemoryStore;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::model::{Availability, Class, Enrollment, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Availability,
    Classes,
    Enrollments,
    Sessions,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Availability,
        Collection::Classes,
        Collection::Enrollments,
        Collection::Sessions,
    ];
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Collection::Availability => "availability",
            Collection::Classes => "classes",
            Collection::Enrollments => "enrollments",
            Collection::Sessions => "sessions",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Availability(Availability),
    Class(Class),
    Enrollment(Enrollment),
    Session(Session),
}

impl Record {
    pub fn collection(&self) -> Collection {
        match self {
            Record::Availability(_) => Collection::Availability,
            Record::Class(_) => Collection::Classes,
            Record::Enrollment(_) => Collection::Enrollments,
            Record::Session(_) => Collection::Sessions,
        }
    }

    pub fn id(&self) -> Ulid {
        match self {
            Record::Availability(a) => a.tutor_id,
            Record::Class(c) => c.id,
            Record::Enrollment(e) => e.id,
            Record::Session(s) => s.id,
        }
    }
}

/// Typed view of one collection's records.
pub trait Entity: Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> Ulid;
    fn into_record(self) -> Record;
    fn from_record(record: Record) -> Option<Self>;
    fn from_record_ref(record: &Record) -> Option<&Self>;
}

macro_rules! entity {
    ($ty:ty, $variant:ident, $collection:ident, $id:ident) => {
        impl Entity for $ty {
            const COLLECTION: Collection = Collection::$collection;

            fn id(&self) -> Ulid {
                self.$id
            }

            fn into_record(self) -> Record {
                Record::$variant(self)
            }

            fn from_record(record: Record) -> Option<Self> {
                match record {
                    Record::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn from_record_ref(record: &Record) -> Option<&Self> {
                match record {
                    Record::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

entity!(Availability, Availability, Availability, tutor_id);
entity!(Class, Class, Classes, id);
entity!(Enrollment, Enrollment, Enrollments, id);
entity!(Session, Session, Sessions, id);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    /// Fails with `AlreadyExists` if the id is taken.
    Create(Record),
    /// Fails with `NotFound` if the id is absent.
    Update(Record),
    Upsert(Record),
    /// Fails with `NotFound` if the id is absent.
    Delete { collection: Collection, id: Ulid },
}

impl Write {
    pub fn collection(&self) -> Collection {
        match self {
            Write::Create(r) | Write::Update(r) | Write::Upsert(r) => r.collection(),
            Write::Delete { collection, .. } => *collection,
        }
    }

    pub fn id(&self) -> Ulid {
        match self {
            Write::Create(r) | Write::Update(r) | Write::Upsert(r) => r.id(),
            Write::Delete { id, .. } => *id,
        }
    }
}

/// A batch of writes applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOfWork {
    writes: Vec<Write>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, write: Write) -> Self {
        self.writes.push(write);
        self
    }

    pub fn create<E: Entity>(self, entity: E) -> Self {
        self.push(Write::Create(entity.into_record()))
    }

    pub fn update<E: Entity>(self, entity: E) -> Self {
        self.push(Write::Update(entity.into_record()))
    }

    pub fn upsert<E: Entity>(self, entity: E) -> Self {
        self.push(Write::Upsert(entity.into_record()))
    }

    pub fn delete<E: Entity>(self, id: Ulid) -> Self {
        self.push(Write::Delete { collection: E::COLLECTION, id })
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Per-entity lock table. Entries live only while some operation holds
/// or waits on them.
pub type ScopeLocks = DashMap<Ulid, Arc<Mutex<()>>>;

/// Holds the per-entity write locks of one mutating operation.
pub struct ScopeGuard {
    guards: Vec<(Ulid, OwnedMutexGuard<()>)>,
    table: Arc<ScopeLocks>,
}

impl ScopeGuard {
    pub(crate) fn new(guards: Vec<(Ulid, OwnedMutexGuard<()>)>, table: Arc<ScopeLocks>) -> Self {
        Self { guards, table }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        for (id, guard) in self.guards.drain(..) {
            drop(guard);
            // A waiter holds its own clone, so a count of one means the
            // table is the last owner.
            self.table.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{collection} record not found: {id}")]
    NotFound { collection: Collection, id: Ulid },
    #[error("{collection} record already exists: {id}")]
    AlreadyExists { collection: Collection, id: Ulid },
    #[error("journal error: {0}")]
    Journal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type Predicate<'a> = &'a (dyn Fn(&Record) -> bool + Send + Sync);

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_by_id(&self, collection: Collection, id: Ulid) -> StoreResult<Option<Record>>;

    /// All records of `collection` matching `predicate`, in id order.
    async fn find(&self, collection: Collection, predicate: Predicate<'_>) -> StoreResult<Vec<Record>>;

    async fn commit(&self, unit: UnitOfWork) -> StoreResult<()>;

    /// Serialize mutating operations touching any of `scopes`. Locks are
    /// taken in sorted order, so overlapping scope sets never deadlock.
    async fn lock_scopes(&self, scopes: &[Ulid]) -> ScopeGuard;

    async fn create(&self, record: Record) -> StoreResult<()> {
        self.commit(UnitOfWork::new().push(Write::Create(record))).await
    }

    async fn create_many(&self, records: Vec<Record>) -> StoreResult<()> {
        let unit = records
            .into_iter()
            .fold(UnitOfWork::new(), |unit, r| unit.push(Write::Create(r)));
        self.commit(unit).await
    }

    async fn update(&self, record: Record) -> StoreResult<()> {
        self.commit(UnitOfWork::new().push(Write::Update(record))).await
    }

    async fn upsert(&self, record: Record) -> StoreResult<()> {
        self.commit(UnitOfWork::new().push(Write::Upsert(record))).await
    }

    async fn delete(&self, collection: Collection, id: Ulid) -> StoreResult<()> {
        self.commit(UnitOfWork::new().push(Write::Delete { collection, id })).await
    }
}
