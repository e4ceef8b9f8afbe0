//! Ticket persistence behind a single interface.
//!
//! Two backends implement [`TicketStore`]: [`FileStore`], a durable
//! directory of JSON documents, and [`MemoryStore`], a volatile store for
//! demos and tests. [`open`] picks one from the settings at startup and
//! pairs it with the matching [`Counter`].
//!
//! Both backends accept two id schemes in lookups. An id in the backend's
//! native key format is resolved directly; anything else, or a native-shaped
//! id that names no document, is treated as a legacy id carried over by
//! `import` and matched against the `legacyId` field. A malformed id is
//! never an error, only a miss.

pub mod file;
pub mod memory;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    config::{Settings, StoreBackend},
    sequence::{AtomicCounter, Counter, FileCounter},
    ticket::{Estado, NewTicket, Nota, Ticket},
};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Stored ticket document.
///
/// `_id` and `legacyId` are storage details; [`Record::into_ticket`]
/// turns the record into the public shape with only an `id` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "_id")]
    pub key: String,
    #[serde(rename = "legacyId", default, skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<String>,
    #[serde(flatten)]
    pub ticket: NewTicket,
}

impl Record {
    pub fn into_ticket(self) -> Ticket {
        self.ticket.with_id(self.key)
    }

    /// Whether `id` names this record under the legacy scheme.
    fn has_legacy_id(&self, id: &str) -> bool {
        self.legacy_id.as_deref() == Some(id)
    }
}

/// Storage operations the ticket service relies on.
///
/// Mutations return the record as it is after the update, or `None` when
/// the id does not resolve. `append_note` must never lose a concurrent
/// append; `update_status` is last-write-wins.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Store a new ticket under a freshly assigned key.
    async fn insert(&self, ticket: NewTicket) -> Result<Record>;

    /// Store a ticket carried over from another deployment, keeping its old
    /// id as the legacy key. Returns `None` if that legacy id is present.
    async fn import(&self, legacy_id: &str, ticket: NewTicket) -> Result<Option<Record>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Record>>;

    async fn update_status(&self, id: &str, estado: Estado) -> Result<Option<Record>>;

    async fn append_note(&self, id: &str, nota: Nota) -> Result<Option<Record>>;

    /// Every ticket, newest first.
    async fn list(&self) -> Result<Vec<Record>>;
}

/// Newest `fechaCreacion` first; equal timestamps fall back to the higher
/// ticket number first.
pub(crate) fn sort_newest_first(records: &mut [Record]) {
    records.sort_by(|a, b| {
        b.ticket
            .fecha_creacion
            .cmp(&a.ticket.fecha_creacion)
            .then_with(|| b.ticket.numero.cmp(&a.ticket.numero))
    });
}

/// A store together with the counter that numbers its tickets.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn TicketStore>,
    pub counter: Arc<dyn Counter>,
}

/// Build the backend selected by `STORE_BACKEND`.
pub fn open(cfg: &Settings) -> Result<Backend> {
    match cfg.store_backend {
        StoreBackend::File => {
            let root = cfg
                .store_root
                .clone()
                .ok_or_else(|| anyhow!("STORE_ROOT is required for the file backend"))?;
            let store = FileStore::new(root);
            store.init()?;
            let counter = FileCounter::new(store.counter_path());
            tracing::info!(root = %store.root().display(), "opened file store");
            Ok(Backend {
                store: Arc::new(store),
                counter: Arc::new(counter),
            })
        }
        StoreBackend::Memory => {
            let (store, last) = if cfg.seed_demo {
                MemoryStore::with_demo_data()
            } else {
                (MemoryStore::new(), 0)
            };
            tracing::warn!(
                seeded = cfg.seed_demo,
                "using the in-memory store; tickets are lost when the process exits"
            );
            Ok(Backend {
                store: Arc::new(store),
                counter: Arc::new(AtomicCounter::new(last)),
            })
        }
    }
}
