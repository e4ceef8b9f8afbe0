//! Durable file-backed ticket store.
//!
//! Layout under the store root:
//!
//! ```text
//! tickets/<key>.json          one document per ticket
//! counters/ticketCounter.json ticket number counter
//! log/tickets.ndjson          append-only log of created tickets
//! ```
//!
//! Keys are 32-character hex UUIDs. Writers serialize on `store.lock` in
//! the root, which every process opening the directory honors, and replace
//! documents through a temp file plus rename. A note append or status change
//! is therefore atomic with respect to every other writer, including an
//! `import` running beside the server.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{sort_newest_first, Record, TicketStore};
use crate::{
    lockfile::LockGuard,
    ticket::{Estado, NewTicket, Nota},
};

/// Persistent ticket store rooted at `root`.
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        for d in ["tickets", "counters", "log"] {
            fs::create_dir_all(self.root.join(d))
                .with_context(|| format!("creating {}", self.root.join(d).display()))?;
        }
        Ok(())
    }

    /// Location of the ticket number counter document.
    pub fn counter_path(&self) -> PathBuf {
        self.root.join("counters/ticketCounter.json")
    }

    /// Take the in-process lock, then the cross-process one.
    async fn lock_writes(&self) -> Result<(tokio::sync::MutexGuard<'_, ()>, LockGuard)> {
        let local = self.write_lock.lock().await;
        let file = LockGuard::acquire(&self.root.join("store.lock"))?;
        Ok((local, file))
    }

    fn ticket_path(&self, key: &str) -> PathBuf {
        self.root.join("tickets").join(format!("{key}.json"))
    }

    /// Write a document atomically to its canonical path.
    fn write_record(&self, rec: &Record) -> Result<()> {
        let path = self.ticket_path(&rec.key);
        let parent_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent_dir)?;
        let tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
        serde_json::to_writer(&tmp, rec)?;
        tmp.persist(&path)?;
        Ok(())
    }

    /// Append a created ticket to the newline-delimited log for easy tailing.
    fn append_log(&self, rec: &Record) -> Result<()> {
        let log_path = self.root.join("log/tickets.ndjson");
        let mut log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        serde_json::to_writer(&mut log_file, rec)?;
        log_file.write_all(b"\n")?;
        Ok(())
    }

    fn create(&self, legacy_id: Option<String>, ticket: NewTicket) -> Result<Record> {
        let rec = Record {
            key: Uuid::new_v4().simple().to_string(),
            legacy_id,
            ticket,
        };
        self.write_record(&rec)?;
        if let Err(e) = self.append_log(&rec) {
            tracing::warn!(key = %rec.key, error = %e, "ticket stored but not logged");
        }
        Ok(rec)
    }

    /// Resolve an id under either scheme. A UUID that is not a key here may
    /// still be the legacy id of a ticket imported from another deployment.
    fn locate(&self, id: &str) -> Result<Option<Record>> {
        if let Some(key) = native_key(id) {
            if let Some(rec) = read_record(&self.ticket_path(&key))? {
                return Ok(Some(rec));
            }
        }
        Ok(self.scan()?.into_iter().find(|r| r.has_legacy_id(id)))
    }

    /// Load every ticket document, skipping unreadable files.
    fn scan(&self) -> Result<Vec<Record>> {
        let mut records = vec![];
        for entry in walkdir::WalkDir::new(self.root.join("tickets")).max_depth(1) {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            match read_record(path) {
                Ok(Some(rec)) => records.push(rec),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable ticket")
                }
            }
        }
        Ok(records)
    }

    /// Apply `change` to the record behind `id` and write it back.
    ///
    /// Callers must hold the write lock.
    fn modify(&self, id: &str, change: impl FnOnce(&mut NewTicket)) -> Result<Option<Record>> {
        let Some(mut rec) = self.locate(id)? else {
            return Ok(None);
        };
        change(&mut rec.ticket);
        self.write_record(&rec)?;
        Ok(Some(rec))
    }
}

#[async_trait]
impl TicketStore for FileStore {
    async fn insert(&self, ticket: NewTicket) -> Result<Record> {
        let _guard = self.lock_writes().await?;
        self.create(None, ticket)
    }

    async fn import(&self, legacy_id: &str, ticket: NewTicket) -> Result<Option<Record>> {
        let _guard = self.lock_writes().await?;
        if self.scan()?.iter().any(|r| r.has_legacy_id(legacy_id)) {
            return Ok(None);
        }
        self.create(Some(legacy_id.to_string()), ticket).map(Some)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Record>> {
        self.locate(id)
    }

    async fn update_status(&self, id: &str, estado: Estado) -> Result<Option<Record>> {
        let _guard = self.lock_writes().await?;
        self.modify(id, |t| t.estado = estado)
    }

    async fn append_note(&self, id: &str, nota: Nota) -> Result<Option<Record>> {
        let _guard = self.lock_writes().await?;
        self.modify(id, |t| t.notas.push(nota))
    }

    async fn list(&self) -> Result<Vec<Record>> {
        let mut records = self.scan()?;
        sort_newest_first(&mut records);
        Ok(records)
    }
}

/// Normalize `id` to a native key, or `None` if it is not a UUID.
fn native_key(id: &str) -> Option<String> {
    Uuid::try_parse(id).ok().map(|u| u.simple().to_string())
}

/// Read a ticket document, `None` when the file does not exist.
fn read_record(path: &Path) -> Result<Option<Record>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)?;
    let rec = serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(rec))
}
