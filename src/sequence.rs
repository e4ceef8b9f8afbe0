//! Ticket numbering: the `TK-####` label and the counters behind it.

use std::{
    fmt, fs,
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::lockfile::{self, LockGuard};

/// Human-facing ticket number, rendered as `TK-` plus at least four digits.
///
/// Numbers above 9999 widen (`TK-10000`) rather than wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TicketNumber(u64);

impl TicketNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TK-{:04}", self.0)
    }
}

impl FromStr for TicketNumber {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("TK-")
            .ok_or_else(|| anyhow!("ticket number `{s}` lacks the TK- prefix"))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(anyhow!("ticket number `{s}` is not numeric"));
        }
        Ok(Self(digits.parse()?))
    }
}

impl TryFrom<String> for TicketNumber {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TicketNumber> for String {
    fn from(value: TicketNumber) -> Self {
        value.to_string()
    }
}

/// Atomic increment-and-fetch over some backing store.
#[async_trait]
pub trait Counter: Send + Sync {
    /// Increment and return the new value. Concurrent callers never
    /// observe the same value.
    async fn increment(&self) -> Result<u64>;

    /// Raise the counter to at least `floor`. Never lowers it.
    async fn advance_to(&self, floor: u64) -> Result<()>;
}

/// Process-local counter for the in-memory backend.
///
/// Only correct for a single, non-persistent process: the value starts
/// over on every restart.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }
}

#[async_trait]
impl Counter for AtomicCounter {
    async fn increment(&self) -> Result<u64> {
        let prev = self.0.fetch_add(1, Ordering::SeqCst);
        prev.checked_add(1).ok_or_else(|| anyhow!("ticket counter overflow"))
    }

    async fn advance_to(&self, floor: u64) -> Result<()> {
        self.0.fetch_max(floor, Ordering::SeqCst);
        Ok(())
    }
}

/// On-disk form of the counter document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterDoc {
    seq: u64,
}

/// Counter persisted as a small JSON document.
///
/// Every update reads and rewrites the document while holding the
/// `<path>.lock` file exclusively, so handles in other processes (a running
/// server and an `import`) never hand out the same number. The write goes
/// through a temp file plus rename, and a crash never leaves a half-written
/// document behind.
#[derive(Debug, Clone)]
pub struct FileCounter {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileCounter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current value, `0` when the document does not exist yet.
    pub fn current(&self) -> Result<u64> {
        if !self.path.exists() {
            return Ok(0);
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("reading counter {}", self.path.display()))?;
        let doc: CounterDoc = serde_json::from_str(&data)
            .with_context(|| format!("parsing counter {}", self.path.display()))?;
        Ok(doc.seq)
    }

    fn store(&self, seq: u64) -> Result<()> {
        let parent = self
            .path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)?;
        let tmp = tempfile::NamedTempFile::new_in(&parent)?;
        serde_json::to_writer(&tmp, &CounterDoc { seq })?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

#[async_trait]
impl Counter for FileCounter {
    async fn increment(&self) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let _file_lock = LockGuard::acquire(&lockfile::sibling(&self.path))?;
        let next = self
            .current()?
            .checked_add(1)
            .ok_or_else(|| anyhow!("ticket counter overflow"))?;
        self.store(next)?;
        Ok(next)
    }

    async fn advance_to(&self, floor: u64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let _file_lock = LockGuard::acquire(&lockfile::sibling(&self.path))?;
        if self.current()? < floor {
            self.store(floor)?;
        }
        Ok(())
    }
}

/// Issues ticket numbers from whichever counter the backend provides.
#[derive(Clone)]
pub struct SequenceGenerator {
    counter: Arc<dyn Counter>,
}

impl SequenceGenerator {
    pub fn new(counter: Arc<dyn Counter>) -> Self {
        Self { counter }
    }

    /// Next raw sequence value.
    pub async fn next(&self) -> Result<u64> {
        self.counter.increment().await
    }

    pub async fn next_number(&self) -> Result<TicketNumber> {
        Ok(TicketNumber(self.next().await?))
    }

    /// Make sure `numero` is never issued again.
    pub async fn reserve_through(&self, numero: TicketNumber) -> Result<()> {
        self.counter.advance_to(numero.0).await
    }
}
