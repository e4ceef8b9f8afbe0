//! Periodic refresh of the ticket list from a running server.
//!
//! Every tick issues a fresh `GET /tickets` in its own task, so a slow
//! response never delays the next one. Each request carries a generation
//! number and the shared [`Snapshot`] only accepts responses newer than the
//! one it already holds.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use url::Url;

use crate::ticket::Ticket;

/// HTTP client for the ticket list endpoint.
#[derive(Clone)]
pub struct TicketsClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl TicketsClient {
    /// `base` is the server root, e.g. `http://127.0.0.1:7777`. A request
    /// still unanswered after `timeout` is abandoned.
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let mut url = Url::parse(base).with_context(|| format!("invalid server url `{base}`"))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        let endpoint = url.join("tickets")?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn fetch(&self) -> Result<Vec<Ticket>> {
        let resp = self
            .http
            .get(self.endpoint.clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

/// Last applied ticket list.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Generation of the request whose response is held; 0 before the first.
    pub generation: u64,
    pub tickets: Vec<Ticket>,
}

impl Snapshot {
    /// Apply the response to request `generation` unless a newer one is
    /// already held. Returns whether the snapshot changed.
    pub fn offer(&mut self, generation: u64, tickets: Vec<Ticket>) -> bool {
        if generation <= self.generation {
            tracing::debug!(generation, held = self.generation, "stale refresh dropped");
            return false;
        }
        self.generation = generation;
        self.tickets = tickets;
        true
    }
}

/// Start polling every `every`. The first request goes out immediately.
/// The loop ends once every receiver is dropped. Give the client a timeout
/// no longer than `every` so stuck requests do not accumulate.
pub fn spawn(
    client: TicketsClient,
    every: Duration,
) -> (watch::Receiver<Snapshot>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(Snapshot::default());
    let tx = Arc::new(tx);
    let client = Arc::new(client);
    let handle = tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut issued = 0u64;
        loop {
            ticker.tick().await;
            if tx.is_closed() {
                break;
            }
            issued += 1;
            let generation = issued;
            let client = client.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                match client.fetch().await {
                    Ok(tickets) => {
                        tx.send_if_modified(|snap| snap.offer(generation, tickets));
                    }
                    Err(e) => tracing::warn!(error = %e, generation, "ticket refresh failed"),
                }
            });
        }
    });
    (rx, handle)
}
