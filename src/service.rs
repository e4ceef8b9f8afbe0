//! Ticket lifecycle: validation, numbering and the two update kinds.
//!
//! This is the only layer the HTTP handlers and the CLI talk to. Storage
//! failures are logged here with their detail and surfaced to callers as
//! an opaque [`TicketError::StorageUnavailable`].

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    sequence::{Counter, SequenceGenerator},
    storage::{Backend, TicketStore},
    ticket::{CreateTicketRequest, Estado, Nota, Ticket},
};

#[derive(Debug, Error)]
pub enum TicketError {
    /// Creation input incomplete, or an enumerated value out of range.
    #[error("{0}")]
    Validation(String),
    #[error("ticket not found")]
    NotFound,
    /// Patch carried neither `estado` nor `nota`.
    #[error("invalid operation: expected `estado` or `nota`")]
    InvalidOperation,
    #[error("storage unavailable")]
    StorageUnavailable(#[source] anyhow::Error),
}

pub type TicketResult<T> = Result<T, TicketError>;

fn storage_error(err: anyhow::Error) -> TicketError {
    tracing::error!(error = %format!("{err:#}"), "storage operation failed");
    TicketError::StorageUnavailable(err)
}

/// Body of `PATCH /tickets/{id}`. Unrecognized keys are ignored; empty
/// strings count as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatchRequest {
    pub estado: Option<String>,
    pub nota: Option<String>,
}

/// The single change a patch resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum TicketUpdate {
    Status(Estado),
    Note(String),
}

impl PatchRequest {
    /// Resolve to exactly one update. A body carrying both keys applies the
    /// status change and drops the note.
    pub fn into_update(self) -> TicketResult<TicketUpdate> {
        let estado = self.estado.filter(|s| !s.trim().is_empty());
        let nota = self.nota.filter(|s| !s.trim().is_empty());
        match (estado, nota) {
            (Some(estado), nota) => {
                if nota.is_some() {
                    tracing::warn!("patch carries both `estado` and `nota`; applying `estado`");
                }
                estado
                    .parse::<Estado>()
                    .map(TicketUpdate::Status)
                    .map_err(|e| TicketError::Validation(e.to_string()))
            }
            (None, Some(nota)) => Ok(TicketUpdate::Note(nota)),
            (None, None) => Err(TicketError::InvalidOperation),
        }
    }
}

/// Entry point for every ticket operation.
#[derive(Clone)]
pub struct TicketService {
    store: Arc<dyn TicketStore>,
    sequence: SequenceGenerator,
}

impl TicketService {
    pub fn new(store: Arc<dyn TicketStore>, counter: Arc<dyn Counter>) -> Self {
        Self {
            store,
            sequence: SequenceGenerator::new(counter),
        }
    }

    pub fn from_backend(backend: Backend) -> Self {
        Self::new(backend.store, backend.counter)
    }

    /// Every ticket, newest first. Filtering is the client's job.
    pub async fn list_tickets(&self) -> TicketResult<Vec<Ticket>> {
        let records = self.store.list().await.map_err(storage_error)?;
        Ok(records.into_iter().map(|r| r.into_ticket()).collect())
    }

    /// Validate, number and persist a new ticket. Nothing is stored and no
    /// number is consumed when validation fails.
    pub async fn create_ticket(&self, req: CreateTicketRequest) -> TicketResult<Ticket> {
        let input = req
            .validate()
            .map_err(|e| TicketError::Validation(e.to_string()))?;
        let numero = self.sequence.next_number().await.map_err(storage_error)?;
        let ticket = input.into_new_ticket(numero, Utc::now());
        let rec = self.store.insert(ticket).await.map_err(storage_error)?;
        tracing::info!(
            id = %rec.key,
            numero = %rec.ticket.numero,
            sede = %rec.ticket.sede,
            "ticket created"
        );
        Ok(rec.into_ticket())
    }

    pub async fn get_ticket(&self, id: &str) -> TicketResult<Ticket> {
        self.store
            .find_by_id(id)
            .await
            .map_err(storage_error)?
            .map(|r| r.into_ticket())
            .ok_or(TicketError::NotFound)
    }

    /// Apply a status change or append a note.
    pub async fn patch_ticket(&self, id: &str, req: PatchRequest) -> TicketResult<Ticket> {
        let rec = match req.into_update()? {
            TicketUpdate::Status(estado) => self.store.update_status(id, estado).await,
            TicketUpdate::Note(contenido) => self.store.append_note(id, Nota::new(contenido)).await,
        }
        .map_err(storage_error)?
        .ok_or(TicketError::NotFound)?;
        tracing::info!(
            id = %rec.key,
            numero = %rec.ticket.numero,
            estado = %rec.ticket.estado,
            notas = rec.ticket.notas.len(),
            "ticket updated"
        );
        Ok(rec.into_ticket())
    }

    /// Store a ticket exported from another deployment under a new key,
    /// keeping its id as the legacy key. Returns `None` when it was already
    /// imported. Its number is reserved so it is never issued again.
    pub async fn import_ticket(&self, legacy: Ticket) -> TicketResult<Option<Ticket>> {
        let (legacy_id, ticket) = legacy.into_parts();
        if legacy_id.trim().is_empty() {
            return Err(TicketError::Validation("imported ticket has no id".into()));
        }
        self.sequence
            .reserve_through(ticket.numero)
            .await
            .map_err(storage_error)?;
        let rec = self
            .store
            .import(&legacy_id, ticket)
            .await
            .map_err(storage_error)?;
        Ok(rec.map(|r| r.into_ticket()))
    }
}
