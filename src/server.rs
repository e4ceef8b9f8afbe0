//! HTTP endpoints for tickets, admin sessions and health checks.

use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, FromRef, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth::{self, AdminGate},
    service::{PatchRequest, TicketError, TicketService},
    ticket::{CreateTicketRequest, MissingFields, Ticket},
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub tickets: TicketService,
    pub admin: AdminGate,
}

impl FromRef<AppState> for TicketService {
    fn from_ref(state: &AppState) -> Self {
        state.tickets.clone()
    }
}

impl FromRef<AppState> for AdminGate {
    fn from_ref(state: &AppState) -> Self {
        state.admin.clone()
    }
}

impl IntoResponse for TicketError {
    fn into_response(self) -> Response {
        let status = match &self {
            TicketError::Validation(_) | TicketError::InvalidOperation => StatusCode::BAD_REQUEST,
            TicketError::NotFound => StatusCode::NOT_FOUND,
            TicketError::StorageUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

/// Routes served by [`serve_http`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/tickets", get(list_tickets).post(create_ticket))
        .route("/tickets/:id", get(get_ticket).patch(patch_ticket))
        .route(
            "/auth",
            get(auth::session).post(auth::login).delete(auth::logout),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server and run until `shutdown` resolves.
pub async fn serve_http(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "http listening");
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Health check endpoint.
async fn healthz() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

/// `GET /tickets`: every ticket, newest first.
async fn list_tickets(
    State(tickets): State<TicketService>,
) -> Result<Json<Vec<Ticket>>, TicketError> {
    Ok(Json(tickets.list_tickets().await?))
}

/// `POST /tickets`. An unreadable body is the same rejection as a missing
/// field.
async fn create_ticket(
    State(tickets): State<TicketService>,
    payload: Result<Json<CreateTicketRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Ticket>), TicketError> {
    let Json(req) = payload.map_err(|e| {
        tracing::debug!(error = %e, "rejected ticket body");
        TicketError::Validation(MissingFields.to_string())
    })?;
    let ticket = tickets.create_ticket(req).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// `GET /tickets/{id}`
async fn get_ticket(
    State(tickets): State<TicketService>,
    Path(id): Path<String>,
) -> Result<Json<Ticket>, TicketError> {
    Ok(Json(tickets.get_ticket(&id).await?))
}

/// `PATCH /tickets/{id}` with `{"estado": ...}` or `{"nota": ...}`.
async fn patch_ticket(
    State(tickets): State<TicketService>,
    Path(id): Path<String>,
    payload: Result<Json<PatchRequest>, JsonRejection>,
) -> Result<Json<Ticket>, TicketError> {
    let Json(req) = payload.map_err(|e| {
        tracing::debug!(error = %e, "rejected patch body");
        TicketError::InvalidOperation
    })?;
    Ok(Json(tickets.patch_ticket(&id, req).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sequence::AtomicCounter,
        storage::{FileStore, MemoryStore},
        ticket::Estado,
    };
    use reqwest::{header, StatusCode as HttpStatus};
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::task;

    fn memory_state(password: Option<&str>) -> AppState {
        AppState {
            tickets: TicketService::new(
                Arc::new(MemoryStore::new()),
                Arc::new(AtomicCounter::default()),
            ),
            admin: AdminGate::new(password.map(String::from), false),
        }
    }

    /// Bind an ephemeral port and serve `state` on it.
    async fn spawn(state: AppState) -> (String, task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = axum::serve(listener, router(state).into_make_service());
        let handle = task::spawn(async move {
            server.await.unwrap();
        });
        (format!("http://{}", addr), handle)
    }

    fn new_ticket(sede: &str) -> Value {
        json!({
            "nombre": "Juan Pérez",
            "sede": sede,
            "categoria": "Hardware",
            "prioridad": "Alta",
            "descripcion": "La impresora no enciende",
        })
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (base, handle) = spawn(memory_state(None)).await;
        let body: Health = reqwest::get(format!("{base}/healthz"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.status, "ok");
        handle.abort();
    }

    #[tokio::test]
    async fn create_get_and_list() {
        let (base, handle) = spawn(memory_state(None)).await;
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base}/tickets"))
            .json(&new_ticket("Norte"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), HttpStatus::CREATED);
        let created: Value = resp.json().await.unwrap();
        assert_eq!(created["numero"], "TK-0001");
        assert_eq!(created["estado"], "Pendiente");
        assert_eq!(created["notas"], json!([]));
        assert!(created.get("_id").is_none());
        let id = created["id"].as_str().unwrap().to_string();

        let fetched: Value = client
            .get(format!("{base}/tickets/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(fetched, created);

        let listed: Vec<Value> = client
            .get(format!("{base}/tickets"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["id"], created["id"]);
        handle.abort();
    }

    #[tokio::test]
    async fn missing_field_is_400_and_nothing_stored() {
        let (base, handle) = spawn(memory_state(None)).await;
        let client = reqwest::Client::new();
        let mut body = new_ticket("Norte");
        body.as_object_mut().unwrap().remove("sede");
        let resp = client
            .post(format!("{base}/tickets"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), HttpStatus::BAD_REQUEST);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "all fields are required");

        let garbage = client
            .post(format!("{base}/tickets"))
            .header(header::CONTENT_TYPE, "application/json")
            .body("{nope")
            .send()
            .await
            .unwrap();
        assert_eq!(garbage.status(), HttpStatus::BAD_REQUEST);

        let listed: Vec<Value> = client
            .get(format!("{base}/tickets"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(listed.is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn unknown_ticket_is_404() {
        let (base, handle) = spawn(memory_state(None)).await;
        let client = reqwest::Client::new();
        let resp = client.get(format!("{base}/tickets/999")).send().await.unwrap();
        assert_eq!(resp.status(), HttpStatus::NOT_FOUND);
        let resp = client
            .patch(format!("{base}/tickets/999"))
            .json(&json!({ "estado": "Resuelto" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), HttpStatus::NOT_FOUND);
        handle.abort();
    }

    #[tokio::test]
    async fn patch_status_and_note() {
        let (base, handle) = spawn(memory_state(None)).await;
        let client = reqwest::Client::new();
        let created: Value = client
            .post(format!("{base}/tickets"))
            .json(&new_ticket("Sur"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let url = format!("{base}/tickets/{}", created["id"].as_str().unwrap());

        let updated: Value = client
            .patch(&url)
            .json(&json!({ "estado": "En Proceso" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated["estado"], "En Proceso");

        let noted: Value = client
            .patch(&url)
            .json(&json!({ "nota": "Se revisó el cableado" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(noted["notas"][0]["contenido"], "Se revisó el cableado");
        assert_eq!(noted["estado"], "En Proceso");

        let empty = client.patch(&url).json(&json!({})).send().await.unwrap();
        assert_eq!(empty.status(), HttpStatus::BAD_REQUEST);

        let bad_status = client
            .patch(&url)
            .json(&json!({ "estado": "Archivado" }))
            .send()
            .await
            .unwrap();
        assert_eq!(bad_status.status(), HttpStatus::BAD_REQUEST);
        handle.abort();
    }

    #[tokio::test]
    async fn file_backed_server_keeps_tickets() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.init().unwrap();
        let counter = crate::sequence::FileCounter::new(store.counter_path());
        let state = AppState {
            tickets: TicketService::new(Arc::new(store.clone()), Arc::new(counter)),
            admin: AdminGate::new(None, false),
        };
        let (base, handle) = spawn(state).await;
        let client = reqwest::Client::new();
        let created: Value = client
            .post(format!("{base}/tickets"))
            .json(&new_ticket("Central"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        handle.abort();

        let id = created["id"].as_str().unwrap();
        let rec = crate::storage::TicketStore::find_by_id(&store, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.ticket.estado, Estado::Pendiente);
        assert_eq!(rec.ticket.numero.to_string(), "TK-0001");
    }

    #[tokio::test]
    async fn auth_round_trip() {
        let (base, handle) = spawn(memory_state(Some("clave"))).await;
        let client = reqwest::Client::new();
        let denied = client
            .post(format!("{base}/auth"))
            .json(&json!({ "password": "mala" }))
            .send()
            .await
            .unwrap();
        assert_eq!(denied.status(), HttpStatus::UNAUTHORIZED);

        let ok = client
            .post(format!("{base}/auth"))
            .json(&json!({ "password": "clave" }))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), HttpStatus::OK);
        let cookie = ok
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=86400"));
        let pair = cookie.split(';').next().unwrap().to_string();

        let status: auth::SessionStatus = client
            .get(format!("{base}/auth"))
            .header(header::COOKIE, &pair)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(status.authenticated);

        let out = client
            .delete(format!("{base}/auth"))
            .header(header::COOKIE, &pair)
            .send()
            .await
            .unwrap();
        assert!(out
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("Max-Age=0"));

        let status: auth::SessionStatus = client
            .get(format!("{base}/auth"))
            .header(header::COOKIE, &pair)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!status.authenticated);
        handle.abort();
    }

    #[tokio::test]
    async fn auth_without_password_is_500() {
        let (base, handle) = spawn(memory_state(None)).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/auth"))
            .json(&json!({ "password": "x" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), HttpStatus::INTERNAL_SERVER_ERROR);
        handle.abort();
    }

    #[tokio::test]
    async fn serve_http_bind_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // binding to the same address should error because it's already taken
        assert!(serve_http(addr, memory_state(None), std::future::pending())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn serve_http_shuts_down_gracefully() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            serve_http(addr, memory_state(None), async move {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
        });
        let url = format!("http://{}/healthz", addr);
        let mut attempts = 0;
        loop {
            match reqwest::get(&url).await {
                Ok(resp) => {
                    assert!(resp.status().is_success());
                    break;
                }
                Err(err) => {
                    attempts += 1;
                    assert!(attempts < 50, "health endpoint never came up: {err:?}");
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            }
        }
        let _ = shutdown_tx.send(());
        handle.await.unwrap();
    }
}
