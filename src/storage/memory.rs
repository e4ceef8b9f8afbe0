//! Volatile in-process ticket store for demos and tests.
//!
//! Each instance owns its data; nothing is shared between instances, so
//! tests get isolated state by constructing a fresh store. Keys are decimal
//! integers rendered as strings (`"1"`, `"2"`, ...).

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{sort_newest_first, Record, TicketStore};
use crate::{
    sequence::TicketNumber,
    ticket::{timestamp, Categoria, Estado, NewTicket, Nota, Prioridad, Sede},
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<Record>>,
    next_key: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the six demo tickets, plus the last ticket number
    /// used so the counter can continue from it.
    pub fn with_demo_data() -> (Self, u64) {
        let records = demo_records();
        let last = records.len() as u64;
        let store = Self {
            records: RwLock::new(records),
            next_key: AtomicU64::new(last),
        };
        (store, last)
    }

    fn next_key(&self) -> String {
        (self.next_key.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

/// Index of the record behind `id`. Integer ids are matched against keys,
/// anything else against legacy ids.
fn position(records: &[Record], id: &str) -> Option<usize> {
    let native = id.parse::<u64>().ok().and_then(|n| {
        let key = n.to_string();
        records.iter().position(|r| r.key == key)
    });
    native.or_else(|| records.iter().position(|r| r.has_legacy_id(id)))
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn insert(&self, ticket: NewTicket) -> Result<Record> {
        let rec = Record {
            key: self.next_key(),
            legacy_id: None,
            ticket,
        };
        self.records.write().await.push(rec.clone());
        Ok(rec)
    }

    async fn import(&self, legacy_id: &str, ticket: NewTicket) -> Result<Option<Record>> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.has_legacy_id(legacy_id)) {
            return Ok(None);
        }
        let rec = Record {
            key: self.next_key(),
            legacy_id: Some(legacy_id.to_string()),
            ticket,
        };
        records.push(rec.clone());
        Ok(Some(rec))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Record>> {
        let records = self.records.read().await;
        Ok(position(&records, id).map(|i| records[i].clone()))
    }

    async fn update_status(&self, id: &str, estado: Estado) -> Result<Option<Record>> {
        let mut records = self.records.write().await;
        Ok(position(&records, id).map(|i| {
            records[i].ticket.estado = estado;
            records[i].clone()
        }))
    }

    async fn append_note(&self, id: &str, nota: Nota) -> Result<Option<Record>> {
        let mut records = self.records.write().await;
        Ok(position(&records, id).map(|i| {
            records[i].ticket.notas.push(nota);
            records[i].clone()
        }))
    }

    async fn list(&self) -> Result<Vec<Record>> {
        let mut records = self.records.read().await.clone();
        sort_newest_first(&mut records);
        Ok(records)
    }
}

struct Demo {
    nombre: &'static str,
    sede: Sede,
    categoria: Categoria,
    prioridad: Prioridad,
    estado: Estado,
    descripcion: &'static str,
    creado: &'static str,
    nota: Option<(&'static str, &'static str, &'static str)>,
}

fn demo_records() -> Vec<Record> {
    let demos = [
        Demo {
            nombre: "Juan Pérez",
            sede: Sede::Norte,
            categoria: Categoria::Hardware,
            prioridad: Prioridad::Alta,
            estado: Estado::Pendiente,
            descripcion: "La impresora del piso 3 no enciende después de un corte de luz.",
            creado: "2026-01-18T10:30:00",
            nota: None,
        },
        Demo {
            nombre: "María García",
            sede: Sede::Sur,
            categoria: Categoria::Software,
            prioridad: Prioridad::Media,
            estado: Estado::EnProceso,
            descripcion: "Error al abrir Excel, muestra mensaje de licencia expirada.",
            creado: "2026-01-17T14:15:00",
            nota: Some((
                "n1",
                "Se verificó la licencia, requiere renovación.",
                "2026-01-17T16:00:00",
            )),
        },
        Demo {
            nombre: "Carlos López",
            sede: Sede::Central,
            categoria: Categoria::Redes,
            prioridad: Prioridad::Alta,
            estado: Estado::Pendiente,
            descripcion: "Sin conexión a internet en toda el área de contabilidad.",
            creado: "2026-01-19T08:00:00",
            nota: None,
        },
        Demo {
            nombre: "Ana Martínez",
            sede: Sede::Administrativa,
            categoria: Categoria::Accesos,
            prioridad: Prioridad::Baja,
            estado: Estado::Resuelto,
            descripcion: "Solicito acceso al sistema de nóminas para el nuevo empleado.",
            creado: "2026-01-15T11:45:00",
            nota: Some((
                "n2",
                "Acceso otorgado y credenciales enviadas por correo.",
                "2026-01-15T15:30:00",
            )),
        },
        Demo {
            nombre: "Roberto Sánchez",
            sede: Sede::Norte,
            categoria: Categoria::Software,
            prioridad: Prioridad::Media,
            estado: Estado::Pendiente,
            descripcion: "El sistema ERP se congela al generar reportes mensuales.",
            creado: "2026-01-19T09:20:00",
            nota: None,
        },
        Demo {
            nombre: "Laura Torres",
            sede: Sede::Sur,
            categoria: Categoria::Hardware,
            prioridad: Prioridad::Baja,
            estado: Estado::EnProceso,
            descripcion: "Teclado con teclas que no responden correctamente.",
            creado: "2026-01-16T13:00:00",
            nota: Some((
                "n3",
                "Se ordenó teclado de reemplazo, llegará en 2 días.",
                "2026-01-17T10:00:00",
            )),
        },
    ];
    demos
        .into_iter()
        .zip(1u64..)
        .map(|(d, n)| Record {
            key: n.to_string(),
            legacy_id: None,
            ticket: NewTicket {
                numero: TicketNumber::new(n),
                nombre: d.nombre.into(),
                sede: d.sede,
                categoria: d.categoria,
                prioridad: d.prioridad,
                estado: d.estado,
                descripcion: d.descripcion.into(),
                fecha_creacion: demo_time(d.creado),
                notas: d
                    .nota
                    .map(|(id, contenido, fecha)| Nota {
                        id: id.into(),
                        contenido: contenido.into(),
                        fecha: demo_time(fecha),
                    })
                    .into_iter()
                    .collect(),
            },
        })
        .collect()
}

fn demo_time(raw: &str) -> chrono::DateTime<chrono::Utc> {
    timestamp::parse(raw).unwrap_or_default()
}
