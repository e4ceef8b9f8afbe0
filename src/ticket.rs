//! Ticket model shared by storage, the HTTP API and the dashboard.
//!
//! Field names on the wire are the ones the help-desk front end already
//! speaks (`numero`, `sede`, `fechaCreacion`, ...). Enumerated values are
//! serialized with their Spanish labels; the English names are accepted on
//! input so older clients and hand-written requests keep working.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::sequence::TicketNumber;

/// A value outside one of the closed ticket enumerations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value `{value}` (expected one of: {expected})")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
    pub expected: String,
}

/// Declares a closed enumeration with a canonical wire label and optional
/// input aliases.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $($(#[$vmeta:meta])* $variant:ident => $label:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "&'static str")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Every member in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Canonical wire label.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label $(| $alias)* => Ok($name::$variant),)+
                    _ => Err(UnknownValue {
                        kind: $kind,
                        value: s.to_string(),
                        expected: $name::ALL
                            .iter()
                            .map(|v| v.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownValue;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for &'static str {
            fn from(value: $name) -> Self {
                value.as_str()
            }
        }
    };
}

wire_enum! {
    /// Site the request comes from.
    Sede ("sede") {
        Norte => "Norte",
        Sur => "Sur",
        Central => "Central",
        Administrativa => "Administrativa",
    }
}

wire_enum! {
    /// Problem area.
    Categoria ("categoria") {
        Hardware => "Hardware",
        Software => "Software",
        Redes => "Redes" | "Network",
        Accesos => "Accesos" | "Access",
    }
}

wire_enum! {
    Prioridad ("prioridad") {
        Baja => "Baja" | "Low",
        Media => "Media" | "Medium",
        Alta => "Alta" | "High",
    }
}

wire_enum! {
    /// Workflow status. Any status may be set from any other.
    Estado ("estado") {
        Pendiente => "Pendiente" | "Pending",
        EnProceso => "En Proceso" | "In-Progress",
        Resuelto => "Resuelto" | "Resolved",
    }
}

impl Default for Prioridad {
    /// Pre-selected value for drafts. The API never applies it.
    fn default() -> Self {
        Prioridad::Media
    }
}

/// ISO-8601 timestamps as produced by JavaScript's `toISOString`.
///
/// Deserialization also accepts zone-less timestamps
/// (`2026-01-18T10:30:00`), which are read as UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(de::Error::custom)
    }

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Ok(ts.with_timezone(&Utc)),
            Err(_) => {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc())
            }
        }
    }
}

/// Technical note appended by an administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nota {
    /// Time-ordered token, unique within its ticket.
    pub id: String,
    pub contenido: String,
    #[serde(with = "timestamp")]
    pub fecha: DateTime<Utc>,
}

impl Nota {
    /// Build a note stamped with the current time.
    pub fn new(contenido: impl Into<String>) -> Self {
        Self {
            id: format!("n{}", Ulid::new()),
            contenido: contenido.into(),
            fecha: Utc::now(),
        }
    }
}

/// A ticket before the store has assigned it a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTicket {
    pub numero: TicketNumber,
    pub nombre: String,
    pub sede: Sede,
    pub categoria: Categoria,
    pub prioridad: Prioridad,
    pub estado: Estado,
    pub descripcion: String,
    #[serde(with = "timestamp")]
    pub fecha_creacion: DateTime<Utc>,
    #[serde(default)]
    pub notas: Vec<Nota>,
}

impl NewTicket {
    /// Attach the public id, producing the transport shape.
    pub fn with_id(self, id: String) -> Ticket {
        Ticket {
            id,
            numero: self.numero,
            nombre: self.nombre,
            sede: self.sede,
            categoria: self.categoria,
            prioridad: self.prioridad,
            estado: self.estado,
            descripcion: self.descripcion,
            fecha_creacion: self.fecha_creacion,
            notas: self.notas,
        }
    }
}

/// Ticket as returned to clients.
///
/// ```json
/// {
///   "id": "7b1c0e6f2d5a4c3b9a8e1f0d2c4b6a88",
///   "numero": "TK-0007",
///   "nombre": "Juan Pérez",
///   "sede": "Norte",
///   "categoria": "Hardware",
///   "prioridad": "Alta",
///   "estado": "Pendiente",
///   "descripcion": "La impresora no enciende",
///   "fechaCreacion": "2026-01-18T10:30:00.000Z",
///   "notas": []
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub numero: TicketNumber,
    pub nombre: String,
    pub sede: Sede,
    pub categoria: Categoria,
    pub prioridad: Prioridad,
    pub estado: Estado,
    pub descripcion: String,
    #[serde(with = "timestamp")]
    pub fecha_creacion: DateTime<Utc>,
    #[serde(default)]
    pub notas: Vec<Nota>,
}

impl Ticket {
    /// Split into the public id and the keyless body.
    pub fn into_parts(self) -> (String, NewTicket) {
        (
            self.id,
            NewTicket {
                numero: self.numero,
                nombre: self.nombre,
                sede: self.sede,
                categoria: self.categoria,
                prioridad: self.prioridad,
                estado: self.estado,
                descripcion: self.descripcion,
                fecha_creacion: self.fecha_creacion,
                notas: self.notas,
            },
        )
    }
}

/// Rejection for an incomplete or out-of-range creation request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("all fields are required")]
pub struct MissingFields;

/// Body of `POST /tickets`. Every field is optional here so that a
/// missing or unknown value becomes one aggregate rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTicketRequest {
    pub nombre: Option<String>,
    pub sede: Option<String>,
    pub categoria: Option<String>,
    pub prioridad: Option<String>,
    pub descripcion: Option<String>,
}

/// A creation request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketInput {
    pub nombre: String,
    pub sede: Sede,
    pub categoria: Categoria,
    pub prioridad: Prioridad,
    pub descripcion: String,
}

impl CreateTicketRequest {
    pub fn validate(self) -> Result<TicketInput, MissingFields> {
        Ok(TicketInput {
            nombre: required(self.nombre)?,
            sede: member(self.sede)?,
            categoria: member(self.categoria)?,
            prioridad: member(self.prioridad)?,
            descripcion: required(self.descripcion)?,
        })
    }
}

impl TicketInput {
    /// Stamp a validated request with its number and creation time.
    pub fn into_new_ticket(self, numero: TicketNumber, now: DateTime<Utc>) -> NewTicket {
        NewTicket {
            numero,
            nombre: self.nombre,
            sede: self.sede,
            categoria: self.categoria,
            prioridad: self.prioridad,
            estado: Estado::Pendiente,
            descripcion: self.descripcion,
            fecha_creacion: now,
            notas: Vec::new(),
        }
    }
}

fn required(value: Option<String>) -> Result<String, MissingFields> {
    value.filter(|v| !v.trim().is_empty()).ok_or(MissingFields)
}

fn member<T: FromStr>(value: Option<String>) -> Result<T, MissingFields> {
    required(value)?.parse().map_err(|_| MissingFields)
}
