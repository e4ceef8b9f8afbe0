//! Filtered views and summary counts over a ticket list.
//!
//! Everything here is a pure function of the list and the filter state;
//! callers recompute from scratch whenever either changes.

use std::{collections::BTreeMap, fmt::Write as _, str::FromStr};

use crate::ticket::{Estado, Prioridad, Sede, Ticket, UnknownValue};

/// Site selection. `All` matches every ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiteFilter {
    #[default]
    All,
    Site(Sede),
}

impl FromStr for SiteFilter {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "All" | "all" | "Todas" => Ok(SiteFilter::All),
            other => other.parse().map(SiteFilter::Site),
        }
    }
}

/// Site plus free-text search, combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketFilter {
    pub site: SiteFilter,
    /// Case-insensitive substring looked up in `numero`, `nombre`,
    /// `descripcion` and `categoria`. Empty matches everything.
    pub query: String,
}

impl TicketFilter {
    pub fn new(site: SiteFilter, query: impl Into<String>) -> Self {
        Self {
            site,
            query: query.into(),
        }
    }

    pub fn matches(&self, ticket: &Ticket) -> bool {
        let site = match self.site {
            SiteFilter::All => true,
            SiteFilter::Site(sede) => ticket.sede == sede,
        };
        site && text_matches(ticket, &self.query.to_lowercase())
    }

    /// Matching tickets, in the input order.
    pub fn apply<'a>(&self, tickets: &'a [Ticket]) -> Vec<&'a Ticket> {
        tickets.iter().filter(|t| self.matches(t)).collect()
    }
}

fn text_matches(ticket: &Ticket, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    let numero = ticket.numero.to_string();
    [
        numero.as_str(),
        ticket.nombre.as_str(),
        ticket.descripcion.as_str(),
        ticket.categoria.as_str(),
    ]
    .iter()
    .any(|field| field.to_lowercase().contains(needle))
}

/// Counts over the unfiltered list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub por_sede: BTreeMap<Sede, usize>,
    pub pendientes: usize,
    pub en_proceso: usize,
    pub resueltos: usize,
    /// High priority and not yet resolved.
    pub alta_abiertos: usize,
}

impl Summary {
    pub fn compute(tickets: &[Ticket]) -> Self {
        let mut summary = Summary {
            total: tickets.len(),
            por_sede: Sede::ALL.iter().map(|s| (*s, 0)).collect(),
            ..Default::default()
        };
        for t in tickets {
            *summary.por_sede.entry(t.sede).or_default() += 1;
            match t.estado {
                Estado::Pendiente => summary.pendientes += 1,
                Estado::EnProceso => summary.en_proceso += 1,
                Estado::Resuelto => summary.resueltos += 1,
            }
            if t.prioridad == Prioridad::Alta && t.estado != Estado::Resuelto {
                summary.alta_abiertos += 1;
            }
        }
        summary
    }
}

/// Filtered tickets plus the summary of the whole list.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub tickets: Vec<Ticket>,
    pub summary: Summary,
}

impl DashboardView {
    pub fn compute(tickets: &[Ticket], filter: &TicketFilter) -> Self {
        Self {
            tickets: filter.apply(tickets).into_iter().cloned().collect(),
            summary: Summary::compute(tickets),
        }
    }

    /// Plain-text rendering for the terminal.
    pub fn render(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "total {}  pendientes {}  en proceso {}  resueltos {}  alta abiertos {}",
            s.total, s.pendientes, s.en_proceso, s.resueltos, s.alta_abiertos
        );
        let sites: Vec<String> = s
            .por_sede
            .iter()
            .map(|(sede, n)| format!("{sede} {n}"))
            .collect();
        let _ = writeln!(out, "sedes: {}", sites.join("  "));
        for t in &self.tickets {
            let _ = writeln!(
                out,
                "{:<9} {:<14} {:<9} {:<6} {:<11} {} :: {}",
                t.numero.to_string(),
                t.sede,
                t.categoria,
                t.prioridad,
                t.estado,
                t.nombre,
                t.descripcion
            );
        }
        out
    }
}
