//! Command line interface for the help desk. Supports initialization,
//! serving the HTTP API, importing tickets exported from an older
//! deployment, and a polling terminal dashboard.

mod auth;
mod config;
mod dashboard;
mod lockfile;
mod poller;
mod sequence;
mod server;
mod service;
mod storage;
mod ticket;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use config::{LogFormat, Settings, StoreBackend};
use dashboard::{DashboardView, SiteFilter, TicketFilter};
use serde_json::Value;
use server::AppState;
use service::TicketService;
use ticket::Ticket;
use tracing_subscriber::EnvFilter;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "helpdesk",
    author,
    version,
    about = "Help desk ticket service",
    short_flag = 'v',
    long_flag = "version"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the directory tree at `STORE_ROOT`.
    Init,
    /// Launch the HTTP API.
    Serve,
    /// Import tickets exported from another deployment.
    Import {
        /// JSON files holding one ticket or an array of tickets.
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Print every stored ticket with summary counts.
    List,
    /// Poll a running server and print the filtered ticket list.
    Dashboard {
        /// Server root; defaults to `http://BIND_HTTP`.
        #[arg(long)]
        url: Option<String>,
        /// Site to show, or `All`.
        #[arg(long, default_value = "All")]
        site: String,
        /// Case-insensitive text search.
        #[arg(long, default_value = "")]
        search: String,
        /// Refresh interval in seconds; defaults to `POLL_INTERVAL_SECS`.
        #[arg(long)]
        interval: Option<u64>,
        /// Fetch and print once, then exit.
        #[arg(long)]
        once: bool,
    },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    init_tracing(cfg.log_format);
    match cli.command {
        Commands::Init => {
            if cfg.store_backend == StoreBackend::File {
                storage::open(&cfg)?;
            } else {
                tracing::info!("memory backend has nothing to initialize");
            }
        }
        Commands::Serve => {
            let tickets = TicketService::from_backend(storage::open(&cfg)?);
            let state = AppState {
                tickets,
                admin: auth::AdminGate::new(cfg.admin_password.clone(), cfg.secure_cookies),
            };
            let http_addr: SocketAddr = cfg
                .bind_http
                .as_str()
                .parse()
                .with_context(|| format!("invalid BIND_HTTP `{}`", cfg.bind_http))?;
            server::serve_http(http_addr, state, async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutting down");
            })
            .await?;
        }
        Commands::Import { files } => {
            if cfg.store_backend == StoreBackend::Memory {
                bail!("import needs STORE_BACKEND=file; the memory store ends with this command");
            }
            let tickets = TicketService::from_backend(storage::open(&cfg)?);
            let (mut imported, mut skipped) = (0usize, 0usize);
            for f in files {
                let data = fs::read_to_string(&f).with_context(|| format!("reading {f}"))?;
                for legacy in parse_export(&data).with_context(|| format!("parsing {f}"))? {
                    let numero = legacy.numero;
                    match tickets.import_ticket(legacy).await? {
                        Some(_) => imported += 1,
                        None => {
                            tracing::info!(%numero, "already imported");
                            skipped += 1;
                        }
                    }
                }
            }
            println!("imported {imported}, skipped {skipped}");
        }
        Commands::List => {
            let tickets = TicketService::from_backend(storage::open(&cfg)?)
                .list_tickets()
                .await?;
            print!("{}", DashboardView::compute(&tickets, &TicketFilter::default()).render());
        }
        Commands::Dashboard {
            url,
            site,
            search,
            interval,
            once,
        } => {
            let site: SiteFilter = site.parse()?;
            let filter = TicketFilter::new(site, search);
            let base = url.unwrap_or_else(|| format!("http://{}", cfg.bind_http));
            let every = Duration::from_secs(interval.unwrap_or(cfg.poll_interval_secs).max(1));
            let client = poller::TicketsClient::new(&base, every)?;
            if once {
                let tickets = client.fetch().await?;
                print!("{}", DashboardView::compute(&tickets, &filter).render());
                return Ok(());
            }
            tracing::info!(url = %client.endpoint(), every_secs = every.as_secs(), "polling");
            let (mut rx, handle) = poller::spawn(client, every);
            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = &mut shutdown => break,
                }
                let view = DashboardView::compute(&rx.borrow_and_update().tickets, &filter);
                println!("{}", view.render());
            }
            handle.abort();
        }
    }
    Ok(())
}

/// Tickets from an export file: a single object or an array. Numeric ids
/// and the storage `_id` field are accepted as the legacy id.
fn parse_export(data: &str) -> anyhow::Result<Vec<Ticket>> {
    let items = match serde_json::from_str::<Value>(data)? {
        Value::Array(items) => items,
        single => vec![single],
    };
    items
        .into_iter()
        .map(|mut item| {
            if let Some(obj) = item.as_object_mut() {
                let id = obj.remove("id").or_else(|| obj.remove("_id"));
                let id = match id {
                    Some(Value::Number(n)) => Value::String(n.to_string()),
                    Some(other) => other,
                    None => Value::Null,
                };
                obj.insert("id".into(), id);
            }
            Ok(serde_json::from_value(item)?)
        })
        .collect()
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("helpdesk-data");
    let mut content = String::new();
    content.push_str("STORE_BACKEND=file\n");
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str("BIND_HTTP=127.0.0.1:7777\n");
    content.push_str("ADMIN_PASSWORD=\n");
    content.push_str("SECURE_COOKIES=0\n");
    content.push_str("SEED_DEMO=0\n");
    content.push_str(&format!(
        "POLL_INTERVAL_SECS={}\n",
        config::DEFAULT_POLL_INTERVAL_SECS
    ));
    content.push_str("LOG_FORMAT=text\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::clean_env;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::{net::TcpListener, task};

    fn write_env(dir: &TempDir, extra: &str) -> String {
        let env_path = dir.path().join(".env");
        let content = format!(
            "STORE_BACKEND=file\nSTORE_ROOT={}\nBIND_HTTP=127.0.0.1:0\n{}",
            dir.path().join("data").to_str().unwrap(),
            extra
        );
        fs::write(&env_path, content).unwrap();
        env_path.to_str().unwrap().into()
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn export() -> Value {
        json!([
            {
                "id": 1,
                "numero": "TK-0001",
                "nombre": "Juan Pérez",
                "sede": "Norte",
                "categoria": "Hardware",
                "prioridad": "High",
                "estado": "Pending",
                "descripcion": "La impresora del piso 3 no enciende",
                "fechaCreacion": "2024-01-15T10:30:00",
                "notas": []
            },
            {
                "_id": "65a1f0c2e4b0a1b2c3d4e5f6",
                "numero": "TK-0009",
                "nombre": "María García",
                "sede": "Sur",
                "categoria": "Network",
                "prioridad": "Media",
                "estado": "En Proceso",
                "descripcion": "Sin acceso a la VPN",
                "fechaCreacion": "2024-01-16T08:00:00.000Z",
                "notas": [{
                    "id": "n1",
                    "contenido": "Revisando",
                    "fecha": "2024-01-16T09:00:00.000Z"
                }]
            }
        ])
    }

    #[tokio::test]
    async fn init_creates_default_env() {
        let _g = clean_env();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        run(Cli {
            env: env_path.to_string_lossy().into_owned(),
            command: Commands::Init,
        })
        .await
        .unwrap();

        let data = fs::read_to_string(&env_path).unwrap();
        let expected_root = dir.path().join("helpdesk-data");
        assert!(data.contains(&format!("STORE_ROOT={}", expected_root.to_string_lossy())));
        assert!(data.contains("BIND_HTTP=127.0.0.1:7777"));
        assert!(data.contains("POLL_INTERVAL_SECS=30"));
        assert!(expected_root.join("tickets").exists());
        assert!(expected_root.join("counters").exists());
    }

    #[test]
    fn parse_export_accepts_single_and_array() {
        let tickets = parse_export(&export().to_string()).unwrap();
        assert_eq!(tickets.len(), 2);
        assert_eq!(tickets[0].id, "1");
        assert_eq!(tickets[1].id, "65a1f0c2e4b0a1b2c3d4e5f6");
        assert_eq!(tickets[1].notas.len(), 1);

        let single = export()[0].to_string();
        assert_eq!(parse_export(&single).unwrap().len(), 1);
        assert!(parse_export("{\"numero\": \"TK-0001\"}").is_err());
    }

    #[tokio::test]
    async fn import_is_idempotent_and_advances_counter() {
        let _g = clean_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "");
        let export_path = dir.path().join("export.json");
        fs::write(&export_path, export().to_string()).unwrap();
        let import = || Cli {
            env: env_file.clone(),
            command: Commands::Import {
                files: vec![export_path.to_str().unwrap().into()],
            },
        };
        run(import()).await.unwrap();
        run(import()).await.unwrap();

        let cfg = Settings::from_env(&env_file).unwrap();
        let svc = TicketService::from_backend(storage::open(&cfg).unwrap());
        let listed = svc.list_tickets().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(svc.get_ticket("1").await.unwrap().numero.to_string(), "TK-0001");

        let req: ticket::CreateTicketRequest = serde_json::from_value(json!({
            "nombre": "Ana",
            "sede": "Central",
            "categoria": "Software",
            "prioridad": "Baja",
            "descripcion": "Licencia vencida",
        }))
        .unwrap();
        let created = svc.create_ticket(req).await.unwrap();
        assert_eq!(created.numero.to_string(), "TK-0010");
    }

    #[tokio::test]
    async fn import_refuses_memory_backend() {
        let _g = clean_env();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "STORE_BACKEND=memory\nBIND_HTTP=127.0.0.1:0\n").unwrap();
        let err = run(Cli {
            env: env_path.to_str().unwrap().into(),
            command: Commands::Import {
                files: vec!["missing.json".into()],
            },
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("STORE_BACKEND=file"));
    }

    #[tokio::test]
    async fn list_reads_file_store() {
        let _g = clean_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "");
        run(Cli {
            env: env_file.clone(),
            command: Commands::List,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_serve_starts_http_and_dashboard_once_reads_it() {
        let _g = clean_env();
        let dir = TempDir::new().unwrap();
        let port = free_port().await;
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            format!("STORE_BACKEND=memory\nSEED_DEMO=1\nBIND_HTTP=127.0.0.1:{port}\n"),
        )
        .unwrap();
        let env_str = env_path.to_str().unwrap().to_string();

        let handle = task::spawn(run(Cli {
            env: env_str.clone(),
            command: Commands::Serve,
        }));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let url = format!("http://127.0.0.1:{port}/tickets");
        let tickets: Vec<Ticket> = reqwest::get(url).await.unwrap().json().await.unwrap();
        assert_eq!(tickets.len(), 6);

        run(Cli {
            env: env_str,
            command: Commands::Dashboard {
                url: None,
                site: "Norte".into(),
                search: String::new(),
                interval: None,
                once: true,
            },
        })
        .await
        .unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn dashboard_rejects_unknown_site() {
        let _g = clean_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "");
        let result = run(Cli {
            env: env_file,
            command: Commands::Dashboard {
                url: Some("http://127.0.0.1:9".into()),
                site: "Marte".into(),
                search: String::new(),
                interval: None,
                once: true,
            },
        })
        .await;
        assert!(result.is_err());
    }
}
