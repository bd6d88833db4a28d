mod cache;
mod clients;
mod config;
mod event;
mod fallback;
mod logging;
mod net;
mod notify;
mod script;
mod worker;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::cache::{CacheStore, SqliteStore};
use crate::clients::{ClientKind, ClientRegistry};
use crate::event::EventLoop;
use crate::net::{HttpNetwork, Network, Request};
use crate::notify::NotificationCenter;
use crate::worker::{Interception, ServiceWorker};

#[derive(Parser, Debug)]
#[command(name = "route80")]
#[command(about = "Offline caching worker for the Route 80 transit tracker")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/route80/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Request a URL through the worker
  Fetch {
    url: Url,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    #[arg(long, default_value = "GET")]
    method: String,
  },
  /// Refresh the feed endpoints
  Sync {
    /// Sync task tag (default: from config)
    #[arg(long)]
    tag: Option<String>,
  },
  /// Show a notification for a push payload
  Push {
    /// JSON payload, e.g. '{"title": "Bus Arriving"}'
    #[arg(long)]
    payload: Option<String>,
  },
  /// List cache generations and their entries
  Caches,
  /// Replay newline-delimited JSON events from a file or stdin
  Replay { file: Option<PathBuf> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose)?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let store = Arc::new(SqliteStore::open(&config.database_path()?)?);

  let network: Arc<dyn Network> = Arc::new(HttpNetwork::new()?);
  let clients = Arc::new(ClientRegistry::new());
  let notifications = Arc::new(NotificationCenter::new());
  let scope = config.app.scope_url()?;
  let sync_tag = config.sync.tag.clone();

  let worker = Arc::new(ServiceWorker::new(
    config,
    store.clone(),
    network.clone(),
    clients.clone(),
    notifications,
  )?);

  match args.command {
    Command::Fetch {
      url,
      navigate,
      method,
    } => {
      let _app = clients.connect(scope, ClientKind::Window)?;
      boot(&worker).await;

      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      }
      .with_method(&method);

      let (response, source) = match worker.fetch(&request).await? {
        Interception::Respond(served) => (served.response, served.source.to_string()),
        Interception::Passthrough => (network.fetch(&request).await?, "platform".to_string()),
      };

      eprintln!("{} from {}", response.status, source);
      std::io::stdout().write_all(&response.body)?;
    }
    Command::Sync { tag } => {
      let (_, mut inbox) = clients.connect(scope, ClientKind::Window)?;
      boot(&worker).await;

      let tag = tag.unwrap_or(sync_tag);
      match worker.sync(&tag).await? {
        None => println!("sync tag '{}' ignored", tag),
        Some(report) => {
          for url in &report.synced {
            println!("synced {}", url);
          }
          for url in &report.failed {
            println!("failed {}", url);
          }
        }
      }
      while let Ok(message) = inbox.try_recv() {
        println!("{}", serde_json::to_string(&message)?);
      }
    }
    Command::Push { payload } => {
      let shown = worker.push(payload.as_deref().map(str::as_bytes)).await?;
      println!("{}", serde_json::to_string_pretty(&shown)?);
    }
    Command::Replay { file } => {
      let mut replay = script::Replay::new(EventLoop::new(worker), clients, sync_tag);
      let mut stdout = std::io::stdout();
      match file {
        Some(path) => {
          let file = std::fs::File::open(&path)
            .map_err(|e| eyre!("Failed to open {}: {}", path.display(), e))?;
          replay.run(BufReader::new(file), &mut stdout).await?;
        }
        None => replay.run(std::io::stdin().lock(), &mut stdout).await?,
      }
    }
    Command::Caches => list_caches(store.as_ref())?,
  }

  Ok(())
}

/// Bring the worker up; if that fails requests simply pass through.
async fn boot(worker: &ServiceWorker<SqliteStore>) {
  if let Err(e) = worker.boot().await {
    warn!(error = %e, "worker did not activate");
    eprintln!("worker not active: {:#}", e);
  }
}

fn list_caches(store: &SqliteStore) -> Result<()> {
  for name in store.bucket_names()? {
    let keys = store.keys(&name)?;
    println!("{} ({} entries)", name, keys.len());
    for key in keys {
      println!("  {}", key);
    }
  }
  Ok(())
}
