mod cache;
mod config;
mod db;
mod http;
mod submission;
mod sync;
mod worker;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use cache::{CacheStore, SqliteStorage, TierStorage};
use config::Config;
use db::Database;
use http::{HttpNetwork, Method, Network, Request};
use submission::{SubmitOutcome, Submission, Tipo};
use sync::SyncQueue;
use worker::{Registration, Worker, WorkerMessage, WorkerSettings};

#[derive(Parser, Debug)]
#[command(name = "asistencia")]
#[command(about = "Offline worker for the attendance app: versioned caches and deferred sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/asistencia/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured version and activate it when possible
  Install {
    /// Number of pages still controlled by the previous version
    #[arg(long, default_value_t = 0)]
    clients: usize,
  },
  /// Send a request through the active worker
  Fetch {
    url: Url,
    #[arg(short, long, default_value = "GET")]
    method: Method,
    /// Accept header, e.g. text/html
    #[arg(long)]
    accept: Option<String>,
    /// Request body
    #[arg(long)]
    body: Option<String>,
  },
  /// Post an attendance record to the webhook
  Submit {
    /// ENTRADA or SALIDA
    #[arg(long)]
    tipo: String,
    /// Date as YYYY-MM-DD
    #[arg(long, required_unless_present = "now")]
    fecha: Option<String>,
    /// Time as HH:MM
    #[arg(long, required_unless_present = "now")]
    hora: Option<String>,
    /// Use the current local date and time
    #[arg(long, conflicts_with_all = ["fecha", "hora"])]
    now: bool,
  },
  /// Fire a background sync event
  Sync {
    #[arg(long)]
    tag: Option<String>,
  },
  /// List queued submissions
  Pending,
  /// Drop a queued submission without delivering it
  Purge { id: i64 },
  /// Post a page message (e.g. {"type":"SKIP_WAITING"}) to the incoming version
  Message {
    json: String,
    /// Number of pages still controlled by the previous version
    #[arg(long, default_value_t = 1)]
    clients: usize,
  },
  /// List cache tiers and their entry counts
  Tiers,
}

/// Log to stderr and to a daily file. The guard flushes the file writer on drop.
fn init_tracing() -> WorkerGuard {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let file_appender = tracing_appender::rolling::daily(Config::log_dir(), "asistencia.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(io::stderr))
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .init();

  guard
}

/// Shared handles every command works with.
struct Host {
  settings: WorkerSettings,
  storage: Arc<dyn TierStorage>,
  queue: SyncQueue,
  network: Arc<dyn Network>,
  registration: Registration,
}

impl Host {
  fn open(config: &Config) -> Result<Self> {
    let db = Arc::new(Database::open(&config.database_path()?)?);
    let settings = WorkerSettings::from_config(config)?;
    let storage: Arc<dyn TierStorage> = Arc::new(SqliteStorage::new(Arc::clone(&db)));
    let queue = SyncQueue::new(Arc::clone(&db), config.sync.max_attempts);
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(config.request_timeout())?);
    let registration = Registration::new(db, settings.app_root.as_str());

    let mut host = Self {
      settings,
      storage,
      queue,
      network,
      registration,
    };

    if let Some(version) = host.registration.recorded_version()? {
      let restored = host.worker(host.settings.with_version(&version));
      host.registration.restore(restored);
    }
    Ok(host)
  }

  fn worker(&self, settings: WorkerSettings) -> Worker {
    Worker::new(
      settings,
      Arc::clone(&self.storage),
      self.queue.clone(),
      Arc::clone(&self.network),
    )
  }

  fn active(&self) -> Result<&Worker> {
    self
      .registration
      .active()
      .ok_or_else(|| eyre!("No active worker, run `asistencia install` first"))
  }

  async fn install(&mut self, clients: usize) -> Result<()> {
    let candidate = self.worker(self.settings.clone());
    let outcome = self.registration.update(candidate, clients).await?;
    println!("{}: {:?}", self.settings.version, outcome);
    Ok(())
  }

  async fn fetch(&self, request: Request) -> Result<()> {
    let worker = self.active()?;
    let (response, source) = match self.registration.intercept(&request).await {
      Some(served) => (served.response, served.source.to_string()),
      None => {
        let route = worker.classify(&request);
        info!(route = ?route, url = %request.url, "Not intercepted, sending directly");
        let response = self
          .network
          .fetch(&request)
          .await
          .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;
        (response, "passthrough".to_string())
      }
    };

    println!("{} {} ({})", response.status, response.status_text, source);
    if let Some(content_type) = response.header("content-type") {
      println!("content-type: {}", content_type);
    }
    println!("{}", response.body_text());
    Ok(())
  }

  async fn submit(&self, submission: Submission) -> Result<()> {
    let worker = self.active()?;
    match worker.submit(&submission).await? {
      SubmitOutcome::Delivered { status } => println!("Delivered ({})", status),
      SubmitOutcome::Queued { id } => {
        let pending = worker.queue().pending()?.len();
        println!("Not delivered, queued as #{} ({} pending)", id, pending);
      }
      SubmitOutcome::Rejected { status, body } => {
        return Err(eyre!("Webhook rejected submission ({}): {}", status, body));
      }
    }
    Ok(())
  }

  async fn sync(&self, tag: &str) -> Result<()> {
    match self.active()?.handle_sync(tag).await {
      Some(report) => println!(
        "delivered {}, failed {}, dropped {}, remaining {}",
        report.delivered, report.failed, report.dropped, report.remaining
      ),
      None => println!("No sync registered for tag '{}'", tag),
    }
    Ok(())
  }

  async fn message(&mut self, raw: &str, clients: usize) -> Result<()> {
    let Some(message) = WorkerMessage::parse(raw) else {
      warn!(message = raw, "Ignoring unknown message");
      return Ok(());
    };

    let is_current = self
      .registration
      .active()
      .is_some_and(|w| w.version() == &self.settings.version);
    if !is_current && self.registration.waiting().is_none() {
      // The message, not the install, decides activation
      let candidate = self.worker(self.settings.without_skip_waiting());
      self.registration.update(candidate, clients).await?;
    }

    if self.registration.post_message(message).await? {
      println!("{} activated", self.settings.version);
    } else if let Some(active) = self.registration.active() {
      println!("{} is {}", active.version(), active.state());
    }
    Ok(())
  }

  fn tiers(&self) -> Result<()> {
    let store = match self.registration.active() {
      Some(worker) => worker.store().clone(),
      None => CacheStore::new(Arc::clone(&self.storage), self.settings.version.tier_names()),
    };
    let current = store.tiers().current();

    for name in store.tier_names()? {
      let marker = if current.contains(&name.as_str()) { "*" } else { " " };
      println!("{} {} ({} entries)", marker, name, store.entry_count(&name)?);
    }
    if let Some(worker) = self.registration.active() {
      println!("active: {} (claimed: {})", worker.version(), worker.lifecycle().has_claimed());
    }
    Ok(())
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_tracing();

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let mut host = Host::open(&config)?;

  match args.command {
    Command::Install { clients } => host.install(clients).await?,
    Command::Fetch {
      url,
      method,
      accept,
      body,
    } => {
      let mut request = Request::new(method, url);
      if let Some(accept) = accept {
        request = request.with_header("Accept", accept);
      }
      if let Some(body) = body {
        request = request.with_body(body.into_bytes());
      }
      host.fetch(request).await?;
    }
    Command::Submit {
      tipo,
      fecha,
      hora,
      now,
    } => {
      let submission = if now {
        Submission::now(tipo.parse::<Tipo>()?)
      } else {
        Submission::from_form(
          &tipo,
          fecha.as_deref().unwrap_or_default(),
          hora.as_deref().unwrap_or_default(),
        )?
      };
      host.submit(submission).await?;
    }
    Command::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| config.sync.tag.clone());
      host.sync(&tag).await?;
    }
    Command::Pending => {
      let pending = host.queue.pending()?;
      println!("{}", serde_json::to_string_pretty(&pending)?);
    }
    Command::Purge { id } => {
      if !host.queue.purge(id)? {
        println!("No pending submission #{}", id);
      }
    }
    Command::Message { json, clients } => host.message(&json, clients).await?,
    Command::Tiers => host.tiers()?,
  }

  host.registration.wait_idle().await;
  Ok(())
}
