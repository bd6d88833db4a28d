//! Test doubles shared by the unit tests.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::SqliteStore;
use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::net::{Network, Request, Response};
use crate::notify::NotificationCenter;
use crate::worker::ServiceWorker;

/// Scripted network: per-URL replies, an offline switch and a call log.
#[derive(Default)]
pub struct MockNetwork {
  replies: Mutex<HashMap<String, Response>>,
  unreachable: Mutex<Vec<String>>,
  offline: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &Url, response: Response) {
    self
      .replies
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  /// Make one URL fail as if its host could not be reached.
  pub fn fail(&self, url: &Url) {
    self.unreachable.lock().unwrap().push(url.to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

impl Network for MockNetwork {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    Box::pin(async move {
      let url = request.url.to_string();
      self.calls.lock().unwrap().push(url.clone());

      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("network unreachable: {}", url));
      }
      if self.unreachable.lock().unwrap().contains(&url) {
        return Err(eyre!("dns error: {}", url));
      }

      Ok(
        self
          .replies
          .lock()
          .unwrap()
          .get(&url)
          .cloned()
          .unwrap_or_else(|| Response::new(404, "text/plain", "Not Found")),
      )
    })
  }
}

/// Everything a worker test needs to poke at.
pub struct Harness {
  pub worker: Arc<ServiceWorker<SqliteStore>>,
  pub store: Arc<SqliteStore>,
  pub network: Arc<MockNetwork>,
  pub clients: Arc<ClientRegistry>,
  pub notifications: Arc<NotificationCenter>,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_config(Config::default())
  }

  pub fn with_config(config: Config) -> Self {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    Self::with_store(config, store)
  }

  pub fn with_store(config: Config, store: Arc<SqliteStore>) -> Self {
    let network = Arc::new(MockNetwork::new());
    let clients = Arc::new(ClientRegistry::new());
    let notifications = Arc::new(NotificationCenter::new());

    // App shell the default precache manifest expects
    for url in config.precache_urls().unwrap() {
      network.respond(&url, Response::new(200, "text/html", format!("shell {}", url.path())));
    }

    let worker = ServiceWorker::new(
      config,
      store.clone(),
      network.clone(),
      clients.clone(),
      notifications.clone(),
    )
    .unwrap();

    Self {
      worker: Arc::new(worker),
      store,
      network,
      clients,
      notifications,
    }
  }

  /// Installed and activated, ready to intercept.
  pub async fn active() -> Self {
    let harness = Self::new();
    harness.worker.boot().await.unwrap();
    harness
  }
}

pub fn url(s: &str) -> Url {
  Url::parse(s).unwrap()
}
