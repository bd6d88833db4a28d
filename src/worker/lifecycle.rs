//! Install / activate state machine and the intercept gate.

use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};
use url::Url;

use crate::cache::{open_bucket, CacheGeneration, CacheKey, CacheStore};
use crate::clients::ClientRegistry;
use crate::net::{Network, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Uninstalled,
  Installing,
  /// Installed and waiting to activate
  Installed,
  Activating,
  /// Controls clients and intercepts requests
  Active,
}

impl LifecycleState {
  pub fn can_intercept(&self) -> bool {
    matches!(self, LifecycleState::Active)
  }
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LifecycleState::Uninstalled => write!(f, "uninstalled"),
      LifecycleState::Installing => write!(f, "installing"),
      LifecycleState::Installed => write!(f, "installed"),
      LifecycleState::Activating => write!(f, "activating"),
      LifecycleState::Active => write!(f, "active"),
    }
  }
}

/// Result of a successful activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activation {
  /// Stale generations that were deleted
  pub deleted: Vec<String>,
  /// Clients newly taken under control
  pub claimed: usize,
}

pub struct LifecycleController<S: CacheStore> {
  state: Mutex<LifecycleState>,
  skip_waiting: Mutex<bool>,
  store: Arc<S>,
  network: Arc<dyn Network>,
  clients: Arc<ClientRegistry>,
  static_generation: CacheGeneration,
  dynamic_generation: CacheGeneration,
  precache: Vec<Url>,
}

impl<S: CacheStore> LifecycleController<S> {
  pub fn new(
    store: Arc<S>,
    network: Arc<dyn Network>,
    clients: Arc<ClientRegistry>,
    static_generation: CacheGeneration,
    dynamic_generation: CacheGeneration,
    precache: Vec<Url>,
  ) -> Self {
    Self {
      state: Mutex::new(LifecycleState::Uninstalled),
      skip_waiting: Mutex::new(false),
      store,
      network,
      clients,
      static_generation,
      dynamic_generation,
      precache,
    }
  }

  pub fn state(&self) -> Result<LifecycleState> {
    self
      .state
      .lock()
      .map(|state| *state)
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn set_state(&self, next: LifecycleState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let from = *state;
    debug!(%from, to = %next, "lifecycle transition");
    *state = next;
    Ok(())
  }

  /// Whether install asked to take over without waiting for old clients.
  pub fn skip_waiting(&self) -> Result<bool> {
    self
      .skip_waiting
      .lock()
      .map(|flag| *flag)
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Pre-populate the static generation with the app shell.
  ///
  /// All-or-nothing: any failed or non-2xx fetch stores nothing. A first
  /// install that fails leaves the worker uninstalled. A re-run on an
  /// installed or active worker refreshes the shell in place and never
  /// changes its state, so a failure leaves it serving as before.
  pub async fn install(&self) -> Result<()> {
    let previous = self.state()?;
    let in_service = matches!(previous, LifecycleState::Installed | LifecycleState::Active);
    info!(state = %previous, "installing");
    if !in_service {
      self.set_state(LifecycleState::Installing)?;
    }

    match self.precache_shell().await {
      Ok(count) => {
        *self
          .skip_waiting
          .lock()
          .map_err(|e| eyre!("Lock poisoned: {}", e))? = true;
        if !in_service {
          self.set_state(LifecycleState::Installed)?;
        }
        info!(assets = count, "installed successfully");
        Ok(())
      }
      Err(e) => {
        error!(error = %e, "installation failed");
        if !in_service {
          self.set_state(LifecycleState::Uninstalled)?;
        }
        Err(e)
      }
    }
  }

  async fn precache_shell(&self) -> Result<usize> {
    let mut fetched = Vec::with_capacity(self.precache.len());
    for url in &self.precache {
      let request = Request::get(url.clone());
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to precache {}: {}", url, e))?;
      if !response.ok() {
        return Err(eyre!("Failed to precache {}: status {}", url, response.status));
      }
      fetched.push((CacheKey::from(&request), response));
    }

    let bucket = open_bucket(self.store.as_ref(), &self.static_generation.name())?;
    for (key, response) in &fetched {
      bucket.put(key, response)?;
    }

    Ok(fetched.len())
  }

  /// Bring back a worker installed by an earlier run: if the static generation
  /// already holds every precache entry, move to installed without network.
  /// Returns whether it did.
  pub fn restore(&self) -> Result<bool> {
    if self.state()? != LifecycleState::Uninstalled {
      return Ok(false);
    }

    let name = self.static_generation.name();
    if !self.store.has_bucket(&name)? {
      return Ok(false);
    }

    for url in &self.precache {
      if self.store.lookup(&name, &CacheKey::get(url))?.is_none() {
        debug!(%url, "static generation incomplete, install required");
        return Ok(false);
      }
    }

    self.set_state(LifecycleState::Installed)?;
    info!(generation = %name, "restored installed worker");
    Ok(true)
  }

  /// Purge stale generations, claim clients, start intercepting.
  ///
  /// Re-activating an active worker stays `Active` throughout.
  pub async fn activate(&self) -> Result<Activation> {
    let previous = self.state()?;
    match previous {
      LifecycleState::Installed => self.set_state(LifecycleState::Activating)?,
      LifecycleState::Active => {}
      state => return Err(eyre!("Cannot activate while {}", state)),
    }

    info!(state = %previous, "activating");

    match self.purge_and_claim() {
      Ok(activation) => {
        self.set_state(LifecycleState::Active)?;
        info!(
          deleted = activation.deleted.len(),
          claimed = activation.claimed,
          "activated successfully"
        );
        Ok(activation)
      }
      Err(e) => {
        error!(error = %e, "activation failed");
        self.set_state(previous)?;
        Err(e)
      }
    }
  }

  fn purge_and_claim(&self) -> Result<Activation> {
    let current = [self.static_generation.name(), self.dynamic_generation.name()];
    let prefix = &self.static_generation.prefix;

    let mut deleted = Vec::new();
    for name in self.store.bucket_names()? {
      if current.contains(&name) || CacheGeneration::parse(prefix, &name).is_none() {
        continue;
      }
      info!(cache = %name, "deleting old cache");
      self.store.delete_bucket(&name)?;
      deleted.push(name);
    }

    let claimed = self.clients.claim()?;
    Ok(Activation { deleted, claimed })
  }
}
