//! The caching worker: one async entry point per event kind.
//!
//! ```ignore
//! let worker = ServiceWorker::new(config, store, network, clients, notifications)?;
//! worker.boot().await?;
//!
//! match worker.fetch(&Request::navigate(url)).await? {
//!     Interception::Respond(served) => render(served.response),
//!     Interception::Passthrough => platform_fetch(url),
//! }
//! ```

mod classify;
mod lifecycle;
mod push;
mod sync;

pub use classify::{Classification, Classifier};
pub use lifecycle::{Activation, LifecycleController, LifecycleState};
pub use push::{ClickOutcome, NotificationClick, PushHandler};
pub use sync::{SyncAgent, SyncReport};

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheGeneration, CacheLayer, CacheStore, GenerationKind, Served};
use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::fallback::OfflineFallbacks;
use crate::net::{Network, Request};
use crate::notify::{NotificationCenter, ShownNotification};

/// How an intercepted request was handled.
#[derive(Debug, Clone)]
pub enum Interception {
  /// Not intercepted; the platform performs the request itself
  Passthrough,
  Respond(Served),
}

pub struct ServiceWorker<S: CacheStore> {
  classifier: Classifier,
  lifecycle: LifecycleController<S>,
  layer: CacheLayer<S>,
  sync: SyncAgent<S>,
  push: PushHandler,
}

impl<S: CacheStore> ServiceWorker<S> {
  pub fn new(
    config: Config,
    store: Arc<S>,
    network: Arc<dyn Network>,
    clients: Arc<ClientRegistry>,
    notifications: Arc<NotificationCenter>,
  ) -> Result<Self> {
    let static_generation =
      CacheGeneration::new(&config.cache.prefix, GenerationKind::Static, &config.cache.version);
    let dynamic_generation =
      CacheGeneration::new(&config.cache.prefix, GenerationKind::Dynamic, &config.cache.version);

    let lifecycle = LifecycleController::new(
      store.clone(),
      network.clone(),
      clients.clone(),
      static_generation.clone(),
      dynamic_generation.clone(),
      config.precache_urls()?,
    );

    let layer = CacheLayer::new(
      store.clone(),
      network.clone(),
      static_generation.name(),
      dynamic_generation.name(),
      OfflineFallbacks::new(&config.app.name),
    );

    let sync = SyncAgent::new(
      store,
      network,
      clients.clone(),
      dynamic_generation.name(),
      config.sync.tag.clone(),
      config.sync.target_urls()?,
    );

    let push = PushHandler::new(
      config.notifications.clone(),
      notifications,
      clients,
      config.app.scope_url()?,
    );

    Ok(Self {
      classifier: Classifier::new(&config)?,
      lifecycle,
      layer,
      sync,
      push,
    })
  }

  pub fn state(&self) -> Result<LifecycleState> {
    self.lifecycle.state()
  }

  pub async fn install(&self) -> Result<()> {
    self.lifecycle.install().await
  }

  pub async fn activate(&self) -> Result<Activation> {
    self.lifecycle.activate().await
  }

  /// Restore a previous installation or install fresh, then activate right
  /// away (install always asks to skip waiting). Does nothing once active.
  pub async fn boot(&self) -> Result<Activation> {
    match self.state()? {
      LifecycleState::Active => return Ok(Activation::default()),
      LifecycleState::Installed => {}
      _ => {
        if !self.lifecycle.restore()? {
          self.install().await?;
          if !self.lifecycle.skip_waiting()? {
            return Err(eyre!("Installed worker is waiting for old clients to close"));
          }
        }
      }
    }
    self.activate().await
  }

  /// Intercept one outgoing request.
  pub async fn fetch(&self, request: &Request) -> Result<Interception> {
    if !self.state()?.can_intercept() {
      debug!(url = %request.url, "not active, passing request through");
      return Ok(Interception::Passthrough);
    }
    if !matches!(request.url.scheme(), "http" | "https") {
      return Ok(Interception::Passthrough);
    }

    let served = match self.route(request) {
      Classification::StaticAsset => self.layer.cache_first(request).await?,
      Classification::ApiRequest => self.layer.network_first(request).await?,
      Classification::Other => self.layer.network_then_any_cache(request).await?,
    };

    if !served.response.ok() {
      warn!(url = %request.url, status = served.response.status, source = ?served.source, "non-success response");
    }
    Ok(Interception::Respond(served))
  }

  /// Strategies only apply to GET; everything else is routed as `Other`.
  pub fn route(&self, request: &Request) -> Classification {
    if !request.is_get() {
      return Classification::Other;
    }
    self.classifier.classify(&request.url)
  }

  pub async fn sync(&self, tag: &str) -> Result<Option<SyncReport>> {
    self.sync.on_sync(tag).await
  }

  pub async fn push(&self, data: Option<&[u8]>) -> Result<ShownNotification> {
    self.push.on_push(data).await
  }

  pub async fn notification_click(&self, click: &NotificationClick) -> Result<ClickOutcome> {
    self.push.on_notification_click(click).await
  }
}
