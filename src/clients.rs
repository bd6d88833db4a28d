//! Connected application instances and the messages the worker sends them.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use url::Url;

pub type ClientId = u64;

/// Messages posted from the worker to app instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  /// Background sync batch finished
  DataSynced { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
  Window,
  Worker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
  pub id: ClientId,
  pub url: Url,
  pub kind: ClientKind,
  /// Whether the active worker controls this instance
  pub controlled: bool,
  pub focused: bool,
}

struct ClientEntry {
  info: ClientInfo,
  tx: Option<mpsc::UnboundedSender<WorkerMessage>>,
}

#[derive(Default)]
struct Registry {
  next_id: ClientId,
  clients: BTreeMap<ClientId, ClientEntry>,
}

/// Registry of open app instances, in connection order.
#[derive(Default)]
pub struct ClientRegistry {
  inner: Mutex<Registry>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Registry>> {
    self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn insert(
    &self,
    url: Url,
    kind: ClientKind,
    tx: Option<mpsc::UnboundedSender<WorkerMessage>>,
  ) -> Result<ClientInfo> {
    let mut registry = self.lock()?;
    let id = registry.next_id;
    registry.next_id += 1;

    let info = ClientInfo {
      id,
      url,
      kind,
      controlled: false,
      focused: false,
    };
    registry.clients.insert(
      id,
      ClientEntry {
        info: info.clone(),
        tx,
      },
    );
    Ok(info)
  }

  /// Register an app instance; messages for it arrive on the receiver.
  pub fn connect(
    &self,
    url: Url,
    kind: ClientKind,
  ) -> Result<(ClientId, mpsc::UnboundedReceiver<WorkerMessage>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let info = self.insert(url, kind, Some(tx))?;
    Ok((info.id, rx))
  }

  pub fn disconnect(&self, id: ClientId) -> Result<bool> {
    Ok(self.lock()?.clients.remove(&id).is_some())
  }

  /// Connected instances, optionally only windows.
  pub fn match_all(&self, kind: Option<ClientKind>) -> Result<Vec<ClientInfo>> {
    Ok(
      self
        .lock()?
        .clients
        .values()
        .filter(|entry| kind.map_or(true, |k| entry.info.kind == k))
        .map(|entry| entry.info.clone())
        .collect(),
    )
  }

  #[cfg(test)]
  pub fn get(&self, id: ClientId) -> Result<Option<ClientInfo>> {
    Ok(self.lock()?.clients.get(&id).map(|entry| entry.info.clone()))
  }

  /// Post to every instance. Instances whose receiver is gone are dropped.
  /// Returns how many received the message.
  pub fn broadcast(&self, message: &WorkerMessage) -> Result<usize> {
    let mut registry = self.lock()?;
    let mut delivered = 0;
    let mut gone = Vec::new();

    for (id, entry) in &registry.clients {
      match &entry.tx {
        Some(tx) if tx.send(message.clone()).is_ok() => delivered += 1,
        Some(_) => gone.push(*id),
        None => {}
      }
    }

    for id in gone {
      registry.clients.remove(&id);
    }

    Ok(delivered)
  }

  /// Take control of every connected instance. Returns how many were newly claimed.
  pub fn claim(&self) -> Result<usize> {
    let mut registry = self.lock()?;
    let mut claimed = 0;
    for entry in registry.clients.values_mut() {
      if !entry.info.controlled {
        entry.info.controlled = true;
        claimed += 1;
      }
    }
    Ok(claimed)
  }

  /// Focus one window, unfocusing the rest.
  pub fn focus(&self, id: ClientId) -> Result<ClientInfo> {
    let mut registry = self.lock()?;
    if !registry.clients.contains_key(&id) {
      return Err(eyre!("No such client: {}", id));
    }

    let mut focused = None;
    for entry in registry.clients.values_mut() {
      entry.info.focused = entry.info.id == id;
      if entry.info.focused {
        focused = Some(entry.info.clone());
      }
    }

    focused.ok_or_else(|| eyre!("No such client: {}", id))
  }

  /// Open a new, focused window at `url`.
  pub fn open_window(&self, url: Url) -> Result<ClientInfo> {
    let info = self.insert(url, ClientKind::Window, None)?;
    self.focus(info.id)
  }
}
