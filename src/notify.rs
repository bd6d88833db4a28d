//! Notifications shown by the worker.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

pub type NotificationId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: serde_json::Value,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShownNotification {
  pub id: NotificationId,
  #[serde(flatten)]
  pub notification: Notification,
}

/// Records which notifications are currently on screen.
#[derive(Default)]
pub struct NotificationCenter {
  inner: Mutex<(NotificationId, BTreeMap<NotificationId, Notification>)>,
}

impl NotificationCenter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn show(&self, notification: Notification) -> Result<ShownNotification> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.0 += 1;
    let id = inner.0;
    inner.1.insert(id, notification.clone());
    Ok(ShownNotification { id, notification })
  }

  /// Returns false if it was already closed.
  pub fn close(&self, id: NotificationId) -> Result<bool> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.1.remove(&id).is_some())
  }

  #[cfg(test)]
  pub fn visible(&self) -> Result<Vec<ShownNotification>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      inner
        .1
        .iter()
        .map(|(id, notification)| ShownNotification {
          id: *id,
          notification: notification.clone(),
        })
        .collect(),
    )
  }
}
