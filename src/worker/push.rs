//! Push payloads to notifications, and notification clicks back to the app.

use color_eyre::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::clients::{ClientId, ClientKind, ClientRegistry};
use crate::config::NotificationConfig;
use crate::notify::{
  Notification, NotificationAction, NotificationCenter, NotificationId, ShownNotification,
};

pub const VIEW_ACTION: &str = "view";
pub const DISMISS_ACTION: &str = "dismiss";

/// Inbound push payload. Every field is optional; an ill-typed field is
/// treated as absent without affecting the others.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushPayload {
  #[serde(deserialize_with = "lenient")]
  pub title: Option<String>,
  #[serde(deserialize_with = "lenient")]
  pub body: Option<String>,
  #[serde(deserialize_with = "lenient")]
  pub icon: Option<String>,
  #[serde(deserialize_with = "lenient")]
  pub badge: Option<String>,
  #[serde(deserialize_with = "lenient")]
  pub vibrate: Option<Vec<u32>>,
  #[serde(deserialize_with = "lenient")]
  pub data: Option<serde_json::Value>,
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
  D: Deserializer<'de>,
  T: DeserializeOwned,
{
  let value = serde_json::Value::deserialize(deserializer)?;
  Ok(T::deserialize(value).ok())
}

impl PushPayload {
  /// Decode raw push data. Data that is missing or not a JSON object decodes
  /// to all defaults.
  pub fn decode(data: Option<&[u8]>) -> Self {
    let Some(bytes) = data else {
      return Self::default();
    };

    match serde_json::from_slice(bytes) {
      Ok(payload) => payload,
      Err(e) => {
        debug!(error = %e, "malformed push payload, using defaults");
        Self::default()
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationClick {
  pub notification: NotificationId,
  /// `None` for a click on the notification body
  pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An open window under the app scope was focused
  Focused(ClientId),
  /// No window was open, a new one was opened at the app root
  Opened(ClientId),
  /// Closed only
  Dismissed,
}

pub struct PushHandler {
  defaults: NotificationConfig,
  notifications: Arc<NotificationCenter>,
  clients: Arc<ClientRegistry>,
  scope: Url,
}

impl PushHandler {
  pub fn new(
    defaults: NotificationConfig,
    notifications: Arc<NotificationCenter>,
    clients: Arc<ClientRegistry>,
    scope: Url,
  ) -> Self {
    Self {
      defaults,
      notifications,
      clients,
      scope,
    }
  }

  pub fn build_notification(&self, payload: PushPayload) -> Notification {
    let defaults = &self.defaults;
    Notification {
      title: payload
        .title
        .unwrap_or_else(|| defaults.default_title.clone()),
      body: payload.body.unwrap_or_else(|| defaults.default_body.clone()),
      icon: payload.icon.unwrap_or_else(|| defaults.icon.clone()),
      badge: payload.badge.unwrap_or_else(|| defaults.badge.clone()),
      vibrate: payload.vibrate.unwrap_or_else(|| defaults.vibrate.clone()),
      data: payload
        .data
        .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
      actions: vec![
        NotificationAction {
          action: VIEW_ACTION.to_string(),
          title: "View App".to_string(),
          icon: Some(defaults.view_icon.clone()),
        },
        NotificationAction {
          action: DISMISS_ACTION.to_string(),
          title: "Dismiss".to_string(),
          icon: None,
        },
      ],
    }
  }

  /// Show a notification for the push. Returns once it is on screen.
  pub async fn on_push(&self, data: Option<&[u8]>) -> Result<ShownNotification> {
    info!("push notification received");
    let notification = self.build_notification(PushPayload::decode(data));
    self.notifications.show(notification)
  }

  pub async fn on_notification_click(&self, click: &NotificationClick) -> Result<ClickOutcome> {
    info!(notification = click.notification, action = ?click.action, "notification clicked");
    self.notifications.close(click.notification)?;

    match click.action.as_deref() {
      None | Some(VIEW_ACTION) => {}
      Some(_) => return Ok(ClickOutcome::Dismissed),
    }

    let in_scope = self
      .clients
      .match_all(Some(ClientKind::Window))?
      .into_iter()
      .find(|client| client.url.as_str().starts_with(self.scope.as_str()));

    if let Some(client) = in_scope {
      self.clients.focus(client.id)?;
      return Ok(ClickOutcome::Focused(client.id));
    }

    let opened = self.clients.open_window(self.scope.clone())?;
    Ok(ClickOutcome::Opened(opened.id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::url;

  fn handler() -> (PushHandler, Arc<NotificationCenter>, Arc<ClientRegistry>) {
    let notifications = Arc::new(NotificationCenter::new());
    let clients = Arc::new(ClientRegistry::new());
    let handler = PushHandler::new(
      NotificationConfig::default(),
      notifications.clone(),
      clients.clone(),
      url("http://localhost:8080/"),
    );
    (handler, notifications, clients)
  }

  #[tokio::test]
  async fn test_title_only_payload_uses_defaults() {
    let (handler, notifications, _) = handler();

    let shown = handler
      .on_push(Some(br#"{"title": "Bus Arriving"}"#))
      .await
      .unwrap();

    let n = &shown.notification;
    assert_eq!(n.title, "Bus Arriving");
    assert_eq!(n.body, "Your Route 80 bus is arriving soon!");
    assert_eq!(n.icon, "/icons/icon-192.png");
    assert_eq!(n.badge, "/icons/badge-72.png");
    assert_eq!(n.vibrate, vec![200, 100, 200]);
    assert_eq!(n.data, serde_json::json!({}));
    assert_eq!(n.actions[0].action, "view");
    assert_eq!(n.actions[1].action, "dismiss");
    assert_eq!(notifications.visible().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_missing_or_malformed_payload_still_notifies() {
    let (handler, notifications, _) = handler();

    let empty = handler.on_push(None).await.unwrap();
    let garbage = handler.on_push(Some(b"not json")).await.unwrap();

    assert_eq!(empty.notification.title, "Route 80 Update");
    assert_eq!(garbage.notification.body, "Your Route 80 bus is arriving soon!");
    assert_eq!(notifications.visible().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_ill_typed_field_keeps_the_valid_ones() {
    let (handler, _, _) = handler();

    let shown = handler
      .on_push(Some(br#"{"title":"Bus Arriving","vibrate":"buzz","icon":7}"#))
      .await
      .unwrap();

    let n = &shown.notification;
    assert_eq!(n.title, "Bus Arriving");
    assert_eq!(n.vibrate, vec![200, 100, 200]);
    assert_eq!(n.icon, "/icons/icon-192.png");
  }

  #[test]
  fn test_payload_fields_override_defaults() {
    let (handler, _, _) = handler();
    let payload: PushPayload = serde_json::from_str(
      r#"{"title":"t","body":"b","icon":"/i.png","badge":"/b.png","vibrate":[50],"data":{"stop":42}}"#,
    )
    .unwrap();

    let n = handler.build_notification(payload);

    assert_eq!(n.body, "b");
    assert_eq!(n.icon, "/i.png");
    assert_eq!(n.badge, "/b.png");
    assert_eq!(n.vibrate, vec![50]);
    assert_eq!(n.data["stop"], 42);
  }

  #[tokio::test]
  async fn test_view_focuses_open_window() {
    let (handler, notifications, clients) = handler();
    let (_other, _rx1) = clients
      .connect(url("https://example.com/"), ClientKind::Window)
      .unwrap();
    let (app, _rx2) = clients
      .connect(url("http://localhost:8080/index.html"), ClientKind::Window)
      .unwrap();
    let shown = handler.on_push(None).await.unwrap();

    let outcome = handler
      .on_notification_click(&NotificationClick {
        notification: shown.id,
        action: Some("view".to_string()),
      })
      .await
      .unwrap();

    assert_eq!(outcome, ClickOutcome::Focused(app));
    assert!(clients.get(app).unwrap().unwrap().focused);
    assert!(notifications.visible().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_bare_click_opens_window_when_none_open() {
    let (handler, _, clients) = handler();
    let shown = handler.on_push(None).await.unwrap();

    let outcome = handler
      .on_notification_click(&NotificationClick {
        notification: shown.id,
        action: None,
      })
      .await
      .unwrap();

    let ClickOutcome::Opened(id) = outcome else {
      panic!("expected a new window, got {:?}", outcome);
    };
    let opened = clients.get(id).unwrap().unwrap();
    assert_eq!(opened.url.as_str(), "http://localhost:8080/");
    assert_eq!(opened.kind, ClientKind::Window);
  }

  #[tokio::test]
  async fn test_dismiss_only_closes() {
    let (handler, notifications, clients) = handler();
    let shown = handler.on_push(None).await.unwrap();

    let outcome = handler
      .on_notification_click(&NotificationClick {
        notification: shown.id,
        action: Some("dismiss".to_string()),
      })
      .await
      .unwrap();

    assert_eq!(outcome, ClickOutcome::Dismissed);
    assert!(notifications.visible().unwrap().is_empty());
    assert!(clients.match_all(None).unwrap().is_empty());
  }
}
