//! Replays newline-delimited JSON events against the worker, the way a
//! browser would deliver them.
//!
//! ```text
//! {"event": "boot"}
//! {"event": "connect", "url": "http://localhost:8080/"}
//! {"event": "fetch", "url": "http://localhost:8080/index.html", "navigate": true}
//! {"event": "sync"}
//! {"event": "push", "payload": {"title": "Bus Arriving"}}
//! {"event": "click", "action": "view"}
//! ```

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use crate::clients::{ClientId, ClientKind, ClientRegistry, WorkerMessage};
use crate::event::{EventLoop, EventOutcome, WorkerEvent};
use crate::net::Request;
use crate::notify::NotificationId;
use crate::worker::{ClickOutcome, Interception, NotificationClick};

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
  Install,
  Activate,
  /// Install then activate
  Boot,
  /// Open an app instance that receives worker messages
  Connect {
    url: Url,
  },
  /// Close an app instance
  Disconnect {
    client: ClientId,
  },
  Fetch {
    url: Url,
    #[serde(default)]
    navigate: bool,
    #[serde(default)]
    method: Option<String>,
  },
  Sync {
    #[serde(default)]
    tag: Option<String>,
  },
  Push {
    #[serde(default)]
    payload: Option<serde_json::Value>,
  },
  /// Click the given notification, or the last one shown
  Click {
    #[serde(default)]
    notification: Option<NotificationId>,
    #[serde(default)]
    action: Option<String>,
  },
}

pub struct Replay {
  events: EventLoop,
  clients: Arc<ClientRegistry>,
  inboxes: Vec<(ClientId, mpsc::UnboundedReceiver<WorkerMessage>)>,
  sync_tag: String,
  last_notification: Option<NotificationId>,
}

impl Replay {
  pub fn new(events: EventLoop, clients: Arc<ClientRegistry>, sync_tag: String) -> Self {
    Self {
      events,
      clients,
      inboxes: Vec::new(),
      sync_tag,
      last_notification: None,
    }
  }

  /// Run every line of `input`, writing one or more result lines per event.
  /// Bad lines are reported and skipped.
  pub async fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> Result<()> {
    for (number, line) in input.lines().enumerate() {
      let line = line.map_err(|e| eyre!("Failed to read line {}: {}", number + 1, e))?;
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }

      match serde_json::from_str::<ScriptEvent>(line) {
        Ok(event) => self.step(event, out).await?,
        Err(e) => writeln!(out, "line {}: invalid event: {}", number + 1, e)?,
      }
    }
    Ok(())
  }

  pub async fn step<W: Write>(&mut self, event: ScriptEvent, out: &mut W) -> Result<()> {
    let (label, event) = match event {
      ScriptEvent::Connect { url } => {
        let (id, inbox) = self.clients.connect(url.clone(), ClientKind::Window)?;
        self.inboxes.push((id, inbox));
        writeln!(out, "connect {} -> client {}", url, id)?;
        return Ok(());
      }
      ScriptEvent::Disconnect { client } => {
        self.inboxes.retain(|(id, _)| *id != client);
        let closed = self.clients.disconnect(client)?;
        writeln!(out, "disconnect {} -> {}", client, if closed { "closed" } else { "unknown client" })?;
        return Ok(());
      }
      ScriptEvent::Boot => {
        self.report("install".to_string(), WorkerEvent::Install, out).await?;
        return self.report("activate".to_string(), WorkerEvent::Activate, out).await;
      }
      ScriptEvent::Install => ("install".to_string(), WorkerEvent::Install),
      ScriptEvent::Activate => ("activate".to_string(), WorkerEvent::Activate),
      ScriptEvent::Fetch {
        url,
        navigate,
        method,
      } => {
        let mut request = if navigate {
          Request::navigate(url.clone())
        } else {
          Request::get(url.clone())
        };
        if let Some(method) = method {
          request = request.with_method(&method);
        }
        (format!("fetch {} {}", request.method, url), WorkerEvent::Fetch(request))
      }
      ScriptEvent::Sync { tag } => {
        let tag = tag.unwrap_or_else(|| self.sync_tag.clone());
        (format!("sync {}", tag), WorkerEvent::Sync { tag })
      }
      ScriptEvent::Push { payload } => {
        let data = payload.map(|p| serde_json::to_vec(&p)).transpose()?;
        ("push".to_string(), WorkerEvent::Push { data })
      }
      ScriptEvent::Click {
        notification,
        action,
      } => {
        let Some(notification) = notification.or(self.last_notification) else {
          writeln!(out, "click -> error: no notification to click")?;
          return Ok(());
        };
        (
          format!("click {}", notification),
          WorkerEvent::NotificationClick(NotificationClick {
            notification,
            action,
          }),
        )
      }
    };

    self.report(label, event, out).await
  }

  async fn report<W: Write>(
    &mut self,
    label: String,
    event: WorkerEvent,
    out: &mut W,
  ) -> Result<()> {
    match self.events.dispatch(event).await {
      Ok(outcome) => {
        if let EventOutcome::Notified(shown) = &outcome {
          self.last_notification = Some(shown.id);
        }
        writeln!(out, "{} -> {}", label, describe(&outcome))?;
      }
      Err(e) => writeln!(out, "{} -> error: {}", label, e)?,
    }

    self.drain_inboxes(out)
  }

  fn drain_inboxes<W: Write>(&mut self, out: &mut W) -> Result<()> {
    for (id, inbox) in &mut self.inboxes {
      while let Ok(message) = inbox.try_recv() {
        writeln!(out, "message client {}: {}", id, serde_json::to_string(&message)?)?;
      }
    }
    Ok(())
  }
}

/// One-line summary of an event outcome.
pub fn describe(outcome: &EventOutcome) -> String {
  match outcome {
    EventOutcome::Installed => "installed".to_string(),
    EventOutcome::Activated(activation) => {
      if activation.deleted.is_empty() {
        format!("active, claimed {}", activation.claimed)
      } else {
        format!(
          "active, claimed {}, deleted {}",
          activation.claimed,
          activation.deleted.join(", ")
        )
      }
    }
    EventOutcome::Fetched(Interception::Passthrough) => "passthrough".to_string(),
    EventOutcome::Fetched(Interception::Respond(served)) => format!(
      "{} from {} ({} bytes)",
      served.response.status,
      served.source,
      served.response.body.len()
    ),
    EventOutcome::Synced(None) => "ignored".to_string(),
    EventOutcome::Synced(Some(report)) => format!(
      "synced {}, failed {}, notified {}",
      report.synced.len(),
      report.failed.len(),
      report.notified
    ),
    EventOutcome::Notified(shown) => format!(
      "notification {}: {} - {}",
      shown.id, shown.notification.title, shown.notification.body
    ),
    EventOutcome::Clicked(ClickOutcome::Focused(id)) => format!("focused client {}", id),
    EventOutcome::Clicked(ClickOutcome::Opened(id)) => format!("opened client {}", id),
    EventOutcome::Clicked(ClickOutcome::Dismissed) => "dismissed".to_string(),
  }
}
