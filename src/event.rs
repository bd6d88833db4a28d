use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::cache::CacheStore;
use crate::net::Request;
use crate::notify::ShownNotification;
use crate::worker::{
  Activation, ClickOutcome, Interception, NotificationClick, ServiceWorker, SyncReport,
};

/// Events the host delivers to the worker
#[derive(Debug)]
pub enum WorkerEvent {
  Install,
  Activate,
  /// Outgoing request from an app instance
  Fetch(Request),
  /// Connectivity restored; the tag names the sync task
  Sync { tag: String },
  Push { data: Option<Vec<u8>> },
  NotificationClick(NotificationClick),
}

/// What handling an event produced
#[derive(Debug)]
pub enum EventOutcome {
  Installed,
  Activated(Activation),
  Fetched(Interception),
  Synced(Option<SyncReport>),
  Notified(ShownNotification),
  Clicked(ClickOutcome),
}

type Reply = oneshot::Sender<Result<EventOutcome, String>>;

/// Feeds events to the worker, each on its own task, so a slow fetch never
/// holds up the next event.
pub struct EventLoop {
  tx: mpsc::UnboundedSender<(WorkerEvent, Reply)>,
}

impl EventLoop {
  /// Spawn the dispatcher for the given worker
  pub fn new<S: CacheStore + 'static>(worker: Arc<ServiceWorker<S>>) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<(WorkerEvent, Reply)>();

    tokio::spawn(async move {
      while let Some((event, reply)) = rx.recv().await {
        let worker = worker.clone();
        tokio::spawn(async move {
          let outcome = handle(&worker, event).await.map_err(|e| format!("{:#}", e));
          // Receiver may have given up waiting
          let _ = reply.send(outcome);
        });
      }
      debug!("event loop closed");
    });

    Self { tx }
  }

  /// Deliver an event and wait for it to be fully handled
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, String> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send((event, reply))
      .map_err(|_| "event loop closed".to_string())?;
    rx.await
      .map_err(|_| "worker dropped the event".to_string())?
  }
}

async fn handle<S: CacheStore>(
  worker: &ServiceWorker<S>,
  event: WorkerEvent,
) -> color_eyre::Result<EventOutcome> {
  Ok(match event {
    WorkerEvent::Install => {
      worker.install().await?;
      EventOutcome::Installed
    }
    WorkerEvent::Activate => EventOutcome::Activated(worker.activate().await?),
    WorkerEvent::Fetch(request) => EventOutcome::Fetched(worker.fetch(&request).await?),
    WorkerEvent::Sync { tag } => EventOutcome::Synced(worker.sync(&tag).await?),
    WorkerEvent::Push { data } => EventOutcome::Notified(worker.push(data.as_deref()).await?),
    WorkerEvent::NotificationClick(click) => {
      EventOutcome::Clicked(worker.notification_click(&click).await?)
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::Response;
  use crate::testing::{url, Harness};
  use std::time::Duration;

  #[tokio::test]
  async fn test_install_activate_fetch_through_loop() {
    let h = Harness::new();
    let events = EventLoop::new(h.worker.clone());

    assert!(matches!(
      events.dispatch(WorkerEvent::Install).await,
      Ok(EventOutcome::Installed)
    ));
    assert!(matches!(
      events.dispatch(WorkerEvent::Activate).await,
      Ok(EventOutcome::Activated(_))
    ));

    let outcome = events
      .dispatch(WorkerEvent::Fetch(Request::get(url("http://localhost:8080/"))))
      .await
      .unwrap();
    let EventOutcome::Fetched(Interception::Respond(served)) = outcome else {
      panic!("expected a response, got {:?}", outcome);
    };
    assert_eq!(served.response.text(), "shell /");
  }

  #[tokio::test]
  async fn test_errors_are_reported_not_panicked() {
    let h = Harness::new();
    let events = EventLoop::new(h.worker.clone());

    let result = events.dispatch(WorkerEvent::Activate).await;

    assert!(result.unwrap_err().contains("Cannot activate"));
  }

  #[tokio::test]
  async fn test_concurrent_fetches_complete_independently() {
    let h = Harness::active().await;
    let events = Arc::new(EventLoop::new(h.worker.clone()));
    let feeds: Vec<_> = (0..8)
      .map(|i| url(&format!("https://metromap.cityofmadison.com/gtfsrt/feed{}", i)))
      .collect();
    for feed in &feeds {
      h.network.respond(feed, Response::new(200, "application/json", feed.path().to_string()));
    }

    let handles: Vec<_> = feeds
      .iter()
      .cloned()
      .map(|feed| {
        let events = events.clone();
        tokio::spawn(async move {
          events
            .dispatch(WorkerEvent::Fetch(Request::get(feed)))
            .await
        })
      })
      .collect();

    for (feed, handle) in feeds.iter().zip(handles) {
      let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
      let EventOutcome::Fetched(Interception::Respond(served)) = outcome else {
        panic!("expected a response");
      };
      assert_eq!(served.response.text(), feed.path());
    }
  }
}
