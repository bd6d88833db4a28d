//! Background refresh of the feed endpoints once connectivity returns.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{open_bucket, CacheKey, CacheStore};
use crate::clients::{ClientRegistry, WorkerMessage};
use crate::net::{Network, Request};

pub const SYNCED_MESSAGE: &str = "Bus data has been updated";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub synced: Vec<Url>,
  pub failed: Vec<Url>,
  /// Clients that received the DATA_SYNCED broadcast
  pub notified: usize,
}

pub struct SyncAgent<S: CacheStore> {
  store: Arc<S>,
  network: Arc<dyn Network>,
  clients: Arc<ClientRegistry>,
  dynamic_cache: String,
  tag: String,
  targets: Vec<Url>,
}

impl<S: CacheStore> SyncAgent<S> {
  pub fn new(
    store: Arc<S>,
    network: Arc<dyn Network>,
    clients: Arc<ClientRegistry>,
    dynamic_cache: String,
    tag: String,
    targets: Vec<Url>,
  ) -> Self {
    Self {
      store,
      network,
      clients,
      dynamic_cache,
      tag,
      targets,
    }
  }

  /// Run the sync task named by `tag`. Unknown tags are ignored (`None`).
  pub async fn on_sync(&self, tag: &str) -> Result<Option<SyncReport>> {
    if tag != self.tag {
      info!(tag, "ignoring unknown sync tag");
      return Ok(None);
    }

    info!(tag, "background sync triggered");
    self.sync_bus_data().await.map(Some)
  }

  /// Refresh every target in order. A failing target is skipped; the batch
  /// always ends with a DATA_SYNCED broadcast.
  pub async fn sync_bus_data(&self) -> Result<SyncReport> {
    let bucket = open_bucket(self.store.as_ref(), &self.dynamic_cache)?;
    let mut report = SyncReport::default();

    for url in &self.targets {
      let request = Request::get(url.clone());
      let stored = match self.network.fetch(&request).await {
        Ok(response) if response.ok() => bucket.put(&CacheKey::from(&request), &response),
        Ok(response) => {
          warn!(%url, status = response.status, "sync target returned error status");
          report.failed.push(url.clone());
          continue;
        }
        Err(e) => {
          warn!(%url, error = %e, "failed to sync");
          report.failed.push(url.clone());
          continue;
        }
      };

      match stored {
        Ok(()) => {
          info!(%url, "synced data");
          report.synced.push(url.clone());
        }
        Err(e) => {
          warn!(%url, error = %e, "failed to store synced data");
          report.failed.push(url.clone());
        }
      }
    }

    report.notified = self.clients.broadcast(&WorkerMessage::DataSynced {
      message: SYNCED_MESSAGE.to_string(),
    })?;

    info!(
      synced = report.synced.len(),
      failed = report.failed.len(),
      notified = report.notified,
      "background sync finished"
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::clients::ClientKind;
  use crate::net::Response;
  use crate::testing::{url, MockNetwork};

  const DYNAMIC: &str = "route80-dynamic-v1.2";

  fn targets() -> Vec<Url> {
    ["vehicles", "trips", "alerts"]
      .iter()
      .map(|feed| url(&format!("https://metromap.cityofmadison.com/gtfsrt/{}", feed)))
      .collect()
  }

  fn agent(
    network: Arc<MockNetwork>,
    clients: Arc<ClientRegistry>,
  ) -> (SyncAgent<SqliteStore>, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let agent = SyncAgent::new(
      store.clone(),
      network,
      clients,
      DYNAMIC.to_string(),
      "bus-data-sync".to_string(),
      targets(),
    );
    (agent, store)
  }

  #[tokio::test]
  async fn test_partial_failure_still_broadcasts_once() {
    let network = Arc::new(MockNetwork::new());
    let clients = Arc::new(ClientRegistry::new());
    let (_, mut rx) = clients
      .connect(url("http://localhost:8080/"), ClientKind::Window)
      .unwrap();
    let [vehicles, trips, alerts]: [Url; 3] = targets().try_into().unwrap();
    network.respond(&vehicles, Response::new(200, "application/json", "v"));
    network.fail(&trips);
    network.respond(&alerts, Response::new(200, "application/json", "a"));
    let (agent, store) = agent(network.clone(), clients);

    let report = agent.on_sync("bus-data-sync").await.unwrap().unwrap();

    assert_eq!(report.synced, vec![vehicles.clone(), alerts.clone()]);
    assert_eq!(report.failed, vec![trips.clone()]);
    assert_eq!(report.notified, 1);
    assert!(store.lookup(DYNAMIC, &CacheKey::get(&vehicles)).unwrap().is_some());
    assert!(store.lookup(DYNAMIC, &CacheKey::get(&trips)).unwrap().is_none());
    assert!(store.lookup(DYNAMIC, &CacheKey::get(&alerts)).unwrap().is_some());

    assert_eq!(
      rx.recv().await,
      Some(WorkerMessage::DataSynced {
        message: SYNCED_MESSAGE.to_string()
      })
    );
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_targets_fetched_in_order() {
    let network = Arc::new(MockNetwork::new());
    let (agent, _store) = agent(network.clone(), Arc::new(ClientRegistry::new()));

    agent.sync_bus_data().await.unwrap();

    let expected: Vec<String> = targets().iter().map(Url::to_string).collect();
    assert_eq!(network.calls(), expected);
  }

  #[tokio::test]
  async fn test_error_status_is_not_stored() {
    let network = Arc::new(MockNetwork::new());
    let (agent, store) = agent(network.clone(), Arc::new(ClientRegistry::new()));

    let report = agent.sync_bus_data().await.unwrap();

    assert!(report.synced.is_empty());
    assert_eq!(report.failed.len(), 3);
    assert!(store.keys(DYNAMIC).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_all_offline_still_broadcasts() {
    let network = Arc::new(MockNetwork::new());
    network.set_offline(true);
    let clients = Arc::new(ClientRegistry::new());
    let (_, mut rx) = clients
      .connect(url("http://localhost:8080/"), ClientKind::Window)
      .unwrap();
    let (agent, _store) = agent(network, clients);

    let report = agent.sync_bus_data().await.unwrap();

    assert_eq!(report.failed.len(), 3);
    assert!(rx.recv().await.is_some());
  }

  #[tokio::test]
  async fn test_unknown_tag_is_ignored() {
    let network = Arc::new(MockNetwork::new());
    let (agent, _store) = agent(network.clone(), Arc::new(ClientRegistry::new()));

    assert_eq!(agent.on_sync("something-else").await.unwrap(), None);
    assert_eq!(network.call_count(), 0);
  }
}
