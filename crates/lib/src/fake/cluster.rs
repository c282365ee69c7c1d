use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::lock;
use crate::runtime::{ClusterClient, ComposeClient, K8sEntity, LabelSelector, PodEvent, RuntimeError};

#[derive(Default)]
struct ClusterState {
  upserts: Vec<Vec<K8sEntity>>,
  deletes: Vec<Vec<K8sEntity>>,
  pod_watchers: Vec<mpsc::Sender<PodEvent>>,
  selectors: Vec<LabelSelector>,
  upsert_error: Option<String>,
  next_uid: usize,
}

/// A cluster that assigns uids on upsert and lets tests emit pod events.
#[derive(Default)]
pub struct FakeCluster {
  state: Mutex<ClusterState>,
}

impl FakeCluster {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_upserts(&self, message: &str) {
    lock(&self.state).upsert_error = Some(message.to_string());
  }

  pub fn upsert_count(&self) -> usize {
    lock(&self.state).upserts.len()
  }

  /// Entities from the most recent upsert, as sent.
  pub fn last_upserted(&self) -> Vec<K8sEntity> {
    lock(&self.state).upserts.last().cloned().unwrap_or_default()
  }

  pub fn delete_count(&self) -> usize {
    lock(&self.state).deletes.len()
  }

  pub fn watch_selectors(&self) -> Vec<LabelSelector> {
    lock(&self.state).selectors.clone()
  }

  /// Deliver a pod event to every open pod watch.
  pub async fn emit_pod(&self, event: PodEvent) {
    let watchers = lock(&self.state).pod_watchers.clone();
    for watcher in watchers {
      let _ = watcher.send(event.clone()).await;
    }
  }
}

#[async_trait]
impl ClusterClient for FakeCluster {
  async fn upsert(&self, entities: Vec<K8sEntity>) -> Result<Vec<K8sEntity>, RuntimeError> {
    let mut state = lock(&self.state);
    if let Some(message) = &state.upsert_error {
      return Err(RuntimeError::api("upsert", message.clone()));
    }
    state.upserts.push(entities.clone());
    let mut out = Vec::with_capacity(entities.len());
    for mut entity in entities {
      state.next_uid += 1;
      let uid = Value::String(format!("uid-{}", state.next_uid));
      if let Some(Value::Object(meta)) = entity.0.get_mut("metadata") {
        meta.insert("uid".to_string(), uid);
      }
      out.push(entity);
    }
    Ok(out)
  }

  async fn delete(&self, entities: Vec<K8sEntity>) -> Result<(), RuntimeError> {
    lock(&self.state).deletes.push(entities);
    Ok(())
  }

  async fn watch_pods(&self, selector: &LabelSelector) -> Result<mpsc::Receiver<PodEvent>, RuntimeError> {
    let (tx, rx) = mpsc::channel(16);
    let mut state = lock(&self.state);
    state.pod_watchers.push(tx);
    state.selectors.push(selector.clone());
    Ok(rx)
  }
}

#[derive(Default)]
struct ComposeState {
  ups: Vec<(Vec<PathBuf>, String)>,
  rms: Vec<Vec<PathBuf>>,
}

/// A compose installation that records `up` and `rm`.
#[derive(Default)]
pub struct FakeCompose {
  state: Mutex<ComposeState>,
}

impl FakeCompose {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn up_calls(&self) -> Vec<(Vec<PathBuf>, String)> {
    lock(&self.state).ups.clone()
  }

  pub fn rm_count(&self) -> usize {
    lock(&self.state).rms.len()
  }
}

#[async_trait]
impl ComposeClient for FakeCompose {
  async fn up(&self, config_paths: &[PathBuf], service: &str) -> Result<(), RuntimeError> {
    lock(&self.state).ups.push((config_paths.to_vec(), service.to_string()));
    Ok(())
  }

  async fn rm(&self, config_paths: &[PathBuf]) -> Result<(), RuntimeError> {
    lock(&self.state).rms.push(config_paths.to_vec());
    Ok(())
  }
}
