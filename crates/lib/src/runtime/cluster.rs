//! Cluster and compose collaborators.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::RuntimeError;
use crate::model::{ContainerId, ImageRef, PodId};

/// The kind of cluster the engine deploys to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterEnv {
  #[default]
  None,
  DockerDesktop,
  Minikube,
  Microk8s,
  Kind,
  Gke,
  Eks,
  Aks,
  Unknown,
}

impl ClusterEnv {
  /// Whether the cluster runs on the local container runtime and shares its image store.
  pub fn is_local(self) -> bool {
    matches!(self, ClusterEnv::DockerDesktop | ClusterEnv::Minikube)
  }

  /// Whether built images must be pushed to a registry before deploy.
  pub fn needs_push(self) -> bool {
    !self.is_local()
  }
}

/// A Kubernetes object as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct K8sEntity(pub Value);

impl K8sEntity {
  pub fn kind(&self) -> Option<&str> {
    self.0.get("kind").and_then(Value::as_str)
  }

  pub fn name(&self) -> Option<&str> {
    self.0.pointer("/metadata/name").and_then(Value::as_str)
  }

  pub fn uid(&self) -> Option<&str> {
    self.0.pointer("/metadata/uid").and_then(Value::as_str)
  }

  /// Every `image` field anywhere in the object.
  pub fn images(&self) -> Vec<String> {
    let mut out = Vec::new();
    collect_images(&self.0, &mut out);
    out
  }

  /// Point every `image` field naming `image.name` at `image`.
  ///
  /// Returns the number of fields rewritten.
  pub fn inject_image(&mut self, image: &ImageRef) -> usize {
    inject_image(&mut self.0, image)
  }

  /// Set a label on the object and on its pod template, if it has one.
  pub fn inject_label(&mut self, key: &str, value: &str) {
    if let Value::Object(object) = &mut self.0 {
      add_label(object, key, value);
    }
    if let Some(Value::Object(template)) = self.0.pointer_mut("/spec/template") {
      add_label(template, key, value);
    }
  }

  pub fn label(&self, key: &str) -> Option<&str> {
    self.0.get("metadata")?.get("labels")?.get(key)?.as_str()
  }
}

fn collect_images(value: &Value, out: &mut Vec<String>) {
  match value {
    Value::Object(map) => {
      for (key, v) in map {
        match v {
          Value::String(s) if key == "image" => out.push(s.clone()),
          _ => collect_images(v, out),
        }
      }
    }
    Value::Array(items) => items.iter().for_each(|v| collect_images(v, out)),
    _ => {}
  }
}

fn add_label(object: &mut Map<String, Value>, key: &str, value: &str) {
  let meta = object
    .entry("metadata")
    .or_insert_with(|| Value::Object(Map::new()));
  if let Value::Object(meta) = meta
    && let Value::Object(labels) = meta.entry("labels").or_insert_with(|| Value::Object(Map::new()))
  {
    labels.insert(key.to_string(), Value::String(value.to_string()));
  }
}

fn inject_image(value: &mut Value, image: &ImageRef) -> usize {
  match value {
    Value::Object(map) => {
      let mut replaced = 0;
      for (key, v) in map.iter_mut() {
        if key == "image"
          && let Value::String(s) = v
        {
          if ImageRef::parse(s).is_ok_and(|r| r.name == image.name) {
            *s = image.to_string();
            replaced += 1;
          }
          continue;
        }
        replaced += inject_image(v, image);
      }
      replaced
    }
    Value::Array(items) => items.iter_mut().map(|v| inject_image(v, image)).sum(),
    _ => 0,
  }
}

/// Label selector for watch streams.
pub type LabelSelector = BTreeMap<String, String>;

/// A container as reported by a pod watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodContainer {
  pub name: String,
  pub container_id: ContainerId,
  pub image: ImageRef,
  pub ready: bool,
}

/// A change to one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodEvent {
  pub pod_id: PodId,
  pub namespace: String,
  pub containers: Vec<PodContainer>,
  pub deleted: bool,
}

/// The cluster API surface the engine uses.
#[async_trait]
pub trait ClusterClient: Send + Sync {
  /// Create or update entities. Returns them with cluster-assigned identity.
  async fn upsert(&self, entities: Vec<K8sEntity>) -> Result<Vec<K8sEntity>, RuntimeError>;

  async fn delete(&self, entities: Vec<K8sEntity>) -> Result<(), RuntimeError>;

  async fn watch_pods(&self, selector: &LabelSelector) -> Result<mpsc::Receiver<PodEvent>, RuntimeError>;
}

/// The compose surface the engine uses.
#[async_trait]
pub trait ComposeClient: Send + Sync {
  async fn up(&self, config_paths: &[PathBuf], service: &str) -> Result<(), RuntimeError>;

  async fn rm(&self, config_paths: &[PathBuf]) -> Result<(), RuntimeError>;
}
