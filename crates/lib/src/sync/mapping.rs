//! Mapping changed local files onto container paths.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::SyncRule;

/// A local file and where it lands inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
  pub local_path: PathBuf,
  pub container_path: String,
}

/// Changed files split by whether a sync rule covers them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedFiles {
  pub mappings: Vec<PathMapping>,
  pub unmapped: Vec<PathBuf>,
}

impl MappedFiles {
  pub fn is_complete(&self) -> bool {
    self.unmapped.is_empty()
  }
}

/// Map each changed file through the first sync rule whose local root contains it.
///
/// The container path is the rule's destination joined with the file's path
/// relative to the rule's root. Files need not exist on disk: a deleted file
/// maps the same way as a modified one.
///
/// # Arguments
///
/// * `files` - Absolute local paths
/// * `syncs` - Sync rules in declared order
pub fn map_files(files: &[PathBuf], syncs: &[SyncRule]) -> MappedFiles {
  let mut out = MappedFiles::default();
  for file in files {
    match syncs.iter().find_map(|s| map_one(file, s)) {
      Some(container_path) => out.mappings.push(PathMapping {
        local_path: file.clone(),
        container_path,
      }),
      None => out.unmapped.push(file.clone()),
    }
  }
  out
}

/// Like [`map_files`], dropping files no rule covers.
pub fn files_to_path_mappings(files: &[PathBuf], syncs: &[SyncRule]) -> Vec<PathMapping> {
  map_files(files, syncs).mappings
}

fn map_one(file: &Path, sync: &SyncRule) -> Option<String> {
  let rel = file.strip_prefix(&sync.local_path).ok()?;
  if rel.as_os_str().is_empty() {
    // The rule names the file itself.
    if sync.container_path.ends_with('/') {
      let name = file.file_name()?;
      return Some(container_join(&sync.container_path, Path::new(name)));
    }
    return Some(sync.container_path.clone());
  }
  Some(container_join(&sync.container_path, rel))
}

fn container_join(base: &str, rel: &Path) -> String {
  let mut out = base.trim_end_matches('/').to_string();
  for component in rel.components() {
    if let Component::Normal(part) = component {
      out.push('/');
      out.push_str(&part.to_string_lossy());
    }
  }
  if out.is_empty() { "/".to_string() } else { out }
}
