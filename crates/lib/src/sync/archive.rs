//! In-memory tar archives of mapped files.

use std::io;

use tar::Builder;
use tracing::debug;

use super::mapping::PathMapping;
use crate::model::Cmd;

/// Files to copy into a container plus the container paths to remove.
#[derive(Debug, Default)]
pub struct SyncArchive {
  /// Tar bytes rooted at the container's `/`.
  pub bytes: Vec<u8>,
  /// Container paths whose local file no longer exists.
  pub to_delete: Vec<String>,
}

impl SyncArchive {
  /// Command that removes the deleted paths, if there are any.
  pub fn delete_cmd(&self) -> Option<Cmd> {
    if self.to_delete.is_empty() {
      return None;
    }
    let mut argv = vec!["rm".to_string(), "-rf".to_string()];
    argv.extend(self.to_delete.iter().cloned());
    Some(Cmd::new(argv))
  }
}

/// Build a tar archive containing exactly the mapped files.
///
/// Entries are named by their container path relative to `/`. Directories are
/// archived recursively. Mappings whose local path is gone are collected in
/// [`SyncArchive::to_delete`] instead.
pub fn archive_path_mappings(mappings: &[PathMapping]) -> io::Result<SyncArchive> {
  let mut builder = Builder::new(Vec::new());
  builder.follow_symlinks(false);
  let mut to_delete = Vec::new();

  for mapping in mappings {
    let meta = match std::fs::symlink_metadata(&mapping.local_path) {
      Ok(meta) => meta,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        to_delete.push(mapping.container_path.clone());
        continue;
      }
      Err(e) => return Err(e),
    };

    let name = mapping.container_path.trim_start_matches('/');
    let name = if name.is_empty() { "." } else { name };
    if meta.is_dir() {
      builder.append_dir_all(name, &mapping.local_path)?;
    } else {
      builder.append_path_with_name(&mapping.local_path, name)?;
    }
  }

  let bytes = builder.into_inner()?;
  debug!(files = mappings.len() - to_delete.len(), deleted = to_delete.len(), "built sync archive");
  Ok(SyncArchive { bytes, to_delete })
}
