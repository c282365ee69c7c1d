//! Test utilities for devloop-lib.
//!
//! Helpers for laying out fixture trees in temp directories and reading back
//! the tar archives the engine produces.

use std::io::Read;
use std::path::Path;

/// Create an empty file, creating parent directories as needed.
pub fn touch(path: &Path) {
  write_file(path, "");
}

/// Write a file, creating parent directories as needed.
pub fn write_file(path: &Path, contents: &str) {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, contents).unwrap();
}

/// Entry paths and file contents of a tar archive, in archive order.
///
/// Directory entries are reported with empty contents.
pub fn tar_entries(bytes: &[u8]) -> Vec<(String, String)> {
  let mut archive = tar::Archive::new(bytes);
  let mut out = Vec::new();
  for entry in archive.entries().unwrap() {
    let mut entry = entry.unwrap();
    let path = entry.path().unwrap().to_string_lossy().into_owned();
    let mut contents = String::new();
    if entry.header().entry_type().is_file() {
      entry.read_to_string(&mut contents).unwrap();
    }
    out.push((path, contents));
  }
  out
}

/// Just the entry paths of a tar archive.
pub fn tar_paths(bytes: &[u8]) -> Vec<String> {
  tar_entries(bytes).into_iter().map(|(p, _)| p).collect()
}
