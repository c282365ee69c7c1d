//! Build context archives.

use std::io;
use std::path::Path;

use ignore::WalkBuilder;
use tar::{Builder, Header};
use tracing::debug;

use crate::consts::DOCKERFILE_NAME;
use crate::model::{IgnoreMatcher, ImageTarget, PathMatcher};

/// Tar the target's build context, with `dockerfile` as its Dockerfile.
///
/// `.git` directories, `.gitignore` and `.dockerignore` rules, and the
/// target's own ignore patterns are left out. Any Dockerfile already in the
/// context root is replaced by `dockerfile`.
pub fn build_context(target: &ImageTarget, dockerfile: &str) -> io::Result<Vec<u8>> {
  let root = target.build.context.as_path();
  let ignores = IgnoreMatcher::new(&target.ignores).map_err(io::Error::other)?;

  let walker = WalkBuilder::new(root)
    .hidden(false)
    .git_ignore(true)
    .git_global(false)
    .git_exclude(false)
    .require_git(false)
    .add_custom_ignore_filename(".dockerignore")
    .filter_entry(|entry| entry.file_name() != ".git")
    .build();

  let mut builder = Builder::new(Vec::new());
  builder.follow_symlinks(false);
  let mut files = 0usize;

  for entry in walker {
    let entry = entry.map_err(io::Error::other)?;
    let path = entry.path();
    let Ok(rel) = path.strip_prefix(root) else {
      continue;
    };
    if rel.as_os_str().is_empty() || rel == Path::new(DOCKERFILE_NAME) || ignores.matches(path) {
      continue;
    }

    let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
    if is_dir {
      builder.append_dir(rel, path)?;
    } else {
      builder.append_path_with_name(path, rel)?;
      files += 1;
    }
  }

  let mut header = Header::new_gnu();
  header.set_size(dockerfile.len() as u64);
  header.set_mode(0o644);
  header.set_cksum();
  builder.append_data(&mut header, DOCKERFILE_NAME, dockerfile.as_bytes())?;

  debug!(context = %root.display(), files, "built image context");
  builder.into_inner()
}
