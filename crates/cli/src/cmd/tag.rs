use anyhow::{Context, Result};

use devloop_lib::digest::{Digest, digest_as_tag};

pub fn cmd_tag(digest: &str) -> Result<()> {
  let tag = digest_as_tag(&Digest::new(digest)).with_context(|| format!("Failed to derive a tag from {}", digest))?;
  println!("{}", tag);
  Ok(())
}
