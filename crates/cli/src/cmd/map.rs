use std::path::PathBuf;

use anyhow::{Result, bail};

use devloop_lib::model::SyncRule;
use devloop_lib::sync::map_files;

use crate::output::{OutputFormat, print_json, print_mapping, print_warning};

pub fn cmd_map(syncs: &[String], files: &[PathBuf], format: OutputFormat) -> Result<()> {
  let rules = syncs.iter().map(|s| parse_sync(s)).collect::<Result<Vec<_>>>()?;
  let mapped = map_files(files, &rules);

  if format.is_json() {
    return print_json(&serde_json::json!({
      "mappings": mapped.mappings,
      "unmapped": mapped.unmapped,
    }));
  }

  for mapping in &mapped.mappings {
    print_mapping(&mapping.local_path.display().to_string(), &mapping.container_path);
  }
  for file in &mapped.unmapped {
    print_warning(&format!("{} is not covered by any sync rule", file.display()));
  }
  Ok(())
}

/// `LOCAL:CONTAINER`, split at the last colon so drive letters survive.
fn parse_sync(s: &str) -> Result<SyncRule> {
  match s.rsplit_once(':') {
    Some((local, container)) if !local.is_empty() && container.starts_with('/') => Ok(SyncRule::new(local, container)),
    _ => bail!("Invalid sync rule '{}': expected LOCAL:CONTAINER with an absolute container path", s),
  }
}
