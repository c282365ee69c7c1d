use std::path::Path;

use anyhow::{Context, Result};

use devloop_lib::build::TargetQueue;
use devloop_lib::state::BuildStateSet;

use crate::output::{OutputFormat, print_info, print_json};
use crate::targets::TargetsFile;

pub fn cmd_order(path: &Path, format: OutputFormat) -> Result<()> {
  let file = TargetsFile::load(path)?;
  let queue = TargetQueue::new(&file.targets, &BuildStateSet::new()).context("Failed to order targets")?;

  if format.is_json() {
    let order: Vec<String> = queue.order().iter().map(ToString::to_string).collect();
    return print_json(&order);
  }

  print_info(&format!("{} target(s)", queue.order().len()));
  for (i, id) in queue.order().iter().enumerate() {
    let deps = queue.dependencies(id);
    if deps.is_empty() {
      println!("  {}. {}", i + 1, id);
    } else {
      let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
      println!("  {}. {} (after {})", i + 1, id, deps.join(", "));
    }
  }
  Ok(())
}
