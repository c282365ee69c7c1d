//! Deciding whether a change-set can be applied in place, and how.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::{Cmd, ContainerId, LiveUpdate, RunStep};
use crate::sync::{PathMapping, map_files};

/// Why a change-set cannot be live updated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Ineligible {
  /// A changed file is listed in `fall_back_on`.
  #[error("{} matches a fall_back_on path", file.display())]
  FallBackOn { file: PathBuf },

  /// Some changed files are outside every sync rule.
  #[error("changed files not covered by any sync rule: {}", display_paths(files))]
  UnsyncedFiles { files: Vec<PathBuf> },

  /// Changed files could not be read into the sync archive.
  #[error("reading changed files: {reason}")]
  UnreadableFiles { reason: String },
}

/// A run step exited non-zero with something other than the kill code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Run step \"{cmd}\" failed with exit code: {exit_code}")]
pub struct RunStepFailure {
  pub container: ContainerId,
  pub cmd: Cmd,
  pub exit_code: i64,
}

/// What to do to every running container of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveUpdatePlan {
  /// Every changed file, mapped to its container path.
  pub mappings: Vec<PathMapping>,
  /// Run steps triggered by the changed files, in declared order.
  pub runs: Vec<RunStep>,
  pub hot_reload: bool,
}

/// Check eligibility and build the patch plan for a change-set.
///
/// Eligibility is all-or-nothing: a single unmapped file makes the whole
/// change-set ineligible, so no container ever receives a partial update.
pub fn plan_live_update(live_update: &LiveUpdate, files: &[PathBuf]) -> Result<LiveUpdatePlan, Ineligible> {
  if let Some(file) = files.iter().find(|f| live_update.fall_back_on.matches(f)) {
    return Err(Ineligible::FallBackOn { file: file.clone() });
  }

  let mapped = map_files(files, &live_update.syncs);
  if !mapped.is_complete() {
    return Err(Ineligible::UnsyncedFiles { files: mapped.unmapped });
  }

  let runs = live_update
    .runs
    .iter()
    .filter(|step| step.is_triggered_by(files))
    .cloned()
    .collect();

  Ok(LiveUpdatePlan {
    mappings: mapped.mappings,
    runs,
    hot_reload: live_update.hot_reload,
  })
}

fn display_paths(paths: &[PathBuf]) -> String {
  paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{PathSet, SyncRule};

  fn live_update() -> LiveUpdate {
    LiveUpdate {
      syncs: vec![SyncRule::new("/src", "/app")],
      runs: vec![
        RunStep::new(Cmd::shell("echo hello")),
        RunStep::with_triggers(Cmd::shell("echo a"), PathSet::new("/src", ["a.txt"])),
        RunStep::with_triggers(Cmd::shell("echo b"), PathSet::new("/src", ["b.txt"])),
      ],
      fall_back_on: PathSet::new("/src", ["package.json"]),
      hot_reload: false,
    }
  }

  #[test]
  fn triggered_steps_in_declared_order() {
    let plan = plan_live_update(&live_update(), &[PathBuf::from("/src/a.txt")]).unwrap();
    let cmds: Vec<String> = plan.runs.iter().map(|r| r.cmd.to_string()).collect();
    assert_eq!(cmds, vec!["echo hello", "echo a"]);
    assert_eq!(plan.mappings[0].container_path, "/app/a.txt");
  }

  #[test]
  fn unsynced_file_is_ineligible() {
    let err = plan_live_update(
      &live_update(),
      &[PathBuf::from("/src/a.txt"), PathBuf::from("/elsewhere/x.txt")],
    )
    .unwrap_err();
    assert_eq!(
      err,
      Ineligible::UnsyncedFiles {
        files: vec![PathBuf::from("/elsewhere/x.txt")]
      }
    );
  }

  #[test]
  fn fall_back_on_wins_over_sync() {
    let err = plan_live_update(&live_update(), &[PathBuf::from("/src/package.json")]).unwrap_err();
    assert!(matches!(err, Ineligible::FallBackOn { .. }));
  }
}
