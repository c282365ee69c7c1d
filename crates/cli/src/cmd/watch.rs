//! Implementation of the `devloop watch` command.
//!
//! Without `--dry-run` this only reports which targets each coalesced batch of
//! edits belongs to. With it, the full build controller runs against the
//! in-process backends so the chosen strategy and its calls show up in the log.
//!
//! Edits to the targets file, its config files or its ignore file reload the
//! targets and bring the watches in line before the session carries on.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use devloop_lib::build::{Backends, CompositeBuildAndDeployer};
use devloop_lib::config::EngineConfig;
use devloop_lib::engine::{BuildController, EngineAction, RunExit, remove_stale_deploys};
use devloop_lib::fake::{FakeCluster, FakeCompose, FakeRuntime};
use devloop_lib::model::TargetKind;
use devloop_lib::watch::{NotifyWatcherMaker, WatchManager, WatcherMaker};

use crate::output::{format_duration, print_error, print_info, print_stat, print_success, print_warning};
use crate::targets::TargetsFile;

pub fn cmd_watch(path: &Path, config: &EngineConfig, dry_run: bool) -> Result<()> {
  let file = TargetsFile::load(path)?;
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(async {
    let cancel = CancellationToken::new();
    {
      let cancel = cancel.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          cancel.cancel();
        }
      });
    }
    watch(file, config, dry_run, Arc::new(NotifyWatcherMaker), cancel).await
  })
}

async fn watch(
  mut file: TargetsFile,
  config: &EngineConfig,
  dry_run: bool,
  maker: Arc<dyn WatcherMaker>,
  cancel: CancellationToken,
) -> Result<()> {
  let coalesce = config.coalesce();
  let watches = WatchManager::new(maker, coalesce);
  let (tx, mut rx) = mpsc::channel::<EngineAction>(64);
  let inputs = file.watch_inputs()?;
  watches.on_change(&inputs, &tx).context("Failed to start file watches")?;

  print_info(&format!("Watching {} target(s), press Ctrl-C to stop", inputs.targets.len()));
  print_stat("Quiet period", &format_duration(coalesce.min_rest));
  print_stat("Longest batch", &format_duration(coalesce.max_duration));

  let backends = dry_run.then(|| Backends {
    runtime: Arc::new(FakeRuntime::new()),
    cluster: Arc::new(FakeCluster::new()),
    compose: Arc::new(FakeCompose::new()),
    agents: None,
  });
  let mut controller = backends.as_ref().map(|backends| {
    let chain = CompositeBuildAndDeployer::default_chain(backends, config);
    print_stat("Strategies", &chain.names().join(", "));
    BuildController::new(chain)
  });

  loop {
    let exit = match controller.as_mut() {
      Some(controller) => controller.run(&file.targets, &mut rx, &cancel).await,
      None => report(&mut rx, &cancel).await,
    };
    let RunExit::ConfigChanged(changed) = exit else {
      break;
    };
    print_info(&format!("{} config file(s) changed, reloading targets", changed.len()));

    let reloaded = TargetsFile::load(&file.path).and_then(|next| {
      let inputs = next.watch_inputs()?;
      Ok((next, inputs))
    });
    let (next, inputs) = match reloaded {
      Ok(reloaded) => reloaded,
      Err(e) => {
        print_warning(&format!("Keeping previous targets: {:#}", e));
        continue;
      }
    };
    if let Err(e) = watches.on_change(&inputs, &tx) {
      print_warning(&format!("Keeping previous watches: {}", e));
      continue;
    }
    if let Some(backends) = &backends {
      match remove_stale_deploys(&file.targets, &next.targets, backends.cluster.as_ref(), backends.compose.as_ref()).await {
        Ok(removed) if !removed.is_empty() => print_info(&format!("Removed {} stale deploy(s)", removed.len())),
        Ok(_) => {}
        Err(e) => print_error(&format!("Removing stale deploys: {}", e)),
      }
    }
    print_info(&format!("Watching {} target(s)", inputs.targets.len()));
    file = next;
  }

  match controller {
    Some(controller) => print_success(&format!("Stopped with {} target(s) tracked", controller.state().len())),
    None => print_success("Stopped"),
  }
  watches.close_all();
  Ok(())
}

/// Print each batch until cancelled, or until a config file changes.
async fn report(actions: &mut mpsc::Receiver<EngineAction>, cancel: &CancellationToken) -> RunExit {
  loop {
    let action = tokio::select! {
      _ = cancel.cancelled() => return RunExit::Stopped,
      action = actions.recv() => match action {
        Some(action) => action,
        None => return RunExit::Stopped,
      },
    };
    match action {
      EngineAction::FilesChanged { target, files } if target.kind == TargetKind::Configs => {
        return RunExit::ConfigChanged(files);
      }
      EngineAction::FilesChanged { target, files } => {
        print_info(&format!("{}: {} file(s) changed", target, files.len()));
        for file in files {
          println!("    {}", file.display());
        }
      }
      EngineAction::WatchFailed { target, message } => print_error(&format!("{}: {}", target, message)),
      EngineAction::ContainersObserved { .. } => {}
    }
  }
}
