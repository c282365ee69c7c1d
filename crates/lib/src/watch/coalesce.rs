//! Batching a bursty file event stream.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::trace;

use super::FileEvent;
use crate::consts::{DEFAULT_WATCH_MAX_DURATION_MS, DEFAULT_WATCH_MIN_REST_MS};

/// The two coalescing timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalesceConfig {
  /// A batch closes after this long without a new event.
  pub min_rest: Duration,
  /// A batch closes this long after its first event, no matter what.
  pub max_duration: Duration,
}

impl Default for CoalesceConfig {
  fn default() -> Self {
    Self {
      min_rest: Duration::from_millis(DEFAULT_WATCH_MIN_REST_MS),
      max_duration: Duration::from_millis(DEFAULT_WATCH_MAX_DURATION_MS),
    }
  }
}

/// Coalesce a raw event stream into batches.
///
/// The first event of a batch arms two timers: `min_rest`, re-armed by every
/// later event, and `max_duration`, never re-armed. The batch is emitted when
/// either fires. When the source closes, any pending events are emitted as a
/// final batch and the output closes.
///
/// Must be called inside a Tokio runtime.
pub fn coalesce_events(
  mut events: mpsc::UnboundedReceiver<FileEvent>,
  config: CoalesceConfig,
) -> mpsc::Receiver<Vec<FileEvent>> {
  let (tx, rx) = mpsc::channel(1);

  tokio::spawn(async move {
    while let Some(first) = events.recv().await {
      let mut batch = vec![first];
      let mut source_closed = false;

      let rest = sleep(config.min_rest);
      let max = sleep(config.max_duration);
      tokio::pin!(rest, max);

      loop {
        tokio::select! {
          event = events.recv() => match event {
            Some(event) => {
              batch.push(event);
              rest.as_mut().reset(Instant::now() + config.min_rest);
            }
            None => {
              source_closed = true;
              break;
            }
          },
          _ = &mut rest => break,
          _ = &mut max => break,
        }
      }

      trace!(events = batch.len(), "emitting file event batch");
      if tx.send(batch).await.is_err() || source_closed {
        return;
      }
    }
  });

  rx
}
