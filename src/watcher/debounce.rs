use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::types::FileEvent;

/// Pending events keyed by path, each with the time it was last touched.
#[derive(Debug, Default)]
pub struct DebounceTable {
    pending: HashMap<PathBuf, (FileEvent, Instant)>,
}

impl DebounceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event`, replacing anything pending for the same path.
    pub fn push(&mut self, event: FileEvent, now: Instant) {
        self.pending.insert(event.path.clone(), (event, now));
    }

    /// Removes and returns the events quiet for at least `window`, oldest first.
    pub fn take_due(&mut self, now: Instant, window: Duration) -> Vec<FileEvent> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| now.saturating_duration_since(*at) >= window)
            .map(|(path, _)| path.clone())
            .collect();
        let mut out: Vec<(FileEvent, Instant)> = due.iter().filter_map(|p| self.pending.remove(p)).collect();
        out.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.path.cmp(&b.0.path)));
        out.into_iter().map(|(event, _)| event).collect()
    }

    /// Removes and returns everything, oldest first.
    pub fn take_all(&mut self) -> Vec<FileEvent> {
        let mut out: Vec<(FileEvent, Instant)> = self.pending.drain().map(|(_, v)| v).collect();
        out.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.path.cmp(&b.0.path)));
        out.into_iter().map(|(event, _)| event).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Collapses bursts of events per path.
///
/// Events are emitted once a path stays quiet for `window`, checked every
/// `window / 2`. When `input` closes the remaining events are flushed and
/// `output` is dropped.
pub fn spawn_debouncer(
    window: Duration,
    mut input: mpsc::Receiver<FileEvent>,
    output: mpsc::Sender<FileEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut table = DebounceTable::new();
        let mut ticker = interval((window / 2).max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = input.recv() => match received {
                    Some(event) => table.push(event, Instant::now()),
                    None => break,
                },
                _ = ticker.tick() => {
                    for event in table.take_due(Instant::now(), window) {
                        if output.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }

        let rest = table.take_all();
        if !rest.is_empty() {
            tracing::debug!("Flushing {} pending events", rest.len());
        }
        for event in rest {
            if output.send(event).await.is_err() {
                break;
            }
        }
    })
}
