//! The notify-backed watcher.
//!
//! notify delivers raw events on its own background thread. The handler
//! classifies them there and pushes `FileEvent`s into a bounded
//! `sync_channel`; when the channel is full the notify thread blocks until
//! the engine catches up. Watch errors go to a second, smaller channel with
//! `try_send` and are dropped when it is full.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventHandler, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, trace};

use fleet_contracts::{
    config::EngineSettings,
    error::{FleetError, FleetResult},
    event::FileEvent,
};

use crate::classify::classify;

/// Receiving ends handed to the single consumer.
#[derive(Debug)]
pub struct MonitorChannels {
    pub events: Receiver<FileEvent>,
    pub errors: Receiver<FleetError>,
}

/// A running watch over one workers root.
///
/// Clones share the same underlying watcher, so any clone can stop it.
#[derive(Debug, Clone)]
pub struct FileMonitor {
    root: PathBuf,
    watcher: Arc<Mutex<Option<RecommendedWatcher>>>,
}

impl FileMonitor {
    /// Create `root` if needed and start watching it recursively.
    pub fn start(root: &Path, settings: &EngineSettings) -> FleetResult<(Self, MonitorChannels)> {
        std::fs::create_dir_all(root).map_err(|e| FleetError::io(root, e))?;

        let (event_tx, event_rx) = sync_channel(settings.event_queue_capacity);
        let (error_tx, error_rx) = sync_channel(settings.error_queue_capacity);
        let handler = ClassifyingHandler { events: event_tx, errors: error_tx };

        let mut watcher = notify::recommended_watcher(handler).map_err(monitor_error)?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(monitor_error)?;

        info!(root = %root.display(), "file monitor started");
        let monitor = Self {
            root: root.to_path_buf(),
            watcher: Arc::new(Mutex::new(Some(watcher))),
        };
        Ok((monitor, MonitorChannels { events: event_rx, errors: error_rx }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make sure `dir` is watched.
    ///
    /// Directories under the root are already covered by the recursive
    /// watch and are not registered again. Re-registering from the consumer
    /// thread could deadlock against a notify thread blocked on a full queue.
    pub fn watch_worker_dir(&self, dir: &Path) -> FleetResult<()> {
        if dir.starts_with(&self.root) {
            trace!(dir = %dir.display(), "covered by recursive watch");
            return Ok(());
        }
        let mut slot = self.watcher.lock().map_err(|_| FleetError::LockPoisoned)?;
        match slot.as_mut() {
            Some(watcher) => {
                watcher.watch(dir, RecursiveMode::Recursive).map_err(monitor_error)?;
                debug!(dir = %dir.display(), "worker directory watched");
                Ok(())
            }
            None => Err(FleetError::Monitor { reason: "monitor is stopped".to_string() }),
        }
    }

    /// Drop the watcher. The event channel reports disconnection once the
    /// notify thread exits. Stopping twice is a no-op.
    pub fn stop(&self) {
        let taken = match self.watcher.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if taken.is_some() {
            info!(root = %self.root.display(), "file monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.watcher.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

struct ClassifyingHandler {
    events: SyncSender<FileEvent>,
    errors: SyncSender<FleetError>,
}

impl EventHandler for ClassifyingHandler {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                if let Err(TrySendError::Full(dropped)) = self.errors.try_send(monitor_error(e)) {
                    trace!(error = %dropped, "monitor error dropped");
                }
                return;
            }
        };

        let Some(path) = arrival_path(&event) else {
            return;
        };
        let Some((task_id, kind)) = classify(path) else {
            return;
        };

        trace!(task_id = %task_id, kind = %kind, path = %path.display(), "classified");
        // Blocks while the queue is full. An error means the consumer is gone.
        let _ = self
            .events
            .send(FileEvent::new(kind, task_id, Some(path.to_path_buf())));
    }
}

/// The path a file arrived at: created directly, or renamed into place.
///
/// inotify reports a rename as `From`, `To` and a paired `Both`; only `To`
/// is taken so one rename yields one event. Backends that cannot tell the
/// two ends apart report `Any`, and the hidden temp name fails
/// classification on its own.
fn arrival_path(event: &Event) -> Option<&Path> {
    match event.kind {
        notify::EventKind::Create(_)
        | notify::EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | notify::EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            event.paths.last().map(PathBuf::as_path)
        }
        _ => None,
    }
}

fn monitor_error(e: notify::Error) -> FleetError {
    FleetError::Monitor { reason: e.to_string() }
}
