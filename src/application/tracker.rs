use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::api::registry::RequestHandle;
use crate::domain::{DownloadItem, DownloadPhase};

/// Change notifications emitted by the tracker
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Started {
        id: String,
    },
    Progress {
        id: String,
        progress: u32,
        loaded: u64,
        total: u64,
    },
    Failed {
        id: String,
        message: String,
    },
    Removed {
        id: String,
    },
}

type Subscriber = Arc<dyn Fn(&DownloadEvent) + Send + Sync>;

struct TrackedDownload {
    item: DownloadItem,
    handle: RequestHandle,
}

/// Shared map of in-flight downloads keyed by caller-supplied id, with
/// a subscription mechanism in place of framework reactivity.
#[derive(Default)]
pub struct DownloadTracker {
    files: Mutex<HashMap<String, TrackedDownload>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: impl Fn(&DownloadEvent) + Send + Sync + 'static) {
        self.lock_subscribers().push(Arc::new(subscriber));
    }

    /// Track a new download. Returns false without touching anything
    /// when an item with the same id is still downloading.
    pub fn begin(&self, id: &str, item: DownloadItem, handle: RequestHandle) -> bool {
        {
            let mut files = self.lock_files();
            if let Some(existing) = files.get(id) {
                if existing.item.downloading() {
                    return false;
                }
            }
            files.insert(id.to_string(), TrackedDownload { item, handle });
        }
        self.emit(&DownloadEvent::Started { id: id.to_string() });
        true
    }

    pub fn update_progress(&self, id: &str, progress: u32, loaded: u64, total: u64) {
        {
            let mut files = self.lock_files();
            let Some(tracked) = files.get_mut(id) else {
                return;
            };
            tracked.item.progress = progress;
            tracked.item.loaded = loaded;
            tracked.item.total = total;
        }
        self.emit(&DownloadEvent::Progress {
            id: id.to_string(),
            progress,
            loaded,
            total,
        });
    }

    pub fn complete(&self, id: &str) {
        let mut files = self.lock_files();
        if let Some(tracked) = files.get_mut(id) {
            tracked.item.phase = DownloadPhase::Completed;
        }
    }

    pub fn fail(&self, id: &str, phase: DownloadPhase, message: &str) {
        {
            let mut files = self.lock_files();
            let Some(tracked) = files.get_mut(id) else {
                return;
            };
            tracked.item.phase = phase;
            tracked.item.error_message = Some(message.to_string());
        }
        self.emit(&DownloadEvent::Failed {
            id: id.to_string(),
            message: message.to_string(),
        });
    }

    /// Drop an item. Unknown ids are a silent no-op.
    pub fn remove(&self, id: &str) {
        let removed = self.lock_files().remove(id).is_some();
        if removed {
            self.emit(&DownloadEvent::Removed { id: id.to_string() });
        }
    }

    /// Cancel the transfer behind an item. Returns false for unknown ids.
    pub fn cancel(&self, id: &str) -> bool {
        let files = self.lock_files();
        match files.get(id) {
            Some(tracked) => {
                tracked.handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn item(&self, id: &str) -> Option<DownloadItem> {
        self.lock_files().get(id).map(|t| t.item.clone())
    }

    pub fn is_downloading(&self, id: &str) -> bool {
        self.lock_files()
            .get(id)
            .map(|t| t.item.downloading())
            .unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.lock_files().len()
    }

    fn emit(&self, event: &DownloadEvent) {
        // Snapshot first: callbacks may subscribe or mutate the tracker.
        let subscribers: Vec<Subscriber> = self.lock_subscribers().clone();
        for subscriber in &subscribers {
            subscriber(event);
        }
    }

    fn lock_files(&self) -> MutexGuard<'_, HashMap<String, TrackedDownload>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::registry::RequestRegistry;
    use serde_json::Map;
    use std::sync::Arc;

    fn item(name: &str) -> DownloadItem {
        DownloadItem {
            url: "https://cdn.example/file".to_string(),
            name: name.to_string(),
            progress: 0,
            loaded: 0,
            total: 0,
            phase: DownloadPhase::Downloading,
            error_message: None,
            extras: Map::new(),
        }
    }

    #[test]
    fn test_begin_is_idempotent_while_downloading() {
        let registry = RequestRegistry::new();
        let tracker = DownloadTracker::new();

        assert!(tracker.begin("a", item("one.pdf"), registry.register()));
        assert!(!tracker.begin("a", item("one.pdf"), registry.register()));
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn test_begin_replaces_settled_item() {
        let registry = RequestRegistry::new();
        let tracker = DownloadTracker::new();

        tracker.begin("a", item("one.pdf"), registry.register());
        tracker.fail("a", DownloadPhase::Failed, "boom");
        assert!(tracker.begin("a", item("one.pdf"), registry.register()));
    }

    #[test]
    fn test_remove_unknown_is_silent() {
        let tracker = DownloadTracker::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        tracker.subscribe(move |event| sink.lock().unwrap().push(format!("{:?}", event)));

        tracker.remove("nope");
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_events_follow_lifecycle() {
        let registry = RequestRegistry::new();
        let tracker = DownloadTracker::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        tracker.subscribe(move |event| {
            let kind = match event {
                DownloadEvent::Started { .. } => "started",
                DownloadEvent::Progress { .. } => "progress",
                DownloadEvent::Failed { .. } => "failed",
                DownloadEvent::Removed { .. } => "removed",
            };
            sink.lock().unwrap().push(kind.to_string());
        });

        tracker.begin("a", item("one.pdf"), registry.register());
        tracker.update_progress("a", 50, 512, 1024);
        tracker.remove("a");

        assert_eq!(*events.lock().unwrap(), vec!["started", "progress", "removed"]);
    }

    #[test]
    fn test_subscriber_can_resubscribe_during_emit() {
        let registry = RequestRegistry::new();
        let tracker = Arc::new(DownloadTracker::new());
        let observer = tracker.clone();
        let seen = Arc::new(Mutex::new(0));
        let count = seen.clone();
        tracker.subscribe(move |_| {
            *count.lock().unwrap() += 1;
            observer.subscribe(|_| {});
        });

        tracker.begin("a", item("one.pdf"), registry.register());

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_cancel_trips_the_handle() {
        let registry = RequestRegistry::new();
        let tracker = DownloadTracker::new();
        let handle = registry.register();

        tracker.begin("a", item("one.pdf"), handle.clone());
        assert!(tracker.cancel("a"));
        assert!(handle.is_cancelled());
        assert!(!tracker.cancel("missing"));
    }

    #[test]
    fn test_progress_update_mutates_item() {
        let registry = RequestRegistry::new();
        let tracker = DownloadTracker::new();

        tracker.begin("a", item("one.pdf"), registry.register());
        tracker.update_progress("a", 40, 400, 1000);

        let item = tracker.item("a").unwrap();
        assert_eq!(item.progress, 40);
        assert_eq!(item.loaded, 400);
        assert_eq!(item.total, 1000);
    }
}
