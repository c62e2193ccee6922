//! Platform watcher adapter.
//!
//! The notify callback runs on the watcher's own thread and only pushes
//! into a bounded queue. A tokio task drains the queue in short batches,
//! coalesces renames, invalidates the usage cache and publishes to the bus.

use log::{debug, info, warn};
use notify::{Config, Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WatchBackend;
use crate::error::StoreError;
use crate::quota::UsageCache;
use crate::watch::coalesce::{RawChange, coalesce, from_notify};
use crate::watch::events::{EventBus, StoreEvent};

/// Notifications arriving within this window are coalesced together.
pub const BATCH_WINDOW: Duration = Duration::from_millis(50);
const RAW_QUEUE_CAPACITY: usize = 1024;

type RawSender = mpsc::Sender<notify::Result<Event>>;
type RawReceiver = mpsc::Receiver<notify::Result<Event>>;

pub struct ChangeNotifier {
    root: PathBuf,
    cache: Arc<UsageCache>,
    bus: Arc<EventBus>,
    backend: WatchBackend,
    poll_interval: Duration,
}

impl ChangeNotifier {
    pub fn new(
        root: PathBuf,
        cache: Arc<UsageCache>,
        bus: Arc<EventBus>,
        backend: WatchBackend,
        poll_interval: Duration,
    ) -> Self {
        Self {
            root,
            cache,
            bus,
            backend,
            poll_interval,
        }
    }

    /// Starts watching the root recursively and spawns the forwarding task
    /// on the current tokio runtime.
    pub fn start(self) -> Result<WatchHandle, StoreError> {
        let runtime = Handle::try_current().map_err(|_| {
            StoreError::InvalidConfig("watching requires a running tokio runtime".into())
        })?;

        let (tx, rx) = mpsc::channel(RAW_QUEUE_CAPACITY);
        let watcher = self.build_watcher(tx)?;

        let cancel = CancellationToken::new();
        let task = runtime.spawn(forward(
            self.root.clone(),
            Arc::clone(&self.cache),
            Arc::clone(&self.bus),
            rx,
            cancel.clone(),
        ));
        info!("Watching {} ({:?})", self.root.display(), self.backend);
        Ok(WatchHandle {
            _watcher: watcher,
            task,
            cancel,
        })
    }

    fn build_watcher(&self, tx: RawSender) -> Result<Box<dyn Watcher + Send>, StoreError> {
        let result = match self.backend {
            WatchBackend::Native => self.native(tx),
            WatchBackend::Polling => self.polling(tx),
            WatchBackend::Auto => match self.native(tx.clone()) {
                Ok(watcher) => Ok(watcher),
                Err(e) => {
                    warn!("Native watcher unavailable ({e}), falling back to polling");
                    self.polling(tx)
                }
            },
        };
        result.map_err(|e| StoreError::IoFailure {
            path: self.root.clone(),
            source: std::io::Error::other(e.to_string()),
        })
    }

    fn native(&self, tx: RawSender) -> notify::Result<Box<dyn Watcher + Send>> {
        let mut watcher =
            RecommendedWatcher::new(self.handler(tx), Config::default())?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        Ok(Box::new(watcher))
    }

    fn polling(&self, tx: RawSender) -> notify::Result<Box<dyn Watcher + Send>> {
        let config = Config::default().with_poll_interval(self.poll_interval);
        let mut watcher = PollWatcher::new(self.handler(tx), config)?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        Ok(Box::new(watcher))
    }

    /// Never blocks the watcher thread. A dropped notification leaves the
    /// usage figure unknown, so the cache is invalidated instead.
    fn handler(&self, tx: RawSender) -> impl FnMut(notify::Result<Event>) + Send + 'static {
        let cache = Arc::clone(&self.cache);
        move |res| {
            if let Err(e) = tx.try_send(res) {
                warn!("Dropping watcher notification: {e}");
                cache.invalidate();
            }
        }
    }
}

/// Keeps the watcher alive. Dropping or stopping it ends forwarding.
pub struct WatchHandle {
    _watcher: Box<dyn Watcher + Send>,
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl WatchHandle {
    pub fn stop(self) {
        self.cancel.cancel();
        debug!("Watcher stop requested");
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn forward(
    root: PathBuf,
    cache: Arc<UsageCache>,
    bus: Arc<EventBus>,
    mut rx: RawReceiver,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };

        let mut raw = Vec::new();
        collect(first, &mut raw);
        let deadline = Instant::now() + BATCH_WINDOW;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => break,
                next = rx.recv() => match next {
                    Some(next) => collect(next, &mut raw),
                    None => break,
                },
            }
        }

        let events = coalesce(raw, &root, SystemTime::now());
        if events.is_empty() {
            continue;
        }
        cache.invalidate();
        for event in events {
            debug!("{:?} {}", event.change_kind, event.path.display());
            bus.publish(StoreEvent::FileSystemChanged(event));
        }
    }
    debug!("Change forwarding for {} stopped", root.display());
}

fn collect(next: notify::Result<Event>, raw: &mut Vec<RawChange>) {
    match next {
        Ok(event) => raw.extend(from_notify(event)),
        Err(e) => warn!("Watcher error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::events::ChangeKind;
    use notify::EventKind;
    use notify::event::{CreateKind, ModifyKind, RenameMode};
    use tempfile::TempDir;

    fn spawn_forward(root: PathBuf) -> (RawSender, Arc<UsageCache>, Arc<EventBus>, CancellationToken) {
        let (tx, rx) = mpsc::channel(16);
        let cache = Arc::new(UsageCache::new(root.clone()));
        let bus = Arc::new(EventBus::new(16));
        let cancel = CancellationToken::new();
        tokio::spawn(forward(
            root,
            Arc::clone(&cache),
            Arc::clone(&bus),
            rx,
            cancel.clone(),
        ));
        (tx, cache, bus, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn split_rename_in_one_batch_is_coalesced() {
        let root = PathBuf::from("/store");
        let (tx, _cache, bus, cancel) = spawn_forward(root.clone());
        let mut sub = bus.subscribe();

        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(root.join("a"))
            .set_tracker(1);
        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(root.join("b"))
            .set_tracker(1);
        tx.send(Ok(from)).await.unwrap();
        tx.send(Ok(to)).await.unwrap();

        let StoreEvent::FileSystemChanged(event) = sub.recv().await.unwrap() else {
            panic!("expected a change event");
        };
        assert_eq!(event.change_kind, ChangeKind::Renamed);
        assert_eq!(event.new_path, Some(root.join("b")));
        assert!(sub.try_recv().is_none());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn batch_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let (tx, cache, bus, cancel) = spawn_forward(root.clone());
        let mut sub = bus.subscribe();
        cache
            .current_usage(Duration::from_secs(300), &CancellationToken::new())
            .await
            .unwrap();
        assert!(cache.cached(Duration::from_secs(300)).is_some());

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(root.join("new"));
        tx.send(Ok(created)).await.unwrap();
        sub.recv().await.unwrap();
        assert!(cache.cached(Duration::from_secs(300)).is_none());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn events_outside_root_are_not_published() {
        let root = PathBuf::from("/store");
        let (tx, _cache, bus, cancel) = spawn_forward(root.clone());
        let mut sub = bus.subscribe();
        let outside = Event::new(EventKind::Create(CreateKind::File)).add_path("/other/x".into());
        tx.send(Ok(outside)).await.unwrap();
        tokio::time::sleep(BATCH_WINDOW * 2).await;
        assert!(sub.try_recv().is_none());
        cancel.cancel();
    }

    #[tokio::test]
    async fn polling_backend_reports_new_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let cache = Arc::new(UsageCache::new(root.clone()));
        let bus = Arc::new(EventBus::new(64));
        let mut sub = bus.subscribe();
        let handle = ChangeNotifier::new(
            root.clone(),
            cache,
            bus,
            WatchBackend::Polling,
            Duration::from_millis(50),
        )
        .start()
        .unwrap();
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(root.join("seen.txt"), b"x").unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("no event within timeout")
            .unwrap();
        assert!(matches!(event, StoreEvent::FileSystemChanged(_)));
        handle.stop();
    }

    #[test]
    fn start_outside_runtime_is_rejected() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let notifier = ChangeNotifier::new(
            root.clone(),
            Arc::new(UsageCache::new(root)),
            Arc::new(EventBus::new(4)),
            WatchBackend::Polling,
            Duration::from_millis(50),
        );
        assert!(matches!(notifier.start(), Err(StoreError::InvalidConfig(_))));
    }
}
