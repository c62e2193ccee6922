//! Change notification: platform watcher, rename coalescing and the
//! subscriber bus shared with the store.

pub(crate) mod coalesce;
pub mod events;
pub mod notifier;

pub use events::{ChangeEvent, ChangeKind, EventBus, StoreEvent, SubscriberId, Subscription};
pub use notifier::{BATCH_WINDOW, ChangeNotifier, WatchHandle};
