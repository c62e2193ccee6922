//! Raw watcher notifications to normalized change events.
//!
//! Platforms report a rename either as one event carrying both paths or as
//! a "moved from" / "moved to" pair. Pairs are matched by the watcher's
//! tracker cookie when present, otherwise in arrival order. A "from" with
//! no partner in the batch becomes a deletion; a lone "to" becomes a
//! creation.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::watch::events::{ChangeEvent, ChangeKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RawChange {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    MovedFrom { path: PathBuf, tracker: Option<usize> },
    MovedTo { path: PathBuf, tracker: Option<usize> },
    Moved { from: PathBuf, to: PathBuf },
}

/// Splits one notify event into raw changes. Access and unknown events
/// produce nothing.
pub(crate) fn from_notify(event: Event) -> Vec<RawChange> {
    let tracker = event.tracker();
    let mut paths = event.paths.into_iter();
    match event.kind {
        EventKind::Create(_) => paths.map(RawChange::Created).collect(),
        EventKind::Remove(_) => paths.map(RawChange::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => paths
                .map(|path| RawChange::MovedFrom { path, tracker })
                .collect(),
            RenameMode::To => paths
                .map(|path| RawChange::MovedTo { path, tracker })
                .collect(),
            RenameMode::Both => match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => vec![RawChange::Moved { from, to }],
                (Some(path), None) => vec![RawChange::Modified(path)],
                _ => Vec::new(),
            },
            // Direction unknown: decide by whether the path is still there.
            RenameMode::Any | RenameMode::Other => paths
                .map(|path| {
                    if path.exists() {
                        RawChange::MovedTo { path, tracker }
                    } else {
                        RawChange::MovedFrom { path, tracker }
                    }
                })
                .collect(),
        },
        EventKind::Modify(_) => paths.map(RawChange::Modified).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Folds a batch of raw changes into events under `root`, in arrival order.
pub(crate) fn coalesce(raw: Vec<RawChange>, root: &Path, timestamp: SystemTime) -> Vec<ChangeEvent> {
    let mut out: Vec<ChangeEvent> = Vec::new();
    let mut pending_from: Vec<(PathBuf, Option<usize>)> = Vec::new();

    for change in raw {
        let event = match change {
            RawChange::Created(path) => ChangeEvent::new(ChangeKind::Created, path),
            RawChange::Modified(path) => ChangeEvent::new(ChangeKind::Modified, path),
            RawChange::Removed(path) => ChangeEvent::new(ChangeKind::Deleted, path),
            RawChange::MovedFrom { path, tracker } => {
                pending_from.push((path, tracker));
                continue;
            }
            RawChange::MovedTo { path, tracker } => match take_partner(&mut pending_from, tracker) {
                Some(from) => ChangeEvent::renamed(from, path),
                None => ChangeEvent::new(ChangeKind::Created, path),
            },
            RawChange::Moved { from, to } => {
                let event = ChangeEvent::renamed(from, to);
                // Some backends report the pair and then the combined event.
                if out.iter().any(|e| e.same_change(&event)) {
                    continue;
                }
                event
            }
        };
        push_event(&mut out, event);
    }

    for (path, _) in pending_from {
        push_event(&mut out, ChangeEvent::new(ChangeKind::Deleted, path));
    }

    out.into_iter()
        .filter(|e| {
            e.path.starts_with(root) || e.new_path.as_deref().is_some_and(|p| p.starts_with(root))
        })
        .filter(|e| e.path != root)
        .map(|e| e.at(timestamp))
        .collect()
}

fn take_partner(pending: &mut Vec<(PathBuf, Option<usize>)>, tracker: Option<usize>) -> Option<PathBuf> {
    let index = match tracker {
        Some(cookie) => pending
            .iter()
            .position(|(_, t)| *t == Some(cookie))
            .or_else(|| pending.iter().position(|(_, t)| t.is_none())),
        None => pending.iter().position(|(_, t)| t.is_none()),
    }?;
    Some(pending.remove(index).0)
}

/// Drops an event identical to the one just before it.
fn push_event(out: &mut Vec<ChangeEvent>, event: ChangeEvent) {
    if out.last().is_some_and(|last| last.same_change(&event)) {
        return;
    }
    out.push(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    fn root() -> PathBuf {
        PathBuf::from("/store")
    }

    fn p(name: &str) -> PathBuf {
        root().join(name)
    }

    fn kinds(events: &[ChangeEvent]) -> Vec<ChangeKind> {
        events.iter().map(|e| e.change_kind).collect()
    }

    #[test]
    fn tracked_pair_becomes_one_rename() {
        let raw = vec![
            RawChange::MovedFrom { path: p("a.txt"), tracker: Some(7) },
            RawChange::MovedTo { path: p("b.txt"), tracker: Some(7) },
        ];
        let events = coalesce(raw, &root(), SystemTime::UNIX_EPOCH);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change_kind, ChangeKind::Renamed);
        assert_eq!(events[0].path, p("a.txt"));
        assert_eq!(events[0].new_path, Some(p("b.txt")));
        assert_eq!(events[0].timestamp, SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn untracked_pair_matches_in_order() {
        let raw = vec![
            RawChange::MovedFrom { path: p("a"), tracker: None },
            RawChange::MovedTo { path: p("b"), tracker: None },
        ];
        let events = coalesce(raw, &root(), SystemTime::now());
        assert_eq!(kinds(&events), vec![ChangeKind::Renamed]);
    }

    #[test]
    fn unmatched_halves_become_delete_and_create() {
        let raw = vec![
            RawChange::MovedTo { path: p("arrived"), tracker: Some(1) },
            RawChange::MovedFrom { path: p("left"), tracker: Some(2) },
        ];
        let events = coalesce(raw, &root(), SystemTime::now());
        assert_eq!(kinds(&events), vec![ChangeKind::Created, ChangeKind::Deleted]);
        assert_eq!(events[1].path, p("left"));
    }

    #[test]
    fn combined_event_after_pair_is_not_repeated() {
        let raw = vec![
            RawChange::MovedFrom { path: p("a"), tracker: Some(3) },
            RawChange::MovedTo { path: p("b"), tracker: Some(3) },
            RawChange::Moved { from: p("a"), to: p("b") },
        ];
        let events = coalesce(raw, &root(), SystemTime::now());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn repeated_modifications_collapse() {
        let raw = vec![
            RawChange::Modified(p("f")),
            RawChange::Modified(p("f")),
            RawChange::Modified(p("g")),
        ];
        let events = coalesce(raw, &root(), SystemTime::now());
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn paths_outside_root_are_dropped() {
        let raw = vec![
            RawChange::Created(PathBuf::from("/elsewhere/x")),
            RawChange::Created(root()),
            RawChange::Created(p("inside")),
        ];
        let events = coalesce(raw, &root(), SystemTime::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, p("inside"));
    }

    #[test]
    fn notify_kinds_map_to_raw_changes() {
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(p("n"));
        assert_eq!(from_notify(created), vec![RawChange::Created(p("n"))]);

        let removed = Event::new(EventKind::Remove(RemoveKind::Any)).add_path(p("n"));
        assert_eq!(from_notify(removed), vec![RawChange::Removed(p("n"))]);

        let written = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(p("n"));
        assert_eq!(from_notify(written), vec![RawChange::Modified(p("n"))]);

        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(p("a"))
            .add_path(p("b"));
        assert_eq!(
            from_notify(both),
            vec![RawChange::Moved { from: p("a"), to: p("b") }]
        );

        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(p("a"))
            .set_tracker(9);
        assert_eq!(
            from_notify(from),
            vec![RawChange::MovedFrom { path: p("a"), tracker: Some(9) }]
        );

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any)).add_path(p("n"));
        assert!(from_notify(access).is_empty());
    }
}
