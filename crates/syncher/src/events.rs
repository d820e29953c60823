//! Instance events and the listener registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use syncher_core::Diff;

/// Something that happened to an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Create,
    Load,
    /// Local data changed; carries the diff that was applied.
    Update(Diff),
    /// A change made by another instance arrived. Always followed by an
    /// [`Event::Update`] with the same diff.
    RemoteUpdate(Diff),
    Destroy,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Create => EventKind::Create,
            Event::Load => EventKind::Load,
            Event::Update(_) => EventKind::Update,
            Event::RemoteUpdate(_) => EventKind::RemoteUpdate,
            Event::Destroy => EventKind::Destroy,
        }
    }

    /// The diff carried by update events.
    pub fn diff(&self) -> Option<&Diff> {
        match self {
            Event::Update(diff) | Event::RemoteUpdate(diff) => Some(diff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Load,
    Update,
    RemoteUpdate,
    Destroy,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Create => "create",
            EventKind::Load => "load",
            EventKind::Update => "update",
            EventKind::RemoteUpdate => "remoteupdate",
            EventKind::Destroy => "destroy",
        })
    }
}

/// Handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

pub(crate) type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Listeners in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, (Option<EventKind>, Listener)>,
}

impl Listeners {
    /// Register `listener` for `kind`, or for every event when `None`.
    pub(crate) fn add(&mut self, kind: Option<EventKind>, listener: Listener) -> ListenerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, (kind, listener));
        ListenerId(id)
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        self.entries.remove(&id.0).is_some()
    }

    /// Snapshot of the listeners interested in `event`, so they can be
    /// called after the registry lock is released.
    pub(crate) fn matching(&self, event: &Event) -> Vec<Listener> {
        let kind = event.kind();
        self.entries
            .values()
            .filter(|(filter, _)| filter.map_or(true, |k| k == kind))
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
