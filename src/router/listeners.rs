//! Broadcast listener registry.
//!
//! Maps event names to ordered listener sets. A listener targets either a
//! specific frame endpoint or "the background worker of owner O". Frame
//! listeners are pruned when their endpoint is destroyed; worker listeners
//! survive restarts because they are resolved at delivery time.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::identifiers::{EndpointId, OwnerId};
use crate::transport::{Endpoint, WatchId};

// ============================================================================
// Types
// ============================================================================

/// Where a listener's events are delivered.
#[derive(Debug, Clone)]
pub enum ListenerTarget {
    /// A specific frame context.
    Frame(Endpoint),
    /// Whatever worker instance currently serves the owner.
    Worker(OwnerId),
}

impl ListenerTarget {
    /// Returns `true` if both targets address the same recipient.
    #[must_use]
    pub fn same_as(&self, other: &ListenerTarget) -> bool {
        match (self, other) {
            (Self::Frame(a), Self::Frame(b)) => a.same_as(b),
            (Self::Worker(a), Self::Worker(b)) => a == b,
            _ => false,
        }
    }

    fn frame_id(&self) -> Option<EndpointId> {
        match self {
            Self::Frame(endpoint) => Some(endpoint.id()),
            Self::Worker(_) => None,
        }
    }
}

/// A registered interest in one event.
#[derive(Debug, Clone)]
pub struct Listener {
    /// Delivery target.
    pub target: ListenerTarget,
    /// Owner that registered the listener.
    pub owner: OwnerId,
}

struct Entry {
    listener: Listener,
    watch: Option<WatchId>,
}

// ============================================================================
// ListenerRegistry
// ============================================================================

/// Event name → listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    buckets: Mutex<FxHashMap<String, Vec<Entry>>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets = self.buckets.lock();
        f.debug_struct("ListenerRegistry")
            .field("events", &buckets.len())
            .field("listeners", &buckets.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a listener for `event`.
    ///
    /// Returns `false` if the target already listens for the event.
    pub fn add(self: &Arc<Self>, event: &str, target: ListenerTarget, owner: OwnerId) -> bool {
        {
            let mut buckets = self.buckets.lock();
            let bucket = buckets.entry(event.to_string()).or_default();
            if bucket.iter().any(|e| e.listener.target.same_as(&target)) {
                trace!(event, %owner, "Listener already registered");
                return false;
            }
            bucket.push(Entry {
                listener: Listener {
                    target: target.clone(),
                    owner: owner.clone(),
                },
                watch: None,
            });
        }

        debug!(event, %owner, "Listener added");

        if let ListenerTarget::Frame(endpoint) = &target {
            let weak: Weak<Self> = Arc::downgrade(self);
            let id = endpoint.id();
            let watch = endpoint.on_destroyed(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.remove_endpoint(id);
                }
            });

            if let Some(watch) = watch {
                self.set_watch(event, id, watch);
            }
        }
        true
    }

    fn set_watch(&self, event: &str, id: EndpointId, watch: WatchId) {
        let mut buckets = self.buckets.lock();
        let entry = buckets
            .get_mut(event)
            .and_then(|bucket| bucket.iter_mut().find(|e| e.listener.target.frame_id() == Some(id)));
        if let Some(entry) = entry {
            entry.watch = Some(watch);
        }
    }

    /// Removes the listener for `target` on `event`.
    ///
    /// A bucket left empty is deleted. Returns `false` if nothing matched.
    pub fn remove(&self, event: &str, target: &ListenerTarget) -> bool {
        let removed = {
            let mut buckets = self.buckets.lock();
            let Some(bucket) = buckets.get_mut(event) else {
                return false;
            };
            let Some(index) = bucket.iter().position(|e| e.listener.target.same_as(target)) else {
                return false;
            };
            let entry = bucket.remove(index);
            if bucket.is_empty() {
                buckets.remove(event);
            }
            entry
        };

        if let (ListenerTarget::Frame(endpoint), Some(watch)) = (&removed.listener.target, removed.watch) {
            endpoint.cancel_watch(watch);
        }
        debug!(event, owner = %removed.listener.owner, "Listener removed");
        true
    }

    /// Removes every listener targeting the frame `endpoint`.
    ///
    /// Returns the number removed.
    pub fn remove_endpoint(&self, endpoint: EndpointId) -> usize {
        let removed: Vec<Entry> = {
            let mut buckets = self.buckets.lock();
            let mut removed = Vec::new();
            buckets.retain(|_, bucket| {
                let (gone, kept): (Vec<Entry>, Vec<Entry>) = bucket
                    .drain(..)
                    .partition(|e| e.listener.target.frame_id() == Some(endpoint));
                removed.extend(gone);
                *bucket = kept;
                !bucket.is_empty()
            });
            removed
        };

        for entry in &removed {
            if let (ListenerTarget::Frame(target), Some(watch)) = (&entry.listener.target, entry.watch) {
                target.cancel_watch(watch);
            }
        }

        if !removed.is_empty() {
            debug!(%endpoint, count = removed.len(), "Pruned listeners of endpoint");
        }
        removed.len()
    }

    /// Returns the listeners of `event`, restricted to `owner` if given.
    #[must_use]
    pub fn matching(&self, event: &str, owner: Option<&OwnerId>) -> Vec<Listener> {
        let buckets = self.buckets.lock();
        buckets
            .get(event)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|e| owner.is_none_or(|o| &e.listener.owner == o))
                    .map(|e| e.listener.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the total number of listeners.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.buckets.lock().values().map(Vec::len).sum()
    }

    /// Returns `true` if `event` has a bucket.
    #[inline]
    #[must_use]
    pub fn has_bucket(&self, event: &str) -> bool {
        self.buckets.lock().contains_key(event)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::testing::TestContext;

    fn owner(id: &str) -> OwnerId {
        OwnerId::new(id)
    }

    #[test]
    fn test_add_is_deduplicated() {
        let registry = ListenerRegistry::new();
        let ctx = TestContext::frame("abc");
        let target = ListenerTarget::Frame(ctx.endpoint.clone());

        assert!(registry.add("tabs.onUpdated", target.clone(), owner("abc")));
        assert!(!registry.add("tabs.onUpdated", target, owner("abc")));
        assert_eq!(registry.listener_count(), 1);
    }

    #[test]
    fn test_worker_targets_dedupe_by_owner() {
        let registry = ListenerRegistry::new();
        assert!(registry.add("e", ListenerTarget::Worker(owner("abc")), owner("abc")));
        assert!(!registry.add("e", ListenerTarget::Worker(owner("abc")), owner("abc")));
        assert!(registry.add("e", ListenerTarget::Worker(owner("def")), owner("def")));
        assert_eq!(registry.matching("e", None).len(), 2);
    }

    #[test]
    fn test_remove_deletes_empty_bucket() {
        let registry = ListenerRegistry::new();
        let target = ListenerTarget::Worker(owner("abc"));

        registry.add("e", target.clone(), owner("abc"));
        assert!(registry.has_bucket("e"));
        assert!(registry.remove("e", &target));
        assert!(!registry.has_bucket("e"));
        assert!(!registry.remove("e", &target));
    }

    #[test]
    fn test_destroyed_frame_is_pruned() {
        let registry = ListenerRegistry::new();
        let ctx = TestContext::frame("abc");
        registry.add("a", ListenerTarget::Frame(ctx.endpoint.clone()), owner("abc"));
        registry.add("b", ListenerTarget::Frame(ctx.endpoint.clone()), owner("abc"));
        registry.add("b", ListenerTarget::Worker(owner("abc")), owner("abc"));

        ctx.endpoint.destroy();

        assert!(!registry.has_bucket("a"));
        assert_eq!(registry.matching("b", None).len(), 1);
    }

    #[test]
    fn test_add_for_destroyed_frame_is_pruned_at_once() {
        let registry = ListenerRegistry::new();
        let ctx = TestContext::frame("abc");
        ctx.endpoint.destroy();

        registry.add("a", ListenerTarget::Frame(ctx.endpoint.clone()), owner("abc"));
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn test_matching_filters_by_owner() {
        let registry = ListenerRegistry::new();
        registry.add("e", ListenerTarget::Worker(owner("abc")), owner("abc"));
        registry.add("e", ListenerTarget::Worker(owner("def")), owner("def"));

        let only_abc = registry.matching("e", Some(&owner("abc")));
        assert_eq!(only_abc.len(), 1);
        assert_eq!(only_abc[0].owner, owner("abc"));
        assert!(registry.matching("other", None).is_empty());
    }

    proptest! {
        #[test]
        fn prop_add_then_remove_leaves_nothing(
            events in proptest::collection::vec("[a-z]{1,8}(\\.[a-zA-Z]{1,8})?", 1..20),
            owners in proptest::collection::vec("[a-p]{4}", 1..5),
        ) {
            let registry = ListenerRegistry::new();
            for event in &events {
                for id in &owners {
                    registry.add(event, ListenerTarget::Worker(owner(id)), owner(id));
                }
            }
            for event in &events {
                for id in &owners {
                    registry.remove(event, &ListenerTarget::Worker(owner(id)));
                    prop_assert!(registry.matching(event, Some(&owner(id))).is_empty());
                }
            }
            prop_assert_eq!(registry.listener_count(), 0);
            for event in &events {
                prop_assert!(!registry.has_bucket(event));
            }
        }
    }
}
