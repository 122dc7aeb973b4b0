// SPDX-License-Identifier: CEPL-1.0
//! Create/destroy pairing for long-lived GPU objects.
//!
//! Every created object is registered together with its paired allocation and
//! handed back exactly once, either individually through [`ResourceRegistry::release`]
//! or in reverse creation order through [`ResourceRegistry::drain_reverse`].
//! Ids are never reused, so a stale id can never alias a newer object.

use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("resource {0:?} is not live (never registered or already released)")]
    NotLive(ResourceId),
}

#[derive(Debug)]
struct Entry<T> {
    id: ResourceId,
    label: &'static str,
    resource: T,
}

#[derive(Debug)]
pub struct ResourceRegistry<T> {
    next: u64,
    live: Vec<Entry<T>>,
}

impl<T> Default for ResourceRegistry<T> {
    fn default() -> Self {
        Self {
            next: 0,
            live: Vec::new(),
        }
    }
}

impl<T> ResourceRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, label: &'static str, resource: T) -> ResourceId {
        let id = ResourceId(self.next);
        self.next += 1;
        debug!(?id, label, "registered");
        self.live.push(Entry {
            id,
            label,
            resource,
        });
        id
    }

    pub fn get(&self, id: ResourceId) -> Option<&T> {
        self.live
            .iter()
            .find(|e| e.id == id)
            .map(|e| &e.resource)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.get(id).is_some()
    }

    /// Remove one resource so the caller can destroy it.
    pub fn release(&mut self, id: ResourceId) -> Result<T, RegistryError> {
        let pos = self
            .live
            .iter()
            .position(|e| e.id == id)
            .ok_or(RegistryError::NotLive(id))?;
        let entry = self.live.remove(pos);
        debug!(?id, label = entry.label, "released");
        Ok(entry.resource)
    }

    /// Remove everything, newest first.
    pub fn drain_reverse(&mut self) -> Vec<(&'static str, T)> {
        let mut out = Vec::with_capacity(self.live.len());
        while let Some(entry) = self.live.pop() {
            debug!(id = ?entry.id, label = entry.label, "teardown");
            out.push((entry.label, entry.resource));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_reverse_creation_order() {
        let mut reg = ResourceRegistry::new();
        reg.register("pool", 1);
        reg.register("vertex", 2);
        reg.register("index", 3);

        let order: Vec<_> = reg.drain_reverse().into_iter().map(|(l, _)| l).collect();
        assert_eq!(order, ["index", "vertex", "pool"]);
        assert!(reg.is_empty());
    }

    #[test]
    fn release_is_exactly_once() {
        let mut reg = ResourceRegistry::new();
        let a = reg.register("a", 'a');
        assert_eq!(reg.release(a), Ok('a'));
        assert_eq!(reg.release(a), Err(RegistryError::NotLive(a)));
        assert!(!reg.contains(a));
    }

    #[test]
    fn ids_are_not_reused() {
        let mut reg = ResourceRegistry::new();
        let a = reg.register("a", 1);
        reg.release(a).unwrap();
        let b = reg.register("b", 2);
        assert_ne!(a, b);
        assert_eq!(reg.get(a), None);
        assert_eq!(reg.get(b), Some(&2));
    }

    #[test]
    fn release_keeps_remaining_order() {
        let mut reg = ResourceRegistry::new();
        reg.register("a", 1);
        let b = reg.register("b", 2);
        reg.register("c", 3);
        reg.release(b).unwrap();
        assert_eq!(reg.len(), 2);
        let left: Vec<_> = reg.drain_reverse().into_iter().map(|(_, v)| v).collect();
        assert_eq!(left, [3, 1]);
    }
}
