//! Per-run session state.
//!
//! A session owns the registry it matches against and the set of students
//! seen so far. There is no ambient state: callers create an
//! [`AttendanceSession`], call [`start`](AttendanceSession::start) at the
//! beginning of each run and read the present/absent sets at the end.

use crate::identity::Identity;
use crate::matcher::{Match, Matcher};
use crate::registry::Registry;
use crate::types::Embedding;
use std::collections::{BTreeSet, HashSet};

/// Set of identities recognised during one run.
#[derive(Debug, Default)]
pub struct SessionTracker {
    present: HashSet<Identity>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a match result. Unknown faces are ignored.
    ///
    /// Returns `true` the first time an identity is seen in this run.
    pub fn observe(&mut self, observation: &Match) -> bool {
        match observation.identity() {
            Some(identity) => self.present.insert(identity.clone()),
            None => false,
        }
    }

    pub fn present_set(&self) -> &HashSet<Identity> {
        &self.present
    }

    pub fn is_present(&self, identity: &Identity) -> bool {
        self.present.contains(identity)
    }

    /// Every identity in `all` that was not seen this run.
    pub fn absent<'a, I>(&self, all: I) -> BTreeSet<Identity>
    where
        I: IntoIterator<Item = &'a Identity>,
    {
        all.into_iter()
            .filter(|identity| !self.present.contains(*identity))
            .cloned()
            .collect()
    }

    pub fn reset(&mut self) {
        self.present.clear();
    }
}

/// Registry, matcher and tracker for one attendance run.
pub struct AttendanceSession<M> {
    registry: Registry,
    matcher: M,
    tracker: SessionTracker,
}

impl<M: Matcher> AttendanceSession<M> {
    pub fn new(registry: Registry, matcher: M) -> Self {
        Self {
            registry,
            matcher,
            tracker: SessionTracker::new(),
        }
    }

    /// Begin a new run, forgetting everyone seen in the previous one.
    pub fn start(&mut self) {
        self.tracker.reset();
        tracing::info!(registered = self.registry.len(), "attendance session started");
    }

    /// Match a probe and record it in the tracker.
    pub fn observe(&mut self, probe: &Embedding) -> Match {
        let result = self.matcher.identify(probe, &self.registry);
        if self.tracker.observe(&result) {
            if let Match::Known { identity, distance } = &result {
                tracing::info!(%identity, distance, "student recognised");
            }
        }
        result
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn present(&self) -> &HashSet<Identity> {
        self.tracker.present_set()
    }

    /// Registered identities not seen during this run.
    pub fn absent(&self) -> BTreeSet<Identity> {
        self.tracker.absent(self.registry.identities())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::NearestMatcher;
    use crate::provider::Euclidean;

    fn id(key: &str) -> Identity {
        Identity::from_key(key).unwrap()
    }

    fn known(key: &str) -> Match {
        Match::Known {
            identity: id(key),
            distance: 0.1,
        }
    }

    #[test]
    fn test_unknown_is_discarded() {
        let mut tracker = SessionTracker::new();
        assert!(!tracker.observe(&Match::Unknown { nearest: Some(0.9) }));
        assert!(tracker.present_set().is_empty());
    }

    #[test]
    fn test_repeats_are_idempotent() {
        let mut tracker = SessionTracker::new();
        assert!(tracker.observe(&known("Alice_101")));
        assert!(!tracker.observe(&known("Alice_101")));
        assert!(tracker.observe(&known("Bob_102")));
        assert_eq!(tracker.present_set().len(), 2);
    }

    #[test]
    fn test_reset_clears() {
        let mut tracker = SessionTracker::new();
        tracker.observe(&known("Alice_101"));
        tracker.reset();
        assert!(!tracker.is_present(&id("Alice_101")));
    }

    #[test]
    fn test_absent_is_complement() {
        let mut tracker = SessionTracker::new();
        tracker.observe(&known("Alice_101"));
        let all = [id("Alice_101"), id("Bob_102"), id("Carol_103")];
        let absent = tracker.absent(all.iter());
        assert_eq!(absent.into_iter().collect::<Vec<_>>(), vec![id("Bob_102"), id("Carol_103")]);
    }

    #[test]
    fn test_session_start_resets_between_runs() {
        let mut registry = Registry::new();
        registry.insert(id("Alice_101"), Embedding::new(vec![0.0, 0.0]));
        registry.insert(id("Bob_102"), Embedding::new(vec![1.0, 1.0]));
        let mut session = AttendanceSession::new(registry, NearestMatcher::new(Euclidean::default()));

        session.start();
        assert!(session.observe(&Embedding::new(vec![0.05, 0.0])).is_known());
        assert_eq!(session.present().len(), 1);
        assert_eq!(session.absent().into_iter().collect::<Vec<_>>(), vec![id("Bob_102")]);

        session.start();
        assert!(session.present().is_empty());
        assert_eq!(session.absent().len(), 2);
    }
}
