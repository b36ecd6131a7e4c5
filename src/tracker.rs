//! Nested scope attribution.
//!
//! Opening a scope records which slot was active (the parent), the anchor's
//! inclusive total at entry, and the start tick. Closing it:
//!
//! 1. computes `elapsed = end - start`,
//! 2. makes the parent active again,
//! 3. subtracts `elapsed` from the parent's exclusive ticks (unless the parent
//!    is root), since the parent's own close will add the whole interval back,
//! 4. adds `elapsed` to the scope's exclusive ticks,
//! 5. sets the scope's inclusive ticks to `prior_inclusive + elapsed`,
//! 6. increments its hit count.
//!
//! Step 5 uses the value observed at entry rather than accumulating, so a
//! label re-entered while already open (recursion) does not count the inner
//! interval twice in its inclusive total: the outermost close overwrites it.
//!
//! The active slot is an explicit stack per thread. Every token remembers the
//! thread and depth it was opened at, so a close that does not match the
//! innermost open scope is reported as [`ProfileError::MisnestedScope`]
//! instead of silently corrupting the parent chain.

use std::collections::HashMap;
use std::thread::ThreadId;

use crate::constants::ROOT_SLOT;
use crate::error::{ProfileError, ProfileResult};
use crate::measurement::CycleCounter;
use crate::registry::{Anchor, AnchorRegistry};

/// Handle for one open scope, consumed by the matching close.
///
/// Tokens obtained while profiling is disabled are inert: closing them does
/// nothing.
#[derive(Debug)]
#[must_use = "a scope token must be passed back to end the scope"]
pub struct ScopeToken {
    scope: Option<OpenScope>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenScope {
    id: u64,
    thread: ThreadId,
    slot: usize,
    parent_slot: usize,
    start_ticks: u64,
    prior_inclusive: u64,
    depth: usize,
    session: u64,
}

/// One entry of a thread's open-scope stack.
#[derive(Debug, Clone, Copy)]
struct Frame {
    id: u64,
    slot: usize,
    /// Ticks already subtracted from this slot's exclusive total by children
    /// that closed while this frame was open.
    child_ticks: u64,
}

impl ScopeToken {
    /// A token that records nothing when closed.
    pub fn inert() -> Self {
        Self { scope: None }
    }

    /// Whether closing this token will update any anchor.
    pub fn is_active(&self) -> bool {
        self.scope.is_some()
    }

    /// Slot of the anchor this scope accumulates into.
    pub fn slot(&self) -> Option<usize> {
        self.scope.map(|s| s.slot)
    }

    /// Slot that was active when this scope opened.
    pub fn parent_slot(&self) -> Option<usize> {
        self.scope.map(|s| s.parent_slot)
    }

    /// Counter value read when this scope opened.
    pub fn start_ticks(&self) -> Option<u64> {
        self.scope.map(|s| s.start_ticks)
    }
}

/// Anchor registry plus the per-thread stacks of open scopes.
#[derive(Debug)]
pub struct ScopeTracker {
    registry: AnchorRegistry,
    stacks: HashMap<ThreadId, Vec<Frame>>,
    session: u64,
    next_id: u64,
}

impl ScopeTracker {
    /// Tracker over a registry of `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: AnchorRegistry::with_capacity(capacity),
            stacks: HashMap::new(),
            session: 0,
            next_id: 0,
        }
    }

    /// The anchors accumulated so far.
    ///
    /// While a scope with closed children is still open, its exclusive value
    /// is temporarily below zero (wrapped). See [`settled_anchors`](Self::settled_anchors).
    pub fn registry(&self) -> &AnchorRegistry {
        &self.registry
    }

    /// Copy of the anchors with every still-open invocation left out.
    ///
    /// Children that closed inside an open scope keep their own time; the
    /// amount they subtracted from the open parent is added back, so the
    /// parent shows only what its completed invocations recorded.
    pub fn settled_anchors(&self) -> Vec<Anchor> {
        let mut anchors = self.registry.anchors().to_vec();
        for frame in self.stacks.values().flatten() {
            if let Some(anchor) = anchors.get_mut(frame.slot) {
                anchor.exclusive_ticks = anchor.exclusive_ticks.wrapping_add(frame.child_ticks);
            }
        }
        anchors
    }

    /// Number of the current session, incremented by every [`reset`](Self::reset).
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Slot of the innermost open scope on `thread`, or root.
    pub fn active_slot(&self, thread: ThreadId) -> usize {
        self.stacks
            .get(&thread)
            .and_then(|stack| stack.last())
            .map_or(ROOT_SLOT, |frame| frame.slot)
    }

    /// Total scopes currently open across all threads.
    pub fn open_scopes(&self) -> usize {
        self.stacks.values().map(Vec::len).sum()
    }

    /// Start a new session: clear counts, drop all open scopes.
    ///
    /// Tokens still held from the previous session are rejected when closed.
    pub fn reset(&mut self, retain_labels: bool) {
        self.registry.reset(retain_labels);
        self.stacks.clear();
        self.session += 1;
    }

    /// Open a scope labelled `label` on `thread`.
    ///
    /// The counter is read last so that slot resolution is not charged to
    /// the scope.
    pub fn begin<C>(&mut self, label: &str, thread: ThreadId, counter: &C) -> ScopeToken
    where
        C: CycleCounter + ?Sized,
    {
        let slot = self.registry.resolve(label);
        let id = self.next_id;
        self.next_id += 1;

        let stack = self.stacks.entry(thread).or_default();
        let parent_slot = stack.last().map_or(ROOT_SLOT, |frame| frame.slot);
        let depth = stack.len();
        stack.push(Frame {
            id,
            slot,
            child_ticks: 0,
        });

        let prior_inclusive = self
            .registry
            .get(slot)
            .map_or(0, |anchor| anchor.inclusive_ticks);

        ScopeToken {
            scope: Some(OpenScope {
                id,
                thread,
                slot,
                parent_slot,
                start_ticks: counter.read_cycles(),
                prior_inclusive,
                depth,
                session: self.session,
            }),
        }
    }

    /// Close the scope `token` opened, from `thread`, at counter value `end_ticks`.
    ///
    /// # Errors
    ///
    /// - [`ProfileError::StaleScope`] if the token predates the last reset.
    /// - [`ProfileError::MisnestedScope`] if the token is not the innermost
    ///   open scope on `thread` (including tokens closed on another thread
    ///   than the one that opened them). The scope and any scopes opened
    ///   inside it are discarded from the opening thread's stack so later
    ///   scopes there resynchronise; no time is recorded for the token.
    pub fn end(&mut self, token: ScopeToken, thread: ThreadId, end_ticks: u64) -> ProfileResult<()> {
        let Some(scope) = token.scope else {
            return Ok(());
        };

        if scope.session != self.session {
            tracing::warn!(
                token_session = scope.session,
                current_session = self.session,
                "Ignoring scope opened before the session was restarted"
            );
            return Err(ProfileError::StaleScope {
                token_session: scope.session,
                current_session: self.session,
            });
        }

        self.pop(thread, scope)?;

        let elapsed = end_ticks.saturating_sub(scope.start_ticks);

        if scope.parent_slot != ROOT_SLOT {
            if let Some(parent) = self.registry.get_mut(scope.parent_slot) {
                parent.exclusive_ticks = parent.exclusive_ticks.wrapping_sub(elapsed);
            }
            if let Some(frame) = self.stacks.get_mut(&thread).and_then(|s| s.last_mut()) {
                frame.child_ticks = frame.child_ticks.wrapping_add(elapsed);
            }
        }

        if let Some(anchor) = self.registry.get_mut(scope.slot) {
            anchor.exclusive_ticks = anchor.exclusive_ticks.wrapping_add(elapsed);
            anchor.inclusive_ticks = scope.prior_inclusive.wrapping_add(elapsed);
            anchor.hit_count += 1;
        }

        Ok(())
    }

    fn pop(&mut self, thread: ThreadId, scope: OpenScope) -> ProfileResult<()> {
        let innermost = self.stacks.get(&thread).and_then(|stack| stack.last()).copied();

        if thread == scope.thread && innermost.is_some_and(|frame| frame.id == scope.id) {
            self.drop_frames(scope.thread, scope.depth);
            return Ok(());
        }

        // Discard the scope and everything opened inside it, if it is still
        // on the opening thread's stack.
        let still_open = self
            .stacks
            .get(&scope.thread)
            .and_then(|stack| stack.get(scope.depth))
            .is_some_and(|frame| frame.id == scope.id);
        if still_open {
            self.drop_frames(scope.thread, scope.depth);
        }

        let found = innermost.map(|frame| frame.slot);
        let label = self
            .registry
            .get(scope.slot)
            .map_or("<unknown>", |anchor| anchor.label.as_str());
        tracing::warn!(
            slot = scope.slot,
            ?found,
            same_thread = thread == scope.thread,
            "Scope '{}' closed out of order; its time was not recorded",
            label
        );

        Err(ProfileError::MisnestedScope {
            expected: scope.slot,
            found,
        })
    }

    fn drop_frames(&mut self, thread: ThreadId, depth: usize) {
        if let Some(stack) = self.stacks.get_mut(&thread) {
            stack.truncate(depth);
            if stack.is_empty() {
                self.stacks.remove(&thread);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::ManualCounter;

    fn here() -> ThreadId {
        std::thread::current().id()
    }

    #[test]
    fn test_nested_attribution() {
        let clock = ManualCounter::new();
        let mut tracker = ScopeTracker::new(16);
        let t = here();

        let a = tracker.begin("A", t, &clock);
        clock.advance(300);
        let b = tracker.begin("B", t, &clock);
        assert_eq!(b.parent_slot(), a.slot());
        assert_eq!(tracker.active_slot(t), b.slot().unwrap());
        clock.advance(400);
        tracker.end(b, t, clock.get()).unwrap();
        assert_eq!(tracker.active_slot(t), a.slot().unwrap());
        clock.advance(300);
        tracker.end(a, t, clock.get()).unwrap();

        let reg = tracker.registry();
        let a = &reg.anchors()[1];
        let b = &reg.anchors()[2];
        assert_eq!((b.exclusive_ticks, b.inclusive_ticks, b.hit_count), (400, 400, 1));
        assert_eq!((a.exclusive_ticks, a.inclusive_ticks, a.hit_count), (600, 1000, 1));
        assert_eq!(tracker.active_slot(t), ROOT_SLOT);
        assert_eq!(tracker.open_scopes(), 0);
    }

    #[test]
    fn test_child_close_subtracts_from_open_parent() {
        let clock = ManualCounter::new();
        let mut tracker = ScopeTracker::new(16);
        let t = here();

        let parent = tracker.begin("P", t, &clock);
        let child = tracker.begin("C", t, &clock);
        clock.advance(50);
        tracker.end(child, t, clock.get()).unwrap();

        // Still open: exclusive is 50 below zero until the parent closes
        let p = &tracker.registry().anchors()[1];
        assert_eq!(p.exclusive_ticks, 0u64.wrapping_sub(50));

        clock.advance(20);
        tracker.end(parent, t, clock.get()).unwrap();
        assert_eq!(tracker.registry().anchors()[1].exclusive_ticks, 20);
    }

    #[test]
    fn test_sequential_invocations_accumulate() {
        let clock = ManualCounter::new();
        let mut tracker = ScopeTracker::new(16);
        let t = here();

        for elapsed in [10, 20, 30] {
            let f = tracker.begin("F", t, &clock);
            clock.advance(elapsed);
            tracker.end(f, t, clock.get()).unwrap();
        }

        let f = &tracker.registry().anchors()[1];
        assert_eq!((f.hit_count, f.exclusive_ticks, f.inclusive_ticks), (3, 60, 60));
    }

    #[test]
    fn test_root_parent_is_not_charged() {
        let clock = ManualCounter::new();
        let mut tracker = ScopeTracker::new(16);
        let t = here();

        let f = tracker.begin("F", t, &clock);
        assert_eq!(f.parent_slot(), Some(ROOT_SLOT));
        clock.advance(5);
        tracker.end(f, t, clock.get()).unwrap();
        assert_eq!(tracker.registry().anchors()[ROOT_SLOT].exclusive_ticks, 0);
    }

    #[test]
    fn test_misnested_close_is_reported() {
        let clock = ManualCounter::new();
        let mut tracker = ScopeTracker::new(16);
        let t = here();

        let outer = tracker.begin("outer", t, &clock);
        let inner = tracker.begin("inner", t, &clock);
        clock.advance(10);

        let err = tracker.end(outer, t, clock.get()).unwrap_err();
        assert_eq!(
            err,
            ProfileError::MisnestedScope {
                expected: 1,
                found: Some(2)
            }
        );
        // The abandoned inner scope is gone too
        assert_eq!(tracker.open_scopes(), 0);
        assert!(tracker.end(inner, t, clock.get()).is_err());

        assert!(tracker
            .registry()
            .anchors()
            .iter()
            .all(|a| a.hit_count == 0 && a.exclusive_ticks == 0));
    }

    #[test]
    fn test_stale_token_rejected_after_reset() {
        let clock = ManualCounter::new();
        let mut tracker = ScopeTracker::new(16);
        let t = here();

        let token = tracker.begin("old", t, &clock);
        tracker.reset(true);
        let err = tracker.end(token, t, 10).unwrap_err();
        assert_eq!(
            err,
            ProfileError::StaleScope {
                token_session: 0,
                current_session: 1
            }
        );
        assert_eq!(tracker.registry().anchors()[1].hit_count, 0);
    }

    #[test]
    fn test_inert_token_is_noop() {
        let mut tracker = ScopeTracker::new(4);
        let token = ScopeToken::inert();
        assert!(!token.is_active());
        tracker.end(token, here(), 100).unwrap();
        assert_eq!(tracker.registry().len(), 1);
    }

    #[test]
    fn test_threads_have_independent_stacks() {
        let clock = ManualCounter::new();
        let mut tracker = ScopeTracker::new(16);
        let main = here();
        let other = std::thread::spawn(|| std::thread::current().id())
            .join()
            .unwrap();

        let a = tracker.begin("A", main, &clock);
        let b = tracker.begin("B", other, &clock);
        assert_eq!(b.parent_slot(), Some(ROOT_SLOT));
        clock.advance(10);
        // Close order interleaves across threads but is LIFO per thread
        tracker.end(a, main, clock.get()).unwrap();
        tracker.end(b, other, clock.get()).unwrap();

        let reg = tracker.registry();
        assert_eq!(reg.anchors()[1].exclusive_ticks, 10);
        assert_eq!(reg.anchors()[2].exclusive_ticks, 10);
    }

    #[test]
    fn test_foreign_close_unwinds_opening_thread() {
        let clock = ManualCounter::new();
        let mut tracker = ScopeTracker::new(16);
        let main = here();
        let other = std::thread::spawn(|| std::thread::current().id())
            .join()
            .unwrap();

        let token = tracker.begin("pinned", main, &clock);
        let err = tracker.end(token, other, 10).unwrap_err();
        assert_eq!(
            err,
            ProfileError::MisnestedScope {
                expected: 1,
                found: None
            }
        );

        assert_eq!(tracker.open_scopes(), 0);
        assert_eq!(tracker.active_slot(main), ROOT_SLOT);
        let next = tracker.begin("next", main, &clock);
        assert_eq!(next.parent_slot(), Some(ROOT_SLOT));
    }

    #[test]
    fn test_discarded_token_leaves_newer_scopes_alone() {
        let clock = ManualCounter::new();
        let mut tracker = ScopeTracker::new(16);
        let t = here();

        let outer = tracker.begin("outer", t, &clock);
        let inner = tracker.begin("inner", t, &clock);
        assert!(tracker.end(outer, t, 5).is_err());

        // A fresh scope now sits at the depth the abandoned inner token recorded
        let first = tracker.begin("first", t, &clock);
        let second = tracker.begin("second", t, &clock);
        assert!(tracker.end(inner, t, 5).is_err());
        assert_eq!(tracker.open_scopes(), 2);

        clock.advance(7);
        tracker.end(second, t, clock.get()).unwrap();
        tracker.end(first, t, clock.get()).unwrap();
        assert_eq!(tracker.registry().get(4).map(|a| a.inclusive_ticks), Some(7));
    }

    #[test]
    fn test_settled_anchors_exclude_open_scopes() {
        let clock = ManualCounter::new();
        let mut tracker = ScopeTracker::new(16);
        let t = here();

        let _outer = tracker.begin("outer", t, &clock);
        clock.advance(5);
        let mid = tracker.begin("mid", t, &clock);
        let leaf = tracker.begin("leaf", t, &clock);
        clock.advance(30);
        tracker.end(leaf, t, clock.get()).unwrap();
        clock.advance(20);
        tracker.end(mid, t, clock.get()).unwrap();

        let raw = tracker.registry().anchors();
        assert_eq!(raw[1].exclusive_ticks, 0u64.wrapping_sub(50));

        let settled = tracker.settled_anchors();
        assert_eq!(settled[1].exclusive_ticks, 0);
        assert_eq!(settled[1].hit_count, 0);
        assert_eq!((settled[2].exclusive_ticks, settled[2].inclusive_ticks), (20, 50));
        assert_eq!(settled[3].exclusive_ticks, 30);
    }
}
