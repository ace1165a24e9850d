//! Hierarchical weighted progress.
//!
//! A [`ProgressAccumulator`] is a tree of weighted scopes under an implicit
//! root of weight 1.0. Each scope's weight is a fraction of its parent's, so
//! a leaf's effective weight is the product of weights along its path. The
//! observable progress is
//!
//! ```text
//! sum(scope.accumulated) + sum(leaf.effective_weight * leaf.progress)
//! ```
//!
//! [`ScopeHandle::reset_keeping_accumulated`] folds a subtree's current
//! contribution into each leaf's `accumulated` before zeroing it, which is
//! how an iterative solver re-runs the same scopes every iteration while the
//! observable value keeps increasing. [`ScopeHandle::clear_children`] drops a
//! subtree together with everything it accumulated, so a node that executes
//! again starts its sub-scopes from zero. Freed slots are reused; handles to
//! dropped scopes go inert.
//!
//! Observers are held weakly and are never kept alive by the accumulator.

use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Receives progress notifications in `[0, 1]`.
#[cfg_attr(test, mockall::automock)]
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, fraction: f64);
}

/// Adapts a closure into a [`ProgressObserver`].
pub struct ProgressFn<F>(pub F);

impl<F: Fn(f64) + Send + Sync> ProgressObserver for ProgressFn<F> {
    fn on_progress(&self, fraction: f64) {
        (self.0)(fraction)
    }
}

#[derive(Debug)]
struct ScopeEntry {
    label: String,
    effective_weight: f64,
    parent: Option<usize>,
    children_weight: f64,
    has_children: bool,
    progress: f64,
    accumulated: f64,
    generation: u32,
    live: bool,
}

#[derive(Debug, Default)]
struct AccumulatorState {
    scopes: Vec<ScopeEntry>,
    free: Vec<usize>,
    root_children_weight: f64,
}

impl AccumulatorState {
    fn total(&self) -> f64 {
        self.scopes
            .iter()
            .filter(|s| s.live)
            .map(|s| {
                let running = if s.has_children { 0.0 } else { s.effective_weight * s.progress };
                s.accumulated + running
            })
            .sum()
    }

    fn accumulated(&self) -> f64 {
        self.scopes.iter().filter(|s| s.live).map(|s| s.accumulated).sum()
    }

    fn entry(&self, id: usize, generation: u32) -> Option<&ScopeEntry> {
        self.scopes
            .get(id)
            .filter(|s| s.live && s.generation == generation)
    }

    fn entry_mut(&mut self, id: usize, generation: u32) -> Option<&mut ScopeEntry> {
        self.scopes
            .get_mut(id)
            .filter(|s| s.live && s.generation == generation)
    }

    fn is_within(&self, mut idx: usize, ancestor: usize) -> bool {
        loop {
            if idx == ancestor {
                return true;
            }
            match self.scopes[idx].parent {
                Some(parent) => idx = parent,
                None => return false,
            }
        }
    }

    fn fold_into_accumulated(&mut self, root: Option<usize>) {
        for idx in 0..self.scopes.len() {
            let scope = &self.scopes[idx];
            if !scope.live || scope.has_children {
                continue;
            }
            if root.map_or(true, |r| self.is_within(idx, r)) {
                let scope = &mut self.scopes[idx];
                scope.accumulated += scope.effective_weight * scope.progress;
                scope.progress = 0.0;
            }
        }
    }

    /// Free every descendant of `root` and zero `root` itself.
    fn clear_children(&mut self, root: usize) {
        for idx in 0..self.scopes.len() {
            if idx != root && self.scopes[idx].live && self.is_within(idx, root) {
                self.scopes[idx].live = false;
                self.free.push(idx);
            }
        }
        let entry = &mut self.scopes[root];
        entry.has_children = false;
        entry.children_weight = 0.0;
        entry.progress = 0.0;
        entry.accumulated = 0.0;
    }
}

struct Shared {
    state: Mutex<AccumulatorState>,
    observers: Mutex<Vec<Weak<dyn ProgressObserver>>>,
}

/// Weighted progress tree shared between a node and its internal pipelines.
#[derive(Clone)]
pub struct ProgressAccumulator {
    shared: Arc<Shared>,
}

impl ProgressAccumulator {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(AccumulatorState::default()),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a top-level scope with `weight` of the whole.
    pub fn register_scope(&self, label: impl Into<String>, weight: f64) -> ScopeHandle {
        self.register(None, label.into(), weight)
    }

    fn register(&self, parent: Option<usize>, label: String, weight: f64) -> ScopeHandle {
        let mut state = self.lock_state();
        let (parent_weight, budget_used) = match parent {
            Some(p) => {
                let entry = &mut state.scopes[p];
                entry.has_children = true;
                entry.children_weight += weight;
                (entry.effective_weight, entry.children_weight)
            }
            None => {
                state.root_children_weight += weight;
                (1.0, state.root_children_weight)
            }
        };
        if budget_used > 1.0 + 1e-9 {
            tracing::warn!(
                "Progress scope '{}' pushes its parent's weight budget to {:.3}",
                label,
                budget_used
            );
        }
        let entry = ScopeEntry {
            label,
            effective_weight: weight * parent_weight,
            parent,
            children_weight: 0.0,
            has_children: false,
            progress: 0.0,
            accumulated: 0.0,
            generation: 0,
            live: true,
        };
        let (id, generation) = match state.free.pop() {
            Some(id) => {
                let generation = state.scopes[id].generation.wrapping_add(1);
                state.scopes[id] = ScopeEntry { generation, ..entry };
                (id, generation)
            }
            None => {
                state.scopes.push(entry);
                (state.scopes.len() - 1, 0)
            }
        };
        ScopeHandle {
            accumulator: self.clone(),
            id,
            generation,
        }
    }

    /// Observable progress. May exceed 1.0 when weights overrun their budget.
    pub fn progress(&self) -> f64 {
        self.lock_state().total()
    }

    /// Number of live scopes.
    pub fn scope_count(&self) -> usize {
        self.lock_state().scopes.iter().filter(|s| s.live).count()
    }

    /// Attach an observer. Only a weak reference is kept.
    pub fn add_observer(&self, observer: &Arc<dyn ProgressObserver>) {
        self.shared
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(observer));
    }

    /// Zero every leaf while keeping the observable value unchanged.
    pub fn reset_keeping_accumulated(&self) {
        self.lock_state().fold_into_accumulated(None);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AccumulatorState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, total: f64) {
        let fraction = total.clamp(0.0, 1.0);
        let live: Vec<Arc<dyn ProgressObserver>> = {
            let mut observers = self
                .shared
                .observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            observers.retain(|w| w.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            observer.on_progress(fraction);
        }
    }
}

impl Default for ProgressAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("ProgressAccumulator")
            .field("scopes", &state.scopes.iter().filter(|s| s.live).count())
            .field("accumulated", &state.accumulated())
            .field("progress", &state.total())
            .finish()
    }
}

/// One scope in a [`ProgressAccumulator`].
#[derive(Clone)]
pub struct ScopeHandle {
    accumulator: ProgressAccumulator,
    id: usize,
    generation: u32,
}

impl ScopeHandle {
    /// Register a child scope with `weight` of this scope's weight.
    ///
    /// A child of a dropped scope is registered at the top level.
    pub fn register_child(&self, label: impl Into<String>, weight: f64) -> ScopeHandle {
        let parent = self.is_live().then_some(self.id);
        self.accumulator.register(parent, label.into(), weight)
    }

    /// Set this scope's local progress (clamped to `[0, 1]`) and notify observers.
    pub fn advance(&self, fraction: f64) {
        let total = {
            let mut state = self.accumulator.lock_state();
            let Some(scope) = state.entry_mut(self.id, self.generation) else {
                return;
            };
            scope.progress = fraction.clamp(0.0, 1.0);
            tracing::trace!("progress '{}' -> {:.3}", scope.label, scope.progress);
            state.total()
        };
        self.accumulator.notify(total);
    }

    pub fn progress(&self) -> f64 {
        let state = self.accumulator.lock_state();
        state.entry(self.id, self.generation).map_or(0.0, |s| s.progress)
    }

    pub fn label(&self) -> String {
        let state = self.accumulator.lock_state();
        state
            .entry(self.id, self.generation)
            .map(|s| s.label.clone())
            .unwrap_or_default()
    }

    /// False once an ancestor dropped this scope.
    pub fn is_live(&self) -> bool {
        self.accumulator
            .lock_state()
            .entry(self.id, self.generation)
            .is_some()
    }

    /// Fold this subtree's contribution into the accumulated offset and zero it.
    pub fn reset_keeping_accumulated(&self) {
        let mut state = self.accumulator.lock_state();
        if state.entry(self.id, self.generation).is_some() {
            state.fold_into_accumulated(Some(self.id));
        }
    }

    /// Drop every descendant scope and whatever it accumulated, leaving this
    /// scope as an empty leaf.
    pub fn clear_children(&self) {
        let mut state = self.accumulator.lock_state();
        if state.entry(self.id, self.generation).is_some() {
            state.clear_children(self.id);
        }
    }

    pub fn accumulator(&self) -> &ProgressAccumulator {
        &self.accumulator
    }
}

impl std::fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish()
    }
}

/// What a running node reports its own progress through.
#[derive(Clone, Debug, Default)]
pub struct ProgressReporter {
    scope: Option<ScopeHandle>,
}

impl ProgressReporter {
    pub fn new(scope: Option<ScopeHandle>) -> Self {
        Self { scope }
    }

    pub fn none() -> Self {
        Self { scope: None }
    }

    pub fn report(&self, fraction: f64) {
        if let Some(scope) = &self.scope {
            scope.advance(fraction);
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.scope.is_some()
    }

    /// Scope this reporter advances, for nodes that register sub-scopes.
    pub fn scope(&self) -> Option<&ScopeHandle> {
        self.scope.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_weighted_sum_over_tree() {
        let acc = ProgressAccumulator::new();
        let a = acc.register_scope("a", 0.25);
        let b = acc.register_scope("b", 0.75);
        let b1 = b.register_child("b1", 0.5);
        let b2 = b.register_child("b2", 0.5);

        a.advance(1.0);
        assert!((acc.progress() - 0.25).abs() < EPS);
        b1.advance(1.0);
        b2.advance(0.5);
        // b is a container: only its leaves count.
        assert!((acc.progress() - (0.25 + 0.375 + 0.1875)).abs() < EPS);
    }

    #[test]
    fn test_reset_keeps_total_and_stays_monotonic() {
        let acc = ProgressAccumulator::new();
        let iterations = 5;
        let iteration = acc.register_scope("iteration", 1.0);
        let steps: Vec<_> = [0.3, 0.7]
            .iter()
            .map(|w| iteration.register_child("step", *w / iterations as f64))
            .collect();

        let mut last = 0.0;
        for _ in 0..iterations {
            for step in &steps {
                for k in 1..=4 {
                    step.advance(k as f64 / 4.0);
                    let now = acc.progress();
                    assert!(now + EPS >= last, "{now} < {last}");
                    last = now;
                }
            }
            let before = acc.progress();
            iteration.reset_keeping_accumulated();
            assert!((acc.progress() - before).abs() < EPS);
            assert_eq!(steps[0].progress(), 0.0);
        }
        assert!((acc.progress() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_subtree_reset_leaves_other_scopes() {
        let acc = ProgressAccumulator::new();
        let init = acc.register_scope("init", 0.5);
        let iter = acc.register_scope("iter", 0.5);
        let step = iter.register_child("step", 1.0);
        init.advance(1.0);
        step.advance(1.0);
        iter.reset_keeping_accumulated();
        assert_eq!(init.progress(), 1.0);
        assert_eq!(step.progress(), 0.0);
        assert!((acc.progress() - 1.0).abs() < EPS);
    }

    #[test]
    fn test_observer_receives_clamped_values() {
        let acc = ProgressAccumulator::new();
        let scope = acc.register_scope("only", 1.0);

        let mut mock = MockProgressObserver::new();
        mock.expect_on_progress()
            .withf(|f| (0.0..=1.0).contains(f))
            .times(2)
            .return_const(());
        let observer: Arc<dyn ProgressObserver> = Arc::new(mock);
        acc.add_observer(&observer);

        scope.advance(0.5);
        scope.advance(2.0);
        assert_eq!(scope.progress(), 1.0);
    }

    #[test]
    fn test_dropped_observer_is_not_kept_alive() {
        let acc = ProgressAccumulator::new();
        let scope = acc.register_scope("only", 1.0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Arc<dyn ProgressObserver> = Arc::new(ProgressFn(move |f| {
            sink.lock().unwrap().push(f);
        }));
        acc.add_observer(&observer);
        scope.advance(0.5);
        drop(observer);
        scope.advance(1.0);
        assert_eq!(*seen.lock().unwrap(), vec![0.5]);
    }

    #[test]
    fn test_clear_children_restarts_subtree() {
        let acc = ProgressAccumulator::new();
        let other = acc.register_scope("other", 0.5);
        let node = acc.register_scope("node", 0.5);
        other.advance(1.0);

        for _ in 0..3 {
            node.clear_children();
            assert!((acc.progress() - 0.5).abs() < EPS);
            let iteration = node.register_child("iteration", 1.0);
            let step = iteration.register_child("step", 1.0);
            step.advance(1.0);
            iteration.reset_keeping_accumulated();
            assert!((acc.progress() - 1.0).abs() < EPS);
            assert_eq!(acc.scope_count(), 4);
        }

        let stale = node.register_child("stale", 1.0);
        node.clear_children();
        assert!(!stale.is_live());
        stale.advance(1.0);
        assert!((acc.progress() - 0.5).abs() < EPS);
        assert_eq!(acc.scope_count(), 2);
    }

    #[test]
    fn test_overrun_budget_is_tolerated() {
        let acc = ProgressAccumulator::new();
        let a = acc.register_scope("a", 0.8);
        let b = acc.register_scope("b", 0.8);
        a.advance(1.0);
        b.advance(1.0);
        assert!(acc.progress() > 1.0);
    }
}
