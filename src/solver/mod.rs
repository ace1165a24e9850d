//! Iterative solvers built on fixed pipeline sub-graphs.
//!
//! A solver moves through `Idle -> Initializing -> Iterating* -> Finishing
//! -> Idle`; a failed initialization drops straight back to `Idle` so it
//! can be retried. Each phase is charged against a progress weight; [`IterativeSolver::run`]
//! gives every phase `1 / (iterations + 2)` of the solver's scope.

pub mod richardson_lucy;

pub use richardson_lucy::{RichardsonLucySettings, RichardsonLucySolver};

use crate::pipeline::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverState {
    #[default]
    Idle,
    Initializing,
    Iterating,
    Finishing,
}

impl SolverState {
    /// Whether `next` may follow `self`.
    pub fn can_enter(self, next: SolverState) -> bool {
        use SolverState::*;
        matches!(
            (self, next),
            (Idle, Initializing)
                | (Initializing, Iterating)
                | (Initializing, Finishing)
                | (Initializing, Idle)
                | (Iterating, Iterating)
                | (Iterating, Finishing)
                | (Finishing, Idle)
        )
    }

    /// Move to `next`, or fail if the transition is not allowed.
    pub fn transition(&mut self, next: SolverState) -> PipelineResult<()> {
        if !self.can_enter(next) {
            return Err(PipelineError::InvalidEdge(format!(
                "solver cannot move from {:?} to {:?}",
                self, next
            )));
        }
        tracing::debug!("Solver {:?} -> {:?}", self, next);
        *self = next;
        Ok(())
    }
}

pub trait IterativeSolver {
    fn state(&self) -> SolverState;

    /// Number of iterations [`IterativeSolver::run`] performs.
    fn iterations(&self) -> usize;

    /// Prepare fixed inputs and build the per-iteration sub-graph.
    fn initialize(&mut self, weight: f64) -> PipelineResult<()>;

    /// Advance the current estimate by one step.
    fn iteration(&mut self, weight: f64) -> PipelineResult<()>;

    /// Release the sub-graph, keeping only the result.
    fn finish(&mut self, weight: f64) -> PipelineResult<()>;

    fn run(&mut self) -> PipelineResult<()> {
        let iterations = self.iterations();
        let weight = 1.0 / (iterations as f64 + 2.0);
        self.initialize(weight)?;
        for _ in 0..iterations {
            self.iteration(weight)?;
        }
        self.finish(weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_transitions() {
        let mut state = SolverState::default();
        assert!(state.transition(SolverState::Iterating).is_err());
        state.transition(SolverState::Initializing).unwrap();
        state.transition(SolverState::Iterating).unwrap();
        state.transition(SolverState::Iterating).unwrap();
        state.transition(SolverState::Finishing).unwrap();
        assert!(state.transition(SolverState::Iterating).is_err());
        state.transition(SolverState::Idle).unwrap();
        assert_eq!(state, SolverState::Idle);
    }

    #[test]
    fn test_aborted_initialization_can_restart() {
        let mut state = SolverState::Idle;
        state.transition(SolverState::Initializing).unwrap();
        assert!(state.transition(SolverState::Initializing).is_err());
        state.transition(SolverState::Idle).unwrap();
        state.transition(SolverState::Initializing).unwrap();
        assert!(!SolverState::Iterating.can_enter(SolverState::Idle));
    }
}
