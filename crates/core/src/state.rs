//! Task and graph-instance state machines.
//!
//! Both machines share one shape: a tagged state, a static transition table,
//! a set of failed terminals and an aggregation order that folds many
//! per-host states into a single representative one. The tables are constants
//! so illegal transitions are a data lookup, not a policy decision scattered
//! through the engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A state change that the transition table does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("state change from '{from}' is only allowed to [{allowed}] (tried '{to}')")]
pub struct ForbiddenTransition {
    /// The state the entity was in.
    pub from: String,
    /// The state the caller asked for.
    pub to: String,
    /// Comma-separated legal successor states.
    pub allowed: String,
}

/// Common shape of the two dedalus state machines.
pub trait StateMachine: Copy + Eq + fmt::Display + Sized + 'static {
    /// The initial state.
    const IDLE: Self;

    /// Aggregation precedence: the first tag present in a set of states
    /// represents the whole set.
    const AGGREGATION_ORDER: &'static [Self];

    /// Legal successor states. An empty slice marks a terminal state.
    fn successors(self) -> &'static [Self];

    /// Whether this terminal state counts as a failure.
    fn is_failed(self) -> bool;

    /// A state with no outgoing transitions never changes again.
    fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// A non-forced change to `to` is legal iff `to` is the current state or
    /// a listed successor.
    fn can_transition(self, to: Self) -> bool {
        to == self || self.successors().contains(&to)
    }

    /// Fold a set of states into one representative per the aggregation
    /// order; an empty set aggregates to idle.
    fn aggregate<I>(states: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let seen: Vec<Self> = states.into_iter().collect();
        for &candidate in Self::AGGREGATION_ORDER {
            if seen.contains(&candidate) {
                return candidate;
            }
        }
        Self::IDLE
    }

    /// Adopt `to` unconditionally, returning the prior state.
    ///
    /// Used when a remote peer is authoritative for the state (per-host
    /// adoption on the master).
    fn force_state(&mut self, to: Self) -> Self {
        let prior = *self;
        *self = to;
        prior
    }

    /// Move to `to`, returning the prior state.
    ///
    /// Succeeds if `to` equals the current state, is a legal successor, or
    /// `force` is set (used when adopting authoritative remote state).
    ///
    /// # Errors
    ///
    /// Returns [`ForbiddenTransition`] otherwise.
    fn change_state(&mut self, to: Self, force: bool) -> Result<Self, ForbiddenTransition> {
        if force || self.can_transition(to) {
            let prior = *self;
            *self = to;
            return Ok(prior);
        }
        Err(ForbiddenTransition {
            from: self.to_string(),
            to: to.to_string(),
            allowed: self
                .successors()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

/// State of one task on one host, as the worker drives it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Created on the worker, nothing started yet.
    #[default]
    Idle,
    /// Resources are being ensured.
    Preparing,
    /// Resources in place, executor not yet started.
    Prepared,
    /// Executor subprocess running.
    Running,
    /// Executor exited with code 0.
    Finished,
    /// Executor exited non-zero (or never reported a code).
    Failed,
    /// Stopped on user request.
    Stopped,
    /// A resource could not be ensured.
    PrepFailed,
}

impl StateMachine for TaskState {
    const IDLE: Self = Self::Idle;

    const AGGREGATION_ORDER: &'static [Self] = &[
        Self::Stopped,
        Self::PrepFailed,
        Self::Failed,
        Self::Running,
        Self::Prepared,
        Self::Preparing,
        Self::Idle,
        Self::Finished,
    ];

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Idle => &[Self::Preparing, Self::Stopped],
            Self::Preparing => &[Self::Prepared, Self::PrepFailed, Self::Stopped],
            Self::Prepared => &[Self::Running, Self::Stopped],
            Self::Running => &[Self::Finished, Self::Failed, Self::Stopped],
            Self::Finished | Self::Failed | Self::Stopped | Self::PrepFailed => &[],
        }
    }

    fn is_failed(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped | Self::PrepFailed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::PrepFailed => "prepfailed",
        };
        f.write_str(name)
    }
}

/// State of one graph instance, as the master drives it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Launched but never started.
    #[default]
    Idle,
    /// A supervisor is walking the DAG.
    Running,
    /// Every task finished.
    Finished,
    /// Some task failed, or the supervisor hit an error.
    Failed,
    /// Stopped on user request.
    Stopped,
}

impl StateMachine for InstanceState {
    const IDLE: Self = Self::Idle;

    const AGGREGATION_ORDER: &'static [Self] = &[
        Self::Stopped,
        Self::Failed,
        Self::Running,
        Self::Idle,
        Self::Finished,
    ];

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Idle => &[Self::Running, Self::Stopped],
            Self::Running => &[Self::Finished, Self::Failed, Self::Stopped],
            Self::Finished | Self::Failed | Self::Stopped => &[],
        }
    }

    fn is_failed(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_TASK_STATES: [TaskState; 8] = [
        TaskState::Idle,
        TaskState::Preparing,
        TaskState::Prepared,
        TaskState::Running,
        TaskState::Finished,
        TaskState::Failed,
        TaskState::Stopped,
        TaskState::PrepFailed,
    ];

    #[test]
    fn test_task_happy_path() {
        let mut state = TaskState::Idle;
        for next in [
            TaskState::Preparing,
            TaskState::Prepared,
            TaskState::Running,
            TaskState::Finished,
        ] {
            state.change_state(next, false).unwrap();
        }
        assert!(state.is_terminal());
        assert!(!state.is_failed());
    }

    #[test]
    fn test_non_forced_change_requires_link() {
        for from in ALL_TASK_STATES {
            for to in ALL_TASK_STATES {
                let mut state = from;
                let legal = to == from || from.successors().contains(&to);
                assert_eq!(
                    state.change_state(to, false).is_ok(),
                    legal,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_forced_change_always_succeeds() {
        let mut state = TaskState::Finished;
        let prior = state.change_state(TaskState::Running, true).unwrap();
        assert_eq!(prior, TaskState::Finished);
        assert_eq!(state, TaskState::Running);
    }

    #[test]
    fn test_change_to_self_is_noop() {
        let mut state = TaskState::Preparing;
        let prior = state.change_state(TaskState::Preparing, false).unwrap();
        assert_eq!(prior, TaskState::Preparing);
    }

    #[test]
    fn test_forbidden_transition_message_lists_successors() {
        let mut state = TaskState::Idle;
        let err = state.change_state(TaskState::Running, false).unwrap_err();
        assert_eq!(err.from, "idle");
        assert_eq!(err.to, "running");
        assert!(err.allowed.contains("preparing"));
        assert!(err.allowed.contains("stopped"));
    }

    #[test]
    fn test_task_terminal_and_failed_sets() {
        for state in ALL_TASK_STATES {
            let terminal = matches!(
                state,
                TaskState::Finished | TaskState::Failed | TaskState::Stopped | TaskState::PrepFailed
            );
            assert_eq!(state.is_terminal(), terminal, "{state}");
        }
        assert!(TaskState::Failed.is_failed());
        assert!(TaskState::Stopped.is_failed());
        assert!(TaskState::PrepFailed.is_failed());
        assert!(!TaskState::Finished.is_failed());
    }

    #[test]
    fn test_aggregate_empty_is_idle() {
        assert_eq!(TaskState::aggregate([]), TaskState::Idle);
        assert_eq!(InstanceState::aggregate([]), InstanceState::Idle);
    }

    #[test]
    fn test_aggregate_failing_host_dominates() {
        let agg = TaskState::aggregate([
            TaskState::Finished,
            TaskState::Failed,
            TaskState::Running,
        ]);
        assert_eq!(agg, TaskState::Failed);
    }

    #[test]
    fn test_aggregate_running_dominates_prepared() {
        let agg = TaskState::aggregate([TaskState::Prepared, TaskState::Running]);
        assert_eq!(agg, TaskState::Running);
    }

    #[test]
    fn test_aggregate_finished_only_when_all_finished() {
        assert_eq!(
            TaskState::aggregate([TaskState::Finished, TaskState::Finished]),
            TaskState::Finished
        );
        assert_ne!(
            TaskState::aggregate([TaskState::Finished, TaskState::Idle]),
            TaskState::Finished
        );
    }

    #[test]
    fn test_instance_running_to_failed_is_legal() {
        let mut state = InstanceState::Running;
        state.change_state(InstanceState::Failed, false).unwrap();
    }

    #[test]
    fn test_instance_stop_then_start_is_forbidden() {
        let mut state = InstanceState::Idle;
        state.change_state(InstanceState::Stopped, false).unwrap();
        assert!(
            state
                .change_state(InstanceState::Running, false)
                .is_err()
        );
    }

    #[test]
    fn test_serde_round_trip_uses_lowercase_tags() {
        let json = serde_json::to_string(&TaskState::PrepFailed).unwrap();
        assert_eq!(json, "\"prepfailed\"");
        let back: TaskState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TaskState::PrepFailed);
        assert_eq!(
            serde_json::to_string(&InstanceState::Running).unwrap(),
            "\"running\""
        );
    }

    fn arb_task_state() -> impl Strategy<Value = TaskState> {
        prop::sample::select(ALL_TASK_STATES.to_vec())
    }

    proptest! {
        #[test]
        fn aggregate_of_singleton_is_identity(state in arb_task_state()) {
            prop_assert_eq!(TaskState::aggregate([state]), state);
        }

        #[test]
        fn stopped_dominates_any_mix(mut states in prop::collection::vec(arb_task_state(), 0..6)) {
            states.push(TaskState::Stopped);
            prop_assert_eq!(TaskState::aggregate(states), TaskState::Stopped);
        }

        #[test]
        fn aggregation_is_order_independent(states in prop::collection::vec(arb_task_state(), 1..6)) {
            let mut reversed = states.clone();
            reversed.reverse();
            prop_assert_eq!(TaskState::aggregate(states), TaskState::aggregate(reversed));
        }
    }
}
