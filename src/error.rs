//! Error types for the nucleus kernel.
//!
//! All errors are strongly typed using thiserror and raised eagerly at the
//! point of violation. Contract errors are scenario-local; plugin graph errors
//! abort a whole experiment before any scenario starts.

use thiserror::Error;

use crate::ids::{IdKind, Identifier, PluginId, ScenarioId};

/// Precondition violations raised by kernel and plugin contracts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContractError {
    #[error("Required value '{field}' was not provided")]
    NullArgument {
        field: String,
    },

    #[error("Unknown {kind} id: {id}")]
    UnknownId {
        kind: IdKind,
        id: String,
    },

    #[error("Duplicate {kind} id: {id}")]
    DuplicateId {
        kind: IdKind,
        id: String,
    },

    #[error("Incompatible value for '{field}': expected {expected}, got {actual}")]
    IncompatibleValue {
        field: String,
        expected: String,
        actual: String,
    },

    /// Raised by plugins whose data manager rejects a write to a value
    /// defined as immutable.
    #[error("Value '{id}' is immutable")]
    ImmutableViolation {
        id: String,
    },

    #[error("Event labeler '{labeler_id}' is already registered for event type {event_type}")]
    DuplicateLabelerId {
        event_type: String,
        labeler_id: String,
    },

    #[error("Cannot schedule a plan at time {requested} before the current time {current}")]
    SchedulingInPast {
        requested: f64,
        current: f64,
    },

    /// Raised by plugins when building data that leaves a required value
    /// unassigned.
    #[error("'{id}' has neither an assigned value nor a default")]
    InsufficientValueAssignment {
        id: String,
    },

    #[error("Operation '{operation}' is not allowed while the simulation is {phase}")]
    PhaseViolation {
        operation: String,
        phase: String,
    },

    #[error("Data manager {type_name} is already in use further up the call stack")]
    DataManagerBusy {
        type_name: String,
    },
}

impl ContractError {
    /// Creates an `UnknownId` error for any identifier type.
    pub fn unknown<I: Identifier>(id: &I) -> Self {
        Self::UnknownId {
            kind: I::KIND,
            id: id.to_string(),
        }
    }

    /// Creates a `DuplicateId` error for any identifier type.
    pub fn duplicate<I: Identifier>(id: &I) -> Self {
        Self::DuplicateId {
            kind: I::KIND,
            id: id.to_string(),
        }
    }

    /// Creates a `NullArgument` error.
    pub fn null(field: impl Into<String>) -> Self {
        Self::NullArgument { field: field.into() }
    }

    /// Creates an `IncompatibleValue` error.
    pub fn incompatible(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::IncompatibleValue {
            field: field.into(),
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }
}

/// Errors in the plugin dependency graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginGraphError {
    #[error("Plugin {plugin} depends on {dependency}, which was never added")]
    MissingDependency {
        plugin: PluginId,
        dependency: PluginId,
    },

    #[error("Circular plugin dependency: {}", render_cycle(.cycle))]
    CircularDependency {
        cycle: Vec<PluginId>,
    },
}

fn render_cycle(cycle: &[PluginId]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

/// Errors raised while running simulations and experiments.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Scenario {scenario_id} failed: {message}")]
    ScenarioFailed {
        scenario_id: ScenarioId,
        message: String,
    },

    #[error("Worker panicked while running scenario {scenario_id}: {message}")]
    WorkerPanicked {
        scenario_id: ScenarioId,
        message: String,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Progress log error at {path}: {message}")]
    ProgressLog {
        path: String,
        message: String,
    },

    #[error("Progress log {path} does not match this experiment: {reason}")]
    IncompatibleProgressLog {
        path: String,
        reason: String,
    },
}

/// Top-level error type for the kernel.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NucleusError {
    #[error("Contract violation: {0}")]
    Contract(#[from] ContractError),

    #[error("Plugin graph error: {0}")]
    PluginGraph(#[from] PluginGraphError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl NucleusError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a contract violation.
    #[must_use]
    pub const fn is_contract(&self) -> bool {
        matches!(self, Self::Contract(_))
    }

    /// Returns true if this is a plugin graph error.
    #[must_use]
    pub const fn is_plugin_graph(&self) -> bool {
        matches!(self, Self::PluginGraph(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this error must stop a whole experiment rather than
    /// a single scenario.
    #[must_use]
    pub const fn is_experiment_fatal(&self) -> bool {
        matches!(self, Self::PluginGraph(_))
    }
}

/// Result type alias for kernel operations.
pub type NucleusResult<T> = Result<T, NucleusError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ActorId;

    #[test]
    fn test_unknown_id_names_kind() {
        let err = ContractError::unknown(&ActorId::new(7));
        let msg = format!("{err}");
        assert!(msg.contains("actor"));
        assert!(msg.contains('7'));
    }

    #[test]
    fn test_scheduling_in_past_reports_both_times() {
        let err = ContractError::SchedulingInPast {
            requested: 1.5,
            current: 3.0,
        };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_value_errors_name_the_value() {
        let immutable = ContractError::ImmutableViolation {
            id: "age".to_string(),
        };
        assert_eq!(immutable.to_string(), "Value 'age' is immutable");

        let unassigned = NucleusError::from(ContractError::InsufficientValueAssignment {
            id: "vaccinated".to_string(),
        });
        assert!(unassigned.is_contract());
        assert!(unassigned.to_string().contains("'vaccinated' has neither an assigned value nor a default"));
    }

    #[test]
    fn test_cycle_is_rendered_closed() {
        let err = PluginGraphError::CircularDependency {
            cycle: vec![PluginId::new("a"), PluginId::new("b")],
        };
        assert_eq!(
            format!("{err}"),
            "Circular plugin dependency: a -> b -> a"
        );
    }

    #[test]
    fn test_nucleus_error_from_contract() {
        let err: NucleusError = ContractError::null("plugin id").into();
        assert!(err.is_contract());
        assert!(!err.is_experiment_fatal());
    }

    #[test]
    fn test_nucleus_error_from_plugin_graph() {
        let err: NucleusError = PluginGraphError::MissingDependency {
            plugin: PluginId::new("regions"),
            dependency: PluginId::new("people"),
        }
        .into();
        assert!(err.is_plugin_graph());
        assert!(err.is_experiment_fatal());
        assert!(format!("{err}").contains("people"));
    }

    #[test]
    fn test_nucleus_error_internal() {
        let err = NucleusError::internal("unexpected state");
        assert!(!err.is_execution());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
