//! Error handling for the Dovetail fact base
//!
//! Every caller-visible operation reports failure through a small, closed enum of
//! its own (`AssertError`, `RetractError`, ...). `DovetailError` wraps all of them
//! for callers that want a single type, and carries the category/severity helpers
//! used for logging.
//!
//! Invariant violations are not errors: they indicate a programming bug and go
//! through [`fatal_invariant`], which logs a diagnostic and panics.

use crate::fact_store::FactHandle;
use crate::pattern::PatternEntryId;
use crate::template::TemplateId;
use dovetail_types::{FactId, ValueType};
use std::fmt;
use thiserror::Error;
use tracing::error;

/// Failure raised by a pattern test or query expression while it was evaluated
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Errors reported by `FactStore::assert_fact` and friends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssertError {
    #[error("Unknown or stale fact handle {0}")]
    UnknownFact(FactHandle),

    #[error("Fact {0} has already been retracted")]
    FactRetracted(FactHandle),

    #[error("Could not assert fact: a pattern match or retraction is already in progress")]
    CouldNotAssert,

    #[error("Rule network error while matching fact f-{index}")]
    RuleNetwork { fact: FactHandle, index: FactId },
}

/// Errors reported by `FactStore::retract`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetractError {
    #[error("Unknown or stale fact handle {0}")]
    UnknownFact(FactHandle),

    #[error("Fact {0} was never asserted")]
    NotAsserted(FactHandle),

    #[error("Could not retract fact: a pattern match or retraction is already in progress")]
    CouldNotRetract,

    #[error("Rule network error while retracting fact f-{index}")]
    RuleNetwork { fact: FactHandle, index: FactId },
}

/// Slot-level validation errors, detected before any mutation happens
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PutSlotError {
    #[error("Template {template} has no slot named {slot}")]
    SlotNotFound { template: String, slot: String },

    #[error("Slot {slot} expects {expected}")]
    CardinalityViolation { slot: String, expected: String },

    #[error("Slot {slot} does not allow values of type {found}")]
    TypeViolation { slot: String, found: ValueType },

    #[error("Value {value} is not among the allowed values of slot {slot}")]
    AllowedValuesViolation { slot: String, value: String },

    #[error("Value {value} is outside the range of slot {slot}")]
    RangeViolation { slot: String, value: String },
}

/// Errors reported by fact modification (`modify`, `duplicate`, `FactModifier`)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModifyError {
    #[error("Unknown or stale fact handle {0}")]
    UnknownFact(FactHandle),

    #[error("Fact {0} has already been retracted")]
    FactRetracted(FactHandle),

    #[error("Fact {0} was never asserted")]
    NotAsserted(FactHandle),

    #[error("Facts of implied template {0} cannot be modified slot by slot")]
    ImpliedTemplate(String),

    #[error("Slot position {position} is out of range for a template with {arity} slots")]
    SlotOutOfRange { position: usize, arity: usize },

    #[error(transparent)]
    PutSlot(#[from] PutSlotError),

    #[error("Could not modify fact: a pattern match or retraction is already in progress")]
    CouldNotModify,

    #[error("Rule network error while modifying fact f-{index}")]
    RuleNetwork { fact: FactHandle, index: FactId },
}

/// Errors reported by `FactBuilder`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    #[error("Template {0} not found")]
    UnknownTemplate(String),

    #[error("Implied template {0} cannot be used with a fact builder")]
    ImpliedTemplate(String),

    #[error("Slot {slot} of template {template} has no default and must be set")]
    SlotRequired { template: String, slot: String },

    #[error(transparent)]
    PutSlot(#[from] PutSlotError),

    #[error("Could not assert fact: a pattern match or retraction is already in progress")]
    CouldNotAssert,

    #[error("Rule network error while matching fact f-{index}")]
    RuleNetwork { fact: FactHandle, index: FactId },
}

impl From<AssertError> for BuilderError {
    fn from(err: AssertError) -> Self {
        match err {
            AssertError::RuleNetwork { fact, index } => Self::RuleNetwork { fact, index },
            // A freshly created fact cannot be stale or retracted; only the reentrancy
            // guard can reject it.
            AssertError::CouldNotAssert
            | AssertError::UnknownFact(_)
            | AssertError::FactRetracted(_) => Self::CouldNotAssert,
        }
    }
}

/// Errors reported by the fact query engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Malformed query restriction: {0}")]
    MalformedRestriction(String),

    #[error("Template {0} not found")]
    UnknownTemplate(String),

    #[error("Query evaluation failed: {0}")]
    Evaluation(#[from] EvalError),
}

/// Errors reported by the template registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template {0} is already defined")]
    DuplicateTemplate(String),

    #[error("Template {template} declares slot {slot} more than once")]
    DuplicateSlot { template: String, slot: String },

    #[error("Template {0} not found")]
    UnknownTemplate(String),

    #[error("Template {name} is in use ({busy} references)")]
    TemplateInUse { name: String, busy: usize },

    #[error("Default value of slot {slot} in template {template} is invalid: {source}")]
    InvalidDefault {
        template: String,
        slot: String,
        #[source]
        source: PutSlotError,
    },

    #[error("Module {0} not found")]
    UnknownModule(String),
}

/// Errors reported while adding patterns to the alpha network
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Template {0} not found")]
    UnknownTemplate(TemplateId),

    #[error("Slot position {position} is out of range for a template with {arity} slots")]
    SlotOutOfRange { position: usize, arity: usize },

    #[error("Slot {slot} takes a single field test, got {elements} elements")]
    SingleSlotShape { slot: String, elements: usize },

    #[error("Slot {slot} is constrained twice in the same pattern")]
    DuplicateSlot { slot: String },

    #[error("Multifield slot {slot} has no pattern elements; match an empty value with a multifield constant")]
    EmptySlotPattern { slot: String },

    #[error("Pattern entry {0} not found")]
    UnknownEntry(PatternEntryId),
}

/// Errors reported by direct fact store manipulation outside assert/retract/modify
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactStoreError {
    #[error("Template {0} not found")]
    UnknownTemplate(String),

    #[error("Unknown or stale fact handle {0}")]
    UnknownFact(FactHandle),

    #[error("Fact {0} is already asserted; use modify to change it")]
    FactAttached(FactHandle),

    #[error("Slot position {position} is out of range for a template with {arity} slots")]
    SlotOutOfRange { position: usize, arity: usize },

    #[error(transparent)]
    PutSlot(#[from] PutSlotError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("Listener {0} is already registered")]
    DuplicateListener(String),
}

/// Errors reported while loading configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Could not read configuration file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Could not parse configuration: {0}")]
    Parse(String),

    #[error("Invalid value for {setting}: {reason}")]
    Invalid { setting: String, reason: String },
}

/// Umbrella error type for callers that handle every fact base failure alike
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DovetailError {
    #[error(transparent)]
    Assert(#[from] AssertError),
    #[error(transparent)]
    Retract(#[from] RetractError),
    #[error(transparent)]
    Modify(#[from] ModifyError),
    #[error(transparent)]
    Builder(#[from] BuilderError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    FactStore(#[from] FactStoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DovetailError {
    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            DovetailError::Assert(_) => "assert",
            DovetailError::Retract(_) => "retract",
            DovetailError::Modify(_) => "modify",
            DovetailError::Builder(_) => "builder",
            DovetailError::Query(_) => "query",
            DovetailError::Template(_) => "template",
            DovetailError::Pattern(_) => "pattern",
            DovetailError::FactStore(_) => "fact_store",
            DovetailError::Config(_) => "configuration",
        }
    }

    /// Whether the error came out of the rule network rather than the caller's input
    pub fn is_rule_network_error(&self) -> bool {
        matches!(
            self,
            DovetailError::Assert(AssertError::RuleNetwork { .. })
                | DovetailError::Retract(RetractError::RuleNetwork { .. })
                | DovetailError::Modify(ModifyError::RuleNetwork { .. })
                | DovetailError::Builder(BuilderError::RuleNetwork { .. })
                | DovetailError::Query(QueryError::Evaluation(_))
        )
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        if self.is_rule_network_error() {
            return ErrorSeverity::High;
        }
        match self {
            DovetailError::Config(_) => ErrorSeverity::Critical,
            DovetailError::Assert(AssertError::CouldNotAssert)
            | DovetailError::Retract(RetractError::CouldNotRetract)
            | DovetailError::Modify(ModifyError::CouldNotModify)
            | DovetailError::Builder(BuilderError::CouldNotAssert) => ErrorSeverity::Medium,
            _ => ErrorSeverity::Low,
        }
    }

    /// Check if this error is recoverable. Validation errors leave the fact base
    /// untouched; rule network errors leave the fact asserted but partially matched.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DovetailError::Config(_)) && !self.is_rule_network_error()
    }
}

/// Error severity levels for logging and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "LOW"),
            ErrorSeverity::Medium => write!(f, "MEDIUM"),
            ErrorSeverity::High => write!(f, "HIGH"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Result type alias for umbrella fact base operations
pub type DovetailResult<T> = Result<T, DovetailError>;

/// Report a broken internal invariant and abort the current operation.
///
/// Reaching this means the fact base itself is corrupt, not that a caller passed
/// bad input, so there is nothing to return to.
#[track_caller]
pub(crate) fn fatal_invariant(component: &str, message: impl fmt::Display) -> ! {
    error!(component, %message, "fatal internal consistency error");
    panic!("{component}: internal consistency error: {message}");
}
