//! Fact base and pattern-matching core of the Dovetail forward-chaining rules engine.
//!
//! The crate owns facts and their lifecycle (`FactStore`), finds content-identical
//! facts through a hash index, drives every asserted fact through a per-template
//! discrimination tree (`AlphaNetwork`) and hands the resulting alpha matches to a
//! pluggable `JoinNetwork`. `FactBuilder`, `FactModifier` and the query engine are
//! thin callers layered on the store.
//!
//! ```
//! use dovetail_core::{Deftemplate, FactStore, FactValue, SlotDefinition};
//!
//! let mut store = FactStore::default();
//! store.define_template(
//!     Deftemplate::new("point")
//!         .with_slot(SlotDefinition::single("x"))
//!         .with_slot(SlotDefinition::single("y")),
//! )?;
//! let fact = store.create_fact("point")?;
//! store.put_slot(fact, "x", FactValue::Integer(1))?;
//! store.put_slot(fact, "y", FactValue::Integer(2))?;
//! let asserted = store.assert_fact(fact)?;
//! assert_eq!(store.get(asserted.handle()).map(|f| f.index()), Some(1));
//! # Ok::<(), dovetail_core::DovetailError>(())
//! ```

pub mod alpha_memory;
pub mod atoms;
pub mod builder;
pub mod config;
pub mod error;
pub mod fact_store;
pub mod halt;
pub mod hash_index;
pub mod modifier;
pub mod pattern;
pub mod query;
pub mod stats;
pub mod template;
pub mod tracing_setup;

pub use alpha_memory::{AlphaMatchRecord, AlphaMemory, AlphaMemoryNetwork, AlphaMemoryStats};
pub use atoms::AtomTable;
pub use builder::FactBuilder;
pub use config::{FactBaseConfig, LoggingConfig};
pub use dovetail_types::{FactId, FactValue, ValueType};
pub use error::{
    AssertError, BuilderError, ConfigError, DovetailError, DovetailResult, ErrorSeverity, EvalError, FactStoreError,
    ModifyError, PatternError, PutSlotError, QueryError, RetractError, TemplateError,
};
pub use fact_store::{Asserted, Fact, FactHandle, FactListener, FactStore, ListPosition};
pub use halt::HaltFlag;
pub use hash_index::FactHashIndex;
pub use modifier::FactModifier;
pub use pattern::{
    AlphaMatch, AlphaNetwork, FieldTest, FieldView, JoinNetwork, MatchHandle, MultifieldMarker, NullJoinNetwork,
    Pattern, PatternElement, PatternEntryId, PatternTree, Predicate, SlotPattern,
};
pub use query::{FactQuery, QueryBinding, QueryEngine};
pub use stats::FactStoreStats;
pub use template::{
    ConstraintDescriptor, DefaultSpec, Deftemplate, SlotCardinality, SlotDefinition, TemplateId, TemplateRegistry,
};
pub use tracing_setup::init_tracing;
