//! # libloop
//!
//! Fluent loop wrappers and lazy, chainable pipelines.
//!
//! ## Overview
//!
//! - **Lazy pipelines**: [`Pipeline`] stages do nothing until a terminal
//!   operation pulls elements through them
//! - **Execution modes**: `map`, `filter` and `for_each` stages can run
//!   sequentially, on a bounded worker pool, or over a numeric array
//!   ([`ExecMode`]), with the same output in every mode
//! - **Loops**: [`Loop`] ranges, [`WhileLoop`] and [`DoWhileLoop`] over
//!   explicit state, and [`repeat_until`]
//! - **Flow files**: a small line-oriented language for numeric pipelines
//!   ([`execute_flow`]), used by the `flow-run` binary
//!
//! Failures travel through the pipeline as [`FlowError`] items; terminal
//! operations return the first one.
//!
//! ## Example
//!
//! ```
//! use libloop::{ExecMode, Pipeline};
//!
//! let out = Pipeline::new(0..10)
//!     .skip(2)?
//!     .filter(|x| x % 2 == 1)
//!     .map_in(ExecMode::parallel(2)?, |x| x * 10)
//!     .take(3)?
//!     .to_list()?;
//!
//! assert_eq!(out, vec![30, 50, 70]);
//! # Ok::<(), libloop::FlowError>(())
//! ```

pub mod dsl;
pub mod error;
pub mod executor;
pub mod loops;
pub mod mode;
pub mod pipeline;
pub mod stage;
pub mod vector;

pub use dsl::{
    Command, DslError, FlowReport, NumberFlow, build_flow, execute_flow, execute_flow_with,
    parse_commands, parse_input,
};
pub use error::{BoxError, FlowError};
pub use executor::Dispatch;
pub use loops::{
    DoWhileLoop, Loop, LoopIter, LoopOutcome, RepeatConfig, RepeatOutcome, States, WhileLoop,
    repeat_until,
};
pub use mode::ExecMode;
pub use pipeline::{Boxed, Iter, Pipeline};
pub use stage::StageKind;
#[cfg(feature = "vectorized")]
pub use vector::ArrayMap;
