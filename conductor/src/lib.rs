//! Declarative expert-workflow interpreter.
//!
//! This crate interprets a YAML workflow document describing an ordered
//! sequence of calls to named "expert" agents, with branch-on-decision
//! loopback and macro-style expansion of composite actions. The
//! architecture keeps a strict split:
//!
//! - **Pure passes** ([`template`], [`expand`], [`decision`],
//!   [`validate`]): deterministic transforms over document data, no I/O
//!   beyond reading template files, fully testable in isolation.
//! - **Execution** ([`engine`], [`outputs`]): the program-counter state
//!   machine and its append-only, versioned output store.
//! - **Boundary** ([`expert`], [`observer`]): the expert-invocation
//!   collaborator and the injected lifecycle observer. The interpreter
//!   treats an expert call as one opaque synchronous suspension point.

pub mod config;
pub mod decision;
pub mod document;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod expand;
pub mod expert;
pub mod logging;
pub mod observer;
pub mod outputs;
pub mod process;
pub mod strings;
pub mod template;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
