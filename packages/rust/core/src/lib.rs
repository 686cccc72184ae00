//! Dispatch and persistence for SourceRouter.
//!
//! This crate ties the classifier and the source adapters together:
//! [`Orchestrator`] fans a classified query out to its adapters,
//! [`ResultLogger`] writes the combined answer to disk, and [`Router`]
//! wraps both behind `ask`.

pub mod logger;
pub mod orchestrator;
pub mod router;

pub use logger::ResultLogger;
pub use orchestrator::{DispatchObserver, Orchestrator, SilentObserver};
pub use router::Router;
