//! Organism kernel: governance for nested, versioned content units.
//!
//! An organism is a unit of content with an append-only history of
//! states. Organisms compose into a tree, and policies nested directly
//! inside an organism decide which proposed changes to it may integrate.
//! The [`Kernel`] enforces these rules over injected [`ports`]; [`db`] and
//! [`memory`] provide ready-made stores.

pub mod access;
pub mod config;
pub mod content_types;
pub mod db;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod models;
pub mod ports;
pub mod tree_render;

pub use access::{AccessDecision, Action};
pub use config::Config;
pub use content_types::{ContentTypeContract, ContentTypeRegistry, Evaluation, PolicyDecision};
pub use error::{KernelError, KernelResult, ValidationIssue};
pub use kernel::{
    AccessMode, AppliedMutation, EvaluationReport, IntegrationOutcome, Kernel, PolicyResult, Ports,
};
pub use memory::MemoryStore;
