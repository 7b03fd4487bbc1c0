//! # DocuAgent Core
//!
//! Domain types, capability traits, and error definitions for the DocuAgent
//! bounded question-answering executor. This crate has **zero framework
//! dependencies** — it defines the contracts that all other crates implement
//! against.
//!
//! ## Design Philosophy
//!
//! The executor treats its two unreliable collaborators — the text-generation
//! backend and the document-retrieval backend — as traits defined here.
//! Implementations live in their own crates (`docuagent-providers`,
//! `docuagent-tools`), which enables:
//! - Swapping backends via configuration
//! - Scripted mock generators and stub corpora in tests
//! - A clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod generator;
pub mod principal;
pub mod retrieval;

// Re-export key types at crate root for ergonomics
pub use error::{Error, GeneratorError, Result, ToolError};
pub use generator::{GenerateRequest, Generator};
pub use principal::Principal;
pub use retrieval::{OpenedChunk, Retriever, SearchHit};
