//! Core types and error definitions for Mnemo.
//!
//! This crate provides the types shared by every Mnemo crate: the unified
//! error enum and the data model a retrieval produces.
//!
//! # Main types
//!
//! - [`MnemoError`] — Unified error enum for the retrieval layer.
//! - [`MnemoResult`] — Convenience alias for `Result<T, MnemoError>`.
//! - [`Snippet`] — One retrieved unit of knowledge.
//! - [`Citation`] — Descriptive reference attached to a result.
//! - [`RetrievalResult`] — What the retrieval gateway hands back to the chat flow.
//! - [`Hints`] — Ordered, strategy-specific request hints.

/// Error types.
pub mod error;
/// Retrieval data model.
pub mod retrieval;

pub use error::{MnemoError, MnemoResult};
pub use retrieval::{Citation, Hints, RetrievalResult, Snippet, SnippetSource, NO_CONTEXT};
