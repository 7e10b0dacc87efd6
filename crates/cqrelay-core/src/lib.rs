//! cqrelay-core: shared library for the cqrelay media relay.
//!
//! Provides the OneBot command envelope model, a parser/serializer for inline
//! CQ codes, media reference classification with the [`Resolve`] seam, and
//! the [`Rewriter`] that rewrites outgoing commands.

pub mod cqcode;
pub mod envelope;
pub mod error;
pub mod media;
pub mod rewrite;

// Re-export commonly used items at crate root.
pub use envelope::{Command, Envelope};
pub use error::{RelayError, RelayResult};
pub use media::{MediaRef, Resolve, ResolvedMedia};
pub use rewrite::Rewriter;
