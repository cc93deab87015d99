//! Tool selection and command composition for Aegis.
//!
//! Conceptually "Librarian then Scholar": first pick the right tool for a
//! free-text request, then build its argv against the tool's registry
//! entry.  The composer never returns raw shell — only validated argv
//! vectors with no shell metacharacters inside any element.
//!
//! ## Modules
//!
//! - [`librarian`] -- tiered tool selection (literal pre-filter, then menu).
//! - [`scholar`] -- argv composition and suggester alternatives.
//! - [`validate`] -- registry-driven argv validation.
//! - [`composer`] -- the end-to-end facade.
//! - [`error`] -- composition outcomes.

pub mod composer;
pub mod error;
pub mod librarian;
pub mod scholar;
pub mod validate;

pub use composer::Composer;
pub use error::{ComposeError, Result};
pub use librarian::Librarian;
pub use scholar::{ComposedCommand, Scholar, Suggestion};
pub use validate::{fill_missing_defaults, validate_argv};
