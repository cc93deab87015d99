//! Two-layer risk evaluator for Aegis.
//!
//! Produces a [`Verdict`] for a candidate command string: a static pass
//! over the compiled pattern database, a contextual pass through the LLM
//! gateway, and an ordinal-max merge.  The evaluator is pure with respect
//! to session state and never fails — contextual problems degrade the
//! verdict to static-only.

pub mod evaluator;
pub mod verdict;

pub use evaluator::{RiskContext, RiskEvaluator};
pub use verdict::{Verdict, action_for_level};
