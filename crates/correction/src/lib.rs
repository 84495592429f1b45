//! Self-correction for Recollect.
//!
//! [`SelfCorrector`] periodically re-scores recent blocks and retains,
//! flags for review, or removes them. [`Improver`] optionally rewrites
//! blocks under review through a completion provider.

pub mod corrector;
pub mod decision;
pub mod improve;

pub use corrector::{CorrectionReport, SelfCorrector, panic_reason};
pub use decision::{Decision, decide, initial};
pub use improve::Improver;
