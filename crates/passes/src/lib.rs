//! Analyses and transforms over the relift IR: reaching definitions and
//! parameter/return reconstruction.
//!
//! Both passes are plain functions taking all of their state explicitly;
//! nothing here is process-global. The pipeline is single-threaded: each
//! pass exclusively owns the module it transforms.

use thiserror::Error;

pub mod hints;
pub mod loc;
pub mod param_return;
pub mod rda;

pub use hints::{FuncDecl, TypeHints};
pub use loc::Loc;
pub use rda::ReachingDefs;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// The dataflow iteration cap was exceeded; the analysis is unavailable
    /// for this function and callers must fall back to conservative
    /// behavior.
    #[error("reaching definitions did not reach a fixpoint for `{func}`")]
    FailedFixpoint { func: String },
}

/// Tunables of the analysis pipeline.
#[derive(Debug, Clone)]
pub struct PassConfig {
    /// Upper bound on dataflow sweeps before RDA gives up.
    pub rda_iteration_cap: usize,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            rda_iteration_cap: 128,
        }
    }
}
