//! Lifter error kinds.

use relift_abi::Arch;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiftError {
    /// The supplied ABI does not describe the architecture this lifter
    /// translates.
    #[error("lifter requires an aarch64 ABI, got `{0}`")]
    WrongArch(Arch),

    #[error("function `{0}` has no instructions")]
    EmptyBody(String),
}

/// A per-instruction operand-encoding failure. The containing block is
/// marked with the translation-error attribute and lifting continues.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Malformed(pub &'static str);
