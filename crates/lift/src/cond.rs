//! AArch64 condition codes.

use std::fmt;

/// A condition-code predicate over the NZCV flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    /// Equal: Z.
    Eq,
    /// Not equal: !Z.
    Ne,
    /// Carry set / unsigned higher or same: C.
    Hs,
    /// Carry clear / unsigned lower: !C.
    Lo,
    /// Minus / negative: N.
    Mi,
    /// Plus / positive or zero: !N.
    Pl,
    /// Overflow: V.
    Vs,
    /// No overflow: !V.
    Vc,
    /// Unsigned higher: C && !Z.
    Hi,
    /// Unsigned lower or same: !C || Z.
    Ls,
    /// Signed greater or equal: N == V.
    Ge,
    /// Signed less: N != V.
    Lt,
    /// Signed greater: !Z && N == V.
    Gt,
    /// Signed less or equal: Z || N != V.
    Le,
    /// Always.
    Al,
}

impl Cond {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Hs => "hs",
            Self::Lo => "lo",
            Self::Mi => "mi",
            Self::Pl => "pl",
            Self::Vs => "vs",
            Self::Vc => "vc",
            Self::Hi => "hi",
            Self::Ls => "ls",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Le => "le",
            Self::Al => "al",
        }
    }

    /// The opposite predicate. `AL` has no inverse and returns itself.
    pub fn invert(self) -> Cond {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Hs => Self::Lo,
            Self::Lo => Self::Hs,
            Self::Mi => Self::Pl,
            Self::Pl => Self::Mi,
            Self::Vs => Self::Vc,
            Self::Vc => Self::Vs,
            Self::Hi => Self::Ls,
            Self::Ls => Self::Hi,
            Self::Ge => Self::Lt,
            Self::Lt => Self::Ge,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
            Self::Al => Self::Al,
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
