//! Bell outcomes and the swap correction map
//!
//! A joint Bell-state measurement at the relay yields one of four outcomes.
//! The party holding the logical partner qubit fixes its half with a local
//! Pauli correction chosen purely from that outcome:
//!
//! | outcome | state | correction       |
//! |---------|-------|------------------|
//! | 0       | Φ+    | identity         |
//! | 1       | Ψ+    | X                |
//! | 2       | Ψ-    | Z, then X        |
//! | 3       | Φ-    | Z                |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{QrelayError, QrelayResult};

/// Outcome of a joint two-qubit Bell-state measurement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BellOutcome {
    /// Φ+ = (|00> + |11>)/√2, the canonical target state
    #[default]
    PhiPlus = 0,
    /// Ψ+ = (|01> + |10>)/√2
    PsiPlus = 1,
    /// Ψ- = (|01> - |10>)/√2
    PsiMinus = 2,
    /// Φ- = (|00> - |11>)/√2
    PhiMinus = 3,
}

impl BellOutcome {
    /// All outcomes in canonical index order
    pub const ALL: [BellOutcome; 4] = [
        BellOutcome::PhiPlus,
        BellOutcome::PsiPlus,
        BellOutcome::PsiMinus,
        BellOutcome::PhiMinus,
    ];

    /// Decode the integer emitted by a measurement
    pub fn from_index(index: u8) -> QrelayResult<Self> {
        match index {
            0 => Ok(BellOutcome::PhiPlus),
            1 => Ok(BellOutcome::PsiPlus),
            2 => Ok(BellOutcome::PsiMinus),
            3 => Ok(BellOutcome::PhiMinus),
            other => Err(QrelayError::InvalidOutcome(other)),
        }
    }

    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BellOutcome::PhiPlus => "Φ+",
            BellOutcome::PsiPlus => "Ψ+",
            BellOutcome::PsiMinus => "Ψ-",
            BellOutcome::PhiMinus => "Φ-",
        }
    }

    /// Correction that maps this outcome back onto Φ+
    #[inline]
    pub fn correction(self) -> CorrectionOp {
        correction_for(self)
    }
}

impl TryFrom<u8> for BellOutcome {
    type Error = QrelayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        BellOutcome::from_index(value)
    }
}

impl fmt::Display for BellOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.symbol(), self.index())
    }
}

/// Single-qubit Pauli gate used by corrections
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pauli {
    X,
    Y,
    Z,
}

/// Local unitary fix-up applied after entanglement swapping
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CorrectionOp {
    #[default]
    Identity,
    ApplyX,
    ApplyZ,
    /// Z first, X second
    ApplyZThenX,
}

impl CorrectionOp {
    /// Gates in application order
    pub fn gates(self) -> &'static [Pauli] {
        match self {
            CorrectionOp::Identity => &[],
            CorrectionOp::ApplyX => &[Pauli::X],
            CorrectionOp::ApplyZ => &[Pauli::Z],
            CorrectionOp::ApplyZThenX => &[Pauli::Z, Pauli::X],
        }
    }

    #[inline]
    pub fn is_identity(self) -> bool {
        self == CorrectionOp::Identity
    }
}

impl fmt::Display for CorrectionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CorrectionOp::Identity => "I",
            CorrectionOp::ApplyX => "X",
            CorrectionOp::ApplyZ => "Z",
            CorrectionOp::ApplyZThenX => "Z;X",
        };
        f.write_str(name)
    }
}

/// Swap correction map. Total and pure: depends on nothing but the outcome.
#[inline]
pub const fn correction_for(outcome: BellOutcome) -> CorrectionOp {
    match outcome {
        BellOutcome::PhiPlus => CorrectionOp::Identity,
        BellOutcome::PsiPlus => CorrectionOp::ApplyX,
        BellOutcome::PsiMinus => CorrectionOp::ApplyZThenX,
        BellOutcome::PhiMinus => CorrectionOp::ApplyZ,
    }
}
