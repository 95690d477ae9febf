//! Single-qubit gates and two-qubit Bell kets
//!
//! Two-qubit amplitudes are indexed `2 * first + second`.

use std::f64::consts::FRAC_1_SQRT_2;

use num_complex::Complex64;
use qrelay_core::{BellOutcome, Pauli};

/// 2x2 complex matrix, row-major
pub type Matrix2 = [[Complex64; 2]; 2];

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);
const I: Complex64 = Complex64::new(0.0, 1.0);

pub const IDENTITY: Matrix2 = [[ONE, ZERO], [ZERO, ONE]];
pub const PAULI_X: Matrix2 = [[ZERO, ONE], [ONE, ZERO]];
pub const PAULI_Y: Matrix2 = [[ZERO, Complex64::new(0.0, -1.0)], [I, ZERO]];
pub const PAULI_Z: Matrix2 = [[ONE, ZERO], [ZERO, Complex64::new(-1.0, 0.0)]];

/// Matrix of a Pauli gate
pub fn pauli_matrix(gate: Pauli) -> Matrix2 {
    match gate {
        Pauli::X => PAULI_X,
        Pauli::Y => PAULI_Y,
        Pauli::Z => PAULI_Z,
    }
}

/// Conjugate transpose
pub fn dagger(m: &Matrix2) -> Matrix2 {
    [
        [m[0][0].conj(), m[1][0].conj()],
        [m[0][1].conj(), m[1][1].conj()],
    ]
}

/// Matrix product `a * b`
pub fn matmul(a: &Matrix2, b: &Matrix2) -> Matrix2 {
    let mut out = [[ZERO; 2]; 2];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = a[r][0] * b[0][c] + a[r][1] * b[1][c];
        }
    }
    out
}

/// Ket of the Bell state named by a measurement outcome
pub fn bell_ket(outcome: BellOutcome) -> [Complex64; 4] {
    let h = Complex64::new(FRAC_1_SQRT_2, 0.0);
    match outcome {
        BellOutcome::PhiPlus => [h, ZERO, ZERO, h],
        BellOutcome::PsiPlus => [ZERO, h, h, ZERO],
        BellOutcome::PsiMinus => [ZERO, h, -h, ZERO],
        BellOutcome::PhiMinus => [h, ZERO, ZERO, -h],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &Matrix2, b: &Matrix2) -> bool {
        a.iter()
            .flatten()
            .zip(b.iter().flatten())
            .all(|(x, y)| (x - y).norm() < 1e-12)
    }

    #[test]
    fn test_paulis_are_unitary() {
        for gate in [Pauli::X, Pauli::Y, Pauli::Z] {
            let m = pauli_matrix(gate);
            assert!(approx_eq(&matmul(&m, &dagger(&m)), &IDENTITY));
        }
    }

    #[test]
    fn test_bell_kets_orthonormal() {
        for a in BellOutcome::ALL {
            for b in BellOutcome::ALL {
                let ka = bell_ket(a);
                let kb = bell_ket(b);
                let overlap: Complex64 = ka.iter().zip(kb.iter()).map(|(x, y)| x.conj() * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((overlap.norm() - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_xz_product() {
        // Z then X equals -i*Y
        let zx = matmul(&PAULI_X, &PAULI_Z);
        let minus_iy = PAULI_Y.map(|row| row.map(|v| -(v * I)));
        assert!(approx_eq(&zx, &minus_iy));
    }
}
