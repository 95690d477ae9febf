//! Density matrices over a small ordered set of qubits
//!
//! Qubit 0 is the most significant bit of a basis index. Matrices are stored
//! row-major with dimension `2^n`.

use num_complex::Complex64;
use qrelay_core::{QrelayError, QrelayResult};

use crate::gates::{pauli_matrix, Matrix2};
use qrelay_core::Pauli;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Trace tolerance when validating states
pub const TRACE_TOLERANCE: f64 = 1e-9;

/// Density matrix of `n` qubits
#[derive(Clone, Debug, PartialEq)]
pub struct DensityMatrix {
    qubits: usize,
    data: Vec<Complex64>,
}

impl DensityMatrix {
    /// Scalar 1x1 state (no qubits)
    pub fn scalar(value: f64) -> Self {
        DensityMatrix {
            qubits: 0,
            data: vec![Complex64::new(value, 0.0)],
        }
    }

    /// Pure state |ψ><ψ|
    pub fn from_ket(ket: &[Complex64]) -> QrelayResult<Self> {
        let dim = ket.len();
        if dim == 0 || !dim.is_power_of_two() {
            return Err(QrelayError::InvalidState(format!(
                "ket length {dim} is not a power of two"
            )));
        }
        let norm: f64 = ket.iter().map(|a| a.norm_sqr()).sum();
        if (norm - 1.0).abs() > TRACE_TOLERANCE {
            return Err(QrelayError::InvalidState(format!("ket norm {norm}")));
        }

        let mut data = vec![ZERO; dim * dim];
        for r in 0..dim {
            for c in 0..dim {
                data[r * dim + c] = ket[r] * ket[c].conj();
            }
        }
        Ok(DensityMatrix {
            qubits: dim.trailing_zeros() as usize,
            data,
        })
    }

    /// Weighted ensemble of pure states. Weights must sum to 1.
    pub fn from_ensemble(components: &[(f64, &[Complex64])]) -> QrelayResult<Self> {
        let total: f64 = components.iter().map(|(p, _)| *p).sum();
        if components.is_empty() || (total - 1.0).abs() > TRACE_TOLERANCE {
            return Err(QrelayError::InvalidState(format!(
                "ensemble weights sum to {total}"
            )));
        }
        if components.iter().any(|(p, _)| *p < 0.0) {
            return Err(QrelayError::InvalidState("negative ensemble weight".into()));
        }

        let mut acc: Option<DensityMatrix> = None;
        for (p, ket) in components {
            let mut term = DensityMatrix::from_ket(ket)?;
            term.scale(*p);
            acc = Some(match acc {
                None => term,
                Some(mut sum) => {
                    if sum.qubits != term.qubits {
                        return Err(QrelayError::InvalidState(
                            "ensemble mixes different qubit counts".into(),
                        ));
                    }
                    sum.add_assign(&term);
                    sum
                }
            });
        }
        acc.ok_or_else(|| QrelayError::InvalidState("empty ensemble".into()))
    }

    #[inline]
    pub fn qubits(&self) -> usize {
        self.qubits
    }

    #[inline]
    pub fn dim(&self) -> usize {
        1 << self.qubits
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Complex64 {
        self.data[row * self.dim() + col]
    }

    #[inline]
    fn set(&mut self, row: usize, col: usize, value: Complex64) {
        let dim = self.dim();
        self.data[row * dim + col] = value;
    }

    pub fn trace(&self) -> f64 {
        (0..self.dim()).map(|i| self.get(i, i).re).sum()
    }

    fn scale(&mut self, factor: f64) {
        for v in &mut self.data {
            *v *= factor;
        }
    }

    fn add_assign(&mut self, other: &DensityMatrix) {
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += *b;
        }
    }

    /// Divide by the trace
    pub fn normalize(&mut self) -> QrelayResult<()> {
        let tr = self.trace();
        if tr <= TRACE_TOLERANCE {
            return Err(QrelayError::InvalidState(format!("trace {tr} too small")));
        }
        self.scale(1.0 / tr);
        Ok(())
    }

    /// Tensor product; `self` occupies the leading qubits
    pub fn tensor(&self, other: &DensityMatrix) -> DensityMatrix {
        let d1 = self.dim();
        let d2 = other.dim();
        let dim = d1 * d2;
        let mut data = vec![ZERO; dim * dim];
        for r1 in 0..d1 {
            for c1 in 0..d1 {
                let a = self.get(r1, c1);
                if a == ZERO {
                    continue;
                }
                for r2 in 0..d2 {
                    for c2 in 0..d2 {
                        data[(r1 * d2 + r2) * dim + (c1 * d2 + c2)] = a * other.get(r2, c2);
                    }
                }
            }
        }
        DensityMatrix {
            qubits: self.qubits + other.qubits,
            data,
        }
    }

    #[inline]
    fn bit_mask(&self, qubit: usize) -> usize {
        1 << (self.qubits - 1 - qubit)
    }

    /// Spread the bits of `bits` onto the given qubit positions
    fn scatter(&self, positions: &[usize], bits: usize) -> usize {
        let len = positions.len();
        positions
            .iter()
            .enumerate()
            .filter(|(j, _)| (bits >> (len - 1 - j)) & 1 == 1)
            .fold(0, |idx, (_, &pos)| idx | self.bit_mask(pos))
    }

    fn complement(&self, positions: &[usize]) -> Vec<usize> {
        (0..self.qubits).filter(|q| !positions.contains(q)).collect()
    }

    fn check_qubit(&self, qubit: usize) -> QrelayResult<()> {
        if qubit >= self.qubits {
            return Err(QrelayError::InvalidState(format!(
                "qubit {qubit} outside {}-qubit state",
                self.qubits
            )));
        }
        Ok(())
    }

    /// ρ → U ρ U† on one qubit
    pub fn apply_single(&mut self, qubit: usize, u: &Matrix2) -> QrelayResult<()> {
        self.check_qubit(qubit)?;
        let dim = self.dim();
        let mask = self.bit_mask(qubit);

        // U ρ
        for c in 0..dim {
            for r0 in (0..dim).filter(|r| r & mask == 0) {
                let r1 = r0 | mask;
                let a = self.get(r0, c);
                let b = self.get(r1, c);
                self.set(r0, c, u[0][0] * a + u[0][1] * b);
                self.set(r1, c, u[1][0] * a + u[1][1] * b);
            }
        }
        // (U ρ) U†
        for r in 0..dim {
            for c0 in (0..dim).filter(|c| c & mask == 0) {
                let c1 = c0 | mask;
                let a = self.get(r, c0);
                let b = self.get(r, c1);
                self.set(r, c0, a * u[0][0].conj() + b * u[0][1].conj());
                self.set(r, c1, a * u[1][0].conj() + b * u[1][1].conj());
            }
        }
        Ok(())
    }

    /// Depolarize one qubit: with probability `p` it is replaced by the
    /// maximally mixed state.
    pub fn depolarize(&mut self, qubit: usize, p: f64) -> QrelayResult<()> {
        self.check_qubit(qubit)?;
        let p = p.clamp(0.0, 1.0);
        if p == 0.0 {
            return Ok(());
        }

        let mut out = self.clone();
        out.scale(1.0 - 0.75 * p);
        for gate in [Pauli::X, Pauli::Y, Pauli::Z] {
            let mut term = self.clone();
            term.apply_single(qubit, &pauli_matrix(gate))?;
            term.scale(0.25 * p);
            out.add_assign(&term);
        }
        *self = out;
        Ok(())
    }

    /// Partial trace keeping `keep`, in the given order
    pub fn reduce(&self, keep: &[usize]) -> QrelayResult<DensityMatrix> {
        for &q in keep {
            self.check_qubit(q)?;
        }
        let traced = self.complement(keep);
        let k = keep.len();
        let dim = 1 << k;
        let mut data = vec![ZERO; dim * dim];

        for r in 0..dim {
            let row_base = self.scatter(keep, r);
            for c in 0..dim {
                let col_base = self.scatter(keep, c);
                let mut acc = ZERO;
                for t in 0..(1usize << traced.len()) {
                    let offset = self.scatter(&traced, t);
                    acc += self.get(row_base | offset, col_base | offset);
                }
                data[r * dim + c] = acc;
            }
        }
        Ok(DensityMatrix { qubits: k, data })
    }

    /// Project qubits `(a, b)` onto `ket` and drop them.
    ///
    /// Returns the outcome probability and the normalized post-measurement
    /// state of the remaining qubits (in their original order), or `None`
    /// when the outcome has zero probability.
    pub fn project_pair(
        &self,
        a: usize,
        b: usize,
        ket: &[Complex64; 4],
    ) -> QrelayResult<(f64, Option<DensityMatrix>)> {
        self.check_qubit(a)?;
        self.check_qubit(b)?;
        if a == b {
            return Err(QrelayError::InvalidState("pair measurement on one qubit".into()));
        }

        let pair = [a, b];
        let rest = self.complement(&pair);
        let dim = 1 << rest.len();
        let mut data = vec![ZERO; dim * dim];

        for r in 0..dim {
            let row_base = self.scatter(&rest, r);
            for c in 0..dim {
                let col_base = self.scatter(&rest, c);
                let mut acc = ZERO;
                for (s, ks) in ket.iter().enumerate() {
                    if *ks == ZERO {
                        continue;
                    }
                    let row = row_base | self.scatter(&pair, s);
                    for (t, kt) in ket.iter().enumerate() {
                        if *kt == ZERO {
                            continue;
                        }
                        let col = col_base | self.scatter(&pair, t);
                        acc += ks.conj() * self.get(row, col) * kt;
                    }
                }
                data[r * dim + c] = acc;
            }
        }

        let mut post = DensityMatrix {
            qubits: rest.len(),
            data,
        };
        let probability = post.trace().max(0.0);
        if probability <= TRACE_TOLERANCE {
            return Ok((0.0, None));
        }
        post.normalize()?;
        Ok((probability, Some(post)))
    }

    /// <ψ|ρ|ψ> for a ket over all qubits of this state
    pub fn overlap(&self, ket: &[Complex64]) -> QrelayResult<f64> {
        if ket.len() != self.dim() {
            return Err(QrelayError::InvalidState(format!(
                "ket of length {} against {}-qubit state",
                ket.len(),
                self.qubits
            )));
        }
        let mut acc = ZERO;
        for (r, kr) in ket.iter().enumerate() {
            for (c, kc) in ket.iter().enumerate() {
                acc += kr.conj() * self.get(r, c) * kc;
            }
        }
        Ok(acc.re.clamp(0.0, 1.0))
    }
}
