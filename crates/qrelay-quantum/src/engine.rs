//! Quantum state engine
//!
//! Qubits live in independent state groups. Two groups merge (tensor
//! product) the first time an operation spans both; measured or discarded
//! qubits are traced out of their group.

use std::collections::HashMap;

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use qrelay_core::{BellOutcome, CorrectionOp, Pauli, QrelayError, QrelayResult, QubitId};

use crate::gates::{bell_ket, pauli_matrix};
use crate::state::DensityMatrix;

/// Mixture of Bell states emitted by a pair source
pub type BellMixture = Vec<(BellOutcome, f64)>;

#[derive(Clone, Debug)]
struct StateGroup {
    qubits: Vec<QubitId>,
    rho: DensityMatrix,
}

impl StateGroup {
    fn position(&self, qubit: QubitId) -> QrelayResult<usize> {
        self.qubits
            .iter()
            .position(|q| *q == qubit)
            .ok_or(QrelayError::UnknownQubit(qubit))
    }
}

/// Engine statistics
#[derive(Clone, Debug, Default)]
pub struct EngineStats {
    pub pairs_created: u64,
    pub gates_applied: u64,
    pub measurements: u64,
    pub discarded: u64,
}

/// Density-matrix quantum state engine
pub struct QuantumEngine {
    groups: HashMap<u64, StateGroup>,
    owner: HashMap<QubitId, u64>,
    next_qubit: u64,
    next_group: u64,
    rng: StdRng,
    stats: EngineStats,
}

impl QuantumEngine {
    /// Create an engine with a fixed measurement seed
    pub fn with_seed(seed: u64) -> Self {
        QuantumEngine {
            groups: HashMap::new(),
            owner: HashMap::new(),
            next_qubit: 0,
            next_group: 0,
            rng: StdRng::seed_from_u64(seed),
            stats: EngineStats::default(),
        }
    }

    fn alloc_qubit(&mut self) -> QubitId {
        let id = QubitId::new(self.next_qubit);
        self.next_qubit += 1;
        id
    }

    fn insert_group(&mut self, group: StateGroup) -> u64 {
        let gid = self.next_group;
        self.next_group += 1;
        for q in &group.qubits {
            self.owner.insert(*q, gid);
        }
        self.groups.insert(gid, group);
        gid
    }

    fn group_of(&self, qubit: QubitId) -> QrelayResult<u64> {
        self.owner
            .get(&qubit)
            .copied()
            .ok_or(QrelayError::UnknownQubit(qubit))
    }

    fn group_mut(&mut self, qubit: QubitId) -> QrelayResult<(&mut StateGroup, usize)> {
        let gid = self.group_of(qubit)?;
        let group = self
            .groups
            .get_mut(&gid)
            .ok_or(QrelayError::UnknownQubit(qubit))?;
        let pos = group.position(qubit)?;
        Ok((group, pos))
    }

    /// Put both qubits in one group
    fn merge(&mut self, a: QubitId, b: QubitId) -> QrelayResult<u64> {
        let ga = self.group_of(a)?;
        let gb = self.group_of(b)?;
        if ga == gb {
            return Ok(ga);
        }
        let second = self.groups.remove(&gb).ok_or(QrelayError::UnknownQubit(b))?;
        let first = self.groups.get_mut(&ga).ok_or(QrelayError::UnknownQubit(a))?;
        first.rho = first.rho.tensor(&second.rho);
        first.qubits.extend(second.qubits.iter().copied());
        for q in second.qubits {
            self.owner.insert(q, ga);
        }
        Ok(ga)
    }

    /// Create a two-qubit state drawn from a Bell-state mixture
    pub fn create_pair(&mut self, mixture: &[(BellOutcome, f64)]) -> QrelayResult<(QubitId, QubitId)> {
        let kets: Vec<(f64, [Complex64; 4])> =
            mixture.iter().map(|(b, p)| (*p, bell_ket(*b))).collect();
        let components: Vec<(f64, &[Complex64])> =
            kets.iter().map(|(p, k)| (*p, &k[..])).collect();
        let rho = DensityMatrix::from_ensemble(&components)?;

        let a = self.alloc_qubit();
        let b = self.alloc_qubit();
        self.insert_group(StateGroup {
            qubits: vec![a, b],
            rho,
        });
        self.stats.pairs_created += 1;
        tracing::trace!(%a, %b, "pair created");
        Ok((a, b))
    }

    /// Apply a Pauli gate to one qubit
    pub fn apply_pauli(&mut self, qubit: QubitId, gate: Pauli) -> QrelayResult<()> {
        let (group, pos) = self.group_mut(qubit)?;
        group.rho.apply_single(pos, &pauli_matrix(gate))?;
        self.stats.gates_applied += 1;
        Ok(())
    }

    /// Apply a swap correction, gates in order
    pub fn apply_correction(&mut self, qubit: QubitId, op: CorrectionOp) -> QrelayResult<()> {
        for gate in op.gates() {
            self.apply_pauli(qubit, *gate)?;
        }
        Ok(())
    }

    /// Depolarize one qubit with probability `p`
    pub fn depolarize(&mut self, qubit: QubitId, p: f64) -> QrelayResult<()> {
        if p <= 0.0 {
            return Ok(());
        }
        let (group, pos) = self.group_mut(qubit)?;
        group.rho.depolarize(pos, p)
    }

    /// Joint Bell-basis measurement of two qubits.
    ///
    /// Returns the raw outcome index; both qubits are consumed.
    pub fn measure_bell(&mut self, a: QubitId, b: QubitId) -> QrelayResult<u8> {
        if a == b {
            return Err(QrelayError::InvalidState(format!(
                "Bell measurement of {a} with itself"
            )));
        }
        let gid = self.merge(a, b)?;
        let group = self.groups.get(&gid).ok_or(QrelayError::UnknownQubit(a))?;
        let pa = group.position(a)?;
        let pb = group.position(b)?;

        let mut branches = Vec::with_capacity(4);
        for outcome in BellOutcome::ALL {
            let (p, post) = group.rho.project_pair(pa, pb, &bell_ket(outcome))?;
            if let Some(post) = post {
                branches.push((outcome.index(), p, post));
            }
        }

        let total: f64 = branches.iter().map(|(_, p, _)| *p).sum();
        if branches.is_empty() || total <= 0.0 {
            return Err(QrelayError::InvalidState("Bell measurement with no support".into()));
        }
        let mut draw = self.rng.gen::<f64>() * total;
        let mut chosen = branches.len() - 1;
        for (i, (_, p, _)) in branches.iter().enumerate() {
            if draw < *p {
                chosen = i;
                break;
            }
            draw -= p;
        }
        let (index, probability, post) = branches.swap_remove(chosen);

        let remaining: Vec<QubitId> = group
            .qubits
            .iter()
            .copied()
            .filter(|q| *q != a && *q != b)
            .collect();
        self.owner.remove(&a);
        self.owner.remove(&b);
        if remaining.is_empty() {
            self.groups.remove(&gid);
        } else if let Some(group) = self.groups.get_mut(&gid) {
            group.qubits = remaining;
            group.rho = post;
        }
        self.stats.measurements += 1;
        tracing::trace!(%a, %b, index, probability, "Bell measurement");
        Ok(index)
    }

    /// Trace a qubit out of the simulation
    pub fn discard(&mut self, qubit: QubitId) -> QrelayResult<()> {
        let gid = self.group_of(qubit)?;
        let group = self
            .groups
            .get_mut(&gid)
            .ok_or(QrelayError::UnknownQubit(qubit))?;
        let pos = group.position(qubit)?;
        let keep: Vec<usize> = (0..group.qubits.len()).filter(|i| *i != pos).collect();
        if keep.is_empty() {
            self.groups.remove(&gid);
        } else {
            group.rho = group.rho.reduce(&keep)?;
            group.qubits.remove(pos);
        }
        self.owner.remove(&qubit);
        self.stats.discarded += 1;
        Ok(())
    }

    /// Reduced state of the ordered pair `(a, b)`
    pub fn pair_state(&self, a: QubitId, b: QubitId) -> QrelayResult<DensityMatrix> {
        let ga = self.group_of(a)?;
        let gb = self.group_of(b)?;
        let group_a = self.groups.get(&ga).ok_or(QrelayError::UnknownQubit(a))?;
        let group_b = self.groups.get(&gb).ok_or(QrelayError::UnknownQubit(b))?;
        if ga == gb {
            group_a.rho.reduce(&[group_a.position(a)?, group_a.position(b)?])
        } else {
            let rho_a = group_a.rho.reduce(&[group_a.position(a)?])?;
            let rho_b = group_b.rho.reduce(&[group_b.position(b)?])?;
            Ok(rho_a.tensor(&rho_b))
        }
    }

    /// Fidelity of the pair `(a, b)` against Φ+, in [0, 1]
    pub fn fidelity(&self, a: QubitId, b: QubitId) -> QrelayResult<f64> {
        self.pair_state(a, b)?.overlap(&bell_ket(BellOutcome::PhiPlus))
    }

    #[inline]
    pub fn contains(&self, qubit: QubitId) -> bool {
        self.owner.contains_key(&qubit)
    }

    /// Number of live qubits
    pub fn live_qubits(&self) -> usize {
        self.owner.len()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }
}

impl Default for QuantumEngine {
    fn default() -> Self {
        Self::with_seed(0)
    }
}
