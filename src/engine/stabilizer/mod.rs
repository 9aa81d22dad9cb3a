//! Stabilizer (Clifford) engine (spec §4.4): a `2n x (2n+1)` symplectic
//! tableau simulated via the Aaronson-Gottesman update rules. Only the
//! Clifford gate set (H, S/S-dagger, X, Y, Z, CNOT, CZ, and
//! compositions thereof) is representable directly; any other request
//! made through [`QuantumEngine`] fails so the stabilizer-hybrid layer
//! can catch it and promote.

mod tableau;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tableau::Tableau;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::math::matrix::{is_antidiagonal_m1, is_diagonal_m1};
use crate::math::{approx_eq_c, C, C_ONE, C_ZERO, Idx, M1, N, R};

use super::QuantumEngine;

/// The seven Clifford single-qubit operators this engine can recognize
/// from an arbitrary `M1` passed to [`QuantumEngine::apply_single_qubit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CliffordSingle {
    I,
    H,
    S,
    Sdg,
    X,
    Y,
    Z,
}

fn recognize_single_qubit_clifford(m: &M1) -> Option<CliffordSingle> {
    if is_diagonal_m1(m) {
        if approx_eq_c(&m[0], &C_ONE) && approx_eq_c(&m[3], &C_ONE) {
            return Some(CliffordSingle::I);
        }
        if approx_eq_c(&m[0], &C_ONE) && approx_eq_c(&m[3], &-C_ONE) {
            return Some(CliffordSingle::Z);
        }
        if approx_eq_c(&m[0], &C_ONE) && approx_eq_c(&m[3], &C::new(0.0, 1.0)) {
            return Some(CliffordSingle::S);
        }
        if approx_eq_c(&m[0], &C_ONE) && approx_eq_c(&m[3], &C::new(0.0, -1.0)) {
            return Some(CliffordSingle::Sdg);
        }
        return None;
    }
    if is_antidiagonal_m1(m) {
        if approx_eq_c(&m[1], &C_ONE) && approx_eq_c(&m[2], &C_ONE) {
            return Some(CliffordSingle::X);
        }
        if approx_eq_c(&m[1], &C::new(0.0, -1.0)) && approx_eq_c(&m[2], &C::new(0.0, 1.0)) {
            return Some(CliffordSingle::Y);
        }
        return None;
    }
    let f = std::f64::consts::FRAC_1_SQRT_2;
    let h_like = [m[0], m[1], m[2], m[3]]
        .iter()
        .zip([C::new(f, 0.0), C::new(f, 0.0), C::new(f, 0.0), C::new(-f, 0.0)].iter())
        .all(|(a, b)| approx_eq_c(a, b));
    if h_like {
        return Some(CliffordSingle::H);
    }
    None
}

fn per_qubit_factor(v: bool, w: bool, b: bool) -> C {
    match (v, w) {
        (false, false) | (true, false) => C_ONE,
        (false, true) => if b { -C_ONE } else { C_ONE },
        (true, true) => {
            if b {
                C::new(0.0, -1.0)
            } else {
                C::new(0.0, 1.0)
            }
        }
    }
}

fn bits_to_index(bits: &[bool]) -> usize {
    bits.iter().enumerate().fold(0usize, |acc, (q, &b)| if b { acc | (1 << q) } else { acc })
}

fn index_to_bits(idx: usize, n: N) -> Vec<bool> {
    (0..n).map(|q| idx & (1 << q) != 0).collect()
}

#[derive(Clone)]
pub struct StabilizerEngine {
    tableau: Tableau,
    rng: StdRng,
}

impl StabilizerEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let mut tableau = Tableau::identity(config.qubit_count);
        for q in 0..config.qubit_count {
            if config.initial_permutation & (1usize << q) != 0 {
                tableau.pauli_x(q);
            }
        }
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { tableau, rng }
    }

    fn require_qubit(&self, q: N) -> Result<()> {
        if q >= self.tableau.n {
            Err(Error::invalid_argument(format!(
                "qubit index {q} out of range for {}-qubit stabilizer engine",
                self.tableau.n
            )))
        } else {
            Ok(())
        }
    }

    fn apply_clifford(&mut self, gate: CliffordSingle, q: N) {
        match gate {
            CliffordSingle::I => {}
            CliffordSingle::H => self.tableau.hadamard(q),
            CliffordSingle::S => self.tableau.phase(q),
            CliffordSingle::Sdg => self.tableau.phase_dagger(q),
            CliffordSingle::X => self.tableau.pauli_x(q),
            CliffordSingle::Y => self.tableau.pauli_y(q),
            CliffordSingle::Z => self.tableau.pauli_z(q),
        }
    }

    /// True iff the stabilizer group fixes `q` to a +-1 eigenstate of Z,
    /// i.e. measuring `q` in the Z basis is deterministic.
    pub fn is_separable_z(&self, q: N) -> bool {
        let n = self.tableau.n;
        (n..2 * n).all(|row| !self.tableau.x[row][q])
    }

    pub fn is_separable_x(&self, q: N) -> bool {
        let mut t = self.tableau.clone();
        t.hadamard(q);
        let n = t.n;
        (n..2 * n).all(|row| !t.x[row][q])
    }

    pub fn is_separable_y(&self, q: N) -> bool {
        let mut t = self.tableau.clone();
        t.phase_dagger(q);
        t.hadamard(q);
        let n = t.n;
        (n..2 * n).all(|row| !t.x[row][q])
    }

    /// Deterministic Z measurement sign for `q`, assuming
    /// `is_separable_z(q)`. Computed via the scratch-row accumulation of
    /// Aaronson-Gottesman §III without mutating the tableau.
    fn deterministic_sign(&self, q: N) -> bool {
        let n = self.tableau.n;
        let mut xs = vec![false; n];
        let mut zs = vec![false; n];
        let mut rs = false;
        for i in 0..n {
            if self.tableau.x[i][q] {
                self.row_mul_scratch(&mut xs, &mut zs, &mut rs, n + i);
            }
        }
        rs
    }

    fn row_mul_scratch(&self, xs: &mut [bool], zs: &mut [bool], rs: &mut bool, i: usize) {
        let n = self.tableau.n;
        let mut sum = 0i32;
        for q in 0..n {
            sum += tableau_g(self.tableau.x[i][q], self.tableau.z[i][q], xs[q], zs[q]);
        }
        sum += 2 * (*rs as i32) + 2 * (self.tableau.r[i] as i32);
        let new_r = sum.rem_euclid(4) == 2;
        for q in 0..n {
            xs[q] ^= self.tableau.x[i][q];
            zs[q] ^= self.tableau.z[i][q];
        }
        *rs = new_r;
    }

    /// Materializes the full `2^n` amplitude vector via canonical basis
    /// enumeration (spec §4.5's phrase for this conversion). The global
    /// phase convention fixes the lexicographically-first populated
    /// basis state to a positive real amplitude; any fixed convention
    /// is acceptable per spec §9 as long as measurement statistics
    /// match, which this one does by construction.
    pub fn to_state_vector(&self) -> Vec<C> {
        let n = self.tableau.n;
        let mut rows: Vec<(Vec<bool>, Vec<bool>, bool)> = (n..2 * n)
            .map(|r| (self.tableau.x[r].clone(), self.tableau.z[r].clone(), self.tableau.r[r]))
            .collect();

        let mut pivot_rows = Vec::new();
        let mut next_row = 0usize;
        for col in 0..n {
            if let Some(found) = (next_row..n).find(|&r| rows[r].0[col]) {
                rows.swap(next_row, found);
                for r in 0..n {
                    if r != next_row && rows[r].0[col] {
                        xor_combine(&mut rows, r, next_row);
                    }
                }
                pivot_rows.push(next_row);
                next_row += 1;
            }
        }
        let r_count = next_row;

        // Pure-Z constraint rows are [r_count, n): solve for one
        // particular basis state satisfying all of them.
        let mut constraints: Vec<(Vec<bool>, bool)> =
            rows[r_count..n].iter().map(|(_, z, r)| (z.clone(), *r)).collect();
        let mut pivot_col = vec![None; constraints.len()];
        let mut cr = 0usize;
        'outer: for col in 0..n {
            for rr in cr..constraints.len() {
                if constraints[rr].0[col] {
                    constraints.swap(cr, rr);
                    for rr2 in 0..constraints.len() {
                        if rr2 != cr && constraints[rr2].0[col] {
                            let pivot = constraints[cr].clone();
                            for (bit, &pbit) in constraints[rr2].0.iter_mut().zip(pivot.0.iter()) {
                                *bit ^= pbit;
                            }
                            constraints[rr2].1 ^= pivot.1;
                        }
                    }
                    pivot_col[cr] = Some(col);
                    cr += 1;
                    continue 'outer;
                }
            }
        }
        let mut solution = vec![false; n];
        for (idx, col) in pivot_col.iter().enumerate() {
            if let Some(col) = col {
                solution[*col] = constraints[idx].1;
            }
        }
        let i0 = bits_to_index(&solution);

        let len = 1usize << n;
        let mut amp = vec![C_ZERO; len];
        let norm = 1.0 / (2f64.powi(r_count as i32)).sqrt();
        amp[i0] = C::new(norm, 0.0);
        let mut visited = vec![i0];
        for &row_idx in &pivot_rows {
            let (vx, vz, vr) = &rows[row_idx];
            let vx_idx = bits_to_index(vx);
            let mut new_entries = Vec::with_capacity(visited.len());
            for &b in &visited {
                let bits = index_to_bits(b, n);
                let mut phase = C_ONE;
                for q in 0..n {
                    phase *= per_qubit_factor(vx[q], vz[q], bits[q]);
                }
                let sign = if *vr { -1.0 } else { 1.0 };
                let new_idx = b ^ vx_idx;
                amp[new_idx] = amp[b] * phase * sign;
                new_entries.push(new_idx);
            }
            visited.extend(new_entries);
        }
        amp
    }

    /// Combines two stabilizer registers via tensor product (spec
    /// §4.3's Compose, specialized to block-diagonal tableaus since the
    /// two stabilizer groups act on disjoint qubits).
    pub fn compose(&mut self, other: Self) -> Result<()> {
        let n1 = self.tableau.n;
        let n2 = other.tableau.n;
        let new_n = n1 + n2;
        let mut x = vec![vec![false; new_n]; 2 * new_n];
        let mut z = vec![vec![false; new_n]; 2 * new_n];
        let mut r = vec![false; 2 * new_n];

        for i in 0..n1 {
            x[i][..n1].copy_from_slice(&self.tableau.x[i]);
            z[i][..n1].copy_from_slice(&self.tableau.z[i]);
            r[i] = self.tableau.r[i];
        }
        for i in 0..n2 {
            x[n1 + i][n1..].copy_from_slice(&other.tableau.x[i]);
            z[n1 + i][n1..].copy_from_slice(&other.tableau.z[i]);
            r[n1 + i] = other.tableau.r[i];
        }
        for i in 0..n1 {
            x[new_n + i][..n1].copy_from_slice(&self.tableau.x[n1 + i]);
            z[new_n + i][..n1].copy_from_slice(&self.tableau.z[n1 + i]);
            r[new_n + i] = self.tableau.r[n1 + i];
        }
        for i in 0..n2 {
            x[new_n + n1 + i][n1..].copy_from_slice(&other.tableau.x[n2 + i]);
            z[new_n + n1 + i][n1..].copy_from_slice(&other.tableau.z[n2 + i]);
            r[new_n + n1 + i] = other.tableau.r[n2 + i];
        }

        self.tableau = Tableau { n: new_n, x, z, r };
        Ok(())
    }

    /// Excises a single separable qubit, per spec §4.4 ("Decompose/
    /// Dispose of a block is permitted only when the block is separable
    /// from the rest"). Multi-qubit ranges are out of scope for the
    /// stabilizer engine directly; promote to the state-vector engine
    /// for those (the stabilizer-hybrid layer does this automatically).
    pub fn decompose_qubit(&mut self, q: N) -> Result<Self> {
        self.require_qubit(q)?;
        let axis = if self.is_separable_z(q) {
            0
        } else if self.is_separable_x(q) {
            1
        } else if self.is_separable_y(q) {
            2
        } else {
            return Err(Error::separability_violation(format!(
                "qubit {q} is entangled with the rest of the register"
            )));
        };

        match axis {
            1 => self.tableau.hadamard(q),
            2 => {
                self.tableau.phase_dagger(q);
                self.tableau.hadamard(q);
            }
            _ => {}
        }

        let sign = self.isolate_z_row(q);

        let n = self.tableau.n;
        let mut inner = Tableau::identity(1);
        inner.z[1][0] = true;
        inner.r[1] = sign;
        inner.x[0][0] = true;

        if n == 1 {
            self.tableau = Tableau::identity(0);
        } else {
            let keep: Vec<usize> = (0..n).filter(|&i| i != q).collect();
            let mut x = vec![vec![false; n - 1]; 2 * (n - 1)];
            let mut z = vec![vec![false; n - 1]; 2 * (n - 1)];
            let mut r = vec![false; 2 * (n - 1)];
            let mut out_row = 0usize;
            for src in [0, n].iter().map(|&base| base) {
                for i in 0..n {
                    if i == q {
                        continue;
                    }
                    let row = src + i;
                    for (dst, &src_q) in keep.iter().enumerate() {
                        x[out_row][dst] = self.tableau.x[row][src_q];
                        z[out_row][dst] = self.tableau.z[row][src_q];
                    }
                    r[out_row] = self.tableau.r[row];
                    out_row += 1;
                }
            }
            self.tableau = Tableau { n: n - 1, x, z, r };
        }

        match axis {
            1 => inner.hadamard(0),
            2 => {
                inner.hadamard(0);
                inner.phase(0);
            }
            _ => {}
        }

        Ok(Self { tableau: inner, rng: self.rng.clone() })
    }

    pub fn dispose_qubit(&mut self, q: N) -> Result<()> {
        self.decompose_qubit(q).map(drop)
    }

    /// Row-combines stabilizer generators so that exactly one becomes
    /// `+-Z_q` and every other stabilizer row is zero at column `q`,
    /// then relabels that generator into the canonical `n+q`/`q` slots.
    /// Requires `is_separable_z(q)`.
    ///
    /// Destabilizer rows are left with whatever column-`q` content they
    /// already had: only the destabilizer at the canonical slot `q` is
    /// ever inspected again, and the excision step that follows drops
    /// column `q` from the rest, which is sound because every *other*
    /// stabilizer row is guaranteed zero there (so the q-column never
    /// contributes to a commutation check against a surviving row).
    fn isolate_z_row(&mut self, q: N) -> bool {
        let n = self.tableau.n;
        let touched: Vec<usize> = (0..n).filter(|&i| self.tableau.x[i][q]).collect();
        let target = match touched.first() {
            Some(&i0) => {
                let t = n + i0;
                for &i in &touched[1..] {
                    self.tableau.row_mul(t, n + i);
                }
                t
            }
            None => (n..2 * n)
                .find(|&row| self.tableau.z[row][q])
                .expect("is_separable_z(q) guarantees a nontrivial stabilizer row at q"),
        };
        // Clear column q from every other stabilizer row by XOR-ing in
        // the now-isolated Z_q: safe regardless of the other row's
        // content, since the stabilizer group is abelian.
        for row in n..2 * n {
            if row != target && self.tableau.z[row][q] {
                self.tableau.row_mul(row, target);
            }
        }
        let sign = self.tableau.r[target];
        let partner = target - n;
        self.tableau.x.swap(target, n + q);
        self.tableau.z.swap(target, n + q);
        self.tableau.r.swap(target, n + q);
        self.tableau.x.swap(partner, q);
        self.tableau.z.swap(partner, q);
        self.tableau.r.swap(partner, q);
        sign
    }
}

fn xor_combine(rows: &mut [(Vec<bool>, Vec<bool>, bool)], target: usize, source: usize) {
    let n = rows[target].0.len();
    let mut sum = 0i32;
    for q in 0..n {
        sum += tableau_g(rows[source].0[q], rows[source].1[q], rows[target].0[q], rows[target].1[q]);
    }
    sum += 2 * (rows[target].2 as i32) + 2 * (rows[source].2 as i32);
    let new_r = sum.rem_euclid(4) == 2;
    for q in 0..n {
        rows[target].0[q] ^= rows[source].0[q];
        rows[target].1[q] ^= rows[source].1[q];
    }
    rows[target].2 = new_r;
}

fn tableau_g(x1: bool, z1: bool, x2: bool, z2: bool) -> i32 {
    match (x1, z1) {
        (false, false) => 0,
        (true, true) => (z2 as i32) - (x2 as i32),
        (true, false) => (z2 as i32) * (2 * (x2 as i32) - 1),
        (false, true) => (x2 as i32) * (1 - 2 * (z2 as i32)),
    }
}

impl QuantumEngine for StabilizerEngine {
    fn qubit_count(&self) -> N {
        self.tableau.n
    }

    fn apply_single_qubit(&mut self, m: &M1, q: N) -> Result<()> {
        self.require_qubit(q)?;
        let gate = recognize_single_qubit_clifford(m).ok_or_else(|| {
            Error::invalid_argument("matrix is not a recognized Clifford single-qubit gate")
        })?;
        self.apply_clifford(gate, q);
        Ok(())
    }

    fn apply_controlled(&mut self, m: &M1, controls: &[N], anti_controls: &[N], t: N) -> Result<()> {
        self.require_qubit(t)?;
        for &c in controls.iter().chain(anti_controls.iter()) {
            self.require_qubit(c)?;
        }
        if controls.len() + anti_controls.len() != 1 {
            return Err(Error::invalid_argument(
                "stabilizer engine only represents single-controlled Clifford gates",
            ));
        }
        let gate = recognize_single_qubit_clifford(m).ok_or_else(|| {
            Error::invalid_argument("matrix is not a recognized Clifford single-qubit gate")
        })?;
        let (control, anti) = if let Some(&c) = controls.first() {
            (c, false)
        } else {
            (anti_controls[0], true)
        };
        if anti {
            self.tableau.pauli_x(control);
        }
        match gate {
            CliffordSingle::X => self.tableau.cnot(control, t),
            CliffordSingle::Z => self.tableau.cz(control, t),
            CliffordSingle::I => {}
            _ => {
                if anti {
                    self.tableau.pauli_x(control);
                }
                return Err(Error::invalid_argument(
                    "stabilizer engine only represents controlled-X/controlled-Z directly",
                ));
            }
        }
        if anti {
            self.tableau.pauli_x(control);
        }
        Ok(())
    }

    fn uniformly_controlled(&mut self, controls: &[N], t: N, matrices: &[M1]) -> Result<()> {
        if controls.is_empty() {
            return self.apply_single_qubit(&matrices[0], t);
        }
        if controls.len() == 1 && recognize_single_qubit_clifford(&matrices[0]) == Some(CliffordSingle::I) {
            return self.apply_controlled(&matrices[1], controls, &[], t);
        }
        Err(Error::invalid_argument(
            "stabilizer engine only represents trivial or single-control uniformly-controlled gates",
        ))
    }

    fn uniform_parity_rz(&mut self, mask: Idx, angle: R) -> Result<()> {
        let qubits: Vec<N> = (0..self.tableau.n).filter(|q| mask & (1 << q) != 0).collect();
        if qubits.is_empty() {
            return Ok(());
        }
        let pivot = *qubits.last().unwrap();
        for &q in &qubits[..qubits.len() - 1] {
            self.tableau.cnot(q, pivot);
        }
        let phase_matrix = crate::math::matrix::phase_matrix(angle, -angle);
        let gate = recognize_single_qubit_clifford(&phase_matrix).ok_or_else(|| {
            Error::invalid_argument("uniform_parity_rz angle is not a Clifford phase on the stabilizer engine")
        });
        let result = gate.map(|g| self.apply_clifford(g, pivot));
        for &q in &qubits[..qubits.len() - 1] {
            self.tableau.cnot(q, pivot);
        }
        result
    }

    fn measure(&mut self, q: N) -> Result<bool> {
        self.require_qubit(q)?;
        let n = self.tableau.n;
        let random_row = (n..2 * n).find(|&row| self.tableau.x[row][q]);
        match random_row {
            Some(p) => {
                for i in 0..2 * n {
                    if i != p && self.tableau.x[i][q] {
                        self.tableau.row_mul(i, p);
                    }
                }
                self.tableau.x[p - n] = self.tableau.x[p].clone();
                self.tableau.z[p - n] = self.tableau.z[p].clone();
                self.tableau.r[p - n] = self.tableau.r[p];
                for k in 0..n {
                    self.tableau.x[p][k] = false;
                    self.tableau.z[p][k] = false;
                }
                self.tableau.z[p][q] = true;
                let outcome: bool = self.rng.gen_bool(0.5);
                self.tableau.r[p] = outcome;
                Ok(outcome)
            }
            None => Ok(self.deterministic_sign(q)),
        }
    }

    fn force_measure(&mut self, q: N, value: bool) -> Result<()> {
        self.require_qubit(q)?;
        let n = self.tableau.n;
        let random_row = (n..2 * n).find(|&row| self.tableau.x[row][q]);
        match random_row {
            Some(p) => {
                for i in 0..2 * n {
                    if i != p && self.tableau.x[i][q] {
                        self.tableau.row_mul(i, p);
                    }
                }
                self.tableau.x[p - n] = self.tableau.x[p].clone();
                self.tableau.z[p - n] = self.tableau.z[p].clone();
                self.tableau.r[p - n] = self.tableau.r[p];
                for k in 0..n {
                    self.tableau.x[p][k] = false;
                    self.tableau.z[p][k] = false;
                }
                self.tableau.z[p][q] = true;
                self.tableau.r[p] = value;
                Ok(())
            }
            None => {
                if self.deterministic_sign(q) != value {
                    Err(Error::invalid_argument(
                        "force_measure: requested outcome contradicts a deterministic stabilizer state",
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn prob(&self, q: N) -> R {
        if q >= self.tableau.n {
            return 0.0;
        }
        let n = self.tableau.n;
        if (n..2 * n).any(|row| self.tableau.x[row][q]) {
            0.5
        } else if self.deterministic_sign(q) {
            1.0
        } else {
            0.0
        }
    }

    fn prob_all(&self, perm: usize) -> R {
        let state = self.to_state_vector();
        state.get(perm).map(|c| c.norm_sqr()).unwrap_or(0.0)
    }

    fn prob_reg(&self, start: N, len: N, value: usize) -> R {
        let mask = ((1usize << len) - 1) << start;
        self.prob_mask(mask, value << start)
    }

    fn prob_mask(&self, mask: Idx, value: Idx) -> R {
        let state = self.to_state_vector();
        state
            .iter()
            .enumerate()
            .filter(|(i, _)| i & mask == value & mask)
            .map(|(_, c)| c.norm_sqr())
            .sum()
    }

    fn prob_parity(&self, mask: Idx) -> R {
        let state = self.to_state_vector();
        state
            .iter()
            .enumerate()
            .filter(|(i, _)| (i & mask).count_ones() % 2 == 1)
            .map(|(_, c)| c.norm_sqr())
            .sum()
    }

    fn get_quantum_state(&self) -> Vec<C> {
        self.to_state_vector()
    }

    fn set_quantum_state(&mut self, state: &[C]) -> Result<()> {
        let nonzero: Vec<usize> = state
            .iter()
            .enumerate()
            .filter(|(_, c)| c.norm_sqr() > 1e-12)
            .map(|(i, _)| i)
            .collect();
        if nonzero.len() != 1 {
            return Err(Error::invalid_argument(
                "stabilizer engine only accepts computational-basis states via set_quantum_state",
            ));
        }
        self.set_permutation(nonzero[0])
    }

    fn set_permutation(&mut self, perm: usize) -> Result<()> {
        if perm >= (1usize << self.tableau.n) {
            return Err(Error::invalid_argument("set_permutation: index out of range"));
        }
        self.tableau = Tableau::identity(self.tableau.n);
        for q in 0..self.tableau.n {
            if perm & (1usize << q) != 0 {
                self.tableau.pauli_x(q);
            }
        }
        Ok(())
    }

    fn normalize(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hadamard_m1() -> M1 {
        let f = std::f64::consts::FRAC_1_SQRT_2;
        [C::new(f, 0.0), C::new(f, 0.0), C::new(f, 0.0), C::new(-f, 0.0)]
    }

    fn x_m1() -> M1 {
        [C_ZERO, C_ONE, C_ONE, C_ZERO]
    }

    fn z_m1() -> M1 {
        [C_ONE, C_ZERO, C_ZERO, -C_ONE]
    }

    #[test]
    fn bell_pair_amplitudes() {
        let mut e = StabilizerEngine::new(&EngineConfig::new(2));
        e.apply_single_qubit(&hadamard_m1(), 0).unwrap();
        e.apply_controlled(&x_m1(), &[0], &[], 1).unwrap();
        let v = e.to_state_vector();
        let f = std::f64::consts::FRAC_1_SQRT_2;
        assert!((v[0].re - f).abs() < 1e-9);
        assert!((v[3].re - f).abs() < 1e-9);
        assert!(v[1].norm_sqr() < 1e-18);
        assert!(v[2].norm_sqr() < 1e-18);
    }

    #[test]
    fn ghz_three_qubits() {
        let mut e = StabilizerEngine::new(&EngineConfig::new(3));
        e.apply_single_qubit(&hadamard_m1(), 0).unwrap();
        e.apply_controlled(&x_m1(), &[0], &[], 1).unwrap();
        e.apply_controlled(&x_m1(), &[1], &[], 2).unwrap();
        let v = e.to_state_vector();
        let f = std::f64::consts::FRAC_1_SQRT_2;
        assert!((v[0].re - f).abs() < 1e-9);
        assert!((v[7].re - f).abs() < 1e-9);
        let middle_weight: R = v[1..7].iter().map(|c| c.norm_sqr()).sum();
        assert!(middle_weight < 1e-12);
    }

    #[test]
    fn separability_recovers_after_double_cz() {
        let mut e = StabilizerEngine::new(&EngineConfig::new(2));
        e.apply_single_qubit(&hadamard_m1(), 0).unwrap();
        e.apply_single_qubit(&hadamard_m1(), 1).unwrap();
        e.apply_controlled(&z_m1(), &[0], &[], 1).unwrap();
        e.apply_controlled(&z_m1(), &[0], &[], 1).unwrap();
        assert!(e.is_separable_x(0));
        assert!(e.is_separable_x(1));
    }

    #[test]
    fn deterministic_measurement_on_ground_state() {
        let e = StabilizerEngine::new(&EngineConfig::new(1));
        assert!(e.is_separable_z(0));
        assert_eq!(e.prob(0), 0.0);
    }

    #[test]
    fn decompose_isolated_qubit_round_trips() {
        let mut e = StabilizerEngine::new(&EngineConfig::new(2));
        e.apply_single_qubit(&x_m1(), 1).unwrap();
        let mut inner = e.decompose_qubit(1).unwrap();
        assert_eq!(e.qubit_count(), 1);
        assert_eq!(inner.qubit_count(), 1);
        assert_eq!(inner.prob(0), 1.0);
    }
}
