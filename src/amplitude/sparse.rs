use std::collections::BTreeMap;

use super::AmplitudeStore;
use crate::math::{C, C_ZERO, R};

/// Sparse amplitude map: absent keys read as zero, and any write whose
/// magnitude falls below `epsilon` drops the entry instead of storing a
/// near-zero value. Semantically identical to the dense form.
#[derive(Clone, Debug)]
pub struct SparseStore {
    len: usize,
    epsilon: R,
    map: BTreeMap<usize, C>,
}

impl SparseStore {
    pub fn zeroed(n_qubits: usize, epsilon: R) -> Self {
        Self {
            len: 1usize << n_qubits,
            epsilon,
            map: BTreeMap::new(),
        }
    }

    pub fn nonzero_count(&self) -> usize {
        self.map.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, C)> + '_ {
        self.map.iter().map(|(&i, &c)| (i, c))
    }
}

impl AmplitudeStore for SparseStore {
    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, i: usize) -> C {
        self.map.get(&i).copied().unwrap_or(C_ZERO)
    }

    fn write(&mut self, i: usize, c: C) {
        if c.norm_sqr() <= self.epsilon * self.epsilon {
            self.map.remove(&i);
        } else {
            self.map.insert(i, c);
        }
    }

    fn clear(&mut self) {
        self.map.clear();
    }

    fn get_probs(&self, out: &mut [R]) {
        out.fill(0.0);
        for (&i, &c) in self.map.iter() {
            out[i] = c.norm_sqr();
        }
    }

    fn is_sparse(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_read_zero() {
        let s = SparseStore::zeroed(3, 1e-9);
        assert_eq!(s.read(5), C_ZERO);
    }

    #[test]
    fn near_zero_writes_are_dropped() {
        let mut s = SparseStore::zeroed(3, 1e-6);
        s.write(2, C::new(1e-9, 0.0));
        assert_eq!(s.nonzero_count(), 0);
        s.write(2, C::new(0.5, 0.0));
        assert_eq!(s.nonzero_count(), 1);
    }
}
