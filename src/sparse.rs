//! Dynamic row-of-map sparse symmetric matrix (§4.B).
//!
//! Grounded on the same row/column nested-map shape `taketo1024/sprs`'s
//! `ldl_numeric` walks column-by-column, adapted here to the read/write/erase
//! contract §4.B spells out rather than to a fixed symbolic-factorization
//! pipeline — this type is the live Hessian the edge-pushing sweep mutates,
//! not an immutable factorization input.

use std::collections::BTreeMap;

/// A sparse symmetric matrix stored as a mapping from row index to a
/// (column index -> value) mapping. For every stored off-diagonal `(i, j)`
/// the symmetric entry `(j, i)` is always materialized with the same value
/// (§4.B invariant).
#[derive(Debug, Clone, Default)]
pub struct SparseSymmetric {
    rows: BTreeMap<usize, BTreeMap<usize, f64>>,
}

impl SparseSymmetric {
    pub fn new() -> Self {
        SparseSymmetric {
            rows: BTreeMap::new(),
        }
    }

    /// `0.0` when absent.
    pub fn read(&self, i: usize, j: usize) -> f64 {
        self.rows
            .get(&i)
            .and_then(|row| row.get(&j))
            .copied()
            .unwrap_or(0.0)
    }

    /// Overwrite `(i, j)` and its symmetric mirror. Writing exactly `0.0`
    /// removes the entry (and the row, if it becomes empty) rather than
    /// storing an explicit zero.
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.write_one(i, j, value);
        if i != j {
            self.write_one(j, i, value);
        }
    }

    /// Add `delta` to `(i, j)` and its symmetric mirror.
    pub fn add(&mut self, i: usize, j: usize, delta: f64) {
        if delta == 0.0 {
            return;
        }
        let new_value = self.read(i, j) + delta;
        self.set(i, j, new_value);
    }

    fn write_one(&mut self, i: usize, j: usize, value: f64) {
        if value == 0.0 {
            if let Some(row) = self.rows.get_mut(&i) {
                row.remove(&j);
                if row.is_empty() {
                    self.rows.remove(&i);
                }
            }
        } else {
            self.rows.entry(i).or_default().insert(j, value);
        }
    }

    /// Remove row `i`, column `i`, and the diagonal entry in one pass
    /// (§4.B `erase`).
    pub fn erase(&mut self, i: usize) {
        if let Some(row) = self.rows.remove(&i) {
            for &j in row.keys() {
                if j != i {
                    if let Some(other) = self.rows.get_mut(&j) {
                        other.remove(&i);
                        if other.is_empty() {
                            self.rows.remove(&j);
                        }
                    }
                }
            }
        }
    }

    /// A handle to row `i`'s (column -> value) map, or `None` if the row is
    /// absent (§4.B `get_row_ptr`, used by the reverse sweep).
    pub fn row(&self, i: usize) -> Option<&BTreeMap<usize, f64>> {
        self.rows.get(&i)
    }

    /// Row indices currently holding at least one entry, in ascending order.
    pub fn row_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every stored `(i, j, value)` triple, including both symmetric copies
    /// of off-diagonal entries.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows
            .iter()
            .flat_map(|(&i, row)| row.iter().map(move |(&j, &v)| (i, j, v)))
    }

    /// Densify the `n x n` leading block into a column-major `Vec<f64>`, the
    /// shape the internal [`crate::linalg`] factorizations consume.
    pub fn to_dense_column_major(&self, n: usize) -> Vec<f64> {
        let mut dense = vec![0.0; n * n];
        for (i, j, v) in self.entries() {
            if i < n && j < n {
                dense[i + j * n] = v;
            }
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_keeps_symmetric_mirror() {
        let mut h = SparseSymmetric::new();
        h.set(0, 1, 2.5);
        assert_eq!(h.read(0, 1), 2.5);
        assert_eq!(h.read(1, 0), 2.5);
    }

    #[test]
    fn writing_zero_removes_entry() {
        let mut h = SparseSymmetric::new();
        h.set(0, 1, 2.5);
        h.set(0, 1, 0.0);
        assert_eq!(h.read(0, 1), 0.0);
        assert_eq!(h.read(1, 0), 0.0);
        assert!(h.row(0).is_none());
        assert!(h.row(1).is_none());
    }

    #[test]
    fn add_accumulates() {
        let mut h = SparseSymmetric::new();
        h.add(2, 3, 1.0);
        h.add(2, 3, 1.5);
        assert_eq!(h.read(2, 3), 2.5);
        assert_eq!(h.read(3, 2), 2.5);
    }

    #[test]
    fn erase_removes_row_column_and_diagonal() {
        let mut h = SparseSymmetric::new();
        h.set(0, 0, 9.0);
        h.set(0, 1, 2.0);
        h.set(1, 1, 4.0);
        h.erase(0);
        assert_eq!(h.read(0, 0), 0.0);
        assert_eq!(h.read(0, 1), 0.0);
        assert_eq!(h.read(1, 0), 0.0);
        assert_eq!(h.read(1, 1), 4.0);
        assert!(h.row(0).is_none());
    }

    #[test]
    fn diagonal_not_duplicated() {
        let mut h = SparseSymmetric::new();
        h.set(5, 5, 3.0);
        assert_eq!(h.row(5).unwrap().len(), 1);
    }

    #[test]
    fn dense_conversion_is_column_major() {
        let mut h = SparseSymmetric::new();
        h.set(0, 1, 7.0);
        h.set(1, 1, 3.0);
        let dense = h.to_dense_column_major(2);
        // column-major 2x2: [ (0,0) (1,0) (0,1) (1,1) ]
        assert_eq!(dense, vec![0.0, 7.0, 7.0, 3.0]);
    }
}
