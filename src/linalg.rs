//! Dense factorizations over the small `n_input_size x n_input_size` block
//! the Newton solver and likelihood methods need to invert (§6 "sparse
//! direct solver").
//!
//! `spec.md` §9 is explicit that "the engine only relies on `analyzePattern`,
//! `factorize`, `solve` semantics" of whatever backs this — not a specific
//! sparse-matrix crate. The parameter count (`n_input_size`) is the relevant
//! dimension here, not the trace width, and Newton systems of that size fill
//! in almost completely after one elimination step regardless of the
//! Hessian's sparsity pattern, so this module works directly against a
//! densified column-major buffer (the shape `taketo1024/sprs`'s symbolic
//! Cholesky ultimately produces for its `L` factor) rather than reimplementing
//! a symbolic elimination-tree pass whose fill-reduction has nothing to act
//! on at this scale. See `DESIGN.md` for the Open-Question resolution.

/// `A x = b` via LU decomposition with partial pivoting.
///
/// `a` is `n x n`, column-major. Returns `None` if `a` is numerically
/// singular (a pivot column is entirely negligible).
pub fn lu_solve(a: &[f64], n: usize, b: &[f64]) -> Option<Vec<f64>> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n);
    if n == 0 {
        return Some(Vec::new());
    }

    // Work on a row-major copy; row-major is more convenient for pivoting.
    let mut m = vec![0.0; n * n];
    for col in 0..n {
        for row in 0..n {
            m[row * n + col] = a[row + col * n];
        }
    }
    let mut rhs = b.to_vec();

    for k in 0..n {
        // Partial pivot: largest magnitude in column k, rows k..n.
        let mut pivot_row = k;
        let mut pivot_val = m[k * n + k].abs();
        for row in (k + 1)..n {
            let v = m[row * n + k].abs();
            if v > pivot_val {
                pivot_val = v;
                pivot_row = row;
            }
        }
        if pivot_val < 1e-14 {
            return None;
        }
        if pivot_row != k {
            for col in 0..n {
                m.swap(k * n + col, pivot_row * n + col);
            }
            rhs.swap(k, pivot_row);
        }

        let pivot = m[k * n + k];
        for row in (k + 1)..n {
            let factor = m[row * n + k] / pivot;
            if factor == 0.0 {
                continue;
            }
            for col in k..n {
                m[row * n + col] -= factor * m[k * n + col];
            }
            rhs[row] -= factor * rhs[k];
        }
    }

    // Back substitution.
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = rhs[row];
        for col in (row + 1)..n {
            sum -= m[row * n + col] * x[col];
        }
        x[row] = sum / m[row * n + row];
    }
    Some(x)
}

/// A dense Cholesky factor `L` (lower-triangular, column-major) of a
/// symmetric positive-definite matrix, with solves against it.
pub struct Cholesky {
    l: Vec<f64>,
    n: usize,
}

impl Cholesky {
    /// Factorize `a` (`n x n`, column-major, symmetric). Returns `None` if
    /// `a` is not positive definite (a diagonal pivot would be <= 0), which
    /// is how callers detect "bad Hessian" (§4.H) or an infeasible
    /// regularization attempt (§4.G step 4).
    pub fn factorize(a: &[f64], n: usize) -> Option<Self> {
        debug_assert_eq!(a.len(), n * n);
        let mut l = vec![0.0; n * n];
        for j in 0..n {
            let mut d = a[j + j * n];
            for k in 0..j {
                d -= l[j + k * n] * l[j + k * n];
            }
            if d <= 0.0 {
                return None;
            }
            let ljj = d.sqrt();
            l[j + j * n] = ljj;
            for i in (j + 1)..n {
                let mut s = a[i + j * n];
                for k in 0..j {
                    s -= l[i + k * n] * l[j + k * n];
                }
                l[i + j * n] = s / ljj;
            }
        }
        Some(Cholesky { l, n })
    }

    /// Solve `L L^T x = b`.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let y = self.forward_solve(b);
        self.backward_solve(&y)
    }

    fn forward_solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.n;
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut s = b[i];
            for k in 0..i {
                s -= self.l[i + k * n] * y[k];
            }
            y[i] = s / self.l[i + i * n];
        }
        y
    }

    fn backward_solve(&self, y: &[f64]) -> Vec<f64> {
        let n = self.n;
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut s = y[i];
            for k in (i + 1)..n {
                s -= self.l[k + i * n] * x[k];
            }
            x[i] = s / self.l[i + i * n];
        }
        x
    }

    /// Per-parameter variances `diag((L L^T)^-1)` via the column-sum-of-
    /// squares identity of §4.H: solve `L y_j = e_j` for every `j` and sum
    /// the squares of each resulting column.
    pub fn diag_of_inverse(&self) -> Vec<f64> {
        let n = self.n;
        let mut variances = vec![0.0; n];
        for j in 0..n {
            let mut e = vec![0.0; n];
            e[j] = 1.0;
            let y = self.forward_solve(&e);
            for &yi in &y {
                variances[j] += yi * yi;
            }
        }
        variances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lu_solves_identity() {
        let a = vec![1.0, 0.0, 0.0, 1.0]; // 2x2 identity, column-major
        let x = lu_solve(&a, 2, &[3.0, 4.0]).unwrap();
        assert_eq!(x, vec![3.0, 4.0]);
    }

    #[test]
    fn lu_solves_general_system() {
        // [2 1; 1 3] x = [5; 10] -> x = [1, 3]
        let a = vec![2.0, 1.0, 1.0, 3.0]; // column-major
        let x = lu_solve(&a, 2, &[5.0, 10.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-9);
        assert!((x[1] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn lu_detects_singular() {
        let a = vec![1.0, 2.0, 2.0, 4.0];
        assert!(lu_solve(&a, 2, &[1.0, 2.0]).is_none());
    }

    #[test]
    fn cholesky_matches_lu_on_spd_system() {
        let a = vec![4.0, 2.0, 2.0, 3.0]; // SPD, column-major
        let b = [6.0, 5.0];
        let chol = Cholesky::factorize(&a, 2).unwrap();
        let x_chol = chol.solve(&b);
        let x_lu = lu_solve(&a, 2, &b).unwrap();
        for i in 0..2 {
            assert!((x_chol[i] - x_lu[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn cholesky_rejects_indefinite() {
        let a = vec![1.0, 2.0, 2.0, 1.0];
        assert!(Cholesky::factorize(&a, 2).is_none());
    }

    #[test]
    fn diag_of_inverse_matches_explicit_inverse_for_diagonal() {
        let a = vec![4.0, 0.0, 0.0, 9.0];
        let chol = Cholesky::factorize(&a, 2).unwrap();
        let d = chol.diag_of_inverse();
        assert!((d[0] - 0.25).abs() < 1e-9);
        assert!((d[1] - 1.0 / 9.0).abs() < 1e-9);
    }
}
