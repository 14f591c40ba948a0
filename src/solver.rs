//! Regularized Newton maximization with a bracketed one-dimensional line
//! search (§4.G, §4.G.1).
//!
//! `SolverConfig` follows the shape of `lumen-compiler::CompileOptions`:
//! a plain `Debug + Clone` struct of documented knobs with a hand-written
//! `Default`, rather than a builder or a `serde`-derived config file format
//! the teacher never uses for this kind of in-process tuning struct.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::linalg::{lu_solve, Cholesky};
use crate::tape::Tape;
use crate::trace::Trace;

/// Tuning knobs for [`NewtonSolver`] (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Outer Newton-iteration cap.
    pub max_iterations: usize,
    /// Converged when successive objective values differ by less than
    /// this amount.
    pub objective_tolerance: f64,
    /// When set, `maximize` returns the per-iteration objective trace
    /// alongside the result.
    pub diagnostic_mode: bool,
    /// Tikhonov regularization attempts before giving up on factorizing
    /// the working Hessian.
    pub max_regularization_attempts: usize,
    /// Exponent in `lambda = (attempt / max_regularization_attempts)^factor`,
    /// the interpolation weight toward the identity on each regularization
    /// attempt; larger values keep `lambda` smaller for longer.
    pub regularization_damping_factor: f64,
    /// Scales the default Brent bracket tolerance relative to the
    /// objective's own tolerance.
    pub brent_tolerance_factor: f64,
    /// Lower end of the default line-search bracket, in units of the full
    /// Newton step.
    pub brent_boundary_left: f64,
    /// Upper end of the default line-search bracket.
    pub brent_boundary_right: f64,
    /// When a step produces a non-finite objective, the bracket is
    /// narrowed by this factor before retrying.
    pub brent_feasible_search_restriction_factor: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            max_iterations: 1000,
            objective_tolerance: 1e-3,
            diagnostic_mode: false,
            max_regularization_attempts: 10,
            regularization_damping_factor: 2.0,
            brent_tolerance_factor: 1.0,
            brent_boundary_left: -1.0,
            brent_boundary_right: 2.0,
            brent_feasible_search_restriction_factor: 0.75,
        }
    }
}

/// One outer-loop iteration's bookkeeping, returned when
/// `diagnostic_mode` is set (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub objective: f64,
    pub step_length: f64,
    pub regularization_attempts: usize,
}

/// The outcome of [`NewtonSolver::maximize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub parameters: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
    pub history: Vec<IterationRecord>,
}

/// Maximizes the objective recorded on a tape by regularized Newton steps
/// with indices in `fixed` held at their current value (§4.G step 1).
pub struct NewtonSolver<'a> {
    tape: &'a Tape,
    config: SolverConfig,
    fixed: Vec<usize>,
}

impl<'a> NewtonSolver<'a> {
    pub fn new(tape: &'a Tape, config: SolverConfig) -> Self {
        NewtonSolver {
            tape,
            config,
            fixed: Vec::new(),
        }
    }

    /// Freeze these parameter indices: their adjoint is zeroed before
    /// building the working Hessian sub-block and they never move (used by
    /// profile-likelihood re-optimization, §4.H).
    pub fn with_fixed(mut self, fixed: Vec<usize>) -> Self {
        self.fixed = fixed;
        self
    }

    fn free_indices(&self) -> Vec<usize> {
        (0..self.tape.n_input_size())
            .filter(|i| !self.fixed.contains(i))
            .collect()
    }

    /// Run the Newton iteration to convergence or `max_iterations` (§4.G).
    pub fn maximize(&self) -> Result<SolveReport> {
        let mut trace = Trace::new(self.tape);
        let objective_slot = self.tape.n_trace_size() - 1;
        trace.play(self.tape);
        let mut current_objective = trace.values()[objective_slot];

        let free = self.free_indices();
        let n_free = free.len();
        let mut history = Vec::new();
        let mut converged = false;
        let mut iterations_run = 0;

        for iteration in 0..self.config.max_iterations {
            iterations_run = iteration + 1;

            let gradient: Vec<f64> = free.iter().map(|&i| trace.adjoints()[i]).collect();
            let mut working_hessian = vec![0.0; n_free * n_free];
            for (col, &j) in free.iter().enumerate() {
                for (row, &i) in free.iter().enumerate() {
                    working_hessian[row + col * n_free] = trace.hessian().read(i, j);
                }
            }

            let (step, regularization_attempts) =
                self.solve_newton_step(&working_hessian, &gradient, n_free)?;

            let base_values: Vec<f64> = (0..self.tape.n_input_size())
                .map(|i| trace.values()[i])
                .collect();

            let (step_length, new_objective) =
                self.line_search(&base_values, &free, &step, &mut trace, current_objective)?;

            if (new_objective - current_objective).abs() < self.config.objective_tolerance {
                current_objective = new_objective;
                if self.config.diagnostic_mode {
                    history.push(IterationRecord {
                        iteration,
                        objective: new_objective,
                        step_length,
                        regularization_attempts,
                    });
                }
                converged = true;
                break;
            }

            current_objective = new_objective;
            if self.config.diagnostic_mode {
                history.push(IterationRecord {
                    iteration,
                    objective: new_objective,
                    step_length,
                    regularization_attempts,
                });
            }
        }

        let parameters: Vec<f64> = (0..self.tape.n_input_size())
            .map(|i| trace.values()[i])
            .collect();

        Ok(SolveReport {
            parameters,
            objective: current_objective,
            iterations: iterations_run,
            converged,
            history,
        })
    }

    /// Attempt a direct solve, Tikhonov-regularizing toward the identity
    /// when the working Hessian isn't negative definite enough to factor
    /// (§4.G steps 3-4). Returns the Newton step and how many attempts it
    /// took.
    fn solve_newton_step(
        &self,
        working_hessian: &[f64],
        gradient: &[f64],
        n: usize,
    ) -> Result<(Vec<f64>, usize)> {
        if n == 0 {
            return Ok((Vec::new(), 0));
        }
        // Maximize, so solve H dx = -g with H negated to be SPD for
        // Cholesky; fall back to a plain LU solve against H directly if
        // Cholesky of -H fails on the first attempt.
        let neg_h: Vec<f64> = working_hessian.iter().map(|&v| -v).collect();
        if let Some(chol) = Cholesky::factorize(&neg_h, n) {
            let step = chol.solve(gradient);
            return Ok((step, 0));
        }

        // Interpolate the operator toward the identity as lambda grows from
        // (1/max)^factor to exactly 1.0 at the last attempt, which
        // degenerates to a pure gradient step and is guaranteed to factor
        // (§4.G step 4).
        let max_attempts = self.config.max_regularization_attempts;
        for attempt in 1..=max_attempts {
            let lambda = (attempt as f64 / max_attempts as f64).powf(self.config.regularization_damping_factor);
            let mut damped = vec![0.0; n * n];
            for i in 0..n {
                for j in 0..n {
                    let identity = if i == j { 1.0 } else { 0.0 };
                    damped[i + j * n] = (1.0 - lambda) * neg_h[i + j * n] + lambda * identity;
                }
            }
            if let Some(chol) = Cholesky::factorize(&damped, n) {
                let step = chol.solve(gradient);
                return Ok((step, attempt));
            }
        }

        // Last resort: an indefinite direct solve against the undamped
        // system, which at least produces a stationary-point direction.
        if let Some(step) = lu_solve(working_hessian, n, &gradient.iter().map(|&g| -g).collect::<Vec<_>>()) {
            return Ok((step, self.config.max_regularization_attempts));
        }

        Err(EngineError::FactorizationFailed {
            attempts: self.config.max_regularization_attempts,
        })
    }

    /// Bracketed line search along the Newton direction, committing the
    /// accepted step length's parameter values into `trace` (§4.G steps
    /// 5-6).
    fn line_search(
        &self,
        base_values: &[f64],
        free: &[usize],
        step: &[f64],
        trace: &mut Trace,
        starting_objective: f64,
    ) -> Result<(f64, f64)> {
        let mut eval = |t: f64| -> f64 {
            let mut candidate = base_values.to_vec();
            for (k, &i) in free.iter().enumerate() {
                candidate[i] += t * step[k];
            }
            trace.set_inputs(self.tape, &candidate);
            trace.play_forward(self.tape);
            trace.values()[self.tape.n_trace_size() - 1]
        };

        // Shrink the bracket toward its midpoint while either endpoint is
        // non-finite, so Brent never has to work with a NaN/±inf sample
        // (§4.G step 5).
        let mut left = self.config.brent_boundary_left;
        let mut right = self.config.brent_boundary_right;
        let midpoint = 0.5 * (left + right);
        let mut attempts = 0;
        while (!eval(left).is_finite() || !eval(right).is_finite()) && attempts < 64 {
            left = midpoint + self.config.brent_feasible_search_restriction_factor * (left - midpoint);
            right = midpoint + self.config.brent_feasible_search_restriction_factor * (right - midpoint);
            attempts += 1;
        }

        let (best_t, best_value) = brent_maximize(
            left,
            right,
            self.config.objective_tolerance * self.config.brent_tolerance_factor,
            &mut eval,
        );

        if best_value < starting_objective - self.config.objective_tolerance {
            return Err(EngineError::BacktrackingFailure {
                from: starting_objective,
                got: best_value,
                tolerance: self.config.objective_tolerance,
            });
        }

        let mut committed = base_values.to_vec();
        for (k, &i) in free.iter().enumerate() {
            committed[i] += best_t * step[k];
        }
        trace.set_inputs(self.tape, &committed);
        trace.play(self.tape);
        Ok((best_t, trace.values()[self.tape.n_trace_size() - 1]))
    }
}

/// One-dimensional maximization of `f` over `[a, b]` by Brent's method
/// (golden-section plus parabolic interpolation), applied to `-f` against
/// the textbook minimizer (§4.G.1).
fn brent_maximize(a: f64, b: f64, tol: f64, f: &mut dyn FnMut(f64) -> f64) -> (f64, f64) {
    let (x, neg_min) = brent_minimize(a, b, tol, &mut |t| -f(t));
    (x, -neg_min)
}

fn brent_minimize(mut a: f64, mut b: f64, tol: f64, f: &mut dyn FnMut(f64) -> f64) -> (f64, f64) {
    const GOLDEN: f64 = 0.3819660112501051; // (3 - sqrt(5)) / 2
    if a > b {
        std::mem::swap(&mut a, &mut b);
    }

    let mut x = a + GOLDEN * (b - a);
    let mut w = x;
    let mut v = x;
    let mut fx = f(x);
    let mut fw = fx;
    let mut fv = fx;
    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;

    for _ in 0..100 {
        let mid = 0.5 * (a + b);
        let tol1 = tol * x.abs() + 1e-10;
        let tol2 = 2.0 * tol1;
        if (x - mid).abs() <= tol2 - 0.5 * (b - a) {
            break;
        }

        let mut use_golden = true;
        if e.abs() > tol1 {
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            let q = q.abs();
            let etemp = e;
            e = d;
            if p.abs() < (0.5 * q * etemp).abs() && p > q * (a - x) && p < q * (b - x) {
                d = p / q;
                let u = x + d;
                if (u - a) < tol2 || (b - u) < tol2 {
                    d = if mid - x >= 0.0 { tol1 } else { -tol1 };
                }
                use_golden = false;
            }
        }

        if use_golden {
            e = if x >= mid { a - x } else { b - x };
            d = GOLDEN * e;
        }

        let u = if d.abs() >= tol1 {
            x + d
        } else {
            x + tol1.copysign(if d >= 0.0 { 1.0 } else { -1.0 })
        };
        let fu = f(u);

        if fu <= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }

    (x, fx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{BinOp, ConstData, OpKind, Operand};

    fn scalar_paraboloid_tape() -> Tape {
        // f(x) = -(x - 3)^2, maximized at x = 3.
        let mut tape = Tape::new();
        let x = tape.declare_input(0.0).unwrap();
        let shifted = tape
            .record(
                OpKind::Binary(BinOp::Sub),
                Operand::Free(x..x + 1),
                Some(Operand::Const(ConstData::Scalar(3.0))),
            )
            .unwrap();
        let squared = tape
            .record(OpKind::Unary(crate::ops::UnaryOp::Square), Operand::Free(shifted), None)
            .unwrap();
        tape.record(OpKind::Unary(crate::ops::UnaryOp::Negate), Operand::Free(squared), None)
            .unwrap();
        tape
    }

    #[test]
    fn brent_minimize_finds_parabola_minimum() {
        let (x, fx) = brent_minimize(-10.0, 10.0, 1e-8, &mut |t| (t - 2.0).powi(2));
        assert!((x - 2.0).abs() < 1e-4);
        assert!(fx < 1e-6);
    }

    #[test]
    fn newton_solver_finds_scalar_maximum() {
        let tape = scalar_paraboloid_tape();
        let solver = NewtonSolver::new(&tape, SolverConfig::default());
        let report = solver.maximize().unwrap();
        assert!((report.parameters[0] - 3.0).abs() < 1e-2);
        assert!(report.objective.abs() < 1e-2);
    }

    #[test]
    fn solver_config_round_trips_through_json() {
        let config = SolverConfig {
            max_iterations: 42,
            ..SolverConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SolverConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
