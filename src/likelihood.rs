//! Confidence intervals around a maximum-likelihood estimate (§4.H).
//!
//! Two independent methods share one collaborator surface: asymptotic Wald
//! intervals factor the negated Hessian once via [`crate::linalg::Cholesky`]
//! and read off diagonal variances; profile intervals re-run
//! [`crate::solver::NewtonSolver`] with one coordinate pinned and bracket
//! the likelihood-ratio cutpoint from [`crate::specialfn`].

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::linalg::Cholesky;
use crate::solver::{NewtonSolver, SolverConfig};
use crate::specialfn::{norm_inv_cdf, profile_cutpoint};
use crate::tape::Tape;
use crate::trace::Trace;

/// A symmetric interval estimate for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Wald intervals for every free parameter from the Cholesky of the
/// negated Hessian at the optimum (§4.H).
pub fn confint_asymptotic(tape: &Tape, coverage: f64) -> Result<Vec<ConfidenceInterval>> {
    let n = tape.n_input_size();
    let mut trace = Trace::new(tape);
    trace.play(tape);

    let neg_hessian: Vec<f64> = {
        let mut dense = trace.hessian().to_dense_column_major(n);
        for v in dense.iter_mut() {
            *v = -*v;
        }
        dense
    };
    let chol = Cholesky::factorize(&neg_hessian, n).ok_or(EngineError::BadHessian)?;
    let variances = chol.diag_of_inverse();

    let alpha = 1.0 - coverage;
    let z = norm_inv_cdf(1.0 - alpha / 2.0, 0.0, 1.0);

    Ok((0..n)
        .map(|i| {
            let estimate = trace.values()[i];
            let se = variances[i].max(0.0).sqrt();
            ConfidenceInterval {
                estimate,
                lower: estimate - z * se,
                upper: estimate + z * se,
            }
        })
        .collect())
}

/// Profile-likelihood interval for parameter `param`: re-optimize with
/// `param` pinned at a sequence of trial values, bracketing the point
/// where twice the log-likelihood drop equals the chi-square cutpoint
/// (§4.H).
pub fn confint_profile(tape: &Tape, param: usize, coverage: f64) -> Result<ConfidenceInterval> {
    let cutpoint = profile_cutpoint(coverage);

    let full_fit = NewtonSolver::new(tape, SolverConfig::default()).maximize()?;
    let max_log_lik = full_fit.objective;
    let estimate = full_fit.parameters[param];

    let target = |pinned_value: f64| -> Result<f64> {
        let pinned_tape = clone_tape_with_input(tape, param, pinned_value);
        let report = NewtonSolver::new(&pinned_tape, SolverConfig::default())
            .with_fixed(vec![param])
            .maximize()?;
        Ok(max_log_lik - report.objective - cutpoint)
    };

    let lower = bracket_and_bisect(param, estimate, -1.0, &target)?;
    let upper = bracket_and_bisect(param, estimate, 1.0, &target)?;

    Ok(ConfidenceInterval {
        estimate,
        lower,
        upper,
    })
}

fn clone_tape_with_input(tape: &Tape, param: usize, value: f64) -> Tape {
    let mut cloned = tape.clone();
    cloned.set_input_seed(param, value);
    cloned
}

/// Double the search half-width outward from `estimate` until `target`
/// (which is negative at `estimate` and increasing in distance) changes
/// sign, then bisect to the root (§4.H, §4.G `max_iterations`-bounded).
fn bracket_and_bisect(
    param: usize,
    estimate: f64,
    direction: f64,
    target: &dyn Fn(f64) -> Result<f64>,
) -> Result<f64> {
    let mut half_width = 0.1_f64.max(estimate.abs() * 0.05);
    let mut lo = estimate;
    let mut hi = estimate + direction * half_width;
    let mut f_lo = target(lo)?;
    let mut f_hi = target(hi)?;

    let mut attempts = 0;
    while f_lo.signum() == f_hi.signum() {
        attempts += 1;
        if attempts > 60 {
            return Err(EngineError::ProfileBracketFailed { param, attempts });
        }
        half_width *= 2.0;
        lo = hi;
        f_lo = f_hi;
        hi = estimate + direction * half_width;
        f_hi = target(hi)?;
    }

    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        let f_mid = target(mid)?;
        if f_mid.abs() < 1e-6 {
            return Ok(mid);
        }
        if f_mid.signum() == f_lo.signum() {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
            f_hi = f_mid;
        }
    }
    Ok(0.5 * (lo + hi))
}
