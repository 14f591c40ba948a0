//! Special-function collaborator (§6): digamma, trigamma, the inverse
//! chi-square quantile, and the normal inverse CDF, realized with `statrs`
//! rather than a hand-rolled implementation (§1 explicitly treats this
//! library as an external collaborator).

use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use statrs::function::gamma::{digamma, trigamma};

/// `d/dx ln(Gamma(x))`, needed by the local derivative of the `lgamma`
/// primitive (§4.C).
pub fn dgamma(x: f64) -> f64 {
    digamma(x)
}

/// `d^2/dx^2 ln(Gamma(x))`, needed by the local second derivative of the
/// `lgamma` primitive.
pub fn dtrigamma(x: f64) -> f64 {
    trigamma(x)
}

/// Inverse chi-square quantile. `lower_tail` selects `P(X <= x) = p` versus
/// `P(X > x) = p`; `log_p` treats `p` as already given in log-space.
pub fn qchisq(p: f64, df: f64, lower_tail: bool, log_p: bool) -> f64 {
    let p = if log_p { p.exp() } else { p };
    let p = if lower_tail { p } else { 1.0 - p };
    let dist = ChiSquared::new(df).expect("qchisq: invalid degrees of freedom");
    dist.inverse_cdf(p)
}

/// Normal inverse CDF `Phi^-1(p; mu, sigma)`, used by both Wald intervals
/// (§4.H) and by the likelihood-ratio cutpoint via `qchisq`.
pub fn norm_inv_cdf(p: f64, mean: f64, std_dev: f64) -> f64 {
    let dist = Normal::new(mean, std_dev).expect("norm_inv_cdf: invalid normal parameters");
    dist.inverse_cdf(p)
}

/// The two-sided likelihood-ratio cutpoint `qchisq(coverage, df=1) / 2`
/// used by profile intervals (§4.H): for `coverage = 0.95` this is
/// approximately `1.92072941`.
pub fn profile_cutpoint(coverage: f64) -> f64 {
    qchisq(coverage, 1.0, true, false) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digamma_matches_known_value() {
        // digamma(1) = -gamma (Euler-Mascheroni), approx -0.5772156649
        assert!((dgamma(1.0) - (-0.5772156649)).abs() < 1e-6);
    }

    #[test]
    fn profile_cutpoint_95_percent_matches_spec_constant() {
        assert!((profile_cutpoint(0.95) - 1.92072941).abs() < 1e-4);
    }

    #[test]
    fn norm_inv_cdf_is_symmetric_around_mean() {
        let lo = norm_inv_cdf(0.025, 0.0, 1.0);
        let hi = norm_inv_cdf(0.975, 0.0, 1.0);
        assert!((lo + hi).abs() < 1e-9);
        assert!((hi - 1.959963985).abs() < 1e-6);
    }
}
