//! The user-facing expression-builder handle (§3 "Spy").
//!
//! Where `lumen-tensor::ad::Tape` exposes recording directly (`tape.add(a,
//! b)`), this crate follows §4.F and puts a thin value type in front of the
//! tape: operator overloading on `Spy` is how a model author actually
//! writes down a likelihood, and every overload is a one-line call into
//! `Tape::record`. A `Spy` is cheap to clone (an `Rc` and a `Range`); the
//! tape itself lives behind a `RefCell` so that a whole expression tree can
//! borrow it mutably one record call at a time without threading `&mut
//! Tape` through every operator.

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use crate::error::{EngineError, Result};
use crate::ops::{BinOp, ConstData, IndicatorOp, OpKind, Operand, UnaryOp};
use crate::tape::Tape;
use crate::tensor::Tensor;
use crate::trace::Trace;

pub type TapeHandle = Rc<RefCell<Tape>>;

pub fn new_tape() -> TapeHandle {
    Rc::new(RefCell::new(Tape::new()))
}

/// Declare one free scalar input and return a handle to it (§4.F
/// `spy(initial_value, tape)`).
pub fn spy(initial_value: f64, tape: &TapeHandle) -> Result<Spy> {
    let idx = tape.borrow_mut().declare_input(initial_value)?;
    Ok(Spy {
        tape: tape.clone(),
        range: idx..idx + 1,
    })
}

/// Declare a contiguous block of free scalar inputs as one vector-shaped
/// spy.
pub fn spy_vector(initial_values: &[f64], tape: &TapeHandle) -> Result<Spy> {
    let range = tape.borrow_mut().declare_inputs(initial_values)?;
    Ok(Spy {
        tape: tape.clone(),
        range,
    })
}

/// The value read back for a handle: a bare number for a scalar spy, a
/// [`Tensor`] for a vector-shaped one (§6 `read(handle, solved_trace) ->
/// number or tensor`).
#[derive(Debug, Clone, PartialEq)]
pub enum ReadValue {
    Scalar(f64),
    Tensor(Tensor),
}

impl ReadValue {
    /// The value as a bare scalar, if this handle was scalar-shaped.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ReadValue::Scalar(v) => Some(*v),
            ReadValue::Tensor(t) => t.to_scalar(),
        }
    }
}

/// Read a handle's value out of a solved trace (§6 `read`). Scalar-shaped
/// handles come back as a plain number; vector-shaped ones come back as a
/// [`Tensor`] so the caller can index it by position.
pub fn read(handle: &Spy, trace: &Trace) -> ReadValue {
    let values = &trace.values()[handle.range.clone()];
    if values.len() == 1 {
        ReadValue::Scalar(values[0])
    } else {
        let tensor =
            Tensor::from_slice(values).expect("a handle's own range always matches its length");
        ReadValue::Tensor(tensor)
    }
}

/// A handle to a (possibly vector-valued) position on a tape's trace.
#[derive(Clone)]
pub struct Spy {
    tape: TapeHandle,
    range: Range<usize>,
}

impl Spy {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn tape(&self) -> TapeHandle {
        self.tape.clone()
    }

    /// Finalize the tape: the last-recorded operator's output is the
    /// objective (§4.F `objective()`).
    pub fn objective(&self) -> TapeHandle {
        self.tape.clone()
    }

    /// A scalar view onto element `i`, without recording a new operator
    /// (§4.F element access; out-of-range is a failure, not a panic).
    pub fn index(&self, i: usize) -> Result<Spy> {
        if i >= self.range.len() {
            return Err(EngineError::OutOfRange {
                index: i,
                begin: 0,
                end: self.range.len(),
            });
        }
        Ok(Spy {
            tape: self.tape.clone(),
            range: (self.range.start + i)..(self.range.start + i + 1),
        })
    }

    fn same_tape(&self, other: &Spy) {
        assert!(
            Rc::ptr_eq(&self.tape, &other.tape),
            "spy operands must share the same tape"
        );
    }

    fn record_unary(&self, op: UnaryOp) -> Spy {
        let range = self
            .tape
            .borrow_mut()
            .record(OpKind::Unary(op), Operand::Free(self.range.clone()), None)
            .expect("unary operators never fail their own shape check");
        Spy {
            tape: self.tape.clone(),
            range,
        }
    }

    fn record_indicator(&self, op: IndicatorOp) -> Spy {
        let range = self
            .tape
            .borrow_mut()
            .record(
                OpKind::Indicator(op),
                Operand::Free(self.range.clone()),
                None,
            )
            .expect("indicator operators never fail their own shape check");
        Spy {
            tape: self.tape.clone(),
            range,
        }
    }

    fn record_binary(&self, op: BinOp, other: &Spy) -> Result<Spy> {
        self.same_tape(other);
        let range = self.tape.borrow_mut().record(
            OpKind::Binary(op),
            Operand::Free(self.range.clone()),
            Some(Operand::Free(other.range.clone())),
        )?;
        Ok(Spy {
            tape: self.tape.clone(),
            range,
        })
    }

    fn record_binary_const(&self, op: BinOp, c: f64, const_is_rhs: bool) -> Spy {
        let (a, b) = if const_is_rhs {
            (
                Operand::Free(self.range.clone()),
                Some(Operand::Const(ConstData::Scalar(c))),
            )
        } else {
            (
                Operand::Const(ConstData::Scalar(c)),
                Some(Operand::Free(self.range.clone())),
            )
        };
        let range = self
            .tape
            .borrow_mut()
            .record(OpKind::Binary(op), a, b)
            .expect("scalar-constant binary ops never fail their own shape check");
        Spy {
            tape: self.tape.clone(),
            range,
        }
    }

    pub fn pow(&self, exponent: &Spy) -> Result<Spy> {
        self.record_binary(BinOp::Pow, exponent)
    }

    pub fn powf(&self, exponent: f64) -> Spy {
        self.record_binary_const(BinOp::Pow, exponent, true)
    }

    pub fn square(&self) -> Spy {
        self.record_unary(UnaryOp::Square)
    }

    pub fn cube(&self) -> Spy {
        self.record_unary(UnaryOp::Cube)
    }

    pub fn invert(&self) -> Spy {
        self.record_unary(UnaryOp::Invert)
    }

    pub fn log(&self) -> Spy {
        self.record_unary(UnaryOp::Log)
    }

    pub fn log1p(&self) -> Spy {
        self.record_unary(UnaryOp::Log1p)
    }

    pub fn log1m(&self) -> Spy {
        self.record_unary(UnaryOp::Log1m)
    }

    pub fn exp(&self) -> Spy {
        self.record_unary(UnaryOp::Exp)
    }

    pub fn self_power(&self) -> Spy {
        self.record_unary(UnaryOp::SelfPower)
    }

    pub fn lgamma(&self) -> Spy {
        self.record_unary(UnaryOp::LogGamma)
    }

    pub fn logit(&self) -> Spy {
        self.record_unary(UnaryOp::Logit)
    }

    pub fn logistic(&self) -> Spy {
        self.record_unary(UnaryOp::Logistic)
    }

    pub fn sin(&self) -> Spy {
        self.record_unary(UnaryOp::Sin)
    }

    pub fn cos(&self) -> Spy {
        self.record_unary(UnaryOp::Cos)
    }

    /// Iverson indicator `[x > 0]`.
    pub fn gt0(&self) -> Spy {
        self.record_indicator(IndicatorOp::Gt0)
    }

    /// Iverson indicator `[x >= 0]`.
    pub fn ge0(&self) -> Spy {
        self.record_indicator(IndicatorOp::Ge0)
    }

    /// `log([x > 0])`: `0` when true, `-inf` when false, with zero partials
    /// either way (§4.C) — the barrier-term primitive.
    pub fn log_gt0(&self) -> Spy {
        self.record_indicator(IndicatorOp::LogGt0)
    }

    pub fn log_ge0(&self) -> Spy {
        self.record_indicator(IndicatorOp::LogGe0)
    }

    pub fn sum(&self) -> Spy {
        let range = self
            .tape
            .borrow_mut()
            .record(OpKind::Sum, Operand::Free(self.range.clone()), None)
            .expect("sum never fails its own shape check");
        Spy {
            tape: self.tape.clone(),
            range,
        }
    }

    pub fn sumsq(&self) -> Spy {
        let range = self
            .tape
            .borrow_mut()
            .record(OpKind::SumSq, Operand::Free(self.range.clone()), None)
            .expect("sumsq never fails its own shape check");
        Spy {
            tape: self.tape.clone(),
            range,
        }
    }

    pub fn dot(&self, other: &Spy) -> Result<Spy> {
        self.same_tape(other);
        let range = self.tape.borrow_mut().record(
            OpKind::Dot,
            Operand::Free(self.range.clone()),
            Some(Operand::Free(other.range.clone())),
        )?;
        Ok(Spy {
            tape: self.tape.clone(),
            range,
        })
    }

    pub fn matmul(&self, other: &Spy, m: usize, k: usize, n: usize) -> Result<Spy> {
        self.same_tape(other);
        let range = self.tape.borrow_mut().record(
            OpKind::MatMul { m, k, n },
            Operand::Free(self.range.clone()),
            Some(Operand::Free(other.range.clone())),
        )?;
        Ok(Spy {
            tape: self.tape.clone(),
            range,
        })
    }

    /// Bernoulli log-likelihood of fixed binary outcomes `y` against this
    /// spy's probabilities (§4.C): `sum(y*log(p) + (1-y)*log(1-p))`.
    pub fn bernoulli_log_lik(&self, y: &[f64]) -> Result<Spy> {
        let range = self.tape.borrow_mut().record(
            OpKind::BernoulliLogLik { y: y.to_vec() },
            Operand::Free(self.range.clone()),
            None,
        )?;
        Ok(Spy {
            tape: self.tape.clone(),
            range,
        })
    }
}

macro_rules! impl_spy_binop {
    ($trait:ident, $method:ident, $binop:expr) => {
        impl std::ops::$trait<&Spy> for &Spy {
            type Output = Spy;
            fn $method(self, rhs: &Spy) -> Spy {
                self.record_binary($binop, rhs)
                    .expect("operand shapes must broadcast")
            }
        }
        impl std::ops::$trait<f64> for &Spy {
            type Output = Spy;
            fn $method(self, rhs: f64) -> Spy {
                self.record_binary_const($binop, rhs, true)
            }
        }
        impl std::ops::$trait<&Spy> for f64 {
            type Output = Spy;
            fn $method(self, rhs: &Spy) -> Spy {
                rhs.record_binary_const($binop, self, false)
            }
        }
    };
}

impl_spy_binop!(Add, add, BinOp::Add);
impl_spy_binop!(Sub, sub, BinOp::Sub);
impl_spy_binop!(Mul, mul, BinOp::Mul);
impl_spy_binop!(Div, div, BinOp::Div);

impl std::ops::Neg for &Spy {
    type Output = Spy;
    fn neg(self) -> Spy {
        self.record_unary(UnaryOp::Negate)
    }
}

const HALF_LOG_TWO_PI: f64 = 0.9189385332046727;

/// Gaussian log-density, composed from primitives (no new tape operator):
/// `-0.5*((x-mean)/sigma)^2 - log(sigma) - 0.5*log(2*pi)`.
pub fn normal_log_density(x: &Spy, mean: &Spy, sigma: &Spy) -> Result<Spy> {
    let z = x.record_binary(BinOp::Sub, mean)?;
    let z = z.record_binary(BinOp::Div, sigma)?;
    let neg_half_sq = &z.square() * -0.5;
    let log_sigma = sigma.log();
    let shifted = &neg_half_sq - &log_sigma;
    Ok(&shifted - HALF_LOG_TWO_PI)
}

/// Log density of `Beta(shape_a, shape_b)` evaluated at `x`:
/// `(a-1)*log(x) + (b-1)*log(1-x) - lbeta(a, b)`. `shape_a`/`shape_b` are
/// fixed distribution parameters, not estimated quantities, so `lbeta` is
/// folded in as a plain constant rather than recorded as a free input.
pub fn beta_log_density(x: &Spy, shape_a: f64, shape_b: f64) -> Result<Spy> {
    use statrs::function::gamma::ln_gamma;
    let lbeta = ln_gamma(shape_a) + ln_gamma(shape_b) - ln_gamma(shape_a + shape_b);

    let term_a = &x.log() * (shape_a - 1.0);
    let term_b = &x.log1m() * (shape_b - 1.0);
    let density = &term_a + &term_b;
    Ok(&density - lbeta)
}

/// Dirichlet log density of a simplex-valued vector spy `x` against a fixed
/// concentration vector `alpha`: `sum((alpha_i-1)*log(x_i)) - lbeta(alpha)`,
/// with the multivariate `lbeta(alpha) = sum(lgamma(alpha_i)) -
/// lgamma(sum(alpha_i))`. `alpha` is a fixed vector of distribution
/// parameters, so `lbeta(alpha)` is computed directly as a constant rather
/// than recorded as free inputs.
pub fn dirichlet_log_density(x: &Spy, alpha: &[f64]) -> Result<Spy> {
    assert_eq!(x.len(), alpha.len(), "dirichlet_log_density: dimension mismatch");
    use statrs::function::gamma::ln_gamma;
    let alpha_total: f64 = alpha.iter().sum();
    let lbeta = alpha.iter().map(|&a_i| ln_gamma(a_i)).sum::<f64>() - ln_gamma(alpha_total);

    let mut total: Option<Spy> = None;
    for (i, &a_i) in alpha.iter().enumerate() {
        let xi = x.index(i)?;
        let term = &xi.log() * (a_i - 1.0);
        total = Some(match total {
            Some(t) => &t + &term,
            None => term,
        });
    }
    let total = total.expect("alpha is non-empty");
    Ok(&total - lbeta)
}

/// Logistic-distribution log density: `-(z) - log(s) - 2*log1p(exp(-z))`
/// with `z = (x-mean)/scale`.
pub fn logistic_log_density(x: &Spy, mean: &Spy, scale: &Spy) -> Result<Spy> {
    let z = x.record_binary(BinOp::Sub, mean)?;
    let z = z.record_binary(BinOp::Div, scale)?;
    let neg_z = -&z;
    let exp_neg_z = neg_z.exp();
    let log1p_term = &exp_neg_z.log1p() * 2.0;
    let log_scale = scale.log();
    let shifted = &neg_z - &log_scale;
    Ok(&shifted - &log1p_term)
}

/// Gamma-distribution log density with shape `k` and rate `theta`:
/// `(k-1)*log(x) - theta*x + k*log(theta) - lgamma(k)`. `shape_k`/
/// `rate_theta` are fixed distribution parameters, so `lgamma(k)` is folded
/// in as a plain constant rather than recorded as a free input.
pub fn gamma_log_density(x: &Spy, shape_k: f64, rate_theta: f64) -> Result<Spy> {
    let lgamma_k = statrs::function::gamma::ln_gamma(shape_k);
    let term1 = &x.log() * (shape_k - 1.0);
    let term2 = x * rate_theta;
    let term3 = rate_theta.ln() * shape_k - lgamma_k;
    let partial = &term1 - &term2;
    Ok(&partial + term3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_paraboloid_gradient_is_negative_two_x() {
        let tape = new_tape();
        let x = spy(3.0, &tape).unwrap();
        let _y = -&x.square();
        let mut trace = crate::trace::Trace::new(&tape.borrow());
        trace.play(&tape.borrow());
        assert_eq!(trace.values()[0], 3.0);
        assert_eq!(trace.adjoints()[0], -6.0);
    }

    #[test]
    fn index_out_of_range_fails() {
        let tape = new_tape();
        let v = spy_vector(&[1.0, 2.0], &tape).unwrap();
        assert!(v.index(2).is_err());
        assert!(v.index(0).is_ok());
    }

    #[test]
    fn peephole_cancels_x_minus_x_plus_three_x() {
        let tape = new_tape();
        let x = spy(5.0, &tape).unwrap();
        let three_x = &x * 3.0;
        let expr = &(&(&x - &x) + &three_x) - &x;
        let mut trace = crate::trace::Trace::new(&tape.borrow());
        trace.play(&tape.borrow());
        let last = tape.borrow().n_trace_size() - 1;
        assert_eq!(trace.values()[last], 5.0);
        assert!(expr.len() == 1);
    }

    #[test]
    fn normal_log_density_peaks_at_mean() {
        let tape = new_tape();
        let x = spy(0.0, &tape).unwrap();
        let mean = spy(0.0, &tape).unwrap();
        let sigma = spy(1.0, &tape).unwrap();
        let density = normal_log_density(&x, &mean, &sigma).unwrap();
        let mut trace = crate::trace::Trace::new(&tape.borrow());
        trace.play(&tape.borrow());
        let last = tape.borrow().n_trace_size() - 1;
        assert!((trace.values()[last] - (-HALF_LOG_TWO_PI)).abs() < 1e-9);
        let _ = density;
    }

    #[test]
    fn read_returns_scalar_for_scalar_handle() {
        let tape = new_tape();
        let x = spy(4.0, &tape).unwrap();
        let mut trace = Trace::new(&tape.borrow());
        trace.play(&tape.borrow());
        assert_eq!(read(&x, &trace), ReadValue::Scalar(4.0));
    }

    #[test]
    fn read_returns_tensor_for_vector_handle() {
        let tape = new_tape();
        let v = spy_vector(&[1.0, 2.0, 3.0], &tape).unwrap();
        let mut trace = Trace::new(&tape.borrow());
        trace.play(&tape.borrow());
        match read(&v, &trace) {
            ReadValue::Tensor(t) => assert_eq!(t.data(), &[1.0, 2.0, 3.0]),
            ReadValue::Scalar(_) => panic!("expected a tensor for a length-3 handle"),
        }
    }

    #[test]
    fn beta_log_density_is_symmetric_at_midpoint_for_equal_shapes() {
        let tape = new_tape();
        let x = spy(0.5, &tape).unwrap();
        let density = beta_log_density(&x, 2.0, 2.0).unwrap();
        let mut trace = Trace::new(&tape.borrow());
        trace.play(&tape.borrow());
        // Beta(2,2) density at 0.5 is 1.5; log(1.5) ~ 0.405465.
        let last = tape.borrow().n_trace_size() - 1;
        assert!((trace.values()[last] - 1.5f64.ln()).abs() < 1e-9);
        assert_eq!(tape.borrow().n_input_size(), 1);
        let _ = density;
    }

    #[test]
    fn dirichlet_log_density_matches_uniform_normalizer_on_simplex() {
        let tape = new_tape();
        let x = spy_vector(&[1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0], &tape).unwrap();
        let density = dirichlet_log_density(&x, &[1.0, 1.0, 1.0]).unwrap();
        let mut trace = Trace::new(&tape.borrow());
        trace.play(&tape.borrow());
        // Dirichlet(1,1,1) is uniform on the simplex; density is 2! = 2.
        let last = tape.borrow().n_trace_size() - 1;
        assert!((trace.values()[last] - 2.0f64.ln()).abs() < 1e-9);
        assert_eq!(tape.borrow().n_input_size(), 3);
        let _ = density;
    }

    #[test]
    fn gamma_log_density_matches_exponential_special_case() {
        // Gamma(1, theta) is Exponential(theta): density theta*exp(-theta*x).
        let tape = new_tape();
        let x = spy(2.0, &tape).unwrap();
        let density = gamma_log_density(&x, 1.0, 0.5).unwrap();
        let mut trace = Trace::new(&tape.borrow());
        trace.play(&tape.borrow());
        let expected = 0.5f64.ln() - 0.5 * 2.0;
        let last = tape.borrow().n_trace_size() - 1;
        assert!((trace.values()[last] - expected).abs() < 1e-9);
        assert_eq!(tape.borrow().n_input_size(), 1);
        let _ = density;
    }

    #[test]
    fn density_helpers_permit_recording_after_an_earlier_operator() {
        // Regression: shape constants must not be declared as new free
        // inputs once recording has already started, or this would fail
        // with DeclarationAfterRecording.
        let tape = new_tape();
        let x = spy(0.3, &tape).unwrap();
        let _already_recorded = x.square();
        let density = beta_log_density(&x, 2.0, 3.0);
        assert!(density.is_ok());
    }
}
