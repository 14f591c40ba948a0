//! The immutable recording of free inputs and operators (§3 "Tape", §4.D).
//!
//! Modeled on `lumen-tensor::ad::Tape`, which also separates "declare a
//! variable" from "record an operator" and returns trace positions rather
//! than values — but that tape is first-order and records operators
//! verbatim. This one adds the declaration-after-recording guard (§4.F) and
//! the peephole rewrites of §4.D, which rewrite a handful of algebraically
//! trivial operator instances into cheaper ones at record time rather than
//! leaving them for the reverse sweep to discover.

use std::ops::Range;

use crate::error::{EngineError, Result};
use crate::ops::{output_len, BinOp, ConstData, OpKind, Operand, Operator, UnaryOp};

/// The recorded program: a fixed list of free inputs followed by a fixed
/// list of operators, each consuming only earlier trace positions (§3).
#[derive(Debug, Clone, Default)]
pub struct Tape {
    operators: Vec<Operator>,
    input_values: Vec<f64>,
    trace_size: usize,
}

impl Tape {
    pub fn new() -> Self {
        Tape {
            operators: Vec::new(),
            input_values: Vec::new(),
            trace_size: 0,
        }
    }

    /// Number of free (declared) inputs.
    pub fn n_input_size(&self) -> usize {
        self.input_values.len()
    }

    /// Total trace width: inputs plus every operator's output slots.
    pub fn n_trace_size(&self) -> usize {
        self.trace_size
    }

    /// Seed values for the free inputs, in declaration order.
    pub fn initial_values(&self) -> &[f64] {
        &self.input_values
    }

    /// Overwrite one free input's seed value, e.g. to pin a parameter for
    /// profile-likelihood re-optimization (§4.H). Does not change which
    /// inputs exist, so it is legal after recording has started.
    pub fn set_input_seed(&mut self, index: usize, value: f64) {
        self.input_values[index] = value;
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    /// Declare one new scalar free input. Fails once any operator has been
    /// recorded (§4.F: declarations and recordings don't interleave).
    pub fn declare_input(&mut self, value: f64) -> Result<usize> {
        self.guard_declaration()?;
        let idx = self.input_values.len();
        self.input_values.push(value);
        self.trace_size += 1;
        Ok(idx)
    }

    /// Declare a contiguous block of free inputs, returning their range.
    pub fn declare_inputs(&mut self, values: &[f64]) -> Result<Range<usize>> {
        self.guard_declaration()?;
        let start = self.input_values.len();
        self.input_values.extend_from_slice(values);
        self.trace_size += values.len();
        Ok(start..self.input_values.len())
    }

    fn guard_declaration(&self) -> Result<()> {
        if !self.operators.is_empty() {
            return Err(EngineError::DeclarationAfterRecording {
                recorded: self.operators.len(),
            });
        }
        Ok(())
    }

    /// Record one operator instance, applying the peephole rewrites of §4.D
    /// before it is pushed, and return the trace range of its output.
    pub fn record(&mut self, kind: OpKind, a: Operand, b: Option<Operand>) -> Result<Range<usize>> {
        let (kind, a, b) = peephole(kind, a, b);
        let out_len = output_len(&kind, a.len(), b.as_ref().map(Operand::len))?;
        let out_begin = self.trace_size;
        self.operators.push(Operator {
            kind,
            a,
            b,
            out_begin,
            out_len,
        });
        self.trace_size += out_len;
        Ok(out_begin..out_begin + out_len)
    }
}

fn const_scalar(o: &Operand) -> Option<f64> {
    match o {
        Operand::Const(ConstData::Scalar(s)) => Some(*s),
        _ => None,
    }
}

fn same_free_range(a: &Operand, b: &Operand) -> bool {
    matches!((a, b), (Operand::Free(ra), Operand::Free(rb)) if ra == rb)
}

/// Rewrite a handful of algebraically degenerate operator instances into
/// cheaper equivalent ones (§4.D): `a-a`, `a/a`, `a+a`, `a^{0,1,2,3}`,
/// `1/a`, and multiplication/addition against the constants `0`/`1`. An
/// operator whose both operands happen to be the *same free range* (not
/// merely equal values) routes to the self-form rather than surfacing as an
/// error (§9) — recording `x - x` is legal and simply folds to zero.
fn peephole(kind: OpKind, a: Operand, b: Option<Operand>) -> (OpKind, Operand, Option<Operand>) {
    let op = match &kind {
        OpKind::Binary(op) => *op,
        _ => return (kind, a, b),
    };

    if let Some(b_operand) = &b {
        if same_free_range(&a, b_operand) {
            match op {
                BinOp::Sub => return (OpKind::Unary(UnaryOp::TrivialZero), a, None),
                BinOp::Div => return (OpKind::Unary(UnaryOp::TrivialOne), a, None),
                BinOp::Add => return (OpKind::Unary(UnaryOp::MultiplyBy2), a, None),
                _ => {}
            }
        }
    }

    let a_const = const_scalar(&a);
    let b_const = b.as_ref().and_then(const_scalar);

    match op {
        BinOp::Pow => {
            if let Some(e) = b_const {
                if e == 0.0 {
                    return (OpKind::Unary(UnaryOp::TrivialOne), a, None);
                }
                if e == 1.0 {
                    return (OpKind::Unary(UnaryOp::Identity), a, None);
                }
                if e == 2.0 {
                    return (OpKind::Unary(UnaryOp::Square), a, None);
                }
                if e == 3.0 {
                    return (OpKind::Unary(UnaryOp::Cube), a, None);
                }
            }
        }
        BinOp::Div => {
            if a_const == Some(1.0) {
                if let Some(b_operand) = b {
                    return (OpKind::Unary(UnaryOp::Invert), b_operand, None);
                }
            }
        }
        BinOp::Mul => {
            if b_const == Some(0.0) {
                return (OpKind::Unary(UnaryOp::TrivialZero), a, None);
            }
            if b_const == Some(1.0) {
                return (OpKind::Unary(UnaryOp::Identity), a, None);
            }
            if a_const == Some(0.0) {
                if let Some(b_operand) = b {
                    return (OpKind::Unary(UnaryOp::TrivialZero), b_operand, None);
                }
            }
            if a_const == Some(1.0) {
                if let Some(b_operand) = b {
                    return (OpKind::Unary(UnaryOp::Identity), b_operand, None);
                }
            }
        }
        BinOp::Add => {
            if b_const == Some(0.0) {
                return (OpKind::Unary(UnaryOp::Identity), a, None);
            }
            if a_const == Some(0.0) {
                if let Some(b_operand) = b {
                    return (OpKind::Unary(UnaryOp::Identity), b_operand, None);
                }
            }
        }
        _ => {}
    }

    (kind, a, b)
}
