//! Forward and reverse playback of a [`Tape`] (§4.E).
//!
//! `lumen-tensor::ad::Tape::backward` accumulates first-order gradients by
//! walking operators in reverse and calling each op's local derivative
//! once per input. This `Trace` does the same walk but additionally
//! maintains a live sparse Hessian: at each operator, existing Hessian
//! entries anchored at its outputs are pushed onto its inputs before the
//! output's own row is erased (edge-pushing, Gower & Mello). The four
//! sub-steps below — adjoint update, pushing existing entries, creating
//! the operator's own local contribution, and erasing the spent row — are
//! §4.E's algorithm, applied once per scalar output position of every
//! operator, traversed in reverse recording order.

use crate::error::{EngineError, Result};
use crate::ops::Operator;
use crate::sparse::SparseSymmetric;
use crate::tape::Tape;

/// Values, adjoints, and the live sparse Hessian bound to one playback of a
/// [`Tape`] (§3 "Trace").
#[derive(Debug, Clone)]
pub struct Trace {
    values: Vec<f64>,
    adjoints: Vec<f64>,
    hessian: SparseSymmetric,
}

impl Trace {
    /// Allocate a trace sized to `tape` with every free input seeded from
    /// `tape.initial_values()` and zero elsewhere.
    pub fn new(tape: &Tape) -> Self {
        let mut values = vec![0.0; tape.n_trace_size()];
        values[..tape.n_input_size()].copy_from_slice(tape.initial_values());
        Trace {
            values,
            adjoints: vec![0.0; tape.n_trace_size()],
            hessian: SparseSymmetric::new(),
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn adjoints(&self) -> &[f64] {
        &self.adjoints
    }

    pub fn hessian(&self) -> &SparseSymmetric {
        &self.hessian
    }

    /// Overwrite the free-input seeds before replaying (used by the Newton
    /// solver between iterations and by profile-likelihood re-optimization
    /// with one coordinate pinned).
    pub fn set_inputs(&mut self, tape: &Tape, inputs: &[f64]) {
        debug_assert_eq!(inputs.len(), tape.n_input_size());
        self.values[..inputs.len()].copy_from_slice(inputs);
    }

    /// Evaluate every operator in recording order (§4.E forward pass).
    pub fn play_forward(&mut self, tape: &Tape) {
        for op in tape.operators() {
            op.evaluate(&mut self.values);
        }
    }

    /// Walk every operator in reverse recording order, seeding the
    /// objective's own adjoint and Hessian entry before the sweep begins.
    /// `objective_slot` is almost always the last trace position (the
    /// tape's final operator output).
    pub fn play_reverse(&mut self, tape: &Tape, objective_slot: usize) {
        self.adjoints.iter_mut().for_each(|a| *a = 0.0);
        self.hessian = SparseSymmetric::new();
        self.adjoints[objective_slot] = 1.0;

        for op in tape.operators().iter().rev() {
            self.push_operator(op);
        }
    }

    /// `play_forward` then `play_reverse` against the tape's last trace
    /// position as the objective (§3 `play`).
    pub fn play(&mut self, tape: &Tape) {
        self.play_forward(tape);
        let objective_slot = tape.n_trace_size() - 1;
        self.play_reverse(tape, objective_slot);
    }

    fn push_operator(&mut self, op: &Operator) {
        let tags = op.tags();
        let before = &self.values[..op.out_begin];
        let out = &self.values[op.out_begin..op.out_begin + op.out_len];
        let before = before.to_vec();
        let out = out.to_vec();

        for io in 0..op.out_len {
            let i = op.out_begin + io;
            let grad_i = self.adjoints[i];

            let a_positions = op.active_a_positions(io);
            let b_positions = op.active_b_positions(io);

            // Step 1: adjoint update, d(objective)/d(input) += d(out_i)/d(input) * adjoints[i].
            if !tags.partial_always_zero {
                for &pa in &a_positions {
                    if let Some(j) = op.a.trace_slot(pa) {
                        self.adjoints[j] += op.d_out_d_a(&before, &out, io, pa) * grad_i;
                    }
                }
                if let Some(b) = &op.b {
                    for &pb in &b_positions {
                        if let Some(j) = b.trace_slot(pb) {
                            self.adjoints[j] += op.d_out_d_b(&before, &out, io, pb) * grad_i;
                        }
                    }
                }
            }

            // Steps 2 & 3: push every existing Hessian entry anchored at i
            // through this operator's first partials onto its free inputs.
            if let Some(row_i) = self.hessian.row(i).cloned() {
                for (&l, &h_il) in &row_i {
                    if l == i {
                        continue;
                    }
                    for &pa in &a_positions {
                        if let Some(j) = op.a.trace_slot(pa) {
                            let d = op.d_out_d_a(&before, &out, io, pa);
                            if d != 0.0 {
                                self.hessian.add(j, l, d * h_il);
                            }
                        }
                    }
                    if let Some(b) = &op.b {
                        for &pb in &b_positions {
                            if let Some(j) = b.trace_slot(pb) {
                                let d = op.d_out_d_b(&before, &out, io, pb);
                                if d != 0.0 {
                                    self.hessian.add(j, l, d * h_il);
                                }
                            }
                        }
                    }
                }

                // Step 4: this operator's own local Hessian, weighted by
                // the diagonal entry H[i][i] already accumulated from
                // later operators, plus the chain-rule term from grad_i
                // itself (the "creating part").
                let h_ii = row_i.get(&i).copied().unwrap_or(0.0);
                self.create_local_hessian(op, &before, &out, io, &a_positions, &b_positions, grad_i, h_ii);
            } else if !tags.hessian_always_zero {
                self.create_local_hessian(op, &before, &out, io, &a_positions, &b_positions, grad_i, 0.0);
            }

            // Housekeeping: output position i is never read again once
            // every earlier operator has had a chance to pull from it.
            self.hessian.erase(i);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_local_hessian(
        &mut self,
        op: &Operator,
        before: &[f64],
        out: &[f64],
        io: usize,
        a_positions: &[usize],
        b_positions: &[usize],
        grad_i: f64,
        h_ii: f64,
    ) {
        let tags = op.tags();
        // a-a pairs
        if !tags.hessian_diag_always_zero || !tags.hessian_offdiag_always_zero {
            for &pa in a_positions {
                for &qa in a_positions {
                    let Some(j) = op.a.trace_slot(pa) else { continue };
                    let Some(k) = op.a.trace_slot(qa) else { continue };
                    let d2 = op.d2_aa(before, out, io, pa, qa);
                    let first_order = op.d_out_d_a(before, out, io, pa) * op.d_out_d_a(before, out, io, qa);
                    let contribution = grad_i * d2 + h_ii * first_order;
                    if contribution != 0.0 {
                        self.hessian.add(j, k, contribution);
                    }
                }
            }
        }
        if let Some(b) = &op.b {
            for &pb in b_positions {
                for &qb in b_positions {
                    let Some(j) = b.trace_slot(pb) else { continue };
                    let Some(k) = b.trace_slot(qb) else { continue };
                    let d2 = op.d2_bb(before, out, io, pb, qb);
                    let first_order = op.d_out_d_b(before, out, io, pb) * op.d_out_d_b(before, out, io, qb);
                    let contribution = grad_i * d2 + h_ii * first_order;
                    if contribution != 0.0 {
                        self.hessian.add(j, k, contribution);
                    }
                }
            }
            for &pa in a_positions {
                for &pb in b_positions {
                    let Some(j) = op.a.trace_slot(pa) else { continue };
                    let Some(k) = b.trace_slot(pb) else { continue };
                    let d2 = op.d2_ab(before, out, io, pa, pb);
                    let first_order = op.d_out_d_a(before, out, io, pa) * op.d_out_d_b(before, out, io, pb);
                    let contribution = grad_i * d2 + h_ii * first_order;
                    if contribution != 0.0 {
                        self.hessian.add(j, k, contribution);
                    }
                }
            }
        }
    }
}

/// Build a trace for `tape`, play it forward and backward, and return the
/// objective value (the last trace position).
pub fn objective_value(tape: &Tape) -> Result<f64> {
    if tape.n_trace_size() == 0 {
        return Err(EngineError::OutOfRange {
            index: 0,
            begin: 0,
            end: 0,
        });
    }
    let mut trace = Trace::new(tape);
    trace.play_forward(tape);
    Ok(trace.values()[tape.n_trace_size() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{BinOp, OpKind, Operand};

    #[test]
    fn square_has_gradient_2x_and_hessian_2() {
        let mut tape = Tape::new();
        let x = tape.declare_input(3.0).unwrap();
        tape.record(
            OpKind::Binary(BinOp::Pow),
            Operand::Free(x..x + 1),
            Some(Operand::Const(crate::ops::ConstData::Scalar(2.0))),
        )
        .unwrap();
        let mut trace = Trace::new(&tape);
        trace.play(&tape);
        assert_eq!(trace.values()[tape.n_trace_size() - 1], 9.0);
        assert_eq!(trace.adjoints()[x], 6.0);
        assert_eq!(trace.hessian().read(x, x), 2.0);
    }

    #[test]
    fn product_has_off_diagonal_hessian_one() {
        let mut tape = Tape::new();
        let x = tape.declare_input(2.0).unwrap();
        let y = tape.declare_input(5.0).unwrap();
        tape.record(
            OpKind::Binary(BinOp::Mul),
            Operand::Free(x..x + 1),
            Some(Operand::Free(y..y + 1)),
        )
        .unwrap();
        let mut trace = Trace::new(&tape);
        trace.play(&tape);
        assert_eq!(trace.values()[tape.n_trace_size() - 1], 10.0);
        assert_eq!(trace.adjoints()[x], 5.0);
        assert_eq!(trace.adjoints()[y], 2.0);
        assert_eq!(trace.hessian().read(x, y), 1.0);
        assert_eq!(trace.hessian().read(x, x), 0.0);
    }

    #[test]
    fn sum_of_squares_is_diagonal_hessian() {
        let mut tape = Tape::new();
        let r = tape.declare_inputs(&[1.0, 2.0, 3.0]).unwrap();
        tape.record(OpKind::SumSq, Operand::Free(r), None).unwrap();
        let mut trace = Trace::new(&tape);
        trace.play(&tape);
        assert_eq!(trace.values()[tape.n_trace_size() - 1], 14.0);
        for (idx, &expected_grad) in [2.0, 4.0, 6.0].iter().enumerate() {
            assert_eq!(trace.adjoints()[idx], expected_grad);
        }
        assert_eq!(trace.hessian().read(0, 0), 2.0);
        assert_eq!(trace.hessian().read(0, 1), 0.0);
    }

    #[test]
    fn chained_composition_matches_elementary_calculus() {
        // f(x) = (x^2)^2 = x^4; f'(x) = 4x^3; f''(x) = 12x^2.
        let mut tape = Tape::new();
        let x = tape.declare_input(2.0).unwrap();
        let sq1 = tape
            .record(
                OpKind::Binary(BinOp::Pow),
                Operand::Free(x..x + 1),
                Some(Operand::Const(crate::ops::ConstData::Scalar(2.0))),
            )
            .unwrap();
        tape.record(
            OpKind::Binary(BinOp::Pow),
            Operand::Free(sq1),
            Some(Operand::Const(crate::ops::ConstData::Scalar(2.0))),
        )
        .unwrap();
        let mut trace = Trace::new(&tape);
        trace.play(&tape);
        assert_eq!(trace.values()[tape.n_trace_size() - 1], 16.0);
        assert!((trace.adjoints()[x] - 32.0).abs() < 1e-9); // 4*2^3=32
        assert!((trace.hessian().read(x, x) - 48.0).abs() < 1e-9); // 12*2^2=48
    }
}
