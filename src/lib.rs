//! Second-order reverse-mode automatic differentiation (edge-pushing) and a
//! regularized Newton solver for maximum-likelihood estimation.
//!
//! Build a model with [`spy`]/[`spy_vector`] over a [`tape::Tape`], combine
//! them with ordinary arithmetic and the distribution-density helpers in
//! [`spy`] to get a scalar objective, then hand the tape to
//! [`solver::NewtonSolver`] to maximize it and to [`likelihood`] to get
//! confidence intervals around the optimum.

pub mod error;
pub mod likelihood;
pub mod linalg;
pub mod ops;
pub mod shape;
pub mod simd;
pub mod solver;
pub mod sparse;
pub mod specialfn;
pub mod spy;
pub mod tape;
pub mod tensor;
pub mod trace;

pub use error::{EngineError, Result};
pub use spy::{new_tape, read, spy, spy_vector, ReadValue, Spy, TapeHandle};
pub use tape::Tape;
pub use trace::Trace;
