//! Central error type (§7).
//!
//! Every fatal condition the engine can raise is a variant here, the way
//! `lumen-compiler::CompileError` collects what would otherwise be a dozen
//! scattered `Display` impls into one `thiserror::Error` enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A free input was declared after the first operator had already been
    /// recorded on the tape (§4.D, §4.F).
    #[error("cannot declare a new free input: tape already has {recorded} recorded operator(s)")]
    DeclarationAfterRecording { recorded: usize },

    /// Operand shapes could not be reconciled for an arithmetic, reduction,
    /// or matrix operation (§4.A).
    #[error("shape mismatch: {0}")]
    ShapeMismatch(#[from] crate::shape::ShapeError),

    /// A trace index or spy subscript fell outside its declared range (§7).
    #[error("index {index} out of range [{begin}, {end})")]
    OutOfRange {
        index: usize,
        begin: usize,
        end: usize,
    },

    /// All Tikhonov regularization attempts failed to produce a factorizable
    /// system (§4.G step 4).
    #[error("factorization failed after {attempts} regularization attempts")]
    FactorizationFailed { attempts: usize },

    /// The line search committed to an objective strictly worse than the
    /// value at the start of the iteration (§4.G step 6).
    #[error("backtracking failure: objective {got} is worse than starting value {from} (tolerance {tolerance})")]
    BacktrackingFailure {
        from: f64,
        got: f64,
        tolerance: f64,
    },

    /// The Cholesky factorization of the negated Hessian failed at the
    /// optimum, so asymptotic standard errors cannot be computed (§4.H).
    #[error("bad Hessian at the optimum: Cholesky of -H failed")]
    BadHessian,

    /// Brent's objective evaluated to `+inf`, meaning a maximization
    /// objective is unbounded above along the search direction (§4.G.1).
    #[error("objective is unbounded above at step length {step}")]
    InfiniteObjective { step: f64 },

    /// Doubling the initial half-width failed to bracket the
    /// likelihood-ratio cutpoint for a profile interval (§4.H).
    #[error("profile search for parameter {param} failed to bracket the target log-likelihood after {attempts} doublings")]
    ProfileBracketFailed { param: usize, attempts: usize },
}

pub type Result<T> = std::result::Result<T, EngineError>;
