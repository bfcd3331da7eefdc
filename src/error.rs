use thiserror::Error;

/// Failure kinds surfaced by the grid model and its solvers.
///
/// Input-validation errors are raised before any state is touched.
/// Convergence failures ([`Error::JacobianSingular`], [`Error::DcSingular`],
/// [`Error::MaxIterExceeded`]) are recorded on the solver and reported to the
/// caller through the empty-voltage divergence sentinel instead of aborting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A vector argument does not have one entry per bus (or per element).
    #[error("input vector has length {got}, expected {expected}")]
    InputSizeMismatch { expected: usize, got: usize },

    /// The bus hosting the slack generator is deactivated.
    #[error("the slack bus is disconnected")]
    SlackDisconnected,

    /// No slack generator is assigned, or the assigned one is out of range
    /// or inactive.
    #[error("invalid slack generator: {0}")]
    SlackInvalid(String),

    /// An active element points at a deactivated bus.
    #[error("{element} {id} is connected to deactivated bus {bus}")]
    DisconnectedBusReferenced {
        element: &'static str,
        id: usize,
        bus: usize,
    },

    /// The Newton-Raphson Jacobian could not be factorized. Usually means
    /// the electrical network is not a single connected component.
    #[error("singular jacobian matrix: {0}")]
    JacobianSingular(String),

    /// The reduced DC susceptance matrix could not be factorized.
    #[error("singular dc susceptance matrix: {0}")]
    DcSingular(String),

    /// Newton-Raphson exhausted its iteration budget.
    #[error("power flow did not converge within {0} iterations")]
    MaxIterExceeded(usize),

    /// An element or bus id is outside the collection it refers to.
    #[error("{element} id {id} is out of range")]
    InvalidId { element: &'static str, id: usize },

    /// Sparse matrix construction or factorization reported a failure.
    #[error("sparse matrix error: {0}")]
    Sparse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
