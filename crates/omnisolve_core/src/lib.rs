/// The `omnisolve_core` crate routes named problem types to numerical handlers.
/// A [`Dispatcher`] owns a registry of [`Handler`]s keyed by label; callers pass
/// positional and keyword JSON arguments and get a JSON result back.
///
/// Key components:
/// - **Dispatcher**: label lookup, argument binding, and error mapping.
/// - **Handlers**: one module per problem family, from arithmetic folds to FFTs.
/// - **Equation Engine**: a bytecode VM for user-supplied expressions, generic over `Scalar`.
/// - **Autodiff**: Dual numbers for exact Jacobians and gradients of those expressions.
/// - **Solvers / Roots**: RK4 and Tsit5 steppers and a damped Newton solver.
pub mod autodiff;
pub mod dispatcher;
pub mod equation_engine;
pub mod error;
pub mod handlers;
pub mod roots;
pub mod solvers;
pub mod traits;
pub mod util;

pub use dispatcher::{Arguments, Dispatcher};
pub use error::SolveError;
pub use traits::Handler;
