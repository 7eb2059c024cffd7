use anyhow::Result;
use num_traits::{Float, FromPrimitive};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A trait for types that can be used as scalars by the expression engine.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {
    /// Lifts an `f64` literal into the scalar type.
    fn lit(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::nan)
    }
}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Represents a system `dx/dt = f(t, x)`.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A trait for solvers that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt, advancing `t` and `state` in place.
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}

/// One example problem type.
///
/// `PARAMETERS` lists the parameter names in positional order. Positional
/// arguments bind to these names first, then keyword arguments fill in the
/// rest, and the merged object is deserialized into `Input`.
pub trait Handler {
    const LABEL: &'static str;
    const PARAMETERS: &'static [&'static str];

    type Input: DeserializeOwned;
    type Output: Serialize;

    fn run(&self, input: Self::Input) -> Result<Self::Output>;
}
