use crate::{autodiff, equation_engine::ExpressionSystem, traits::DynamicalSystem};
use crate::util::l2_norm;
use anyhow::{anyhow, bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 50,
            damping: 1.0,
            tolerance: 1e-10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResult {
    pub solution: Vec<f64>,
    pub residual_norm: f64,
    pub iterations: usize,
    /// Row-major Jacobian at the solution.
    pub jacobian: Vec<f64>,
}

/// Finds `x` with `f(x) = 0` by damped Newton iteration.
///
/// The system must be square: one expression per unknown.
pub fn newton(
    system: &ExpressionSystem<f64>,
    initial_guess: &[f64],
    settings: NewtonSettings,
) -> Result<RootResult> {
    let dim = system.dimension();
    if dim == 0 {
        bail!("System has zero dimension.");
    }
    if initial_guess.len() != dim {
        bail!(
            "Initial guess dimension mismatch. Expected {}, got {}.",
            dim,
            initial_guess.len()
        );
    }
    if settings.max_steps == 0 {
        bail!("max_steps must be greater than zero.");
    }
    if settings.damping <= 0.0 {
        bail!("damping must be positive.");
    }
    if settings.tolerance <= 0.0 {
        bail!("tolerance must be positive.");
    }

    let dual_system = system.lift();
    let mut state = initial_guess.to_vec();
    let mut residual = vec![0.0; dim];
    system.apply(0.0, &state, &mut residual);
    let mut residual_norm = l2_norm(&residual);
    let mut iterations = 0usize;

    while residual_norm > settings.tolerance {
        if !residual_norm.is_finite() {
            bail!("Newton iteration diverged after {} steps.", iterations);
        }
        if iterations >= settings.max_steps {
            bail!(
                "Newton solver failed to converge in {} steps (‖f(x)‖ = {}).",
                settings.max_steps,
                residual_norm
            );
        }

        let jacobian = autodiff::jacobian(&dual_system, 0.0, &state);
        let delta = solve_linear_system(dim, &jacobian, &residual)
            .context("Failed to solve linear system during Newton iteration.")?;

        for (x, dx) in state.iter_mut().zip(&delta) {
            *x -= settings.damping * dx;
        }

        iterations += 1;
        system.apply(0.0, &state, &mut residual);
        residual_norm = l2_norm(&residual);
    }

    debug!(iterations, residual_norm, "newton converged");

    Ok(RootResult {
        jacobian: autodiff::jacobian(&dual_system, 0.0, &state),
        solution: state,
        residual_norm,
        iterations,
    })
}

pub(crate) fn solve_linear_system(dim: usize, jacobian: &[f64], rhs: &[f64]) -> Result<Vec<f64>> {
    let matrix = DMatrix::from_row_slice(dim, dim, jacobian);
    let rhs = DVector::from_column_slice(rhs);
    matrix
        .lu()
        .solve(&rhs)
        .map(|v| v.iter().cloned().collect())
        .ok_or_else(|| anyhow!("Jacobian is singular."))
}
