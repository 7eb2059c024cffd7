use crate::autodiff::value_and_gradient;
use crate::equation_engine::ExpressionSystem;
use crate::traits::Handler;
use crate::util::l2_norm;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DescentSettings {
    pub max_iterations: usize,
    /// Initial trial step of each backtracking line search.
    pub step_size: f64,
    /// Stop once the gradient norm falls below this.
    pub tolerance: f64,
}

impl Default for DescentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            step_size: 1.0,
            tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizationInput {
    pub objective: String,
    pub variables: Vec<String>,
    pub initial_guess: Vec<f64>,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    #[serde(default)]
    pub settings: DescentSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutput {
    pub minimizer: Vec<f64>,
    pub minimum: f64,
    pub gradient_norm: f64,
    pub iterations: usize,
    pub converged: bool,
}

// Armijo sufficient-decrease constant and backtracking factor.
const ARMIJO_C: f64 = 1e-4;
const SHRINK: f64 = 0.5;
const MIN_STEP: f64 = 1e-14;

/// Unconstrained minimization of an expression by gradient descent with
/// backtracking line search. Gradients come from dual numbers.
pub struct Optimization;

impl Handler for Optimization {
    const LABEL: &'static str = "optimization";
    const PARAMETERS: &'static [&'static str] = &[
        "objective",
        "variables",
        "initial_guess",
        "parameters",
        "settings",
    ];

    type Input = OptimizationInput;
    type Output = OptimizationOutput;

    fn run(&self, input: OptimizationInput) -> Result<OptimizationOutput> {
        let settings = input.settings;
        if input.initial_guess.len() != input.variables.len() {
            bail!(
                "Initial guess dimension mismatch. Expected {}, got {}.",
                input.variables.len(),
                input.initial_guess.len()
            );
        }
        if settings.step_size <= 0.0 {
            bail!("step_size must be positive.");
        }

        let parameters: Vec<(String, f64)> = input.parameters.into_iter().collect();
        let system = ExpressionSystem::compile(
            std::slice::from_ref(&input.objective),
            &input.variables,
            &parameters,
        )?
        .lift();

        let mut x = input.initial_guess;
        let (mut value, mut gradient) = value_and_gradient(&system, &x);
        if !value.is_finite() {
            bail!("Objective is not finite at the initial guess.");
        }
        let mut iterations = 0;
        let mut converged = false;

        while iterations < settings.max_iterations {
            let grad_sq: f64 = gradient.iter().map(|g| g * g).sum();
            if grad_sq.sqrt() <= settings.tolerance {
                converged = true;
                break;
            }

            let mut step = settings.step_size;
            let mut trial = x.clone();
            let mut trial_value;
            loop {
                for (t, (xi, gi)) in trial.iter_mut().zip(x.iter().zip(&gradient)) {
                    *t = xi - step * gi;
                }
                (trial_value, _) = value_and_gradient(&system, &trial);
                if trial_value.is_finite() && trial_value <= value - ARMIJO_C * step * grad_sq {
                    break;
                }
                step *= SHRINK;
                if step < MIN_STEP {
                    break;
                }
            }
            if step < MIN_STEP {
                debug!(iterations, "line search stalled");
                break;
            }

            x = trial;
            (value, gradient) = value_and_gradient(&system, &x);
            iterations += 1;
        }

        let gradient_norm = l2_norm(&gradient);
        if !converged && gradient_norm <= settings.tolerance {
            converged = true;
        }
        debug!(iterations, value, gradient_norm, converged, "descent finished");

        Ok(OptimizationOutput {
            minimizer: x,
            minimum: value,
            gradient_norm,
            iterations,
            converged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{DescentSettings, Optimization, OptimizationInput};
    use crate::traits::Handler;
    use std::collections::BTreeMap;

    fn input(objective: &str, guess: Vec<f64>) -> OptimizationInput {
        OptimizationInput {
            objective: objective.to_string(),
            variables: vec!["x".to_string(), "y".to_string()],
            initial_guess: guess,
            parameters: BTreeMap::new(),
            settings: DescentSettings::default(),
        }
    }

    #[test]
    fn minimizes_shifted_quadratic() {
        let out = Optimization
            .run(input("(x - 3) ^ 2 + 2 * (y + 1) ^ 2", vec![0.0, 0.0]))
            .expect("quadratic should minimize");
        assert!(out.converged);
        assert!((out.minimizer[0] - 3.0).abs() < 1e-6);
        assert!((out.minimizer[1] + 1.0).abs() < 1e-6);
        assert!(out.minimum.abs() < 1e-10);
    }

    #[test]
    fn rosenbrock_makes_progress_toward_minimum() {
        let mut problem = input("(1 - x) ^ 2 + 100 * (y - x ^ 2) ^ 2", vec![-1.2, 1.0]);
        problem.settings.max_iterations = 20000;
        let out = Optimization.run(problem).expect("rosenbrock is smooth");
        assert!(out.minimum < 1e-4, "stopped at {:?}", out.minimizer);
    }

    #[test]
    fn mismatched_guess_is_rejected() {
        let err = Optimization
            .run(input("x + y", vec![1.0]))
            .unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }
}
