use crate::equation_engine::ExpressionSystem;
use crate::solvers::{Method, Stepper};
use crate::traits::{Handler, Steppable};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationSettings {
    pub method: Method,
    pub t0: f64,
    pub dt: f64,
    pub steps: usize,
    /// Record every n-th step; the final state is always recorded.
    pub record_every: usize,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            method: Method::Rk4,
            t0: 0.0,
            dt: 0.01,
            steps: 100,
            record_every: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DifferentialEquationsInput {
    /// Right-hand sides `dx_i/dt`, one per variable. May reference `t`.
    pub equations: Vec<String>,
    pub variables: Vec<String>,
    pub initial_state: Vec<f64>,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    #[serde(default)]
    pub settings: IntegrationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<Vec<f64>>,
}

/// Fixed-step integration of an expression-defined ODE.
pub struct DifferentialEquations;

impl Handler for DifferentialEquations {
    const LABEL: &'static str = "differential_equations";
    const PARAMETERS: &'static [&'static str] = &[
        "equations",
        "variables",
        "initial_state",
        "parameters",
        "settings",
    ];

    type Input = DifferentialEquationsInput;
    type Output = Trajectory;

    fn run(&self, input: DifferentialEquationsInput) -> Result<Trajectory> {
        let settings = input.settings;
        if input.equations.len() != input.variables.len() {
            bail!(
                "Expected one equation per variable: {} equations for {} variables.",
                input.equations.len(),
                input.variables.len()
            );
        }
        if input.initial_state.len() != input.variables.len() {
            bail!(
                "Initial state dimension mismatch. Expected {}, got {}.",
                input.variables.len(),
                input.initial_state.len()
            );
        }
        if settings.dt <= 0.0 {
            bail!("Step size dt must be positive.");
        }
        if settings.record_every == 0 {
            bail!("record_every must be at least 1.");
        }

        let parameters: Vec<(String, f64)> = input.parameters.into_iter().collect();
        let system = ExpressionSystem::compile(&input.equations, &input.variables, &parameters)?;
        let mut stepper = Stepper::new(settings.method, input.initial_state.len());

        let mut t = settings.t0;
        let mut state = input.initial_state;
        let mut trajectory = Trajectory {
            times: vec![t],
            states: vec![state.clone()],
        };

        for step in 1..=settings.steps {
            stepper.step(&system, &mut t, &mut state, settings.dt);
            if state.iter().any(|v| !v.is_finite()) {
                bail!("Integration diverged at t = {}.", t);
            }
            if step % settings.record_every == 0 || step == settings.steps {
                trajectory.times.push(t);
                trajectory.states.push(state.clone());
            }
        }

        Ok(trajectory)
    }
}
