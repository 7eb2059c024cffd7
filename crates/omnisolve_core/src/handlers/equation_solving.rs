use crate::equation_engine::ExpressionSystem;
use crate::roots::{newton, NewtonSettings, RootResult};
use crate::traits::Handler;
use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EquationSolvingInput {
    /// Expressions that should all evaluate to zero.
    pub equations: Vec<String>,
    pub variables: Vec<String>,
    pub initial_guess: Vec<f64>,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    #[serde(default)]
    pub settings: NewtonSettings,
}

/// Newton root finding for a square system of expressions.
pub struct EquationSolving;

impl Handler for EquationSolving {
    const LABEL: &'static str = "equation_solving";
    const PARAMETERS: &'static [&'static str] = &[
        "equations",
        "variables",
        "initial_guess",
        "parameters",
        "settings",
    ];

    type Input = EquationSolvingInput;
    type Output = RootResult;

    fn run(&self, input: EquationSolvingInput) -> Result<RootResult> {
        if input.equations.len() != input.variables.len() {
            bail!(
                "System must be square: {} equations for {} variables.",
                input.equations.len(),
                input.variables.len()
            );
        }
        let parameters: Vec<(String, f64)> = input.parameters.into_iter().collect();
        let system = ExpressionSystem::compile(&input.equations, &input.variables, &parameters)?;
        newton(&system, &input.initial_guess, input.settings)
    }
}
