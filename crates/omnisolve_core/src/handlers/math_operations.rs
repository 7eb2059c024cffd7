use crate::traits::Handler;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MathOperationsInput {
    pub operations: Vec<(Operator, f64)>,
    pub initial_value: f64,
}

/// Folds `(operator, operand)` pairs over a starting value, left to right.
pub struct MathOperations;

impl Handler for MathOperations {
    const LABEL: &'static str = "math_operations";
    const PARAMETERS: &'static [&'static str] = &["operations", "initial_value"];

    type Input = MathOperationsInput;
    type Output = f64;

    fn run(&self, input: MathOperationsInput) -> Result<f64> {
        let result = input
            .operations
            .iter()
            .fold(input.initial_value, |acc, &(op, operand)| match op {
                Operator::Add => acc + operand,
                Operator::Sub => acc - operand,
                Operator::Mul => acc * operand,
                Operator::Div if operand == 0.0 => {
                    debug!("skipping division by zero");
                    acc
                }
                Operator::Div => acc / operand,
            });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::{MathOperations, MathOperationsInput, Operator};
    use crate::traits::Handler;

    fn run(operations: Vec<(Operator, f64)>, initial_value: f64) -> f64 {
        MathOperations
            .run(MathOperationsInput {
                operations,
                initial_value,
            })
            .expect("arithmetic never fails")
    }

    #[test]
    fn applies_operations_in_order() {
        let ops = vec![
            (Operator::Add, 5.0),
            (Operator::Sub, 3.0),
            (Operator::Mul, 2.0),
            (Operator::Div, 4.0),
        ];
        assert_eq!(run(ops, 10.0), 6.0);
    }

    #[test]
    fn division_by_zero_leaves_value_unchanged() {
        let ops = vec![(Operator::Add, 2.0), (Operator::Div, 0.0), (Operator::Mul, 3.0)];
        assert_eq!(run(ops, 1.0), 9.0);
    }

    #[test]
    fn empty_pipeline_returns_initial_value() {
        assert_eq!(run(Vec::new(), -4.5), -4.5);
    }

    #[test]
    fn operator_symbols_deserialize_from_tuples() {
        let input: MathOperationsInput = serde_json::from_value(serde_json::json!({
            "operations": [["*", 3], ["/", 2]],
            "initial_value": 4
        }))
        .expect("symbols should decode");
        assert_eq!(input.operations[0], (Operator::Mul, 3.0));
        assert!(serde_json::from_value::<(Operator, f64)>(serde_json::json!(["%", 1])).is_err());
    }
}
