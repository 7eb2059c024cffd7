use crate::error::SolveError;
use crate::handlers;
use crate::traits::Handler;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info_span, warn};

/// Positional and keyword arguments forwarded to a handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arguments {
    #[serde(default)]
    pub positional: Vec<Value>,
    #[serde(default)]
    pub keyword: Map<String, Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.to_string(), value.into());
        self
    }

    /// Merges positional and keyword arguments into one object keyed by
    /// `parameters`.
    fn bind(&self, problem_type: &str, parameters: &[&str]) -> Result<Value, SolveError> {
        if self.positional.len() > parameters.len() {
            return Err(SolveError::invalid(
                problem_type,
                format!(
                    "takes at most {} positional arguments but {} were given",
                    parameters.len(),
                    self.positional.len()
                ),
            ));
        }

        let mut bound = Map::new();
        for (name, value) in parameters.iter().zip(&self.positional) {
            bound.insert(name.to_string(), value.clone());
        }
        for (name, value) in &self.keyword {
            if bound.contains_key(name) {
                return Err(SolveError::invalid(
                    problem_type,
                    format!("got multiple values for argument '{}'", name),
                ));
            }
            bound.insert(name.clone(), value.clone());
        }
        Ok(Value::Object(bound))
    }
}

/// Object-safe view of a [`Handler`] that speaks JSON values.
trait ErasedHandler {
    fn parameters(&self) -> &'static [&'static str];
    fn call(&self, args: &Arguments) -> Result<Value, SolveError>;
}

impl<H: Handler> ErasedHandler for H {
    fn parameters(&self) -> &'static [&'static str] {
        H::PARAMETERS
    }

    fn call(&self, args: &Arguments) -> Result<Value, SolveError> {
        let bound = args.bind(H::LABEL, H::PARAMETERS)?;
        debug!(arguments = %bound, "bound arguments");
        let input: H::Input = serde_json::from_value(bound)
            .map_err(|err| SolveError::invalid(H::LABEL, err.to_string()))?;
        let output = self.run(input)?;
        serde_json::to_value(output).map_err(|source| SolveError::Encode {
            problem_type: H::LABEL.to_string(),
            source,
        })
    }
}

/// Maps problem-type labels to handlers.
pub struct Dispatcher {
    table: BTreeMap<&'static str, Box<dyn ErasedHandler>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// A dispatcher with every built-in handler registered.
    pub fn new() -> Self {
        let mut dispatcher = Self::empty();
        let registered = handlers::register_builtin(&mut dispatcher);
        debug_assert!(registered.is_ok(), "built-in labels collide: {registered:?}");
        dispatcher
    }

    pub fn empty() -> Self {
        Self {
            table: BTreeMap::new(),
        }
    }

    /// Adds `handler` under its label. Labels are unique.
    pub fn register<H: Handler + 'static>(&mut self, handler: H) -> Result<(), SolveError> {
        if self.table.contains_key(H::LABEL) {
            return Err(SolveError::DuplicateProblemType(H::LABEL.to_string()));
        }
        self.table.insert(H::LABEL, Box::new(handler));
        Ok(())
    }

    pub fn contains(&self, problem_type: &str) -> bool {
        self.table.contains_key(problem_type)
    }

    /// Registered labels in sorted order.
    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.table.keys().copied()
    }

    /// Declared parameter names of `problem_type`, in positional order.
    pub fn parameters(&self, problem_type: &str) -> Option<&'static [&'static str]> {
        self.table.get(problem_type).map(|h| h.parameters())
    }

    /// Looks up `problem_type` and forwards `args` to its handler.
    pub fn solve(&self, problem_type: &str, args: Arguments) -> Result<Value, SolveError> {
        let span = info_span!("solve", problem_type);
        let _enter = span.enter();

        let Some(handler) = self.table.get(problem_type) else {
            warn!("unknown problem type");
            return Err(SolveError::UnknownProblemType(problem_type.to_string()));
        };
        let result = handler.call(&args);
        if let Err(err) = &result {
            debug!(error = %err, "handler failed");
        }
        result
    }

    /// [`Dispatcher::solve`] followed by decoding the result into `T`.
    pub fn solve_as<T: DeserializeOwned>(
        &self,
        problem_type: &str,
        args: Arguments,
    ) -> Result<T, SolveError> {
        let value = self.solve(problem_type, args)?;
        serde_json::from_value(value).map_err(|source| SolveError::Encode {
            problem_type: problem_type.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Arguments, Dispatcher};
    use crate::error::SolveError;
    use crate::handlers;
    use crate::traits::Handler;
    use serde::Deserialize;
    use serde_json::json;

    struct Echo;

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct EchoInput {
        first: i64,
        #[serde(default)]
        second: i64,
    }

    impl Handler for Echo {
        const LABEL: &'static str = "echo";
        const PARAMETERS: &'static [&'static str] = &["first", "second"];
        type Input = EchoInput;
        type Output = (i64, i64);

        fn run(&self, input: EchoInput) -> anyhow::Result<(i64, i64)> {
            if input.first < 0 {
                anyhow::bail!("first must be non-negative");
            }
            Ok((input.first, input.second))
        }
    }

    fn echo_dispatcher() -> Dispatcher {
        let mut dispatcher = Dispatcher::empty();
        dispatcher.register(Echo).expect("first registration succeeds");
        dispatcher
    }

    #[test]
    fn builtin_table_has_sixteen_unique_labels() {
        let dispatcher = Dispatcher::new();
        let labels: Vec<&str> = dispatcher.labels().collect();
        assert_eq!(labels.len(), 16);
        for label in [
            "math_operations",
            "linear_algebra",
            "equation_solving",
            "optimization",
            "differential_equations",
            "regression",
            "time_series",
            "classification",
            "clustering",
            "neural_network",
            "deep_learning",
            "reinforcement_learning",
            "quantum_computing",
            "graph_neural_network",
            "signal_processing",
            "recommender_systems",
        ] {
            assert!(dispatcher.contains(label), "missing {label}");
        }
    }

    #[test]
    fn builtin_registration_refuses_to_run_twice() {
        let mut dispatcher = Dispatcher::empty();
        handlers::register_builtin(&mut dispatcher).expect("labels are unique");
        let err = handlers::register_builtin(&mut dispatcher).unwrap_err();
        assert!(matches!(err, SolveError::DuplicateProblemType(_)));
        assert_eq!(dispatcher.labels().count(), 16);
    }

    #[test]
    fn deeply_nested_expression_fails_without_crashing() {
        let nested = format!("{}x{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = Dispatcher::new()
            .solve(
                "equation_solving",
                Arguments::new()
                    .arg(json!([nested]))
                    .arg(json!(["x"]))
                    .arg(json!([1.0])),
            )
            .unwrap_err();
        assert!(matches!(err, SolveError::Handler(_)));
        assert!(format!("{err:#}").contains("nests deeper"));
    }

    #[test]
    fn unknown_problem_type_names_the_label() {
        let err = Dispatcher::new()
            .solve("nonexistent", Arguments::new())
            .unwrap_err();
        assert!(matches!(err, SolveError::UnknownProblemType(ref l) if l == "nonexistent"));
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn positional_and_keyword_arguments_bind_by_name() {
        let dispatcher = echo_dispatcher();
        let out: (i64, i64) = dispatcher
            .solve_as("echo", Arguments::new().arg(1).kwarg("second", 2))
            .expect("echo should succeed");
        assert_eq!(out, (1, 2));

        let out: (i64, i64) = dispatcher
            .solve_as("echo", Arguments::new().kwarg("first", 7))
            .expect("defaults fill missing arguments");
        assert_eq!(out, (7, 0));
    }

    #[test]
    fn binding_errors_are_invalid_arguments() {
        let dispatcher = echo_dispatcher();
        let cases = [
            (Arguments::new().arg(1).arg(2).arg(3), "at most 2 positional"),
            (
                Arguments::new().arg(1).kwarg("first", 1),
                "multiple values for argument 'first'",
            ),
            (Arguments::new().arg(1).kwarg("third", 1), "unknown field"),
            (Arguments::new().arg("one"), "invalid type"),
        ];
        for (args, needle) in cases {
            let err = dispatcher.solve("echo", args).unwrap_err();
            assert!(matches!(err, SolveError::InvalidArguments { .. }));
            assert!(err.to_string().contains(needle), "{err}");
        }
    }

    #[test]
    fn handler_errors_pass_through_unchanged() {
        let err = echo_dispatcher()
            .solve("echo", Arguments::new().arg(-1))
            .unwrap_err();
        assert!(matches!(err, SolveError::Handler(_)));
        assert_eq!(err.to_string(), "first must be non-negative");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut dispatcher = echo_dispatcher();
        let err = dispatcher.register(Echo).unwrap_err();
        assert!(matches!(err, SolveError::DuplicateProblemType(ref l) if l == "echo"));
    }

    #[test]
    fn labels_route_to_their_own_handler() {
        let dispatcher = Dispatcher::new();
        let value = dispatcher
            .solve(
                "math_operations",
                Arguments::new()
                    .arg(json!([["+", 5], ["-", 3], ["*", 2], ["/", 4]]))
                    .arg(10),
            )
            .expect("math_operations should succeed");
        assert_eq!(value, json!(6.0));

        let value = dispatcher
            .solve(
                "recommender_systems",
                Arguments::new()
                    .arg(json!([[5, 3, 0, 1, 4, 2], [1, 1, 1, 1, 1, 1]]))
                    .kwarg("user_index", 0)
                    .kwarg("top_k", 5),
            )
            .expect("recommender_systems should succeed");
        assert_eq!(value, json!([0, 4, 1, 5, 3]));

        assert_eq!(
            dispatcher.parameters("signal_processing"),
            Some(&["signal", "sample_rate", "settings"][..])
        );
    }
}
