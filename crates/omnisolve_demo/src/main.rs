use anyhow::{Context, Result};
use omnisolve_core::{Arguments, Dispatcher};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// One representative call per built-in problem type.
fn samples() -> Vec<(&'static str, Arguments)> {
    vec![
        (
            "math_operations",
            Arguments::new()
                .arg(json!([["+", 2.0], ["*", 3.0], ["/", 0.0], ["-", 1.0]]))
                .arg(1.0),
        ),
        (
            "linear_algebra",
            Arguments::new()
                .arg(json!([[4.0, 1.0], [2.0, 3.0]]))
                .kwarg("vector", json!([1.0, 2.0])),
        ),
        (
            "equation_solving",
            Arguments::new()
                .arg(json!(["x^2 + y^2 - r^2", "x - y"]))
                .arg(json!(["x", "y"]))
                .arg(json!([1.0, 0.5]))
                .kwarg("parameters", json!({ "r": 2.0 })),
        ),
        (
            "optimization",
            Arguments::new()
                .arg("(x - 3)^2 + 2 * (y + 1)^2")
                .arg(json!(["x", "y"]))
                .arg(json!([0.0, 0.0])),
        ),
        (
            "differential_equations",
            Arguments::new()
                .arg(json!(["v", "-k * x"]))
                .arg(json!(["x", "v"]))
                .arg(json!([1.0, 0.0]))
                .kwarg("parameters", json!({ "k": 4.0 }))
                .kwarg(
                    "settings",
                    json!({ "method": "tsit5", "dt": 0.05, "steps": 40, "record_every": 10 }),
                ),
        ),
        (
            "regression",
            Arguments::new()
                .arg(json!([[1.0], [2.0], [3.0], [4.0]]))
                .arg(json!([3.1, 4.9, 7.2, 8.8])),
        ),
        (
            "time_series",
            Arguments::new()
                .arg(json!([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]))
                .kwarg("horizon", 3),
        ),
        (
            "classification",
            Arguments::new()
                .arg(json!([[0.0, 0.1], [0.2, 0.0], [3.0, 3.1], [2.9, 3.2]]))
                .arg(json!([0, 0, 1, 1]))
                .kwarg("query", json!([[0.1, 0.1], [3.0, 3.0]])),
        ),
        (
            "clustering",
            Arguments::new()
                .arg(json!([[0.0, 0.0], [0.1, 0.2], [5.0, 5.0], [5.1, 4.9]]))
                .arg(2),
        ),
        (
            "neural_network",
            Arguments::new()
                .arg(json!([[0.0], [0.5], [1.0]]))
                .arg(json!([[1.0], [2.0], [3.0]])),
        ),
        (
            "deep_learning",
            Arguments::new()
                .arg(json!([[0, 0], [0, 1], [1, 0], [1, 1]]))
                .arg(json!([[0], [1], [1], [0]])),
        ),
        (
            "reinforcement_learning",
            Arguments::new()
                .kwarg("rows", 3)
                .kwarg("cols", 3)
                .kwarg("walls", json!([[1, 1]])),
        ),
        ("quantum_computing", Arguments::new().kwarg("shots", 256)),
        (
            "graph_neural_network",
            Arguments::new()
                .arg(json!([[0, 1], [1, 2], [2, 0], [2, 3]]))
                .arg(json!([[1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [0.0, 0.0]])),
        ),
        (
            "signal_processing",
            Arguments::new()
                .arg(json!([0.0, 1.0, 0.0, -1.0, 0.0, 1.0, 0.0, -1.0]))
                .arg(8.0),
        ),
        (
            "recommender_systems",
            Arguments::new()
                .arg(json!([[5.0, 3.0, 0.0, 1.0], [4.0, 0.0, 0.0, 1.0]]))
                .arg(0)
                .kwarg("top_k", 2),
        ),
    ]
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let dispatcher = Dispatcher::new();
    info!(handlers = dispatcher.labels().count(), "dispatcher ready");

    for (label, args) in samples() {
        let result = dispatcher
            .solve(label, args)
            .with_context(|| format!("{} sample failed", label))?;
        println!("== {}\n{}", label, serde_json::to_string_pretty(&result)?);
    }

    if let Err(err) = dispatcher.solve("weather_forecasting", Arguments::new()) {
        println!("== weather_forecasting\n{}", err);
    }
    Ok(())
}
