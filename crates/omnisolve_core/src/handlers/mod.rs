//! Built-in example handlers, one module per problem family.
//!
//! Two handlers delegate to another: `time_series` fits through
//! [`Regression`] and `deep_learning` trains through [`NeuralNetwork`].

pub mod classification;
pub mod clustering;
pub mod differential_equations;
pub mod equation_solving;
pub mod graph_neural_network;
pub mod linear_algebra;
pub mod math_operations;
pub mod neural_network;
pub mod optimization;
pub mod quantum_computing;
pub mod recommender_systems;
pub mod regression;
pub mod reinforcement_learning;
pub mod signal_processing;
pub mod time_series;

pub use classification::Classification;
pub use clustering::Clustering;
pub use differential_equations::DifferentialEquations;
pub use equation_solving::EquationSolving;
pub use graph_neural_network::GraphNeuralNetwork;
pub use linear_algebra::LinearAlgebra;
pub use math_operations::MathOperations;
pub use neural_network::{DeepLearning, NeuralNetwork};
pub use optimization::Optimization;
pub use quantum_computing::QuantumComputing;
pub use recommender_systems::RecommenderSystems;
pub use regression::Regression;
pub use reinforcement_learning::ReinforcementLearning;
pub use signal_processing::SignalProcessing;
pub use time_series::TimeSeries;

use crate::dispatcher::Dispatcher;
use crate::error::SolveError;

pub(crate) fn register_builtin(dispatcher: &mut Dispatcher) -> Result<(), SolveError> {
    dispatcher.register(MathOperations)?;
    dispatcher.register(LinearAlgebra)?;
    dispatcher.register(EquationSolving)?;
    dispatcher.register(Optimization)?;
    dispatcher.register(DifferentialEquations)?;
    dispatcher.register(Regression)?;
    dispatcher.register(TimeSeries)?;
    dispatcher.register(Classification)?;
    dispatcher.register(Clustering)?;
    dispatcher.register(NeuralNetwork)?;
    dispatcher.register(DeepLearning)?;
    dispatcher.register(ReinforcementLearning)?;
    dispatcher.register(QuantumComputing)?;
    dispatcher.register(GraphNeuralNetwork)?;
    dispatcher.register(SignalProcessing)?;
    dispatcher.register(RecommenderSystems)?;
    Ok(())
}
