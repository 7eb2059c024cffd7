use super::linear_algebra::ComplexNumber;
use crate::traits::Handler;
use anyhow::{bail, Result};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_4};
use tracing::debug;

/// Largest register the dense simulator accepts.
pub const MAX_QUBITS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum Gate {
    H { target: usize },
    X { target: usize },
    Y { target: usize },
    Z { target: usize },
    S { target: usize },
    T { target: usize },
    Rx { target: usize, theta: f64 },
    Ry { target: usize, theta: f64 },
    Rz { target: usize, theta: f64 },
    Cx { control: usize, target: usize },
    Cz { control: usize, target: usize },
    Swap { a: usize, b: usize },
}

impl Gate {
    fn qubits(&self) -> Vec<usize> {
        match *self {
            Gate::H { target }
            | Gate::X { target }
            | Gate::Y { target }
            | Gate::Z { target }
            | Gate::S { target }
            | Gate::T { target }
            | Gate::Rx { target, .. }
            | Gate::Ry { target, .. }
            | Gate::Rz { target, .. } => vec![target],
            Gate::Cx { control, target } | Gate::Cz { control, target } => vec![control, target],
            Gate::Swap { a, b } => vec![a, b],
        }
    }
}

type Matrix2 = [[Complex64; 2]; 2];

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn single_qubit_matrix(gate: &Gate) -> Option<(usize, Matrix2)> {
    let zero = c(0.0, 0.0);
    let one = c(1.0, 0.0);
    Some(match *gate {
        Gate::H { target } => {
            let h = c(FRAC_1_SQRT_2, 0.0);
            (target, [[h, h], [h, -h]])
        }
        Gate::X { target } => (target, [[zero, one], [one, zero]]),
        Gate::Y { target } => (target, [[zero, c(0.0, -1.0)], [c(0.0, 1.0), zero]]),
        Gate::Z { target } => (target, [[one, zero], [zero, -one]]),
        Gate::S { target } => (target, [[one, zero], [zero, c(0.0, 1.0)]]),
        Gate::T { target } => (
            target,
            [[one, zero], [zero, Complex64::from_polar(1.0, FRAC_PI_4)]],
        ),
        Gate::Rx { target, theta } => {
            let (s, co) = (theta / 2.0).sin_cos();
            (target, [[c(co, 0.0), c(0.0, -s)], [c(0.0, -s), c(co, 0.0)]])
        }
        Gate::Ry { target, theta } => {
            let (s, co) = (theta / 2.0).sin_cos();
            (target, [[c(co, 0.0), c(-s, 0.0)], [c(s, 0.0), c(co, 0.0)]])
        }
        Gate::Rz { target, theta } => (
            target,
            [
                [Complex64::from_polar(1.0, -theta / 2.0), zero],
                [zero, Complex64::from_polar(1.0, theta / 2.0)],
            ],
        ),
        _ => return None,
    })
}

/// Dense state vector over `n` qubits. Basis index bit `q` is qubit `q`.
struct StateVector {
    amplitudes: Vec<Complex64>,
}

impl StateVector {
    fn zero_state(num_qubits: usize) -> Self {
        let mut amplitudes = vec![c(0.0, 0.0); 1 << num_qubits];
        amplitudes[0] = c(1.0, 0.0);
        Self { amplitudes }
    }

    fn apply_single(&mut self, target: usize, m: &Matrix2) {
        let mask = 1 << target;
        for i in 0..self.amplitudes.len() {
            if i & mask == 0 {
                let (a0, a1) = (self.amplitudes[i], self.amplitudes[i | mask]);
                self.amplitudes[i] = m[0][0] * a0 + m[0][1] * a1;
                self.amplitudes[i | mask] = m[1][0] * a0 + m[1][1] * a1;
            }
        }
    }

    fn apply(&mut self, gate: &Gate) {
        if let Some((target, m)) = single_qubit_matrix(gate) {
            self.apply_single(target, &m);
            return;
        }
        match *gate {
            Gate::Cx { control, target } => {
                let (cm, tm) = (1 << control, 1 << target);
                for i in 0..self.amplitudes.len() {
                    if i & cm != 0 && i & tm == 0 {
                        self.amplitudes.swap(i, i | tm);
                    }
                }
            }
            Gate::Cz { control, target } => {
                let both = (1 << control) | (1 << target);
                for (i, amp) in self.amplitudes.iter_mut().enumerate() {
                    if i & both == both {
                        *amp = -*amp;
                    }
                }
            }
            Gate::Swap { a, b } => {
                let (am, bm) = (1 << a, 1 << b);
                for i in 0..self.amplitudes.len() {
                    if i & am != 0 && i & bm == 0 {
                        self.amplitudes.swap(i, (i & !am) | bm);
                    }
                }
            }
            _ => {}
        }
    }

    fn probabilities(&self) -> Vec<f64> {
        self.amplitudes.iter().map(|a| a.norm_sqr()).collect()
    }
}

/// Bitstring with qubit 0 as the rightmost character.
fn bitstring(index: usize, num_qubits: usize) -> String {
    (0..num_qubits)
        .rev()
        .map(|q| if (index >> q) & 1 == 1 { '1' } else { '0' })
        .collect()
}

fn default_qubits() -> usize {
    2
}

fn bell_circuit() -> Vec<Gate> {
    vec![Gate::H { target: 0 }, Gate::Cx { control: 0, target: 1 }]
}

fn default_shots() -> usize {
    1024
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    pub seed: u64,
    /// Outcomes below this probability are omitted from `probabilities`.
    pub cutoff: f64,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            cutoff: 1e-12,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitInput {
    #[serde(default = "default_qubits")]
    pub num_qubits: usize,
    #[serde(default = "bell_circuit")]
    pub gates: Vec<Gate>,
    #[serde(default = "default_shots")]
    pub shots: usize,
    #[serde(default)]
    pub settings: SamplingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitOutput {
    pub amplitudes: Vec<ComplexNumber>,
    pub probabilities: BTreeMap<String, f64>,
    pub counts: BTreeMap<String, usize>,
}

/// State-vector simulation of a gate list followed by computational-basis
/// sampling.
pub struct QuantumComputing;

impl Handler for QuantumComputing {
    const LABEL: &'static str = "quantum_computing";
    const PARAMETERS: &'static [&'static str] = &["num_qubits", "gates", "shots", "settings"];

    type Input = CircuitInput;
    type Output = CircuitOutput;

    fn run(&self, input: CircuitInput) -> Result<CircuitOutput> {
        let n = input.num_qubits;
        if n == 0 || n > MAX_QUBITS {
            bail!("num_qubits must be between 1 and {}, got {}.", MAX_QUBITS, n);
        }
        for (idx, gate) in input.gates.iter().enumerate() {
            let qubits = gate.qubits();
            if let Some(&q) = qubits.iter().find(|&&q| q >= n) {
                bail!("gate {} ({:?}) addresses qubit {} of a {}-qubit register.", idx, gate, q, n);
            }
            if qubits.len() == 2 && qubits[0] == qubits[1] {
                bail!("gate {} ({:?}) uses the same qubit twice.", idx, gate);
            }
        }

        let mut state = StateVector::zero_state(n);
        for gate in &input.gates {
            state.apply(gate);
        }
        let probs = state.probabilities();

        let probabilities = probs
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p >= input.settings.cutoff)
            .map(|(i, &p)| (bitstring(i, n), p))
            .collect();

        let mut rng = StdRng::seed_from_u64(input.settings.seed);
        let mut counts = BTreeMap::new();
        for _ in 0..input.shots {
            let mut target = rng.gen::<f64>();
            let outcome = probs
                .iter()
                .position(|&p| {
                    target -= p;
                    target < 0.0
                })
                .unwrap_or_else(|| probs.iter().rposition(|&p| p > 0.0).unwrap_or(0));
            *counts.entry(bitstring(outcome, n)).or_insert(0) += 1;
        }
        debug!(num_qubits = n, gates = input.gates.len(), "circuit simulated");

        Ok(CircuitOutput {
            amplitudes: state
                .amplitudes
                .into_iter()
                .map(ComplexNumber::from)
                .collect(),
            probabilities,
            counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{bitstring, CircuitInput, Gate, QuantumComputing};
    use crate::traits::Handler;
    use serde_json::json;

    fn decode(value: serde_json::Value) -> CircuitInput {
        serde_json::from_value(value).expect("circuit should decode")
    }

    #[test]
    fn default_circuit_is_a_bell_pair() {
        let out = QuantumComputing.run(decode(json!({}))).expect("bell circuit runs");
        assert_eq!(out.probabilities.len(), 2);
        assert!((out.probabilities["00"] - 0.5).abs() < 1e-12);
        assert!((out.probabilities["11"] - 0.5).abs() < 1e-12);
        assert_eq!(out.counts.values().sum::<usize>(), 1024);
        assert!(out.counts.keys().all(|k| k == "00" || k == "11"));
    }

    #[test]
    fn bitstrings_are_little_endian() {
        assert_eq!(bitstring(1, 3), "001");
        let out = QuantumComputing
            .run(decode(json!({
                "num_qubits": 2,
                "gates": [{"gate": "x", "target": 0}],
                "shots": 10
            })))
            .expect("circuit runs");
        assert_eq!(out.probabilities.keys().collect::<Vec<_>>(), vec!["01"]);
        assert_eq!(out.counts["01"], 10);
    }

    #[test]
    fn rotations_and_swap_move_amplitude() {
        let out = QuantumComputing
            .run(CircuitInput {
                num_qubits: 2,
                gates: vec![
                    Gate::Ry {
                        target: 0,
                        theta: std::f64::consts::PI,
                    },
                    Gate::Swap { a: 0, b: 1 },
                ],
                shots: 0,
                settings: Default::default(),
            })
            .expect("circuit runs");
        assert!((out.probabilities["10"] - 1.0).abs() < 1e-12);
        assert!(out.counts.is_empty());
    }

    #[test]
    fn hadamard_twice_is_identity_and_cz_flips_phase() {
        let out = QuantumComputing
            .run(decode(json!({
                "num_qubits": 2,
                "gates": [
                    {"gate": "x", "target": 0},
                    {"gate": "x", "target": 1},
                    {"gate": "cz", "control": 0, "target": 1},
                    {"gate": "h", "target": 1},
                    {"gate": "h", "target": 1}
                ],
                "shots": 1
            })))
            .expect("circuit runs");
        assert!((out.amplitudes[3].re + 1.0).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_qubits_are_rejected() {
        let err = QuantumComputing
            .run(decode(json!({
                "num_qubits": 1,
                "gates": [{"gate": "cx", "control": 0, "target": 1}]
            })))
            .unwrap_err();
        assert!(err.to_string().contains("addresses qubit 1"));
    }
}
