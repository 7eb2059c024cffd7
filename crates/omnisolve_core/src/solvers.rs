use crate::traits::{DynamicalSystem, Scalar, Steppable};
use serde::{Deserialize, Serialize};

/// Fixed-step integrator choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Rk4,
    Tsit5,
}

/// Stepper selected at runtime from a [`Method`].
pub enum Stepper<T: Scalar> {
    Rk4(RK4<T>),
    Tsit5(Tsit5<T>),
}

impl<T: Scalar> Stepper<T> {
    pub fn new(method: Method, dim: usize) -> Self {
        match method {
            Method::Rk4 => Stepper::Rk4(RK4::new(dim)),
            Method::Tsit5 => Stepper::Tsit5(Tsit5::new(dim)),
        }
    }
}

impl<T: Scalar> Steppable<T> for Stepper<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        match self {
            Stepper::Rk4(s) => s.step(system, t, state, dt),
            Stepper::Tsit5(s) => s.step(system, t, state, dt),
        }
    }
}

/// Classic Runge-Kutta 4th order.
pub struct RK4<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let half = T::lit(0.5);
        let sixth = T::lit(1.0 / 6.0);
        let two = T::lit(2.0);
        let t0 = *t;

        system.apply(t0, state, &mut self.k1);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k2);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k3);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4);

        for i in 0..state.len() {
            state[i] = state[i]
                + dt * sixth * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

/// Tsitouras 5(4), used here at fixed step with the 5th order weights.
pub struct Tsit5<T: Scalar> {
    k: [Vec<T>; 6],
    tmp: Vec<T>,
}

const TSIT5_C: [f64; 6] = [0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0];

const TSIT5_A: [&[f64]; 6] = [
    &[],
    &[0.161],
    &[-0.008480655492356989, 0.335480655492357],
    &[2.897153057105493, -6.359448489975075, 4.3622954328695815],
    &[
        5.325864828439257,
        -11.748883564062828,
        7.4955393428898365,
        -0.09249506636175525,
    ],
    &[
        5.86145544294642,
        -12.92096931784711,
        8.159367898576159,
        -0.071584973281401,
        -0.028269050394068383,
    ],
];

const TSIT5_B: [f64; 6] = [
    0.09646076681806523,
    0.01,
    0.4798896504144996,
    1.379008574103742,
    -3.290069515436081,
    2.324710524099774,
];

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k: std::array::from_fn(|_| vec![z; dim]),
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Tsit5<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;

        for stage in 0..6 {
            for i in 0..state.len() {
                let mut acc = T::zero();
                for (j, &a) in TSIT5_A[stage].iter().enumerate() {
                    acc = acc + T::lit(a) * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            system.apply(t0 + T::lit(TSIT5_C[stage]) * dt, &self.tmp, &mut self.k[stage]);
        }

        for i in 0..state.len() {
            let mut acc = T::zero();
            for (j, &b) in TSIT5_B.iter().enumerate() {
                acc = acc + T::lit(b) * self.k[j][i];
            }
            state[i] = state[i] + dt * acc;
        }

        *t = t0 + dt;
    }
}
