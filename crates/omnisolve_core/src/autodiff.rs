use crate::equation_engine::ExpressionSystem;
use crate::traits::DynamicalSystem;
use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::f64::consts::LN_2;
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

/// Dual number for forward-mode differentiation.
/// val: real part
/// eps: derivative carried along one seed direction
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }

    pub fn constant(val: f64) -> Self {
        Self::new(val, 0.0)
    }

    /// Applies the chain rule for a unary function with value `f` and slope `df`.
    fn chain(self, f: f64, df: f64) -> Self {
        Self::new(f, df * self.eps)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::constant(0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        Self::new(
            self.val / rhs.val,
            (self.eps * rhs.val - self.val * rhs.eps) / (rhs.val * rhs.val),
        )
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl Rem for Dual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // d/dx (x mod c) = 1 almost everywhere.
        Self::new(self.val % rhs.val, self.eps)
    }
}

impl AddAssign for Dual {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
impl SubAssign for Dual {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}
impl MulAssign for Dual {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}
impl DivAssign for Dual {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}
impl RemAssign for Dual {
    fn rem_assign(&mut self, rhs: Self) {
        *self = *self % rhs;
    }
}

impl Num for Dual {
    type FromStrRadixErr = <f64 as Num>::FromStrRadixErr;
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(str, radix).map(Self::constant)
    }
}

impl ToPrimitive for Dual {
    fn to_i64(&self) -> Option<i64> {
        self.val.to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.val.to_u64()
    }
    fn to_f64(&self) -> Option<f64> {
        Some(self.val)
    }
}

impl FromPrimitive for Dual {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_u64(n: u64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_f64(n: f64) -> Option<Self> {
        Some(Self::constant(n))
    }
}

impl NumCast for Dual {
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        n.to_f64().map(Self::constant)
    }
}

impl Float for Dual {
    fn nan() -> Self {
        Self::constant(f64::NAN)
    }
    fn infinity() -> Self {
        Self::constant(f64::INFINITY)
    }
    fn neg_infinity() -> Self {
        Self::constant(f64::NEG_INFINITY)
    }
    fn neg_zero() -> Self {
        Self::new(-0.0, -0.0)
    }
    fn min_value() -> Self {
        Self::constant(f64::MIN)
    }
    fn min_positive_value() -> Self {
        Self::constant(f64::MIN_POSITIVE)
    }
    fn max_value() -> Self {
        Self::constant(f64::MAX)
    }
    fn is_nan(self) -> bool {
        self.val.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.val.is_infinite()
    }
    fn is_finite(self) -> bool {
        self.val.is_finite()
    }
    fn is_normal(self) -> bool {
        self.val.is_normal()
    }
    fn classify(self) -> std::num::FpCategory {
        self.val.classify()
    }

    // Piecewise-constant functions have zero derivative.
    fn floor(self) -> Self {
        Self::constant(self.val.floor())
    }
    fn ceil(self) -> Self {
        Self::constant(self.val.ceil())
    }
    fn round(self) -> Self {
        Self::constant(self.val.round())
    }
    fn trunc(self) -> Self {
        Self::constant(self.val.trunc())
    }
    fn fract(self) -> Self {
        Self::new(self.val.fract(), self.eps)
    }
    fn abs(self) -> Self {
        self.chain(self.val.abs(), if self.val >= 0.0 { 1.0 } else { -1.0 })
    }
    fn signum(self) -> Self {
        Self::constant(self.val.signum())
    }
    fn is_sign_positive(self) -> bool {
        self.val.is_sign_positive()
    }
    fn is_sign_negative(self) -> bool {
        self.val.is_sign_negative()
    }
    fn mul_add(self, a: Self, b: Self) -> Self {
        self * a + b
    }
    fn recip(self) -> Self {
        Self::one() / self
    }

    fn powi(self, n: i32) -> Self {
        self.chain(self.val.powi(n), n as f64 * self.val.powi(n - 1))
    }

    fn powf(self, n: Self) -> Self {
        let value = self.val.powf(n.val);
        // Constant exponents keep the power rule valid for non-positive bases.
        if n.eps == 0.0 {
            return self.chain(value, n.val * self.val.powf(n.val - 1.0));
        }
        Self::new(
            value,
            value * (n.eps * self.val.ln() + n.val * self.eps / self.val),
        )
    }

    fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        self.chain(s, 0.5 / s)
    }
    fn exp(self) -> Self {
        let e = self.val.exp();
        self.chain(e, e)
    }
    fn exp2(self) -> Self {
        let e = self.val.exp2();
        self.chain(e, e * LN_2)
    }
    fn ln(self) -> Self {
        self.chain(self.val.ln(), 1.0 / self.val)
    }
    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    fn log2(self) -> Self {
        self.chain(self.val.log2(), 1.0 / (self.val * LN_2))
    }
    fn log10(self) -> Self {
        self.chain(self.val.log10(), 1.0 / (self.val * std::f64::consts::LN_10))
    }

    fn max(self, other: Self) -> Self {
        if self.val >= other.val {
            self
        } else {
            other
        }
    }
    fn min(self, other: Self) -> Self {
        if self.val <= other.val {
            self
        } else {
            other
        }
    }

    #[allow(deprecated)]
    fn abs_sub(self, other: Self) -> Self {
        if self.val <= other.val {
            Self::zero()
        } else {
            self - other
        }
    }

    fn cbrt(self) -> Self {
        let c = self.val.cbrt();
        self.chain(c, 1.0 / (3.0 * c * c))
    }
    fn hypot(self, other: Self) -> Self {
        (self * self + other * other).sqrt()
    }

    fn sin(self) -> Self {
        self.chain(self.val.sin(), self.val.cos())
    }
    fn cos(self) -> Self {
        self.chain(self.val.cos(), -self.val.sin())
    }
    fn tan(self) -> Self {
        let t = self.val.tan();
        self.chain(t, 1.0 + t * t)
    }
    fn asin(self) -> Self {
        self.chain(self.val.asin(), 1.0 / (1.0 - self.val * self.val).sqrt())
    }
    fn acos(self) -> Self {
        self.chain(self.val.acos(), -1.0 / (1.0 - self.val * self.val).sqrt())
    }
    fn atan(self) -> Self {
        self.chain(self.val.atan(), 1.0 / (1.0 + self.val * self.val))
    }
    fn atan2(self, other: Self) -> Self {
        let denom = self.val * self.val + other.val * other.val;
        Self::new(
            self.val.atan2(other.val),
            (other.val * self.eps - self.val * other.eps) / denom,
        )
    }
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }

    fn exp_m1(self) -> Self {
        self.chain(self.val.exp_m1(), self.val.exp())
    }
    fn ln_1p(self) -> Self {
        self.chain(self.val.ln_1p(), 1.0 / (1.0 + self.val))
    }
    fn sinh(self) -> Self {
        self.chain(self.val.sinh(), self.val.cosh())
    }
    fn cosh(self) -> Self {
        self.chain(self.val.cosh(), self.val.sinh())
    }
    fn tanh(self) -> Self {
        let t = self.val.tanh();
        self.chain(t, 1.0 - t * t)
    }
    fn asinh(self) -> Self {
        self.chain(self.val.asinh(), 1.0 / (self.val * self.val + 1.0).sqrt())
    }
    fn acosh(self) -> Self {
        self.chain(self.val.acosh(), 1.0 / (self.val * self.val - 1.0).sqrt())
    }
    fn atanh(self) -> Self {
        self.chain(self.val.atanh(), 1.0 / (1.0 - self.val * self.val))
    }

    fn integer_decode(self) -> (u64, i16, i8) {
        self.val.integer_decode()
    }
}

// --- Derivative helpers ---

/// Row-major Jacobian (`equations x state.len()`) of a dual-valued system at `state`.
///
/// Column j is the output of one evaluation seeded with `eps = 1` on `x_j`.
pub fn jacobian(system: &ExpressionSystem<Dual>, t: f64, state: &[f64]) -> Vec<f64> {
    let rows = system.dimension();
    let cols = state.len();
    let mut jacobian = vec![0.0; rows * cols];
    let mut dual_state = vec![Dual::zero(); cols];
    let mut dual_out = vec![Dual::zero(); rows];
    let t_dual = Dual::constant(t);

    for j in 0..cols {
        for (i, slot) in dual_state.iter_mut().enumerate() {
            *slot = Dual::new(state[i], if i == j { 1.0 } else { 0.0 });
        }
        system.apply(t_dual, &dual_state, &mut dual_out);
        for i in 0..rows {
            jacobian[i * cols + j] = dual_out[i].eps;
        }
    }

    jacobian
}

/// Value and gradient of the first expression of `system` at `state`.
pub fn value_and_gradient(system: &ExpressionSystem<Dual>, state: &[f64]) -> (f64, Vec<f64>) {
    let mut dual_state: Vec<Dual> = state.iter().map(|&v| Dual::constant(v)).collect();
    let mut dual_out = vec![Dual::zero(); system.dimension()];
    let mut gradient = vec![0.0; state.len()];
    let mut value = f64::NAN;

    for j in 0..state.len() {
        dual_state[j].eps = 1.0;
        system.apply(Dual::zero(), &dual_state, &mut dual_out);
        dual_state[j].eps = 0.0;
        value = dual_out[0].val;
        gradient[j] = dual_out[0].eps;
    }
    if state.is_empty() {
        system.apply(Dual::zero(), &dual_state, &mut dual_out);
        value = dual_out[0].val;
    }

    (value, gradient)
}

#[cfg(test)]
mod tests {
    use super::{jacobian, value_and_gradient, Dual};
    use crate::equation_engine::ExpressionSystem;
    use num_traits::Float;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-10,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn dual_propagates_product_and_chain_rules() {
        let x = Dual::new(2.0, 1.0);
        let y = x * x.sin();
        assert_close(y.val, 2.0 * 2.0_f64.sin());
        assert_close(y.eps, 2.0_f64.sin() + 2.0 * 2.0_f64.cos());

        let z = x.tanh();
        assert_close(z.eps, 1.0 - 2.0_f64.tanh().powi(2));
    }

    #[test]
    fn powf_with_constant_exponent_handles_negative_base() {
        let x = Dual::new(-3.0, 1.0);
        let y = x.powf(Dual::constant(2.0));
        assert_close(y.val, 9.0);
        assert_close(y.eps, -6.0);
    }

    #[test]
    fn jacobian_matches_analytic_derivatives() {
        let system = ExpressionSystem::<f64>::compile(
            &["x * y".to_string(), "x ^ 2 + 3 * y".to_string()],
            &["x".to_string(), "y".to_string()],
            &[],
        )
        .expect("system should compile")
        .lift();
        let jac = jacobian(&system, 0.0, &[2.0, 5.0]);
        assert_eq!(jac.len(), 4);
        assert_close(jac[0], 5.0);
        assert_close(jac[1], 2.0);
        assert_close(jac[2], 4.0);
        assert_close(jac[3], 3.0);
    }

    #[test]
    fn value_and_gradient_of_quadratic() {
        let system = ExpressionSystem::<f64>::compile(
            &["(x - 1) ^ 2 + 2 * y ^ 2".to_string()],
            &["x".to_string(), "y".to_string()],
            &[],
        )
        .expect("objective should compile")
        .lift();
        let (value, grad) = value_and_gradient(&system, &[3.0, -1.0]);
        assert_close(value, 6.0);
        assert_close(grad[0], 4.0);
        assert_close(grad[1], -4.0);
    }
}
