//! # Differentiable scalar
//!
//! [`Ad`] is a forward-mode differentiable number. Besides its value it carries the
//! gradient with respect to a small set of seeded local inputs and, when requested,
//! the packed lower triangle of the Hessian. Every operator and elementary function
//! below applies the first and second order chain rule, so a callback written in
//! terms of `Ad` yields exact derivatives without any hand derivation.
//!
//! There is no `From<Ad> for f64` and no `Into<f64>`: the only way out of the
//! differentiable world is the explicit [`Ad::value`] call.
//!
//! Constants have empty gradient storage, so mixing constants with seeded values
//! costs nothing beyond the arithmetic itself.
//!
//! Alongside the numbers every `Ad` carries the set of seeded inputs it structurally
//! depends on. The set survives zero derivatives (a kink of `abs`, a product with
//! zero) and the unselected branch of `max`/`min`, so sparsity detected from it
//! stays valid wherever the callback is evaluated later.
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// number of entries of a packed symmetric k×k matrix
#[inline]
pub fn packed_len(k: usize) -> usize {
    k * (k + 1) / 2
}

/// position of (i, j) in the packed lower triangle (order does not matter)
#[inline]
pub fn packed_index(i: usize, j: usize) -> usize {
    let (i, j) = if i >= j { (i, j) } else { (j, i) };
    i * (i + 1) / 2 + j
}

/// Differentiable number: value, local gradient and packed local Hessian.
#[derive(Clone, Debug, PartialEq)]
pub struct Ad {
    value: f64,
    grad: Vec<f64>,
    hess: Vec<f64>,
    deps: Vec<bool>,
}

fn union_deps(a: &[bool], b: &[bool]) -> Vec<bool> {
    let k = a.len().max(b.len());
    (0..k)
        .map(|i| a.get(i).copied().unwrap_or(false) || b.get(i).copied().unwrap_or(false))
        .collect()
}

impl Ad {
    /// A value that does not depend on any seeded input.
    pub fn constant(value: f64) -> Ad {
        Ad {
            value,
            grad: Vec::new(),
            hess: Vec::new(),
            deps: Vec::new(),
        }
    }

    /// Independent input number `index` out of `ndirections` seeded inputs.
    /// With `second_order` the Hessian storage is allocated and propagated.
    pub fn variable(value: f64, index: usize, ndirections: usize, second_order: bool) -> Ad {
        let mut grad = vec![0.0; ndirections];
        grad[index] = 1.0;
        let mut deps = vec![false; ndirections];
        deps[index] = true;
        let hess = if second_order {
            vec![0.0; packed_len(ndirections)]
        } else {
            Vec::new()
        };
        Ad {
            value,
            grad,
            hess,
            deps,
        }
    }

    /// Plain value without derivative information.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn gradient(&self) -> &[f64] {
        &self.grad
    }

    /// d self / d input_i (zero for constants)
    pub fn derivative(&self, i: usize) -> f64 {
        self.grad.get(i).copied().unwrap_or(0.0)
    }

    /// whether input i reaches this value through any operation, whatever its derivative
    pub fn depends_on(&self, i: usize) -> bool {
        self.deps.get(i).copied().unwrap_or(false)
    }

    /// d² self / d input_i d input_j (zero when second order is not tracked)
    pub fn second_derivative(&self, i: usize, j: usize) -> f64 {
        if self.hess.is_empty() {
            return 0.0;
        }
        self.hess.get(packed_index(i, j)).copied().unwrap_or(0.0)
    }

    pub fn is_constant(&self) -> bool {
        self.grad.is_empty()
    }

    pub fn num_directions(&self) -> usize {
        self.grad.len()
    }

    pub fn tracks_second_order(&self) -> bool {
        !self.hess.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.value.is_finite()
            && self.grad.iter().all(|g| g.is_finite())
            && self.hess.iter().all(|h| h.is_finite())
    }

    /// unary chain rule: value f, first derivative df, second derivative d2f
    fn chain(&self, f: f64, df: f64, d2f: f64) -> Ad {
        let grad: Vec<f64> = self.grad.iter().map(|g| df * g).collect();
        let hess = if self.hess.is_empty() {
            Vec::new()
        } else {
            let k = self.grad.len();
            let mut h = Vec::with_capacity(self.hess.len());
            for i in 0..k {
                for j in 0..=i {
                    h.push(df * self.hess[packed_index(i, j)] + d2f * self.grad[i] * self.grad[j]);
                }
            }
            h
        };
        Ad {
            value: f,
            grad,
            hess,
            deps: self.deps.clone(),
        }
    }

    /// binary chain rule for z = φ(a, b) given the partials of φ
    #[allow(clippy::too_many_arguments)]
    fn combine(a: &Ad, b: &Ad, value: f64, fa: f64, fb: f64, faa: f64, fab: f64, fbb: f64) -> Ad {
        let k = a.grad.len().max(b.grad.len());
        if k == 0 {
            return Ad::constant(value);
        }
        let ga = |i: usize| a.grad.get(i).copied().unwrap_or(0.0);
        let gb = |i: usize| b.grad.get(i).copied().unwrap_or(0.0);
        let grad: Vec<f64> = (0..k).map(|i| fa * ga(i) + fb * gb(i)).collect();
        let second = !a.hess.is_empty() || !b.hess.is_empty();
        let hess = if second {
            let ha = |i: usize, j: usize| {
                if a.hess.is_empty() {
                    0.0
                } else {
                    a.hess[packed_index(i, j)]
                }
            };
            let hb = |i: usize, j: usize| {
                if b.hess.is_empty() {
                    0.0
                } else {
                    b.hess[packed_index(i, j)]
                }
            };
            let mut h = Vec::with_capacity(packed_len(k));
            for i in 0..k {
                let (gai, gbi) = (ga(i), gb(i));
                for j in 0..=i {
                    let (gaj, gbj) = (ga(j), gb(j));
                    h.push(
                        fa * ha(i, j)
                            + fb * hb(i, j)
                            + faa * gai * gaj
                            + fbb * gbi * gbj
                            + fab * (gai * gbj + gbi * gaj),
                    );
                }
            }
            h
        } else {
            Vec::new()
        };
        Ad {
            value,
            grad,
            hess,
            deps: union_deps(&a.deps, &b.deps),
        }
    }

    pub fn sqrt(&self) -> Ad {
        let s = self.value.sqrt();
        self.chain(s, 0.5 / s, -0.25 / (s * self.value))
    }

    pub fn powi(&self, n: i32) -> Ad {
        if n == 0 {
            return Ad::constant(1.0);
        }
        let v = self.value;
        let df = n as f64 * v.powi(n - 1);
        let d2f = if n == 1 {
            0.0
        } else {
            (n * (n - 1)) as f64 * v.powi(n - 2)
        };
        self.chain(v.powi(n), df, d2f)
    }

    pub fn powf(&self, p: f64) -> Ad {
        if p == 0.0 {
            return Ad::constant(1.0);
        }
        let v = self.value;
        let df = p * v.powf(p - 1.0);
        let d2f = if p == 1.0 {
            0.0
        } else {
            p * (p - 1.0) * v.powf(p - 2.0)
        };
        self.chain(v.powf(p), df, d2f)
    }

    /// self^exponent with a differentiable exponent (base must be positive)
    pub fn pow(&self, exponent: &Ad) -> Ad {
        (exponent * self.ln()).exp()
    }

    pub fn square(&self) -> Ad {
        self.powi(2)
    }

    pub fn exp(&self) -> Ad {
        let e = self.value.exp();
        self.chain(e, e, e)
    }

    pub fn ln(&self) -> Ad {
        let v = self.value;
        self.chain(v.ln(), 1.0 / v, -1.0 / (v * v))
    }

    pub fn sin(&self) -> Ad {
        let (s, c) = self.value.sin_cos();
        self.chain(s, c, -s)
    }

    pub fn cos(&self) -> Ad {
        let (s, c) = self.value.sin_cos();
        self.chain(c, -s, -c)
    }

    pub fn tan(&self) -> Ad {
        let t = self.value.tan();
        let sec2 = 1.0 + t * t;
        self.chain(t, sec2, 2.0 * t * sec2)
    }

    pub fn asin(&self) -> Ad {
        let v = self.value;
        let r = 1.0 - v * v;
        self.chain(v.asin(), 1.0 / r.sqrt(), v / (r * r.sqrt()))
    }

    pub fn acos(&self) -> Ad {
        let v = self.value;
        let r = 1.0 - v * v;
        self.chain(v.acos(), -1.0 / r.sqrt(), -v / (r * r.sqrt()))
    }

    pub fn atan(&self) -> Ad {
        let v = self.value;
        let r = 1.0 + v * v;
        self.chain(v.atan(), 1.0 / r, -2.0 * v / (r * r))
    }

    pub fn sinh(&self) -> Ad {
        let v = self.value;
        self.chain(v.sinh(), v.cosh(), v.sinh())
    }

    pub fn cosh(&self) -> Ad {
        let v = self.value;
        self.chain(v.cosh(), v.sinh(), v.cosh())
    }

    pub fn tanh(&self) -> Ad {
        let t = self.value.tanh();
        let d = 1.0 - t * t;
        self.chain(t, d, -2.0 * t * d)
    }

    /// |x| with derivative 0 at the kink
    pub fn abs(&self) -> Ad {
        let v = self.value;
        let sign = if v > 0.0 {
            1.0
        } else if v < 0.0 {
            -1.0
        } else {
            0.0
        };
        self.chain(v.abs(), sign, 0.0)
    }

    /// four-quadrant arctangent of self / x
    pub fn atan2(&self, x: &Ad) -> Ad {
        let (yv, xv) = (self.value, x.value);
        let r2 = xv * xv + yv * yv;
        let r4 = r2 * r2;
        Ad::combine(
            self,
            x,
            yv.atan2(xv),
            xv / r2,
            -yv / r2,
            -2.0 * xv * yv / r4,
            (yv * yv - xv * xv) / r4,
            2.0 * xv * yv / r4,
        )
    }

    /// branch selected by value; the derivatives of the selected branch are kept,
    /// the dependencies of both
    pub fn max(&self, other: &Ad) -> Ad {
        let selected = if self.value >= other.value { self } else { other };
        Ad {
            deps: union_deps(&self.deps, &other.deps),
            ..selected.clone()
        }
    }

    pub fn min(&self, other: &Ad) -> Ad {
        let selected = if self.value <= other.value { self } else { other };
        Ad {
            deps: union_deps(&self.deps, &other.deps),
            ..selected.clone()
        }
    }
}

impl Default for Ad {
    fn default() -> Self {
        Ad::constant(0.0)
    }
}

impl From<f64> for Ad {
    fn from(value: f64) -> Self {
        Ad::constant(value)
    }
}

impl fmt::Display for Ad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

fn add_ad(a: &Ad, b: &Ad) -> Ad {
    Ad::combine(a, b, a.value + b.value, 1.0, 1.0, 0.0, 0.0, 0.0)
}

fn sub_ad(a: &Ad, b: &Ad) -> Ad {
    Ad::combine(a, b, a.value - b.value, 1.0, -1.0, 0.0, 0.0, 0.0)
}

fn mul_ad(a: &Ad, b: &Ad) -> Ad {
    Ad::combine(a, b, a.value * b.value, b.value, a.value, 0.0, 1.0, 0.0)
}

fn div_ad(a: &Ad, b: &Ad) -> Ad {
    let (av, bv) = (a.value, b.value);
    let b2 = bv * bv;
    Ad::combine(
        a,
        b,
        av / bv,
        1.0 / bv,
        -av / b2,
        0.0,
        -1.0 / b2,
        2.0 * av / (b2 * bv),
    )
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $core:ident) => {
        impl $trait<Ad> for Ad {
            type Output = Ad;
            fn $method(self, rhs: Ad) -> Ad {
                $core(&self, &rhs)
            }
        }
        impl<'a> $trait<&'a Ad> for Ad {
            type Output = Ad;
            fn $method(self, rhs: &'a Ad) -> Ad {
                $core(&self, rhs)
            }
        }
        impl<'a> $trait<Ad> for &'a Ad {
            type Output = Ad;
            fn $method(self, rhs: Ad) -> Ad {
                $core(self, &rhs)
            }
        }
        impl<'a, 'b> $trait<&'b Ad> for &'a Ad {
            type Output = Ad;
            fn $method(self, rhs: &'b Ad) -> Ad {
                $core(self, rhs)
            }
        }
        impl $trait<f64> for Ad {
            type Output = Ad;
            fn $method(self, rhs: f64) -> Ad {
                $core(&self, &Ad::constant(rhs))
            }
        }
        impl<'a> $trait<f64> for &'a Ad {
            type Output = Ad;
            fn $method(self, rhs: f64) -> Ad {
                $core(self, &Ad::constant(rhs))
            }
        }
        impl $trait<Ad> for f64 {
            type Output = Ad;
            fn $method(self, rhs: Ad) -> Ad {
                $core(&Ad::constant(self), &rhs)
            }
        }
        impl<'a> $trait<&'a Ad> for f64 {
            type Output = Ad;
            fn $method(self, rhs: &'a Ad) -> Ad {
                $core(&Ad::constant(self), rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, add_ad);
impl_binary_op!(Sub, sub, sub_ad);
impl_binary_op!(Mul, mul, mul_ad);
impl_binary_op!(Div, div, div_ad);

macro_rules! impl_assign_op {
    ($trait:ident, $method:ident, $core:ident) => {
        impl $trait<Ad> for Ad {
            fn $method(&mut self, rhs: Ad) {
                let result = $core(self, &rhs);
                *self = result;
            }
        }
        impl<'a> $trait<&'a Ad> for Ad {
            fn $method(&mut self, rhs: &'a Ad) {
                let result = $core(self, rhs);
                *self = result;
            }
        }
        impl $trait<f64> for Ad {
            fn $method(&mut self, rhs: f64) {
                let result = $core(self, &Ad::constant(rhs));
                *self = result;
            }
        }
    };
}

impl_assign_op!(AddAssign, add_assign, add_ad);
impl_assign_op!(SubAssign, sub_assign, sub_ad);
impl_assign_op!(MulAssign, mul_assign, mul_ad);
impl_assign_op!(DivAssign, div_assign, div_ad);

impl Neg for Ad {
    type Output = Ad;
    fn neg(self) -> Ad {
        self.chain(-self.value, -1.0, 0.0)
    }
}

impl<'a> Neg for &'a Ad {
    type Output = Ad;
    fn neg(self) -> Ad {
        self.chain(-self.value, -1.0, 0.0)
    }
}

impl Sum for Ad {
    fn sum<I: Iterator<Item = Ad>>(iter: I) -> Ad {
        iter.fold(Ad::constant(0.0), |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Ad> for Ad {
    fn sum<I: Iterator<Item = &'a Ad>>(iter: I) -> Ad {
        iter.fold(Ad::constant(0.0), |acc, x| acc + x)
    }
}
