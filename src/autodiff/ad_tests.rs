//! Operator-by-operator checks of the differentiable scalar: every arithmetic
//! operator and elementary function must keep first and second order sensitivities
//! and match the analytic derivatives to machine precision.
use crate::autodiff::ad_number::Ad;
use approx::assert_relative_eq;

const TOL: f64 = 1e-13;

fn xy(x: f64, y: f64) -> (Ad, Ad) {
    (Ad::variable(x, 0, 2, true), Ad::variable(y, 1, 2, true))
}

/// value, [fx, fy], [fxx, fxy, fyy]
fn check(z: &Ad, value: f64, grad: [f64; 2], hess: [f64; 3]) {
    assert!(!z.is_constant(), "sensitivities were lost");
    assert!(z.tracks_second_order(), "second order tracking was lost");
    assert_relative_eq!(z.value(), value, epsilon = TOL, max_relative = TOL);
    assert_relative_eq!(z.derivative(0), grad[0], epsilon = TOL, max_relative = TOL);
    assert_relative_eq!(z.derivative(1), grad[1], epsilon = TOL, max_relative = TOL);
    assert_relative_eq!(z.second_derivative(0, 0), hess[0], epsilon = TOL, max_relative = TOL);
    assert_relative_eq!(z.second_derivative(1, 0), hess[1], epsilon = TOL, max_relative = TOL);
    assert_relative_eq!(z.second_derivative(0, 1), hess[1], epsilon = TOL, max_relative = TOL);
    assert_relative_eq!(z.second_derivative(1, 1), hess[2], epsilon = TOL, max_relative = TOL);
}

#[test]
fn addition_all_operand_forms() {
    let (x, y) = xy(1.3, -0.4);
    check(&(&x + &y), 0.9, [1.0, 1.0], [0.0; 3]);
    check(&(x.clone() + y.clone()), 0.9, [1.0, 1.0], [0.0; 3]);
    check(&(x.clone() + &y), 0.9, [1.0, 1.0], [0.0; 3]);
    check(&(&x + y.clone()), 0.9, [1.0, 1.0], [0.0; 3]);
    check(&(&x + 2.0), 3.3, [1.0, 0.0], [0.0; 3]);
    check(&(2.0 + &y), 1.6, [0.0, 1.0], [0.0; 3]);
    let mut acc = x.clone();
    acc += &y;
    acc += 1.0;
    check(&acc, 1.9, [1.0, 1.0], [0.0; 3]);
}

#[test]
fn subtraction_and_negation() {
    let (x, y) = xy(1.3, -0.4);
    check(&(&x - &y), 1.7, [1.0, -1.0], [0.0; 3]);
    check(&(5.0 - &x), 3.7, [-1.0, 0.0], [0.0; 3]);
    check(&(&y - 5.0), -5.4, [0.0, 1.0], [0.0; 3]);
    check(&(-&x), -1.3, [-1.0, 0.0], [0.0; 3]);
    check(&(-(x.clone() * &y)), 0.52, [0.4, -1.3], [0.0, -1.0, 0.0]);
    let mut acc = x.clone();
    acc -= y.clone();
    check(&acc, 1.7, [1.0, -1.0], [0.0; 3]);
}

#[test]
fn multiplication_product_rule() {
    let (x, y) = xy(1.5, 2.0);
    check(&(&x * &y), 3.0, [2.0, 1.5], [0.0, 1.0, 0.0]);
    check(&(&x * &x), 2.25, [3.0, 0.0], [2.0, 0.0, 0.0]);
    check(&(3.0 * &y), 6.0, [0.0, 3.0], [0.0; 3]);
    let mut acc = x.clone();
    acc *= &y;
    acc *= 2.0;
    check(&acc, 6.0, [4.0, 3.0], [0.0, 2.0, 0.0]);
}

#[test]
fn division_quotient_rule() {
    let (x, y) = xy(1.5, 2.0);
    // z = x / y
    check(
        &(&x / &y),
        0.75,
        [0.5, -1.5 / 4.0],
        [0.0, -1.0 / 4.0, 2.0 * 1.5 / 8.0],
    );
    // z = 1 / x
    check(
        &(1.0 / &x),
        1.0 / 1.5,
        [-1.0 / 2.25, 0.0],
        [2.0 / 3.375, 0.0, 0.0],
    );
    let mut acc = y.clone();
    acc /= 4.0;
    check(&acc, 0.5, [0.0, 0.25], [0.0; 3]);
}

#[test]
fn powers_and_roots() {
    let (x, y) = xy(1.7, 0.6);
    let v: f64 = 1.7;
    check(&x.sqrt(), v.sqrt(), [0.5 / v.sqrt(), 0.0], [-0.25 * v.powf(-1.5), 0.0, 0.0]);
    check(&x.powi(3), v.powi(3), [3.0 * v * v, 0.0], [6.0 * v, 0.0, 0.0]);
    check(&x.powi(-2), v.powi(-2), [-2.0 * v.powi(-3), 0.0], [6.0 * v.powi(-4), 0.0, 0.0]);
    check(
        &x.powf(2.5),
        v.powf(2.5),
        [2.5 * v.powf(1.5), 0.0],
        [3.75 * v.powf(0.5), 0.0, 0.0],
    );
    check(&x.square(), v * v, [2.0 * v, 0.0], [2.0, 0.0, 0.0]);
    // x^y
    let w: f64 = 0.6;
    let z = x.pow(&y);
    let val = v.powf(w);
    check(
        &z,
        val,
        [w * v.powf(w - 1.0), val * v.ln()],
        [
            w * (w - 1.0) * v.powf(w - 2.0),
            v.powf(w - 1.0) * (1.0 + w * v.ln()),
            val * v.ln() * v.ln(),
        ],
    );
}

#[test]
fn exponential_and_logarithm() {
    let (x, _) = xy(0.8, 0.0);
    let e = 0.8_f64.exp();
    check(&x.exp(), e, [e, 0.0], [e, 0.0, 0.0]);
    check(&x.ln(), 0.8_f64.ln(), [1.0 / 0.8, 0.0], [-1.0 / 0.64, 0.0, 0.0]);
}

#[test]
fn trigonometric_functions() {
    let (x, _) = xy(0.4, 0.0);
    let v: f64 = 0.4;
    check(&x.sin(), v.sin(), [v.cos(), 0.0], [-v.sin(), 0.0, 0.0]);
    check(&x.cos(), v.cos(), [-v.sin(), 0.0], [-v.cos(), 0.0, 0.0]);
    let t = v.tan();
    check(&x.tan(), t, [1.0 + t * t, 0.0], [2.0 * t * (1.0 + t * t), 0.0, 0.0]);
    let r = 1.0 - v * v;
    check(&x.asin(), v.asin(), [1.0 / r.sqrt(), 0.0], [v / r.powf(1.5), 0.0, 0.0]);
    check(&x.acos(), v.acos(), [-1.0 / r.sqrt(), 0.0], [-v / r.powf(1.5), 0.0, 0.0]);
    let q = 1.0 + v * v;
    check(&x.atan(), v.atan(), [1.0 / q, 0.0], [-2.0 * v / (q * q), 0.0, 0.0]);
}

#[test]
fn hyperbolic_functions() {
    let (x, _) = xy(0.9, 0.0);
    let v: f64 = 0.9;
    check(&x.sinh(), v.sinh(), [v.cosh(), 0.0], [v.sinh(), 0.0, 0.0]);
    check(&x.cosh(), v.cosh(), [v.sinh(), 0.0], [v.cosh(), 0.0, 0.0]);
    let t = v.tanh();
    check(&x.tanh(), t, [1.0 - t * t, 0.0], [-2.0 * t * (1.0 - t * t), 0.0, 0.0]);
}

#[test]
fn atan2_abs_max_min() {
    let (y, x) = {
        let (a, b) = xy(0.7, -1.2);
        (a, b)
    };
    // z = atan2(y, x), y is input 0, x is input 1
    let (yv, xv): (f64, f64) = (0.7, -1.2);
    let r2 = xv * xv + yv * yv;
    check(
        &y.atan2(&x),
        yv.atan2(xv),
        [xv / r2, -yv / r2],
        [
            -2.0 * xv * yv / (r2 * r2),
            (yv * yv - xv * xv) / (r2 * r2),
            2.0 * xv * yv / (r2 * r2),
        ],
    );
    check(&x.abs(), 1.2, [0.0, -1.0], [0.0; 3]);
    check(&y.max(&x), 0.7, [1.0, 0.0], [0.0; 3]);
    check(&y.min(&x), -1.2, [0.0, 1.0], [0.0; 3]);
}

#[test]
fn dependencies_survive_zero_derivatives_and_branches() {
    let (x, y) = xy(0.0, 2.0);
    let kink = x.abs();
    assert_eq!(kink.derivative(0), 0.0);
    assert!(kink.depends_on(0) && !kink.depends_on(1));
    let scaled = &y * 0.0;
    assert!(scaled.depends_on(1));
    let upper = x.max(&y);
    assert_eq!(upper.derivative(0), 0.0);
    assert!(upper.depends_on(0) && upper.depends_on(1));
    let lower = y.min(&Ad::constant(1.0));
    assert!(lower.is_constant());
    assert!(lower.depends_on(1));
    assert!(!Ad::constant(3.0).depends_on(0));
    assert!(!x.powi(0).depends_on(0));
}

#[test]
fn hanging_chain_integrand_matches_analytic_derivative() {
    // L(x, u) = x * sqrt(1 + u^2)
    let (x, u) = xy(1.8, 2.3);
    let l = &x * (1.0 + u.powi(2)).sqrt();
    let (xv, uv): (f64, f64) = (1.8, 2.3);
    let s = (1.0 + uv * uv).sqrt();
    check(
        &l,
        xv * s,
        [s, xv * uv / s],
        [0.0, uv / s, xv / (s * s * s)],
    );
}

#[test]
fn sum_over_iterators_keeps_sensitivities() {
    let (x, y) = xy(1.0, 2.0);
    let terms = vec![x.clone() * &x, y.clone() * 3.0, Ad::constant(4.0)];
    let total: Ad = terms.iter().sum();
    check(&total, 1.0 + 6.0 + 4.0, [2.0, 3.0], [2.0, 0.0, 0.0]);
    let owned: Ad = terms.into_iter().sum();
    assert_relative_eq!(owned.value(), 11.0);
}

#[test]
fn constants_carry_no_sensitivity_storage() {
    let c = Ad::constant(3.0) * 2.0 + Ad::from(1.0);
    assert!(c.is_constant());
    assert_eq!(c.num_directions(), 0);
    assert_eq!(c.derivative(0), 0.0);
    assert_eq!(c.second_derivative(0, 0), 0.0);
    assert_relative_eq!(c.value(), 7.0);
}

#[test]
fn first_order_seeding_skips_hessian() {
    let x = Ad::variable(2.0, 0, 1, false);
    let z = x.exp() * &x;
    assert!(!z.tracks_second_order());
    assert_relative_eq!(z.derivative(0), 3.0 * 2.0_f64.exp(), epsilon = 1e-12);
    assert_eq!(z.second_derivative(0, 0), 0.0);
}
