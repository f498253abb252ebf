//! Integrable kernels and the midpoint-rule quadrature
//!
//! The executor does not care what it integrates; any `Integrand` that stays
//! finite (returning 0.0 outside its domain) works. `InverseLog` is the
//! reference kernel the workers ship with.

/// A real-valued function of one variable
pub trait Integrand: Send + Sync {
    fn eval(&self, x: f64) -> f64;
}

impl<F> Integrand for F
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    fn eval(&self, x: f64) -> f64 {
        self(x)
    }
}

/// `1 / ln(x)`, defined as 0.0 where the logarithm is non-positive or
/// vanishingly small
#[derive(Debug, Clone, Copy, Default)]
pub struct InverseLog;

/// Below this `|ln(x)|` the kernel is treated as undefined
const LOG_EPSILON: f64 = 1e-10;

impl Integrand for InverseLog {
    fn eval(&self, x: f64) -> f64 {
        if x <= 1.0 {
            return 0.0;
        }
        let ln = x.ln();
        if ln.abs() < LOG_EPSILON {
            return 0.0;
        }
        1.0 / ln
    }
}

/// Midpoint-rule integral of `f` over `[lower, upper)` with the given step
///
/// The final slice is clipped to `upper`, so the covered width is exactly
/// `upper - lower`. Returns 0.0 for an empty interval or a non-positive step.
pub fn midpoint<I: Integrand + ?Sized>(f: &I, lower: f64, upper: f64, step: f64) -> f64 {
    if !(upper > lower) || !(step > 0.0) {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut x = lower;
    while x < upper {
        let next = (x + step).min(upper);
        if next <= x {
            // step vanished against x's magnitude; nothing left to advance
            break;
        }
        let mid = (x + next) / 2.0;
        sum += f.eval(mid) * (next - x);
        x = next;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_log_normal_point() {
        let expected = 1.0 / 2.0f64.ln();
        assert!((InverseLog.eval(2.0) - expected).abs() < 1e-10);
    }

    #[test]
    fn test_inverse_log_outside_domain() {
        assert_eq!(InverseLog.eval(1.0), 0.0);
        assert_eq!(InverseLog.eval(0.5), 0.0);
        assert_eq!(InverseLog.eval(-3.0), 0.0);
        assert_eq!(InverseLog.eval(1.0 + 1e-12), 0.0);
    }

    #[test]
    fn test_inverse_log_near_one() {
        assert!(InverseLog.eval(1.0001) > 0.0);
    }

    #[test]
    fn test_midpoint_small_interval() {
        // li(3) - li(2) is about 1.1184
        let result = midpoint(&InverseLog, 2.0, 3.0, 0.001);
        assert!(result > 0.0);
        assert!((result - 1.1184).abs() < 1e-3, "got {}", result);
    }

    #[test]
    fn test_midpoint_converges_with_step() {
        let coarse = midpoint(&InverseLog, 2.0, 4.0, 0.01);
        let fine = midpoint(&InverseLog, 2.0, 4.0, 0.001);
        let finer = midpoint(&InverseLog, 2.0, 4.0, 0.0001);

        assert!((coarse - fine).abs() < 0.1);
        assert!((fine - finer).abs() < 0.01);
    }

    #[test]
    fn test_midpoint_exact_for_linear() {
        let f = |x: f64| 2.0 * x + 1.0;
        // x^2 + x over [0, 3] = 12
        let result = midpoint(&f, 0.0, 3.0, 0.1);
        assert!((result - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_midpoint_clips_last_slice() {
        let one = |_: f64| 1.0;
        // 0.3 is not a multiple of 0.25; width must still be exact
        let result = midpoint(&one, 0.0, 0.3, 0.25);
        assert!((result - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_midpoint_degenerate_inputs() {
        assert_eq!(midpoint(&InverseLog, 3.0, 2.0, 0.01), 0.0);
        assert_eq!(midpoint(&InverseLog, 2.0, 2.0, 0.01), 0.0);
        assert_eq!(midpoint(&InverseLog, 2.0, 3.0, 0.0), 0.0);
        assert_eq!(midpoint(&InverseLog, 2.0, 3.0, -0.1), 0.0);
        assert_eq!(midpoint(&InverseLog, 2.0, f64::NAN, 0.1), 0.0);
    }

    #[test]
    fn test_midpoint_outside_domain_is_zero() {
        assert_eq!(midpoint(&InverseLog, 0.5, 1.0, 0.001), 0.0);
    }
}
