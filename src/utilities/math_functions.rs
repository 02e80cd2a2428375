use num_traits::{Float, FloatConst};
use std::fmt::Debug;

pub type Vec3 = [f64; 3];

/// Coordinate precision the kernels run in (`f32` or `f64`).
pub trait WritheFloat: Float + FloatConst + Send + Sync + Debug + 'static {}

impl<T: Float + FloatConst + Send + Sync + Debug + 'static> WritheFloat for T {}

#[inline(always)]
pub fn sub3<T: Float>(a: [T; 3], b: [T; 3]) -> [T; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline(always)]
pub fn dot3<T: Float>(a: [T; 3], b: [T; 3]) -> T {
    a[0].mul_add(b[0], a[1].mul_add(b[1], a[2] * b[2]))
}

#[inline(always)]
pub fn cross3<T: Float>(a: [T; 3], b: [T; 3]) -> [T; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Unit vector along `a`; the zero vector maps to itself instead of NaN. NaN input stays NaN.
#[inline(always)]
pub fn unit3<T: Float>(a: [T; 3]) -> [T; 3] {
    let n = (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt();
    if n > T::zero() {
        [a[0] / n, a[1] / n, a[2] / n]
    } else if n.is_nan() {
        [n; 3]
    } else {
        [T::zero(); 3]
    }
}

/// `signum` that returns 0 for +-0 (`signum` maps +0 to +1). NaN stays NaN.
#[inline(always)]
pub fn sign0<T: Float>(x: T) -> T {
    if x > T::zero() {
        T::one()
    } else if x < T::zero() {
        -T::one()
    } else if x.is_nan() {
        x
    } else {
        T::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit3_of_zero_is_zero() {
        assert_eq!(unit3([0.0f64, 0.0, 0.0]), [0.0, 0.0, 0.0]);
        assert_eq!(unit3([0.0f32, 0.0, 0.0]), [0.0, 0.0, 0.0]);
        assert!(unit3([f64::NAN, 0.0, 0.0]).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn cross3_right_handed() {
        assert_eq!(cross3([1.0f64, 0.0, 0.0], [0.0, 1.0, 0.0]), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn sign0_zero() {
        assert_eq!(sign0(0.0f64), 0.0);
        assert_eq!(sign0(-0.0f64), 0.0);
        assert_eq!(sign0(-3.0f64), -1.0);
        assert_eq!(sign0(2.5f32), 1.0);
    }

    #[test]
    fn sign0_keeps_nan() {
        assert!(sign0(f64::NAN).is_nan());
        assert!(sign0(f32::NAN).is_nan());
    }
}
