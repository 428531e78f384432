use cgmath::InnerSpace;

use crate::{Float, Vec2f, Vec3f, PI};

/// Threshold below which a UV parameterisation determinant is treated as
/// degenerate.
pub const SMALL_FLOAT_EPSILON: Float = 1e-6;

/// Build an orthonormal basis around a unit vector.
///
/// Returns two unit vectors `(u, v)` so that `(u, v, n)` is a right-handed
/// orthonormal frame.
pub fn coordinate_system(n: Vec3f) -> (Vec3f, Vec3f) {
    let u = if n.x.abs() > n.y.abs() {
        Vec3f::new(-n.z, 0.0, n.x) / (n.x * n.x + n.z * n.z).sqrt()
    } else {
        Vec3f::new(0.0, n.z, -n.y) / (n.y * n.y + n.z * n.z).sqrt()
    };
    let v = n.cross(u);
    (u, v)
}

/// Solve `A x = b` for a 2x2 system. Returns `None` when the matrix is
/// singular or the solution is non-finite.
pub fn solve_linear_system_2x2(a: [[Float; 2]; 2], b: [Float; 2]) -> Option<[Float; 2]> {
    let det = a[0][0] * a[1][1] - a[0][1] * a[1][0];
    if det.abs() < 1e-10 {
        return None;
    }
    let x0 = (a[1][1] * b[0] - a[0][1] * b[1]) / det;
    let x1 = (a[0][0] * b[1] - a[1][0] * b[0]) / det;
    if !x0.is_finite() || !x1.is_finite() {
        return None;
    }
    Some([x0, x1])
}

/// Polar angle of a direction, measured from +Y.
#[inline]
pub fn spherical_theta(v: Vec3f) -> Float {
    v.y.clamp(-1.0, 1.0).acos()
}

/// Azimuthal angle of a direction in `[0, 2pi)`.
#[inline]
pub fn spherical_phi(v: Vec3f) -> Float {
    let p = v.z.atan2(v.x);
    if p < 0.0 {
        p + 2.0 * PI
    } else {
        p
    }
}

/// Direction for spherical coordinates with +Y up.
#[inline]
pub fn spherical_direction(theta: Float, phi: Float) -> Vec3f {
    let sin_theta = theta.sin();
    Vec3f::new(sin_theta * phi.cos(), theta.cos(), sin_theta * phi.sin())
}

/// Map an equirectangular uv coordinate to the direction it stands for.
#[inline]
pub fn latlong_to_direction(uv: Vec2f) -> Vec3f {
    spherical_direction(uv.y * PI, uv.x * 2.0 * PI)
}

/// Inverse of `latlong_to_direction` for a unit direction.
#[inline]
pub fn direction_to_latlong(dir: Vec3f) -> Vec2f {
    Vec2f::new(spherical_phi(dir) / (2.0 * PI), spherical_theta(dir) / PI)
}

#[inline]
pub fn reflect(wo: Vec3f, n: Vec3f) -> Vec3f {
    2.0 * wo.dot(n) * n - wo
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn coordinate_system_is_orthonormal() {
        for n in [
            Vec3f::new(0.0, 1.0, 0.0),
            Vec3f::new(1.0, 0.0, 0.0),
            Vec3f::new(0.48, -0.6, 0.64),
        ] {
            let (u, v) = coordinate_system(n);
            assert_abs_diff_eq!(u.magnitude(), 1.0, epsilon = 1e-5);
            assert_abs_diff_eq!(v.magnitude(), 1.0, epsilon = 1e-5);
            assert_abs_diff_eq!(u.dot(n), 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(v.dot(n), 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(u.dot(v), 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn solve_2x2_known_system() {
        let x = solve_linear_system_2x2([[2.0, 1.0], [1.0, 3.0]], [3.0, 5.0]).unwrap();
        assert_abs_diff_eq!(x[0], 0.8, epsilon = 1e-6);
        assert_abs_diff_eq!(x[1], 1.4, epsilon = 1e-6);
    }

    #[test]
    fn solve_2x2_singular_is_none() {
        assert!(solve_linear_system_2x2([[1.0, 2.0], [2.0, 4.0]], [1.0, 2.0]).is_none());
    }

    #[test]
    fn latlong_round_trip() {
        let dir = Vec3f::new(0.48, -0.6, 0.64).normalize();
        let uv = direction_to_latlong(dir);
        let back = latlong_to_direction(uv);
        assert_abs_diff_eq!(dir.x, back.x, epsilon = 1e-5);
        assert_abs_diff_eq!(dir.y, back.y, epsilon = 1e-5);
        assert_abs_diff_eq!(dir.z, back.z, epsilon = 1e-5);
    }
}
