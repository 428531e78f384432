use crate::{Float, Point2f, Vec2f, Vec3f, PI};

pub fn concentric_sample_disk(u: Point2f) -> Point2f {
    // map sample from [0, 1] to [-1, 1]
    let u_offset = 2.0 * u - Vec2f::new(1.0, 1.0);
    if u_offset.x == 0.0 && u_offset.y == 0.0 {
        return Point2f::new(0.0, 0.0);
    }

    let (r, theta) = if u_offset.x.abs() > u_offset.y.abs() {
        (u_offset.x, std::f32::consts::FRAC_PI_4 * (u_offset.y / u_offset.x))
    } else {
        (
            u_offset.y,
            std::f32::consts::FRAC_PI_2 - std::f32::consts::FRAC_PI_4 * (u_offset.x / u_offset.y),
        )
    };

    Point2f::new(r * theta.cos(), r * theta.sin())
}

/// Cosine-weighted hemisphere direction around +Z, with its pdf wrt solid
/// angle.
pub fn cosine_sample_hemisphere(u: Point2f) -> (Vec3f, Float) {
    let d = concentric_sample_disk(u);
    let z = Float::sqrt(Float::max(0.0, 1.0 - d.x * d.x - d.y * d.y));
    (Vec3f::new(d.x, d.y, z), z / PI)
}

fn search_sorted<F: Fn(usize) -> bool>(size: usize, key: F) -> usize {
    let mut first = 0;
    let mut len = size;
    while len > 0 {
        let half = len >> 1;
        let middle = first + half;
        if key(middle) {
            first = middle + 1;
            len -= half + 1;
        } else {
            len = half;
        }
    }
    first.saturating_sub(1).clamp(0, size.saturating_sub(2))
}

/// Piecewise-constant 1D distribution over `[0, 1)`.
pub struct Distribution1D {
    func: Vec<Float>,
    cdf: Vec<Float>,
    func_integral: Float,
}

impl Distribution1D {
    pub fn new(func: Vec<Float>) -> Self {
        let n = func.len();
        let mut cdf = vec![0.0; n + 1];

        for i in 1..(n + 1) {
            cdf[i] = cdf[i - 1] + (func[i - 1] / n as Float);
        }

        let func_integral = cdf[n];
        if func_integral == 0.0 {
            cdf[1..]
                .iter_mut()
                .enumerate()
                .for_each(|(i, x)| *x = (i + 1) as Float / n as Float);
        } else {
            cdf[1..].iter_mut().for_each(|x| *x /= func_integral);
        }

        Self {
            func,
            cdf,
            func_integral,
        }
    }

    pub fn func_integral(&self) -> Float {
        self.func_integral
    }

    pub fn count(&self) -> usize {
        self.func.len()
    }

    /// Sample from the distribution, returning `(x, p(x), idx)`.
    pub fn sample_continuous(&self, u: Float) -> (Float, Float, usize) {
        let idx = search_sorted(self.cdf.len(), |i| self.cdf[i] <= u);
        let mut du = u - self.cdf[idx];
        if self.cdf[idx + 1] - self.cdf[idx] > 0.0 {
            du /= self.cdf[idx + 1] - self.cdf[idx];
        }

        let pdf = if self.func_integral > 0.0 {
            self.func[idx] / self.func_integral
        } else {
            0.0
        };

        let x = (idx as Float + du) / self.func.len() as Float;
        (x, pdf, idx)
    }

    pub fn pdf(&self, idx: usize) -> Float {
        if self.func_integral > 0.0 {
            self.func[idx] / self.func_integral
        } else {
            0.0
        }
    }
}

/// Piecewise-constant 2D distribution built from row-major function values.
pub struct Distribution2D {
    p_conditional_v: Vec<Distribution1D>,
    p_marginal: Distribution1D,
}

impl Distribution2D {
    pub fn new(func: &[Float], nu: usize, nv: usize) -> Self {
        assert_eq!(func.len(), nu * nv);
        let p_conditional_v: Vec<Distribution1D> = func
            .chunks_exact(nu)
            .map(|f| Distribution1D::new(f.to_vec()))
            .collect();

        let marginal_func: Vec<Float> = p_conditional_v
            .iter()
            .map(|distr| distr.func_integral())
            .collect();

        let p_marginal = Distribution1D::new(marginal_func);
        Self {
            p_conditional_v,
            p_marginal,
        }
    }

    pub fn sample_continuous(&self, u: Point2f) -> (Point2f, Float) {
        let (d1, pdf1, v_idx) = self.p_marginal.sample_continuous(u.y);
        let (d0, pdf0, _) = self.p_conditional_v[v_idx].sample_continuous(u.x);
        (Point2f::new(d0, d1), pdf0 * pdf1)
    }

    /// Pdf of a unit-square position wrt the same measure `sample_continuous`
    /// reports.
    pub fn pdf(&self, p: Point2f) -> Float {
        let nv = self.p_conditional_v.len();
        let v = ((p.y * nv as Float) as usize).min(nv.saturating_sub(1));
        let cond = &self.p_conditional_v[v];
        let nu = cond.count();
        let u = ((p.x * nu as Float) as usize).min(nu.saturating_sub(1));
        self.p_marginal.pdf(v) * cond.pdf(u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cgmath::InnerSpace;

    #[test]
    fn disk_samples_stay_in_disk() {
        for (a, b) in [(0.1, 0.9), (0.5, 0.5), (0.99, 0.01), (0.0, 0.0)] {
            let d = concentric_sample_disk(Point2f::new(a, b));
            assert!(d.x * d.x + d.y * d.y <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn cosine_hemisphere_is_unit_and_upward() {
        let (w, pdf) = cosine_sample_hemisphere(Point2f::new(0.3, 0.7));
        assert_abs_diff_eq!(w.magnitude(), 1.0, epsilon = 1e-5);
        assert!(w.z >= 0.0);
        assert_abs_diff_eq!(pdf, w.z / PI, epsilon = 1e-6);
    }

    #[test]
    fn distribution_1d_uniform() {
        let d = Distribution1D::new(vec![1.0; 8]);
        let (x, pdf, _) = d.sample_continuous(0.375);
        assert_abs_diff_eq!(x, 0.375, epsilon = 1e-6);
        assert_abs_diff_eq!(pdf, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn distribution_2d_pdf_matches_sample() {
        let func: Vec<Float> = (0..16).map(|i| 1.0 + (i % 4) as Float).collect();
        let d = Distribution2D::new(&func, 4, 4);
        let (p, pdf) = d.sample_continuous(Point2f::new(0.43, 0.77));
        assert!(pdf > 0.0);
        assert_abs_diff_eq!(d.pdf(p), pdf, epsilon = 1e-4);
    }
}
