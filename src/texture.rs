//! Image textures with a box-filtered mip pyramid. Lookups default to the
//! triangle filter; EWA is compiled in behind `ENABLE_EWA` for channels that
//! carry uv differentials.

use crate::{Float, Point2f, Spectrum, Vec2f};

/// Compile-time switch for the anisotropic filter path.
pub const ENABLE_EWA: bool = false;

const EWA_MAX_ECCENTRICITY: Float = 8.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageWrap {
    Repeat,
    Clamp,
}

struct Level {
    width: usize,
    height: usize,
    texels: Vec<Spectrum>,
}

impl Level {
    fn texel(&self, s: i32, t: i32, wrap: ImageWrap) -> Spectrum {
        let (s, t) = match wrap {
            ImageWrap::Repeat => (
                s.rem_euclid(self.width as i32),
                t.rem_euclid(self.height as i32),
            ),
            ImageWrap::Clamp => (
                s.clamp(0, self.width as i32 - 1),
                t.clamp(0, self.height as i32 - 1),
            ),
        };
        self.texels[t as usize * self.width + s as usize]
    }
}

pub struct Texture {
    wrap: ImageWrap,
    pyramid: Vec<Level>,
}

impl Texture {
    pub fn new(width: usize, height: usize, texels: Vec<Spectrum>, wrap: ImageWrap) -> Self {
        assert_eq!(texels.len(), width * height);
        let mut pyramid = vec![Level {
            width,
            height,
            texels,
        }];

        while pyramid.last().unwrap().width > 1 || pyramid.last().unwrap().height > 1 {
            let prev = pyramid.last().unwrap();
            let w = (prev.width / 2).max(1);
            let h = (prev.height / 2).max(1);
            let mut texels = Vec::with_capacity(w * h);
            for t in 0..h as i32 {
                for s in 0..w as i32 {
                    let sum = prev.texel(2 * s, 2 * t, wrap)
                        + prev.texel(2 * s + 1, 2 * t, wrap)
                        + prev.texel(2 * s, 2 * t + 1, wrap)
                        + prev.texel(2 * s + 1, 2 * t + 1, wrap);
                    texels.push(sum * 0.25);
                }
            }
            pyramid.push(Level {
                width: w,
                height: h,
                texels,
            });
        }

        Texture { wrap, pyramid }
    }

    pub fn resolution(&self) -> (usize, usize) {
        (self.pyramid[0].width, self.pyramid[0].height)
    }

    pub fn levels(&self) -> usize {
        self.pyramid.len()
    }

    /// Bilinear filter of the four texels around `uv` at a mip level.
    pub fn triangle(&self, level: usize, uv: Point2f) -> Spectrum {
        let level = &self.pyramid[level.min(self.pyramid.len() - 1)];
        let s = uv.x * level.width as Float - 0.5;
        let t = uv.y * level.height as Float - 0.5;
        let s0 = s.floor() as i32;
        let t0 = t.floor() as i32;
        let ds = s - s0 as Float;
        let dt = t - t0 as Float;
        level.texel(s0, t0, self.wrap) * (1.0 - ds) * (1.0 - dt)
            + level.texel(s0, t0 + 1, self.wrap) * (1.0 - ds) * dt
            + level.texel(s0 + 1, t0, self.wrap) * ds * (1.0 - dt)
            + level.texel(s0 + 1, t0 + 1, self.wrap) * ds * dt
    }

    /// Elliptically-weighted average over the footprint described by the uv
    /// differentials.
    pub fn ewa(&self, uv: Point2f, duvdx: Vec2f, duvdy: Vec2f) -> Spectrum {
        // major/minor axes of the footprint ellipse
        let (mut major, mut minor) = if duvdx.x * duvdx.x + duvdx.y * duvdx.y
            >= duvdy.x * duvdy.x + duvdy.y * duvdy.y
        {
            (duvdx, duvdy)
        } else {
            (duvdy, duvdx)
        };
        let major_len = (major.x * major.x + major.y * major.y).sqrt();
        let mut minor_len = (minor.x * minor.x + minor.y * minor.y).sqrt();

        // clamp eccentricity so the chosen level stays bounded
        if minor_len * EWA_MAX_ECCENTRICITY < major_len && minor_len > 0.0 {
            let scale = major_len / (minor_len * EWA_MAX_ECCENTRICITY);
            minor *= scale;
            minor_len *= scale;
        }
        if minor_len == 0.0 {
            return self.triangle(0, uv);
        }

        let lod = (self.pyramid.len() as Float - 1.0 + minor_len.max(1e-8).log2()).max(0.0);
        let level_index = (lod.floor() as usize).min(self.pyramid.len() - 1);
        let level = &self.pyramid[level_index];

        // work in texel coordinates of the chosen level
        let w = level.width as Float;
        let h = level.height as Float;
        let s = uv.x * w - 0.5;
        let t = uv.y * h - 0.5;
        major = Vec2f::new(major.x * w, major.y * h);
        minor = Vec2f::new(minor.x * w, minor.y * h);

        // implicit ellipse coefficients
        let mut a = major.y * major.y + minor.y * minor.y + 1.0;
        let mut b = -2.0 * (major.x * major.y + minor.x * minor.y);
        let mut c = major.x * major.x + minor.x * minor.x + 1.0;
        let inv_f = 1.0 / (a * c - b * b * 0.25);
        a *= inv_f;
        b *= inv_f;
        c *= inv_f;

        let det = -b * b + 4.0 * a * c;
        let inv_det = 1.0 / det;
        let u_sqrt = (det * c).max(0.0).sqrt();
        let v_sqrt = (det * a).max(0.0).sqrt();
        let s0 = (s - 2.0 * inv_det * u_sqrt).ceil() as i32;
        let s1 = (s + 2.0 * inv_det * u_sqrt).floor() as i32;
        let t0 = (t - 2.0 * inv_det * v_sqrt).ceil() as i32;
        let t1 = (t + 2.0 * inv_det * v_sqrt).floor() as i32;

        let mut sum = Spectrum::black();
        let mut sum_weights = 0.0;
        for it in t0..=t1 {
            let tt = it as Float - t;
            for is in s0..=s1 {
                let ss = is as Float - s;
                let r2 = a * ss * ss + b * ss * tt + c * tt * tt;
                if r2 < 1.0 {
                    let weight = (-2.0 * r2).exp() - (-2.0f32).exp();
                    sum += level.texel(is, it, self.wrap) * weight;
                    sum_weights += weight;
                }
            }
        }
        if sum_weights > 0.0 {
            sum / sum_weights
        } else {
            self.triangle(level_index, uv)
        }
    }
}

/// Precise sRGB electro-optical transfer, per channel.
pub fn srgb_to_linear(v: Float) -> Float {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

pub fn linear_to_srgb(v: Float) -> Float {
    if v <= 0.003_130_8 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}
