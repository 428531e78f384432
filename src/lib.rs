pub mod bsdf;
pub mod bvh;
pub mod camera;
pub mod geometry;
pub mod hash_grid;
pub mod ibl;
pub mod imageio;
pub mod integrator;
pub mod material;
pub mod math;
pub mod renderer;
pub mod sampling;
pub mod scene;
pub mod scenes;
pub mod spectrum;
pub mod surface;
pub mod texture;

use cgmath::InnerSpace;

pub type Float = f32;

pub type Point2f = cgmath::Point2<Float>;
pub type Point3f = cgmath::Point3<Float>;
pub type Point2i = cgmath::Point2<i32>;
pub type Vec2f = cgmath::Vector2<Float>;
pub type Vec3f = cgmath::Vector3<Float>;

pub use crate::geometry::{Bounds3f, Ray, RayDifferentials};
pub use crate::spectrum::Spectrum;

pub const PI: Float = std::f32::consts::PI;
pub const INV_PI: Float = std::f32::consts::FRAC_1_PI;
pub const INFINITY: Float = f32::INFINITY;

#[inline]
pub fn abs_dot(a: Vec3f, b: Vec3f) -> Float {
    a.dot(b).abs()
}
