//! Shared integrator machinery: the per-subpath extension cursor with its
//! three partial MIS weights, and the occlusion helpers both kernels use.

use rand_xoshiro::Xoshiro256Plus;

use crate::bsdf::sample_bsdf;
use crate::camera::RayCastCamera;
use crate::scene::Scene;
use crate::surface::Surface;
use crate::{abs_dot, Float, Point3f, Spectrum, Vec3f};

pub mod path;
pub mod vcm;

/// Scale applied to the surface error bound when pushing shadow/connection
/// ray origins off the surface.
pub const OCCLUSION_BIAS_SCALE: Float = 0.1;

/// Everything one worker needs to run kernel passes: immutable scene views,
/// a dedicated generator, and the worker-private image.
pub struct KernelContext<'a> {
    pub scene: &'a Scene,
    pub camera: &'a RayCastCamera,
    pub rng: Xoshiro256Plus,
    pub max_path_length: u32,
    pub width: u32,
    pub height: u32,
    pub image: Vec<Spectrum>,
}

impl<'a> KernelContext<'a> {
    pub fn new(
        scene: &'a Scene,
        camera: &'a RayCastCamera,
        rng: Xoshiro256Plus,
        max_path_length: u32,
    ) -> Self {
        let width = camera.viewport_width;
        let height = camera.viewport_height;
        KernelContext {
            scene,
            camera,
            rng,
            max_path_length,
            width,
            height,
            image: vec![Spectrum::black(); (width * height) as usize],
        }
    }
}

/// A subpath extension cursor. `path_length` counts vertices produced so
/// far; the three `d_*` accumulators carry the partial MIS weights for the
/// camera-connection, vertex-connection, and vertex-merging strategies.
#[derive(Clone, Copy, Debug)]
pub struct PathState {
    pub position: Point3f,
    pub direction: Vec3f,
    pub throughput: Spectrum,
    pub path_length: u32,
    pub d_vcm: Float,
    pub d_vc: Float,
    pub d_vm: Float,
    pub is_area_measure: bool,
}

impl PathState {
    /// Fold a new hit into the accumulated MIS quantities. The first segment
    /// of a solid-angle-measure source (the environment) skips the distance
    /// factor.
    pub fn update_at_hit(&mut self, connection_length_sq: Float, abs_cos: Float) {
        if self.path_length > 1 || self.is_area_measure {
            self.d_vcm *= connection_length_sq;
        }
        let inv_cos = 1.0 / abs_cos;
        self.d_vcm *= inv_cos;
        self.d_vc *= inv_cos;
        self.d_vm *= inv_cos;
    }
}

/// Sample a scattering direction at `surface` and advance `state` across it,
/// rewriting the MIS accumulators for the new segment. Returns `false` when
/// the subpath ends here (no sample, or zero reflectance).
pub fn sample_bsdf_scattering(
    rng: &mut Xoshiro256Plus,
    surface: &Surface,
    vm_weight: Float,
    vc_weight: Float,
    state: &mut PathState,
) -> bool {
    let Some(sample) = sample_bsdf(surface, -state.direction, rng) else {
        return false;
    };
    if sample.reflectance.is_black() {
        return false;
    }

    let cos_theta = abs_dot(sample.wi, surface.perturbed_normal);

    state.position = surface.position;
    state.throughput *= sample.reflectance;
    state.d_vc = (cos_theta / sample.forward_pdf_w)
        * (state.d_vc * sample.reverse_pdf_w + state.d_vcm + vm_weight);
    state.d_vm = (cos_theta / sample.forward_pdf_w)
        * (state.d_vm * sample.reverse_pdf_w + state.d_vcm * vc_weight + 1.0);
    state.d_vcm = 1.0 / sample.forward_pdf_w;
    state.direction = sample.wi;
    state.path_length += 1;

    true
}

/// Shadow-ray test from a surface. True when the segment is clear.
pub fn occlusion_ray(scene: &Scene, surface: &Surface, direction: Vec3f, distance: Float) -> bool {
    let origin = surface.offset_ray_origin(direction, OCCLUSION_BIAS_SCALE);
    !scene.occluded(origin, direction, surface.error, distance)
}

/// Connection-ray test between two surfaces. The far end is shortened by a
/// multiple of the origin bias so the target's own offset cannot register as
/// an occluder.
pub fn connection_occlusion_ray(
    scene: &Scene,
    surface: &Surface,
    direction: Vec3f,
    distance: Float,
) -> bool {
    let (origin, bias_distance) =
        surface.offset_ray_origin_with_bias(direction, OCCLUSION_BIAS_SCALE);
    !scene.occluded(
        origin,
        direction,
        surface.error,
        distance - 16.0 * bias_distance.abs(),
    )
}
