//! One pass of vertex connection and merging: trace one light subpath per
//! pixel, index the stored vertices in a spatial hash, then walk a camera
//! subpath per pixel combining five estimators under MIS.

use cgmath::{InnerSpace, MetricSpace};

use crate::bsdf::evaluate_bsdf;
use crate::hash_grid::HashGrid;
use crate::integrator::{
    connection_occlusion_ray, occlusion_ray, sample_bsdf_scattering, KernelContext, PathState,
};
use crate::surface::Surface;
use crate::{abs_dot, Float, Point3f, Ray, Spectrum, PI};

/// A stored light-subpath vertex, available for connection and merging
/// during the camera scan of the same pass.
pub struct VcmVertex {
    pub throughput: Spectrum,
    pub path_length: u32,
    pub d_vcm: Float,
    pub d_vc: Float,
    pub d_vm: Float,
    pub surface: Surface,
}

/// Per-worker VCM state. Vertex and grid storage persists across passes;
/// contents do not.
pub struct VcmIntegrator {
    path_vertices: Vec<VcmVertex>,
    /// Exclusive end of each light subpath in `path_vertices`; one entry per
    /// pixel.
    path_ends: Vec<u32>,
    /// World positions of `path_vertices`, kept in lockstep for the grid.
    vertex_positions: Vec<Point3f>,
    hash_grid: HashGrid,
}

impl VcmIntegrator {
    pub fn new() -> Self {
        VcmIntegrator {
            path_vertices: Vec::new(),
            path_ends: Vec::new(),
            vertex_positions: Vec::new(),
            hash_grid: HashGrid::new(),
        }
    }

    /// Run one complete pass at the given merging radius, accumulating into
    /// the worker image.
    pub fn run_pass(&mut self, ctx: &mut KernelContext<'_>, kernel_radius: Float) {
        let light_path_count = (ctx.width * ctx.height) as Float;

        // a zero radius turns merging off entirely and the MIS weights
        // degrade to plain bidirectional path tracing
        let kernel_radius_sq = kernel_radius * kernel_radius;
        let (vm_weight, vc_weight, vm_normalization) = if kernel_radius > 0.0 {
            let kernel_area = PI * kernel_radius_sq * light_path_count;
            (kernel_area, 1.0 / kernel_area, 1.0 / kernel_area)
        } else {
            (0.0, 0.0, 0.0)
        };

        self.path_vertices.clear();
        self.path_ends.clear();
        self.vertex_positions.clear();

        self.trace_light_subpaths(ctx, vm_weight, vc_weight, light_path_count);
        if kernel_radius > 0.0 {
            self.hash_grid.build(&self.vertex_positions, kernel_radius);
        }
        self.trace_camera_subpaths(ctx, vm_weight, vc_weight, vm_normalization, light_path_count);
    }

    fn trace_light_subpaths(
        &mut self,
        ctx: &mut KernelContext<'_>,
        vm_weight: Float,
        vc_weight: Float,
        light_path_count: Float,
    ) {
        let path_count = (ctx.width * ctx.height) as usize;
        for _ in 0..path_count {
            if let Some(mut state) = generate_light_sample(ctx, vc_weight) {
                while state.path_length + 2 < ctx.max_path_length {
                    // no differentials on light path rays
                    let ray = Ray::new(state.position, state.direction);
                    let Some(hit) = ctx.scene.intersect(&ray) else {
                        break;
                    };
                    let Some(surface) = Surface::from_hit(ctx.scene, &hit) else {
                        break;
                    };

                    let connection_length_sq = state.position.distance2(surface.position);
                    // the light subpath divides by the perturbed-normal
                    // cosine; the camera subpath uses the geometric normal
                    let abs_cos = abs_dot(surface.perturbed_normal, hit.view_direction);
                    state.update_at_hit(connection_length_sq, abs_cos);

                    self.path_vertices.push(VcmVertex {
                        throughput: state.throughput,
                        path_length: state.path_length,
                        d_vcm: state.d_vcm,
                        d_vc: state.d_vc,
                        d_vm: state.d_vm,
                        surface,
                    });
                    self.vertex_positions.push(surface.position);

                    connect_light_path_to_camera(ctx, &state, &surface, vm_weight, light_path_count);

                    if !sample_bsdf_scattering(&mut ctx.rng, &surface, vm_weight, vc_weight, &mut state)
                    {
                        break;
                    }
                }
            }
            self.path_ends.push(self.path_vertices.len() as u32);
        }
    }

    fn trace_camera_subpaths(
        &mut self,
        ctx: &mut KernelContext<'_>,
        vm_weight: Float,
        vc_weight: Float,
        vm_normalization: Float,
        light_path_count: Float,
    ) {
        let max_path_length = ctx.max_path_length;
        for y in 0..ctx.height {
            for x in 0..ctx.width {
                let index = (y * ctx.width + x) as usize;
                let mut state = generate_camera_sample(ctx, x, y, light_path_count);
                let mut color = Spectrum::black();

                while state.path_length < max_path_length {
                    let ray = Ray::new(state.position, state.direction);
                    let Some(hit) = ctx.scene.intersect(&ray) else {
                        // escaped into the environment
                        color += state.throughput * connect_to_sky(ctx, &state);
                        break;
                    };
                    let Some(surface) = Surface::from_hit(ctx.scene, &hit) else {
                        break;
                    };

                    let connection_length_sq = state.position.distance2(surface.position);
                    let abs_cos = abs_dot(surface.geometric_normal, hit.view_direction);
                    state.update_at_hit(connection_length_sq, abs_cos);

                    // next-event estimation against the environment
                    if state.path_length + 1 < max_path_length {
                        color += state.throughput
                            * connect_camera_path_to_light(ctx, &state, &surface, vm_weight);
                    }

                    // connect to the stored vertices of this pixel's light
                    // subpath
                    {
                        let start = if index == 0 {
                            0
                        } else {
                            self.path_ends[index - 1] as usize
                        };
                        let end = self.path_ends[index] as usize;
                        for light_vertex in &self.path_vertices[start..end] {
                            // vertices arrive in path order; everything past
                            // this one is longer still
                            if light_vertex.path_length + 1 + state.path_length > max_path_length {
                                break;
                            }
                            color += state.throughput
                                * light_vertex.throughput
                                * connect_path_vertices(
                                    ctx,
                                    &surface,
                                    &state,
                                    light_vertex,
                                    vm_weight,
                                );
                        }
                    }

                    // merge with every light vertex inside the kernel radius
                    if vm_normalization > 0.0 {
                        let mut merged = Spectrum::black();
                        let path_vertices = &self.path_vertices;
                        self.hash_grid.range(
                            &self.vertex_positions,
                            surface.position,
                            |vertex_index| {
                                let light_vertex = &path_vertices[vertex_index as usize];
                                if light_vertex.path_length + state.path_length > max_path_length {
                                    return;
                                }
                                merged += merge_vertices(&surface, &state, light_vertex, vc_weight);
                            },
                        );
                        color += state.throughput * vm_normalization * merged;
                    }

                    if !sample_bsdf_scattering(&mut ctx.rng, &surface, vm_weight, vc_weight, &mut state)
                    {
                        break;
                    }
                }

                ctx.image[index] += color;
            }
        }
    }
}

impl Default for VcmIntegrator {
    fn default() -> Self {
        VcmIntegrator::new()
    }
}

/// Start a light subpath from the environment. `None` when the emission
/// sample lands on a zero-probability texel.
fn generate_light_sample(ctx: &mut KernelContext<'_>, vc_weight: Float) -> Option<PathState> {
    let sample = ctx.scene.ibl.sample_emission(&mut ctx.rng)?;

    let inv_emission_pdf = 1.0 / sample.emission_pdf_w;
    let d_vc = sample.cos_theta_light * inv_emission_pdf;
    Some(PathState {
        position: sample.position,
        direction: sample.direction,
        throughput: sample.radiance * inv_emission_pdf,
        path_length: 1,
        d_vcm: sample.direction_pdf_a * inv_emission_pdf,
        d_vc,
        d_vm: d_vc * vc_weight,
        // an environment emitter is sampled in solid angle, not area
        is_area_measure: false,
    })
}

/// Start a camera subpath through pixel `(x, y)`.
fn generate_camera_sample(
    ctx: &mut KernelContext<'_>,
    x: u32,
    y: u32,
    light_path_count: Float,
) -> PathState {
    let ray = ctx.camera.jittered_ray(&mut ctx.rng, x, y);
    let image_to_solid_angle = ctx.camera.image_to_solid_angle(ray.direction);

    PathState {
        position: ray.origin,
        direction: ray.direction,
        throughput: Spectrum::uniform(1.0),
        path_length: 1,
        d_vcm: light_path_count / image_to_solid_angle,
        d_vc: 0.0,
        d_vm: 0.0,
        is_area_measure: true,
    }
}

/// Project a light vertex into the camera and splat its weighted
/// contribution into the worker image.
fn connect_light_path_to_camera(
    ctx: &mut KernelContext<'_>,
    state: &PathState,
    surface: &Surface,
    vm_weight: Float,
    light_path_count: Float,
) {
    let camera = ctx.camera;

    let mut to_position = surface.position - camera.position;
    if camera.forward.dot(to_position) <= 0.0 {
        return;
    }

    let image_position = camera.world_to_image(surface.position);
    if image_position.x < 0
        || image_position.x >= camera.viewport_width as i32
        || image_position.y < 0
        || image_position.y >= camera.viewport_height as i32
    {
        return;
    }

    let distance = to_position.magnitude();
    to_position /= distance;

    let (bsdf, _forward_pdf, reverse_pdf) = evaluate_bsdf(surface, -state.direction, -to_position);
    if bsdf.is_black() {
        return;
    }

    let cos_theta_camera = camera.forward.dot(to_position);
    let image_to_solid_angle = camera.image_to_solid_angle(to_position);
    let image_to_surface = image_to_solid_angle * cos_theta_camera;
    let camera_pdf_a = image_to_surface;

    let light_partial_weight =
        (camera_pdf_a / light_path_count) * (vm_weight + state.d_vcm + state.d_vc * reverse_pdf);
    let mis_weight = 1.0 / (light_partial_weight + 1.0);

    let contribution =
        mis_weight * state.throughput * bsdf * (image_to_surface / light_path_count);
    if contribution.is_black() {
        return;
    }

    if occlusion_ray(ctx.scene, surface, -to_position, distance) {
        let index = (image_position.y as u32 * ctx.width + image_position.x as u32) as usize;
        ctx.image[index] += contribution;
    }
}

/// Radiance for a camera subpath that escaped along `state.direction`. The
/// primary ray sees the environment unweighted.
fn connect_to_sky(ctx: &KernelContext<'_>, state: &PathState) -> Spectrum {
    let (radiance, direct_pdf_a, emission_pdf_w) = ctx.scene.ibl.evaluate_direct(state.direction);

    if state.path_length == 1 {
        return radiance;
    }

    let camera_weight = direct_pdf_a * state.d_vcm + emission_pdf_w * state.d_vc;
    let mis_weight = 1.0 / (1.0 + camera_weight);
    mis_weight * radiance
}

/// Next-event estimation: sample the environment and weigh the connection
/// against the strategies that could have produced the same path.
fn connect_camera_path_to_light(
    ctx: &mut KernelContext<'_>,
    state: &PathState,
    surface: &Surface,
    vm_weight: Float,
) -> Spectrum {
    let Some(sample) = ctx.scene.ibl.sample_direct(&mut ctx.rng) else {
        return Spectrum::black();
    };

    let (bsdf, forward_pdf, reverse_pdf) = evaluate_bsdf(surface, -state.direction, sample.direction);
    if bsdf.is_black() {
        return Spectrum::black();
    }

    let cos_theta_surface = abs_dot(surface.perturbed_normal, sample.direction);

    let light_weight = forward_pdf / sample.direction_pdf_a;
    let camera_weight = (sample.emission_pdf_w * cos_theta_surface
        / (sample.direction_pdf_a * sample.cos_theta_light))
        * (vm_weight + state.d_vcm + state.d_vc * reverse_pdf);
    let mis_weight = 1.0 / (light_weight + 1.0 + camera_weight);

    let contribution =
        (mis_weight * cos_theta_surface / sample.direction_pdf_a) * sample.radiance * bsdf;
    if contribution.is_black() {
        return Spectrum::black();
    }

    if occlusion_ray(ctx.scene, surface, sample.direction, sample.distance) {
        contribution
    } else {
        Spectrum::black()
    }
}

/// Deterministic connection between the current camera vertex and a stored
/// light vertex.
fn connect_path_vertices(
    ctx: &KernelContext<'_>,
    surface: &Surface,
    camera_state: &PathState,
    light_vertex: &VcmVertex,
    vm_weight: Float,
) -> Spectrum {
    let mut direction = light_vertex.surface.position - surface.position;
    let distance_sq = direction.magnitude2();
    let distance = distance_sq.sqrt();
    direction /= distance;

    let (camera_bsdf, camera_forward_pdf, camera_reverse_pdf) =
        evaluate_bsdf(surface, -camera_state.direction, direction);
    if camera_bsdf.is_black() {
        return Spectrum::black();
    }

    let (light_bsdf, light_forward_pdf, light_reverse_pdf) =
        evaluate_bsdf(&light_vertex.surface, -direction, light_vertex.surface.view);
    if light_bsdf.is_black() {
        return Spectrum::black();
    }

    let cos_theta_camera = abs_dot(direction, surface.perturbed_normal);
    let cos_theta_light = abs_dot(-direction, light_vertex.surface.perturbed_normal);

    let geometry_term = cos_theta_light * cos_theta_camera / distance_sq;
    if geometry_term < 0.0 {
        return Spectrum::black();
    }

    // solid angle to area measure
    let camera_bsdf_pdf_a = camera_forward_pdf * cos_theta_light / distance_sq;
    let light_bsdf_pdf_a = light_forward_pdf * cos_theta_camera / distance_sq;

    let light_weight = camera_bsdf_pdf_a
        * (vm_weight + light_vertex.d_vcm + light_vertex.d_vc * light_reverse_pdf);
    let camera_weight = light_bsdf_pdf_a
        * (vm_weight + camera_state.d_vcm + camera_state.d_vc * camera_reverse_pdf);

    let mis_weight = 1.0 / (light_weight + 1.0 + camera_weight);

    let contribution = mis_weight * geometry_term * camera_bsdf * light_bsdf;
    if contribution.is_black() {
        return Spectrum::black();
    }

    if connection_occlusion_ray(ctx.scene, surface, direction, distance) {
        contribution
    } else {
        Spectrum::black()
    }
}

/// Density-estimation contribution of one light vertex landing inside the
/// merging kernel around the camera vertex.
fn merge_vertices(
    surface: &Surface,
    camera_state: &PathState,
    light_vertex: &VcmVertex,
    vc_weight: Float,
) -> Spectrum {
    let (bsdf, forward_pdf, reverse_pdf) =
        evaluate_bsdf(surface, -camera_state.direction, light_vertex.surface.view);
    if bsdf.is_black() {
        return Spectrum::black();
    }

    let light_weight = light_vertex.d_vcm * vc_weight + light_vertex.d_vm * forward_pdf;
    let camera_weight = camera_state.d_vcm * vc_weight + camera_state.d_vm * reverse_pdf;

    debug_assert!(!bsdf.has_nans());
    debug_assert!(!light_vertex.throughput.has_nans());

    let mis_weight = 1.0 / (light_weight + 1.0 + camera_weight);
    mis_weight * bsdf * light_vertex.throughput
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::RayCastCamera;
    use crate::renderer::MAX_BOUNCE_COUNT;
    use crate::scenes;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    fn run_one_pass(scene_name: &str, radius: Float) -> (Vec<Spectrum>, usize) {
        let scene = scenes::create(scene_name).unwrap();
        let camera = RayCastCamera::new(&scene.camera, 8, 8);
        let mut ctx = KernelContext::new(
            &scene,
            &camera,
            Xoshiro256Plus::seed_from_u64(42),
            MAX_BOUNCE_COUNT,
        );
        let mut integrator = VcmIntegrator::new();
        integrator.run_pass(&mut ctx, radius);
        let stored = integrator.path_vertices.len();

        // stored vertices always satisfy the storage bound
        for v in &integrator.path_vertices {
            assert!(v.path_length >= 1);
            assert!(v.path_length < MAX_BOUNCE_COUNT - 1);
        }
        // one subpath record per pixel, monotonically non-decreasing
        assert_eq!(integrator.path_ends.len(), 64);
        for w in integrator.path_ends.windows(2) {
            assert!(w[0] <= w[1]);
        }
        assert_eq!(
            *integrator.path_ends.last().unwrap() as usize,
            integrator.path_vertices.len()
        );
        assert_eq!(integrator.vertex_positions.len(), integrator.path_vertices.len());

        (ctx.image, stored)
    }

    #[test]
    fn background_scene_returns_the_environment() {
        let (image, stored) = run_one_pass("background", 0.05);
        assert_eq!(stored, 0, "no geometry, no stored light vertices");
        let expected = scenes::BACKGROUND_RADIANCE;
        for pixel in &image {
            assert_abs_diff_eq!(pixel[0], expected, epsilon = 1e-4);
            assert_abs_diff_eq!(pixel[1], expected, epsilon = 1e-4);
            assert_abs_diff_eq!(pixel[2], expected, epsilon = 1e-4);
        }
    }

    #[test]
    fn cornell_pass_is_finite_and_nonnegative() {
        let (image, stored) = run_one_pass("cornell", 0.02);
        assert!(stored > 0, "the box must catch light vertices");
        for pixel in &image {
            assert!(pixel.is_finite());
            assert!(pixel[0] >= 0.0 && pixel[1] >= 0.0 && pixel[2] >= 0.0);
        }
    }

    #[test]
    fn zero_radius_disables_merging_but_still_renders() {
        // with the kernel radius forced to zero, vertex merging covers a
        // zero-volume neighbourhood and contributes nothing; connections
        // still produce a finite image
        let (image, _) = run_one_pass("cornell", 0.0);
        for pixel in &image {
            assert!(pixel.is_finite());
        }
    }
}
