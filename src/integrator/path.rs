//! The unidirectional kernel: jittered primary rays, BSDF-driven bounces,
//! environment lookup on escape. Pixel index, bounce count, and throughput
//! live in this stack frame; rays stay purely geometric.

use crate::bsdf::sample_bsdf;
use crate::integrator::KernelContext;
use crate::surface::Surface;
use crate::{Float, Ray, Spectrum};

/// Upper bound on a single sample's radiance. Tames fireflies from
/// low-probability bounce chains without visibly biasing the estimate.
const SAMPLE_RADIANCE_CLAMP: Float = 64.0;

/// Trace `rays_per_pixel` independent samples for every pixel into the
/// worker image.
pub fn path_trace(ctx: &mut KernelContext<'_>, rays_per_pixel: u32) {
    for y in 0..ctx.height {
        for x in 0..ctx.width {
            let index = (y * ctx.width + x) as usize;
            let mut color = Spectrum::black();
            for _ in 0..rays_per_pixel {
                color += sample_radiance(ctx, x, y);
            }
            ctx.image[index] += color;
        }
    }
}

fn sample_radiance(ctx: &mut KernelContext<'_>, x: u32, y: u32) -> Spectrum {
    let mut ray = ctx.camera.jittered_ray_with_differentials(&mut ctx.rng, x, y);
    let mut throughput = Spectrum::uniform(1.0);
    let mut radiance = Spectrum::black();

    for bounce in 0..ctx.max_path_length {
        let Some(hit) = ctx.scene.intersect(&ray) else {
            radiance += throughput * ctx.scene.ibl.radiance(ray.direction);
            break;
        };
        let Some(surface) = Surface::from_hit(ctx.scene, &hit) else {
            break;
        };

        radiance += throughput * surface.emissive;

        if bounce + 1 >= ctx.max_path_length {
            break;
        }

        let Some(sample) = sample_bsdf(&surface, -ray.direction, &mut ctx.rng) else {
            break;
        };
        if sample.reflectance.is_black() {
            break;
        }
        throughput *= sample.reflectance;

        // secondary rays carry no differentials
        ray = Ray::new(surface.offset_ray_origin(sample.wi, 0.1), sample.wi);
        ray.tnear = surface.error;
    }

    radiance.map(|c| c.min(SAMPLE_RADIANCE_CLAMP))
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

    #[test]
    fn background_scene_equals_the_environment() {
        let scene = scenes::create("background").unwrap();
        let camera = RayCastCamera::new(&scene.camera, 4, 4);
        let mut ctx = KernelContext::new(
            &scene,
            &camera,
            Xoshiro256Plus::seed_from_u64(9),
            MAX_BOUNCE_COUNT,
        );
        path_trace(&mut ctx, 8);

        for pixel in &ctx.image {
            assert_abs_diff_eq!(pixel[0], 8.0 * scenes::BACKGROUND_RADIANCE, epsilon = 1e-3);
        }
    }

    #[test]
    fn cornell_render_is_finite() {
        let scene = scenes::create("cornell").unwrap();
        let camera = RayCastCamera::new(&scene.camera, 8, 8);
        let mut ctx = KernelContext::new(
            &scene,
            &camera,
            Xoshiro256Plus::seed_from_u64(1),
            MAX_BOUNCE_COUNT,
        );
        path_trace(&mut ctx, 4);

        for pixel in &ctx.image {
            assert!(pixel.is_finite());
            assert!(pixel[0] >= 0.0);
        }
    }
}
