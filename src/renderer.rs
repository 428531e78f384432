//! The parallel driver: a fixed pool of worker threads, each running kernel
//! passes against a private image until the shared deadline passes, then
//! merging into the shared buffer under a lock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use anyhow::Context;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

use crate::camera::RayCastCamera;
use crate::integrator::path::path_trace;
use crate::integrator::vcm::VcmIntegrator;
use crate::integrator::KernelContext;
use crate::scene::Scene;
use crate::{Float, Spectrum};

pub const MAX_BOUNCE_COUNT: u32 = 10;
pub const INTEGRATION_SECONDS: f32 = 30.0;
pub const VCM_RADIUS_FACTOR: Float = 0.005;
pub const VCM_RADIUS_ALPHA: Float = 0.75;
pub const RAYS_PER_PIXEL: u32 = 256;
pub const ENABLE_MULTI_THREADING: bool = true;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Integrator {
    Vcm,
    Unidirectional,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub max_bounce_count: u32,
    pub integration_seconds: f32,
    pub rays_per_pixel: u32,
    pub vcm_radius_factor: Float,
    pub vcm_radius_alpha: Float,
    /// Worker count; 0 selects the compile-time default.
    pub threads: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings {
            width: 1280,
            height: 720,
            max_bounce_count: MAX_BOUNCE_COUNT,
            integration_seconds: INTEGRATION_SECONDS,
            rays_per_pixel: RAYS_PER_PIXEL,
            vcm_radius_factor: VCM_RADIUS_FACTOR,
            vcm_radius_alpha: VCM_RADIUS_ALPHA,
            threads: 0,
        }
    }
}

impl RenderSettings {
    pub fn worker_count(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else if ENABLE_MULTI_THREADING {
            8
        } else {
            1
        }
    }
}

/// Shared progress counters, all updated with atomic adds.
#[derive(Default)]
struct Progress {
    /// Workers that have started.
    kernel_indices: AtomicI64,
    /// Workers that have merged and finished.
    completed_threads: AtomicI64,
    /// Global monotonic pass id; drives the radius schedule.
    vcm_pass_count: AtomicI64,
    /// Final normalisation divisor for the VCM image.
    paths_evaluated_per_pixel: AtomicI64,
}

/// Merging-kernel radius for pass `k >= 1`.
fn vcm_kernel_radius(base_radius: Float, alpha: Float, pass_index: i64) -> Float {
    base_radius / (pass_index as Float).powf(0.5 * (1.0 - alpha))
}

/// Render the scene and return the normalised radiance image.
pub fn render(
    scene: &Scene,
    integrator: Integrator,
    settings: &RenderSettings,
) -> anyhow::Result<Vec<Spectrum>> {
    let width = settings.width;
    let height = settings.height;
    let pixel_count = (width * height) as usize;

    let camera = RayCastCamera::new(&scene.camera, width, height);
    let base_radius = settings.vcm_radius_factor * scene.bounding_sphere.radius;

    let shared_image = Mutex::new(vec![Spectrum::black(); pixel_count]);
    let progress = Progress::default();
    let start_time = Instant::now();

    let worker_count = settings.worker_count();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .build()
        .context("building the render worker pool")?;

    tracing::info!(
        worker_count,
        width,
        height,
        ?integrator,
        "starting integration"
    );

    pool.broadcast(|_| {
        let kernel_index = progress.kernel_indices.fetch_add(1, Ordering::SeqCst);
        let rng = Xoshiro256Plus::seed_from_u64(kernel_index as u64);
        let mut ctx = KernelContext::new(scene, &camera, rng, settings.max_bounce_count);

        match integrator {
            Integrator::Vcm => {
                let mut vcm = VcmIntegrator::new();
                let mut passes_traced: i64 = 0;
                loop {
                    let pass_index = progress.vcm_pass_count.fetch_add(1, Ordering::SeqCst) + 1;
                    let radius =
                        vcm_kernel_radius(base_radius, settings.vcm_radius_alpha, pass_index);

                    vcm.run_pass(&mut ctx, radius);
                    passes_traced += 1;

                    let elapsed = start_time.elapsed().as_secs_f32();
                    if elapsed >= settings.integration_seconds {
                        break;
                    }
                }
                progress
                    .paths_evaluated_per_pixel
                    .fetch_add(passes_traced, Ordering::SeqCst);
                tracing::debug!(kernel_index, passes_traced, "vcm worker finished");
            }
            Integrator::Unidirectional => {
                // split the fixed ray budget across the pool
                let rays = (settings.rays_per_pixel / worker_count as u32).max(1);
                path_trace(&mut ctx, rays);
                tracing::debug!(kernel_index, rays, "path worker finished");
            }
        }

        {
            let mut shared = shared_image.lock();
            for (dst, src) in shared.iter_mut().zip(&ctx.image) {
                *dst += *src;
            }
        }
        progress.completed_threads.fetch_add(1, Ordering::SeqCst);
    });

    debug_assert_eq!(
        progress.completed_threads.load(Ordering::SeqCst),
        progress.kernel_indices.load(Ordering::SeqCst)
    );

    let divisor = match integrator {
        Integrator::Vcm => progress.paths_evaluated_per_pixel.load(Ordering::SeqCst) as Float,
        Integrator::Unidirectional => settings.rays_per_pixel as Float,
    };

    let mut image = shared_image.into_inner();
    let inv_divisor = 1.0 / divisor;
    for pixel in &mut image {
        *pixel *= inv_divisor;
    }

    tracing::info!(
        elapsed_seconds = start_time.elapsed().as_secs_f32(),
        divisor,
        "integration complete"
    );

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn radius_schedule_shrinks_monotonically() {
        let base = 0.5;
        let mut previous = Float::INFINITY;
        for pass in 1..=64 {
            let r = vcm_kernel_radius(base, VCM_RADIUS_ALPHA, pass);
            assert!(r <= base + 1e-6);
            assert!(r <= previous);
            previous = r;
        }
        assert_abs_diff_eq!(vcm_kernel_radius(base, VCM_RADIUS_ALPHA, 1), base);
    }

    #[test]
    fn worker_count_defaults() {
        let mut settings = RenderSettings::default();
        assert_eq!(settings.worker_count(), if ENABLE_MULTI_THREADING { 8 } else { 1 });
        settings.threads = 3;
        assert_eq!(settings.worker_count(), 3);
    }
}
