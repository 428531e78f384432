use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};

use lumen::renderer::{self, Integrator, RenderSettings};
use lumen::{imageio, scenes};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum IntegratorArg {
    Vcm,
    Path,
}

/// Render a built-in scene to an EXR or PNG image.
#[derive(Parser)]
#[command(version, about)]
struct Opts {
    /// Scene name: background, furnace, cornell, cornell-mirror
    scene: String,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    #[arg(long, value_enum, default_value = "vcm")]
    integrator: IntegratorArg,

    /// Wall-clock budget for the VCM integrator, seconds
    #[arg(long)]
    seconds: Option<f32>,

    /// Primary rays per pixel for the unidirectional integrator
    #[arg(long)]
    samples: Option<u32>,

    /// Worker threads; 0 picks the built-in default
    #[arg(short = 't', long, default_value_t = 0)]
    threads: usize,

    #[arg(short, long, default_value = "render.exr")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let opts = Opts::parse();

    let scene = scenes::create(&opts.scene)?;

    let mut settings = RenderSettings {
        width: opts.width,
        height: opts.height,
        threads: opts.threads,
        ..RenderSettings::default()
    };
    if let Some(seconds) = opts.seconds {
        settings.integration_seconds = seconds;
    }
    if let Some(samples) = opts.samples {
        settings.rays_per_pixel = samples;
    }

    let integrator = match opts.integrator {
        IntegratorArg::Vcm => Integrator::Vcm,
        IntegratorArg::Path => Integrator::Unidirectional,
    };

    let start = Instant::now();
    let image = renderer::render(&scene, integrator, &settings)?;
    tracing::info!(
        "rendered {} in {:.2} s",
        opts.scene,
        start.elapsed().as_secs_f64()
    );

    imageio::write_image(&opts.output, &image, (settings.width, settings.height))?;
    tracing::info!("wrote {}", opts.output.display());
    Ok(())
}
