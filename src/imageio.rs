use std::path::Path;

use anyhow::{bail, Context};

use crate::texture::linear_to_srgb;
use crate::Spectrum;

/// Write a radiance image, dispatching on the output extension: `.exr`
/// stays linear, `.png` is gamma encoded.
pub fn write_image(
    path: impl AsRef<Path>,
    image: &[Spectrum],
    (width, height): (u32, u32),
) -> anyhow::Result<()> {
    let path = path.as_ref();
    assert_eq!(image.len(), (width * height) as usize);

    match path.extension().and_then(|e| e.to_str()) {
        Some("exr") => write_exr(path, image, (width, height)),
        Some("png") => write_png(path, image, (width, height)),
        _ => bail!("unsupported output format: {}", path.display()),
    }
}

pub fn write_exr(
    path: &Path,
    image: &[Spectrum],
    (width, height): (u32, u32),
) -> anyhow::Result<()> {
    exr::prelude::write_rgb_file(path, width as usize, height as usize, |x, y| {
        let pixel = image[y * width as usize + x];
        (pixel[0], pixel[1], pixel[2])
    })
    .with_context(|| format!("writing exr image {}", path.display()))?;
    Ok(())
}

pub fn write_png(
    path: &Path,
    image: &[Spectrum],
    (width, height): (u32, u32),
) -> anyhow::Result<()> {
    let encoded = image::RgbImage::from_fn(width, height, |x, y| {
        let pixel = image[(y * width + x) as usize];
        let to_byte = |c: f32| (linear_to_srgb(c).clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        image::Rgb([to_byte(pixel[0]), to_byte(pixel[1]), to_byte(pixel[2])])
    });
    encoded
        .save(path)
        .with_context(|| format!("writing png image {}", path.display()))?;
    Ok(())
}
