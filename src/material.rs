use bitflags::bitflags;

use crate::{Float, Spectrum};

/// Sentinel for "no texture bound to this channel".
pub const INVALID_TEXTURE: u32 = u32::MAX;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MaterialFlags: u32 {
        /// Hits on the back side of this material are legitimate.
        const TRANSPARENT = 1 << 0;
        /// At least one texture channel is bound; uv differentials are
        /// worth computing for filtering.
        const HAS_TEXTURES = 1 << 1;
        /// Keep analytic normal derivatives on the shading point.
        const PRESERVE_RAY_DIFFERENTIALS = 1 << 2;
    }
}

/// Scattering model selector. The integrator dispatches over this closed
/// set; see `bsdf`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shader {
    Diffuse,
    Mirror,
}

#[derive(Clone, Debug)]
pub struct Material {
    pub shader: Shader,
    pub flags: MaterialFlags,

    pub albedo: Spectrum,
    pub roughness: Float,
    pub metalness: Float,
    pub ior: Float,

    pub albedo_texture: u32,
    pub specular_texture: u32,
    pub roughness_texture: u32,
    pub metalness_texture: u32,
    pub emissive_texture: u32,
    pub normal_texture: u32,
}

impl Default for Material {
    fn default() -> Self {
        Material {
            shader: Shader::Diffuse,
            flags: MaterialFlags::empty(),
            albedo: Spectrum::uniform(1.0),
            roughness: 1.0,
            metalness: 0.0,
            ior: 1.5,
            albedo_texture: INVALID_TEXTURE,
            specular_texture: INVALID_TEXTURE,
            roughness_texture: INVALID_TEXTURE,
            metalness_texture: INVALID_TEXTURE,
            emissive_texture: INVALID_TEXTURE,
            normal_texture: INVALID_TEXTURE,
        }
    }
}

impl Material {
    pub fn diffuse(albedo: Spectrum) -> Self {
        Material {
            albedo,
            ..Material::default()
        }
    }

    pub fn mirror(specular: Spectrum) -> Self {
        Material {
            shader: Shader::Mirror,
            albedo: specular,
            roughness: 0.0,
            ..Material::default()
        }
    }
}
