//! BSDF evaluation and sampling over the closed `Shader` set. Directions are
//! world-space and follow one convention everywhere: `wo` points back along
//! the incoming direction, `wi` is the outgoing scattering direction.

use cgmath::InnerSpace;
use rand::Rng;

use crate::material::Shader;
use crate::math::{coordinate_system, reflect};
use crate::sampling::cosine_sample_hemisphere;
use crate::surface::Surface;
use crate::{Float, Point2f, Spectrum, Vec3f, INV_PI};

/// A sampled scattering direction. `reflectance` is the throughput factor
/// `f * cos / pdf`, ready to multiply into the path throughput.
pub struct BsdfSample {
    pub wi: Vec3f,
    pub reflectance: Spectrum,
    pub forward_pdf_w: Float,
    pub reverse_pdf_w: Float,
}

/// Evaluate the surface BSDF for a pair of directions. Returns the
/// reflectance and the forward/reverse solid-angle pdfs of sampling `wi`
/// (respectively `wo`) with `sample_bsdf`.
pub fn evaluate_bsdf(surface: &Surface, wo: Vec3f, wi: Vec3f) -> (Spectrum, Float, Float) {
    match surface.shader {
        Shader::Diffuse => {
            let n = surface.perturbed_normal;
            let cos_o = n.dot(wo);
            let cos_i = n.dot(wi);
            if cos_o <= 0.0 || cos_i <= 0.0 {
                return (Spectrum::black(), 0.0, 0.0);
            }
            let f = surface.albedo * INV_PI;
            (f, cos_i * INV_PI, cos_o * INV_PI)
        }
        // delta distribution; connections never line up with it
        Shader::Mirror => (Spectrum::black(), 0.0, 0.0),
    }
}

/// Sample a scattering direction. `None` means the path should end here.
pub fn sample_bsdf(surface: &Surface, wo: Vec3f, rng: &mut impl Rng) -> Option<BsdfSample> {
    match surface.shader {
        Shader::Diffuse => {
            let n = surface.perturbed_normal;
            let cos_o = n.dot(wo);
            if cos_o <= 0.0 {
                return None;
            }

            let u = Point2f::new(rng.gen::<Float>(), rng.gen::<Float>());
            let (local, pdf) = cosine_sample_hemisphere(u);
            if pdf <= 0.0 {
                return None;
            }
            let (t, b) = coordinate_system(n);
            let wi = (local.x * t + local.y * b + local.z * n).normalize();

            // cosine-weighted sampling cancels f * cos / pdf down to the
            // albedo
            Some(BsdfSample {
                wi,
                reflectance: surface.albedo,
                forward_pdf_w: pdf,
                reverse_pdf_w: cos_o * INV_PI,
            })
        }
        Shader::Mirror => {
            let n = surface.perturbed_normal;
            if n.dot(wo) <= 0.0 {
                return None;
            }
            Some(BsdfSample {
                wi: reflect(wo, n),
                reflectance: surface.specular,
                forward_pdf_w: 1.0,
                reverse_pdf_w: 1.0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraDesc;
    use crate::geometry::Ray;
    use crate::ibl::Ibl;
    use crate::material::Material;
    use crate::scene::{Scene, SceneData, VertexData};
    use crate::{Point3f, PI};
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    fn surface_with(material: Material) -> Surface {
        let vertices = vec![
            VertexData {
                position: Point3f::new(-1.0, -1.0, 2.0),
                normal: Vec3f::new(0.0, 0.0, -1.0),
                tangent: Vec3f::new(1.0, 0.0, 0.0),
                bitangent_sign: 1.0,
                uv: Point2f::new(0.0, 0.0),
                material_index: 0,
            },
            VertexData {
                position: Point3f::new(1.0, -1.0, 2.0),
                normal: Vec3f::new(0.0, 0.0, -1.0),
                tangent: Vec3f::new(1.0, 0.0, 0.0),
                bitangent_sign: 1.0,
                uv: Point2f::new(1.0, 0.0),
                material_index: 0,
            },
            VertexData {
                position: Point3f::new(0.0, 1.0, 2.0),
                normal: Vec3f::new(0.0, 0.0, -1.0),
                tangent: Vec3f::new(1.0, 0.0, 0.0),
                bitangent_sign: 1.0,
                uv: Point2f::new(0.5, 1.0),
                material_index: 0,
            },
        ];
        let data = SceneData {
            indices: vec![0, 1, 2],
            vertices,
            materials: vec![material],
            textures: Vec::new(),
        };
        let camera = CameraDesc {
            position: Point3f::new(0.0, 0.0, 0.0),
            look_at: Point3f::new(0.0, 0.0, 1.0),
            up: Vec3f::new(0.0, 1.0, 0.0),
            fov: 1.0,
        };
        let scene = Scene::new(data, camera, Ibl::uniform(Spectrum::uniform(1.0))).unwrap();
        let ray = Ray::new(Point3f::new(0.0, 0.0, 0.0), Vec3f::new(0.0, 0.0, 1.0));
        let hit = scene.intersect(&ray).unwrap();
        Surface::from_hit(&scene, &hit).unwrap()
    }

    #[test]
    fn diffuse_eval_is_reciprocal_in_pdfs() {
        let surface = surface_with(Material::diffuse(Spectrum::uniform(0.8)));
        let n = surface.perturbed_normal;
        let wo = (n + Vec3f::new(0.3, 0.1, 0.0)).normalize();
        let wi = (n + Vec3f::new(-0.2, 0.4, 0.0)).normalize();
        let (f, fwd, rev) = evaluate_bsdf(&surface, wo, wi);
        assert_abs_diff_eq!(f[0], 0.8 / PI, epsilon = 1e-5);
        assert_abs_diff_eq!(fwd, n.dot(wi) * INV_PI, epsilon = 1e-5);
        assert_abs_diff_eq!(rev, n.dot(wo) * INV_PI, epsilon = 1e-5);
    }

    #[test]
    fn diffuse_samples_stay_in_upper_hemisphere() {
        let surface = surface_with(Material::diffuse(Spectrum::uniform(0.5)));
        let n = surface.perturbed_normal;
        let mut rng = Xoshiro256Plus::seed_from_u64(1);
        for _ in 0..64 {
            let s = sample_bsdf(&surface, n, &mut rng).unwrap();
            assert!(s.wi.dot(n) > 0.0);
            assert!(s.forward_pdf_w > 0.0);
            assert_abs_diff_eq!(s.reflectance[0], 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn mirror_reflects_about_the_normal() {
        let surface = surface_with(Material::mirror(Spectrum::uniform(0.9)));
        let n = surface.perturbed_normal;
        let wo = (n + Vec3f::new(0.5, 0.0, 0.0)).normalize();
        let mut rng = Xoshiro256Plus::seed_from_u64(2);
        let s = sample_bsdf(&surface, wo, &mut rng).unwrap();
        assert_abs_diff_eq!(s.wi.dot(n), wo.dot(n), epsilon = 1e-5);
        let halfway = (s.wi + wo).normalize();
        assert_abs_diff_eq!(halfway.dot(n), 1.0, epsilon = 1e-5);
        // evaluation of a delta lobe is always zero
        let (f, fwd, _) = evaluate_bsdf(&surface, wo, s.wi);
        assert!(f.is_black());
        assert_eq!(fwd, 0.0);
    }
}
