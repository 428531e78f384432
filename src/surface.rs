//! Reconstruction of a fully parameterised shading point from a ray/triangle
//! hit: interpolated frames, position and normal derivatives, uv footprints,
//! and the textured material channels.

use cgmath::{EuclideanSpace, InnerSpace, Matrix, Matrix3};

use crate::geometry::RayDifferentials;
use crate::material::{MaterialFlags, Shader, INVALID_TEXTURE};
use crate::math::{coordinate_system, solve_linear_system_2x2, SMALL_FLOAT_EPSILON};
use crate::scene::Scene;
use crate::texture::{srgb_to_linear, ENABLE_EWA};
use crate::{Float, Point2f, Point3f, Spectrum, Vec2f, Vec3f};

/// A ray/triangle intersection, as delivered by the intersection engine.
#[derive(Clone, Copy, Debug)]
pub struct Hit {
    pub position: Point3f,
    pub prim_id: u32,
    /// Barycentric weights of the triangle's second and third vertices.
    pub bary: Point2f,
    pub view_direction: Vec3f,
    /// Conservative bound on the positional error of `position`.
    pub error: Float,
    pub differentials: Option<RayDifferentials>,
}

/// A fully-described shading point.
#[derive(Clone, Copy, Debug)]
pub struct Surface {
    pub position: Point3f,
    pub error: Float,
    pub geometric_normal: Vec3f,
    pub perturbed_normal: Vec3f,
    /// Direction back toward the previous path vertex.
    pub view: Vec3f,

    /// Columns `(tangent, normal, bitangent)`; tangent space carries the
    /// shading normal along +Y.
    pub tangent_to_world: Matrix3<Float>,
    pub world_to_tangent: Matrix3<Float>,

    pub dpdu: Vec3f,
    pub dpdv: Vec3f,
    pub dndu: Vec3f,
    pub dndv: Vec3f,
    pub duvdx: Vec2f,
    pub duvdy: Vec2f,

    pub emissive: Spectrum,
    pub albedo: Spectrum,
    pub specular: Spectrum,
    pub roughness: Float,
    pub metalness: Float,
    pub ior: Float,

    pub shader: Shader,
    pub flags: MaterialFlags,
}

impl Surface {
    /// Reconstruct the shading point for a hit.
    ///
    /// Fails in exactly one case: the hit is on the back side of a material
    /// that is not transparent, which float precision produces on closed
    /// meshes; the caller treats the hit as if it did not happen.
    pub fn from_hit(scene: &Scene, hit: &Hit) -> Option<Surface> {
        let data = &scene.data;
        let base = 3 * hit.prim_id as usize;
        let i0 = data.indices[base] as usize;
        let i1 = data.indices[base + 1] as usize;
        let i2 = data.indices[base + 2] as usize;

        let v0 = &data.vertices[i0];
        let v1 = &data.vertices[i1];
        let v2 = &data.vertices[i2];
        let material = &data.materials[v0.material_index as usize];

        let b0 = v0.normal.cross(v0.tangent) * v0.bitangent_sign;
        let b1 = v1.normal.cross(v1.tangent) * v1.bitangent_sign;
        let b2 = v2.normal.cross(v2.tangent) * v2.bitangent_sign;

        // barycentric weights; clamp the first against precision drift
        let a0 = (1.0 - (hit.bary.x + hit.bary.y)).clamp(0.0, 1.0);
        let a1 = hit.bary.x;
        let a2 = hit.bary.y;

        let t = (a0 * v0.tangent + a1 * v1.tangent + a2 * v2.tangent).normalize();
        let b = (a0 * b0 + a1 * b1 + a2 * b2).normalize();
        let n = (a0 * v0.normal + a1 * v1.normal + a2 * v2.normal).normalize();

        if n.dot(hit.view_direction) < 0.0 && !material.flags.contains(MaterialFlags::TRANSPARENT) {
            // inside of a closed, non-transparent object
            return None;
        }

        let tangent_to_world = Matrix3::from_cols(t, n, b);
        let world_to_tangent = tangent_to_world.transpose();

        let has_differentials = hit.differentials.is_some();
        let can_use_differentials =
            material.flags.contains(MaterialFlags::HAS_TEXTURES) && has_differentials;
        let preserve_differentials = material
            .flags
            .contains(MaterialFlags::PRESERVE_RAY_DIFFERENTIALS)
            && has_differentials;

        let mut dpdu = Vec3f::new(0.0, 0.0, 0.0);
        let mut dpdv = Vec3f::new(0.0, 0.0, 0.0);
        let mut dndu = Vec3f::new(0.0, 0.0, 0.0);
        let mut dndv = Vec3f::new(0.0, 0.0, 0.0);

        if can_use_differentials || preserve_differentials {
            let duv02 = v0.uv - v2.uv;
            let duv12 = v1.uv - v2.uv;
            let determinant = duv02.x * duv12.y - duv02.y * duv12.x;
            let degenerate_uv = determinant.abs() < SMALL_FLOAT_EPSILON;
            if !degenerate_uv {
                let edge02 = v0.position - v2.position;
                let edge12 = v1.position - v2.position;
                let inv_det = 1.0 / determinant;
                dpdu = (duv12.y * edge02 - duv02.y * edge12) * inv_det;
                dpdv = (-duv12.x * edge02 + duv02.x * edge12) * inv_det;

                if preserve_differentials {
                    let dn02 = v0.normal - v2.normal;
                    let dn12 = v1.normal - v2.normal;
                    dndu = (duv12.y * dn02 - duv02.y * dn12) * inv_det;
                    dndv = (-duv12.x * dn02 + duv02.x * dn12) * inv_det;
                }
            }
            if degenerate_uv || dpdu.cross(dpdv).magnitude2() == 0.0 {
                let face_normal = (v2.position - v0.position)
                    .cross(v1.position - v0.position)
                    .normalize();
                let (u_axis, v_axis) = coordinate_system(face_normal);
                dpdu = u_axis;
                dpdv = v_axis;
                dndu = Vec3f::new(0.0, 0.0, 0.0);
                dndv = Vec3f::new(0.0, 0.0, 0.0);
            }
        }

        let (duvdx, duvdy) = if can_use_differentials {
            uv_differentials(hit, n, dpdu, dpdv)
        } else {
            (Vec2f::new(0.0, 0.0), Vec2f::new(0.0, 0.0))
        };

        let uv = Point2f::from_vec(
            a0 * v0.uv.to_vec() + a1 * v1.uv.to_vec() + a2 * v2.uv.to_vec(),
        );
        let footprint = can_use_differentials.then_some((duvdx, duvdy));

        let emissive = sample_spectrum(
            scene,
            uv,
            material.emissive_texture,
            false,
            footprint,
            Spectrum::black(),
        );
        let albedo = material.albedo
            * sample_spectrum(
                scene,
                uv,
                material.albedo_texture,
                true,
                footprint,
                Spectrum::uniform(1.0),
            );
        let specular = sample_spectrum(scene, uv, material.specular_texture, false, footprint, albedo);
        let roughness =
            material.roughness * sample_scalar(scene, uv, material.roughness_texture, footprint, 1.0);
        let metalness =
            material.metalness * sample_scalar(scene, uv, material.metalness_texture, footprint, 1.0);

        let normal_to_world = Matrix3::from_cols(t, -b, n);
        let tangent_normal = sample_normal(scene, uv, material.normal_texture, footprint);
        let perturbed_normal = (normal_to_world * tangent_normal).normalize();

        Some(Surface {
            position: hit.position,
            error: hit.error,
            geometric_normal: n,
            perturbed_normal,
            view: hit.view_direction,
            tangent_to_world,
            world_to_tangent,
            dpdu,
            dpdv,
            dndu,
            dndv,
            duvdx,
            duvdy,
            emissive,
            albedo,
            specular,
            roughness,
            metalness,
            ior: material.ior,
            shader: material.shader,
            flags: material.flags,
        })
    }

    /// Origin for a ray leaving this surface, pushed off along the geometric
    /// normal by the positional error bound.
    pub fn offset_ray_origin(&self, direction: Vec3f, bias_scale: Float) -> Point3f {
        self.offset_ray_origin_with_bias(direction, bias_scale).0
    }

    /// As `offset_ray_origin`, also reporting the signed offset distance so
    /// connection rays can shorten their far end accordingly.
    pub fn offset_ray_origin_with_bias(
        &self,
        direction: Vec3f,
        bias_scale: Float,
    ) -> (Point3f, Float) {
        let sign = if direction.dot(self.geometric_normal) < 0.0 {
            -1.0
        } else {
            1.0
        };
        let bias_distance = sign * self.error * bias_scale;
        (self.position + bias_distance * self.geometric_normal, bias_distance)
    }
}

/// Intersect the auxiliary rays with the tangent plane and solve for the uv
/// footprint. Any non-finite intermediate zeroes both differentials.
fn uv_differentials(hit: &Hit, n: Vec3f, dpdu: Vec3f, dpdv: Vec3f) -> (Vec2f, Vec2f) {
    let zero = (Vec2f::new(0.0, 0.0), Vec2f::new(0.0, 0.0));
    let Some(diff) = hit.differentials else {
        return zero;
    };

    let d = n.dot(hit.position.to_vec());
    let tx = -(n.dot(diff.rx_origin.to_vec()) - d) / n.dot(diff.rx_direction);
    if !tx.is_finite() {
        return zero;
    }
    let px = diff.rx_origin + tx * diff.rx_direction;

    let ty = -(n.dot(diff.ry_origin.to_vec()) - d) / n.dot(diff.ry_direction);
    if !ty.is_finite() {
        return zero;
    }
    let py = diff.ry_origin + ty * diff.ry_direction;

    // pick the two axes where the normal projects least to keep the 2x2
    // system well conditioned
    let (dim0, dim1) = if n.x.abs() > n.y.abs() && n.x.abs() > n.z.abs() {
        (1, 2)
    } else if n.y.abs() > n.z.abs() {
        (0, 2)
    } else {
        (0, 1)
    };

    let a = [[dpdu[dim0], dpdv[dim0]], [dpdu[dim1], dpdv[dim1]]];
    let bx = [
        px[dim0] - hit.position[dim0],
        px[dim1] - hit.position[dim1],
    ];
    let by = [
        py[dim0] - hit.position[dim0],
        py[dim1] - hit.position[dim1],
    ];

    let duvdx = solve_linear_system_2x2(a, bx).map_or(Vec2f::new(0.0, 0.0), |x| {
        Vec2f::new(x[0], x[1])
    });
    let duvdy = solve_linear_system_2x2(a, by).map_or(Vec2f::new(0.0, 0.0), |x| {
        Vec2f::new(x[0], x[1])
    });
    (duvdx, duvdy)
}

fn sample_spectrum(
    scene: &Scene,
    uv: Point2f,
    texture_index: u32,
    srgb: bool,
    footprint: Option<(Vec2f, Vec2f)>,
    default: Spectrum,
) -> Spectrum {
    if texture_index == INVALID_TEXTURE {
        return default;
    }
    let texture = &scene.data.textures[texture_index as usize];
    let sample = match footprint {
        Some((duvdx, duvdy)) if ENABLE_EWA => texture.ewa(uv, duvdx, duvdy),
        _ => texture.triangle(0, uv),
    };
    if srgb {
        sample.map(srgb_to_linear)
    } else {
        sample
    }
}

fn sample_scalar(
    scene: &Scene,
    uv: Point2f,
    texture_index: u32,
    footprint: Option<(Vec2f, Vec2f)>,
    default: Float,
) -> Float {
    if texture_index == INVALID_TEXTURE {
        return default;
    }
    let texture = &scene.data.textures[texture_index as usize];
    let sample = match footprint {
        Some((duvdx, duvdy)) if ENABLE_EWA => texture.ewa(uv, duvdx, duvdy),
        _ => texture.triangle(0, uv),
    };
    sample[0]
}

/// Tangent-space normal from a normal map, remapped from [0,1] to [-1,1].
fn sample_normal(
    scene: &Scene,
    uv: Point2f,
    texture_index: u32,
    footprint: Option<(Vec2f, Vec2f)>,
) -> Vec3f {
    if texture_index == INVALID_TEXTURE {
        return Vec3f::new(0.0, 0.0, 1.0);
    }
    let texture = &scene.data.textures[texture_index as usize];
    let sample = match footprint {
        Some((duvdx, duvdy)) if ENABLE_EWA => texture.ewa(uv, duvdx, duvdy),
        _ => texture.triangle(0, uv),
    };
    Vec3f::new(
        2.0 * sample[0] - 1.0,
        2.0 * sample[1] - 1.0,
        2.0 * sample[2] - 1.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraDesc;
    use crate::geometry::Ray;
    use crate::ibl::Ibl;
    use crate::material::Material;
    use crate::scene::{SceneData, VertexData};
    use approx::assert_abs_diff_eq;
    use cgmath::SquareMatrix;

    fn vertex(position: Point3f, uv: Point2f, material_index: u32) -> VertexData {
        VertexData {
            position,
            normal: Vec3f::new(0.0, 0.0, -1.0),
            tangent: Vec3f::new(1.0, 0.0, 0.0),
            bitangent_sign: 1.0,
            uv,
            material_index,
        }
    }

    fn single_triangle_scene(material: Material, uvs: [Point2f; 3]) -> Scene {
        let vertices = vec![
            vertex(Point3f::new(-1.0, -1.0, 2.0), uvs[0], 0),
            vertex(Point3f::new(1.0, -1.0, 2.0), uvs[1], 0),
            vertex(Point3f::new(0.0, 1.0, 2.0), uvs[2], 0),
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
        Scene::new(data, camera, Ibl::uniform(Spectrum::uniform(1.0))).unwrap()
    }

    fn front_hit(scene: &Scene) -> Hit {
        let ray = Ray::new(Point3f::new(0.0, 0.0, 0.0), Vec3f::new(0.0, 0.0, 1.0));
        scene.intersect(&ray).expect("triangle dead ahead")
    }

    #[test]
    fn frame_round_trips_to_identity() {
        let scene = single_triangle_scene(
            Material::diffuse(Spectrum::uniform(0.5)),
            [
                Point2f::new(0.0, 0.0),
                Point2f::new(1.0, 0.0),
                Point2f::new(0.5, 1.0),
            ],
        );
        let surface = Surface::from_hit(&scene, &front_hit(&scene)).unwrap();
        let product = surface.world_to_tangent * surface.tangent_to_world;
        let identity = Matrix3::<Float>::identity();
        for c in 0..3 {
            for r in 0..3 {
                assert_abs_diff_eq!(product[c][r], identity[c][r], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn backface_hit_is_rejected() {
        let scene = single_triangle_scene(
            Material::diffuse(Spectrum::uniform(0.5)),
            [
                Point2f::new(0.0, 0.0),
                Point2f::new(1.0, 0.0),
                Point2f::new(0.5, 1.0),
            ],
        );
        // approach from behind the triangle: normals face -z, ray travels -z
        let ray = Ray::new(Point3f::new(0.0, 0.0, 4.0), Vec3f::new(0.0, 0.0, -1.0));
        let hit = scene.intersect(&ray).unwrap();
        assert!(Surface::from_hit(&scene, &hit).is_none());
    }

    #[test]
    fn backface_hit_survives_on_transparent_material() {
        let mut material = Material::diffuse(Spectrum::uniform(0.5));
        material.flags |= MaterialFlags::TRANSPARENT;
        let scene = single_triangle_scene(
            material,
            [
                Point2f::new(0.0, 0.0),
                Point2f::new(1.0, 0.0),
                Point2f::new(0.5, 1.0),
            ],
        );
        let ray = Ray::new(Point3f::new(0.0, 0.0, 4.0), Vec3f::new(0.0, 0.0, -1.0));
        let hit = scene.intersect(&ray).unwrap();
        assert!(Surface::from_hit(&scene, &hit).is_some());
    }

    #[test]
    fn degenerate_uvs_fall_back_to_synthesised_frame() {
        let mut material = Material::diffuse(Spectrum::uniform(0.5));
        material.flags |= MaterialFlags::PRESERVE_RAY_DIFFERENTIALS;
        // all three uv coordinates coincide
        let uv = Point2f::new(0.25, 0.25);
        let scene = single_triangle_scene(material, [uv, uv, uv]);

        let camera = crate::camera::RayCastCamera::new(&scene.camera, 8, 8);
        let mut rng = {
            use rand::SeedableRng;
            rand_xoshiro::Xoshiro256Plus::seed_from_u64(0)
        };
        let ray = camera.jittered_ray_with_differentials(&mut rng, 4, 4);
        let hit = scene.intersect(&ray).unwrap();
        let surface = Surface::from_hit(&scene, &hit).unwrap();

        assert_abs_diff_eq!(surface.dpdu.magnitude(), 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(surface.dpdv.magnitude(), 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(surface.dpdu.dot(surface.dpdv), 0.0, epsilon = 1e-5);
        assert_eq!(surface.dndu, Vec3f::new(0.0, 0.0, 0.0));
        assert_eq!(surface.dndv, Vec3f::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn offset_origin_respects_direction_side() {
        let scene = single_triangle_scene(
            Material::diffuse(Spectrum::uniform(0.5)),
            [
                Point2f::new(0.0, 0.0),
                Point2f::new(1.0, 0.0),
                Point2f::new(0.5, 1.0),
            ],
        );
        let surface = Surface::from_hit(&scene, &front_hit(&scene)).unwrap();
        let out = surface.offset_ray_origin(surface.geometric_normal, 0.1);
        let inward = surface.offset_ray_origin(-surface.geometric_normal, 0.1);
        assert!((out - surface.position).dot(surface.geometric_normal) >= 0.0);
        assert!((inward - surface.position).dot(surface.geometric_normal) <= 0.0);
    }
}
