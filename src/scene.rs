use anyhow::ensure;

use crate::bvh::Bvh;
use crate::camera::CameraDesc;
use crate::geometry::Ray;
use crate::ibl::Ibl;
use crate::material::Material;
use crate::surface::Hit;
use crate::texture::Texture;
use crate::{Float, Point2f, Point3f, Vec3f};

/// Per-vertex attributes alongside the position.
#[derive(Clone, Copy, Debug)]
pub struct VertexData {
    pub position: Point3f,
    pub normal: Vec3f,
    pub tangent: Vec3f,
    /// Handedness sign for the reconstructed bitangent.
    pub bitangent_sign: Float,
    pub uv: Point2f,
    pub material_index: u32,
}

/// Immutable geometry, material, and texture tables.
pub struct SceneData {
    pub indices: Vec<u32>,
    pub vertices: Vec<VertexData>,
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
}

#[derive(Clone, Copy, Debug)]
pub struct BoundingSphere {
    pub center: Point3f,
    pub radius: Float,
}

/// A renderable scene: tables, camera, environment light, and the ray
/// intersection structure. Immutable during rendering and shared freely
/// between workers.
pub struct Scene {
    pub data: SceneData,
    pub camera: CameraDesc,
    pub ibl: Ibl,
    pub bounding_sphere: BoundingSphere,
    bvh: Bvh,
}

/// Scale for the conservative hit position error bound.
const HIT_ERROR_SCALE: Float = 32.0 * f32::EPSILON;

impl Scene {
    pub fn new(data: SceneData, camera: CameraDesc, mut ibl: Ibl) -> anyhow::Result<Self> {
        ensure!(data.indices.len() % 3 == 0, "index count must be a multiple of 3");
        for &i in &data.indices {
            ensure!((i as usize) < data.vertices.len(), "vertex index out of range");
        }
        for v in &data.vertices {
            ensure!(
                (v.material_index as usize) < data.materials.len(),
                "material index out of range"
            );
        }

        let positions: Vec<Point3f> = data.vertices.iter().map(|v| v.position).collect();
        let bvh = Bvh::build(&data.indices, &positions);

        let (center, radius) = bvh.bounds.bounding_sphere();
        // an empty scene still renders the environment; keep the kernel
        // radius schedule finite
        let bounding_sphere = BoundingSphere {
            center,
            radius: radius.max(1.0),
        };
        ibl.set_world_bounds(center, bounding_sphere.radius);

        tracing::debug!(
            triangles = data.indices.len() / 3,
            materials = data.materials.len(),
            radius = bounding_sphere.radius,
            "scene ready"
        );

        Ok(Scene {
            data,
            camera,
            ibl,
            bounding_sphere,
            bvh,
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.data.indices.len() / 3
    }

    /// Closest hit, fully parameterised for surface reconstruction.
    pub fn intersect(&self, ray: &Ray) -> Option<Hit> {
        let isect = self.bvh.intersect(ray)?;
        let position = ray.at(isect.t);
        let error = HIT_ERROR_SCALE
            * position
                .x
                .abs()
                .max(position.y.abs())
                .max(position.z.abs().max(isect.t));

        Some(Hit {
            position,
            prim_id: isect.prim_id,
            bary: Point2f::new(isect.u, isect.v),
            view_direction: -ray.direction,
            error,
            differentials: ray.differentials,
        })
    }

    /// Any-hit over `[tnear, tfar]`; used for shadow and connection rays.
    pub fn occluded(&self, origin: Point3f, direction: Vec3f, tnear: Float, tfar: Float) -> bool {
        self.bvh.occluded(origin, direction, tnear, tfar)
    }
}
