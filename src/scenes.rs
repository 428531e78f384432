//! Built-in procedural scenes, addressable by name from the CLI and the
//! integration tests.

use anyhow::bail;
use cgmath::InnerSpace;

use crate::camera::CameraDesc;
use crate::ibl::Ibl;
use crate::material::Material;
use crate::scene::{Scene, SceneData, VertexData};
use crate::{Float, Point2f, Point3f, Spectrum, Vec3f};

/// Radiance of the uniform environment in the `background` scene.
pub const BACKGROUND_RADIANCE: Float = 0.8;

pub fn names() -> &'static [&'static str] {
    &["background", "furnace", "cornell", "cornell-mirror"]
}

pub fn create(name: &str) -> anyhow::Result<Scene> {
    match name {
        "background" => background(),
        "furnace" => furnace(),
        "cornell" => cornell(false),
        "cornell-mirror" => cornell(true),
        _ => bail!("unknown scene \"{name}\" (available: {})", names().join(", ")),
    }
}

struct SceneBuilder {
    data: SceneData,
}

impl SceneBuilder {
    fn new() -> Self {
        SceneBuilder {
            data: SceneData {
                indices: Vec::new(),
                vertices: Vec::new(),
                materials: Vec::new(),
                textures: Vec::new(),
            },
        }
    }

    fn add_material(&mut self, material: Material) -> u32 {
        self.data.materials.push(material);
        (self.data.materials.len() - 1) as u32
    }

    /// A quad `c0 c1 c2 c3` (counter-clockwise seen from the front); the
    /// shared normal is `cross(c1 - c0, c3 - c0)`.
    fn push_quad(&mut self, corners: [Point3f; 4], material_index: u32) {
        let normal = (corners[1] - corners[0])
            .cross(corners[3] - corners[0])
            .normalize();
        let tangent = (corners[1] - corners[0]).normalize();
        let uvs = [
            Point2f::new(0.0, 0.0),
            Point2f::new(1.0, 0.0),
            Point2f::new(1.0, 1.0),
            Point2f::new(0.0, 1.0),
        ];

        let base = self.data.vertices.len() as u32;
        for (corner, uv) in corners.iter().zip(uvs) {
            self.data.vertices.push(VertexData {
                position: *corner,
                normal,
                tangent,
                bitangent_sign: 1.0,
                uv,
                material_index,
            });
        }
        self.data
            .indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// An axis-aligned box with outward-facing quads.
    fn push_box(&mut self, min: Point3f, max: Point3f, material_index: u32) {
        let p = |x: Float, y: Float, z: Float| Point3f::new(x, y, z);
        // top, bottom
        self.push_quad(
            [
                p(min.x, max.y, max.z),
                p(max.x, max.y, max.z),
                p(max.x, max.y, min.z),
                p(min.x, max.y, min.z),
            ],
            material_index,
        );
        self.push_quad(
            [
                p(min.x, min.y, min.z),
                p(max.x, min.y, min.z),
                p(max.x, min.y, max.z),
                p(min.x, min.y, max.z),
            ],
            material_index,
        );
        // +z, -z
        self.push_quad(
            [
                p(min.x, min.y, max.z),
                p(max.x, min.y, max.z),
                p(max.x, max.y, max.z),
                p(min.x, max.y, max.z),
            ],
            material_index,
        );
        self.push_quad(
            [
                p(max.x, min.y, min.z),
                p(min.x, min.y, min.z),
                p(min.x, max.y, min.z),
                p(max.x, max.y, min.z),
            ],
            material_index,
        );
        // +x, -x
        self.push_quad(
            [
                p(max.x, min.y, max.z),
                p(max.x, min.y, min.z),
                p(max.x, max.y, min.z),
                p(max.x, max.y, max.z),
            ],
            material_index,
        );
        self.push_quad(
            [
                p(min.x, min.y, min.z),
                p(min.x, min.y, max.z),
                p(min.x, max.y, max.z),
                p(min.x, max.y, min.z),
            ],
            material_index,
        );
    }

    fn build(self, camera: CameraDesc, ibl: Ibl) -> anyhow::Result<Scene> {
        Scene::new(self.data, camera, ibl)
    }
}

/// No geometry at all; every ray sees the environment.
fn background() -> anyhow::Result<Scene> {
    let camera = CameraDesc {
        position: Point3f::new(0.0, 0.0, 0.0),
        look_at: Point3f::new(0.0, 0.0, 1.0),
        up: Vec3f::new(0.0, 1.0, 0.0),
        fov: 1.0,
    };
    SceneBuilder::new().build(camera, Ibl::uniform(Spectrum::uniform(BACKGROUND_RADIANCE)))
}

/// One white diffuse slab under a unit-radiance sky.
fn furnace() -> anyhow::Result<Scene> {
    let mut builder = SceneBuilder::new();
    let white = builder.add_material(Material::diffuse(Spectrum::uniform(0.5)));
    builder.push_quad(
        [
            Point3f::new(-2.0, 0.0, 2.0),
            Point3f::new(2.0, 0.0, 2.0),
            Point3f::new(2.0, 0.0, -2.0),
            Point3f::new(-2.0, 0.0, -2.0),
        ],
        white,
    );

    let camera = CameraDesc {
        position: Point3f::new(0.0, 2.5, -4.0),
        look_at: Point3f::new(0.0, 0.0, 0.0),
        up: Vec3f::new(0.0, 1.0, 0.0),
        fov: 0.9,
    };
    builder.build(camera, Ibl::uniform(Spectrum::uniform(1.0)))
}

/// The open-front box: white floor/ceiling/back, red and green side walls,
/// two blocks, sky light through the opening. `mirror_block` swaps the tall
/// block's material for a perfect mirror.
fn cornell(mirror_block: bool) -> anyhow::Result<Scene> {
    let mut builder = SceneBuilder::new();
    let white = builder.add_material(Material::diffuse(Spectrum::new(0.73, 0.73, 0.73)));
    let red = builder.add_material(Material::diffuse(Spectrum::new(0.63, 0.065, 0.05)));
    let green = builder.add_material(Material::diffuse(Spectrum::new(0.14, 0.45, 0.091)));
    let block = if mirror_block {
        builder.add_material(Material::mirror(Spectrum::uniform(0.9)))
    } else {
        white
    };

    let p = Point3f::new;
    // floor
    builder.push_quad(
        [p(-1.0, -1.0, 1.0), p(1.0, -1.0, 1.0), p(1.0, -1.0, -1.0), p(-1.0, -1.0, -1.0)],
        white,
    );
    // ceiling
    builder.push_quad(
        [p(-1.0, 1.0, -1.0), p(1.0, 1.0, -1.0), p(1.0, 1.0, 1.0), p(-1.0, 1.0, 1.0)],
        white,
    );
    // back wall
    builder.push_quad(
        [p(1.0, -1.0, 1.0), p(-1.0, -1.0, 1.0), p(-1.0, 1.0, 1.0), p(1.0, 1.0, 1.0)],
        white,
    );
    // left wall (red)
    builder.push_quad(
        [p(-1.0, -1.0, 1.0), p(-1.0, -1.0, -1.0), p(-1.0, 1.0, -1.0), p(-1.0, 1.0, 1.0)],
        red,
    );
    // right wall (green)
    builder.push_quad(
        [p(1.0, -1.0, -1.0), p(1.0, -1.0, 1.0), p(1.0, 1.0, 1.0), p(1.0, 1.0, -1.0)],
        green,
    );

    builder.push_box(p(-0.6, -1.0, 0.1), p(-0.1, 0.2, 0.6), block);
    builder.push_box(p(0.15, -1.0, -0.35), p(0.6, -0.4, 0.1), white);

    let camera = CameraDesc {
        position: Point3f::new(0.0, 0.0, -3.6),
        look_at: Point3f::new(0.0, 0.0, 0.0),
        up: Vec3f::new(0.0, 1.0, 0.0),
        fov: 0.66,
    };
    builder.build(camera, Ibl::uniform(Spectrum::uniform(1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_named_scene_constructs() {
        for name in names() {
            let scene = create(name).unwrap();
            if *name != "background" {
                assert!(scene.triangle_count() > 0);
            }
        }
    }

    #[test]
    fn unknown_scene_is_an_error() {
        assert!(create("no-such-scene").is_err());
    }

    #[test]
    fn cornell_walls_face_inward() {
        let scene = create("cornell").unwrap();
        // every wall normal should point back toward the box centre
        for tri in scene.data.indices.chunks_exact(3).take(10) {
            let v = &scene.data.vertices[tri[0] as usize];
            let to_center = Point3f::new(0.0, 0.0, 0.0) - v.position;
            assert!(
                v.normal.dot(to_center) > 0.0,
                "wall at {:?} faces outward",
                v.position
            );
        }
    }
}
