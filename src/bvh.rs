//! Ray-intersection engine: a middle-split BVH over the scene triangles with
//! a watertight ray/triangle test.

use bumpalo::Bump;
use cgmath::EuclideanSpace;

use crate::geometry::{Bounds3f, Ray};
use crate::{Float, Point3f, Vec3f};

/// Raw closest-hit record. `u`/`v` are the barycentric weights of the
/// triangle's second and third vertices.
#[derive(Clone, Copy, Debug)]
pub struct Intersection {
    pub prim_id: u32,
    pub t: Float,
    pub u: Float,
    pub v: Float,
}

#[derive(Clone, Copy)]
struct TriRef {
    p0: Point3f,
    p1: Point3f,
    p2: Point3f,
    prim_id: u32,
}

struct LinearNode {
    bounds: Bounds3f,
    /// Leaf: offset into `tris`. Interior: offset of the second child.
    offset: u32,
    count: u16,
    _axis: u8,
}

pub struct Bvh {
    tris: Vec<TriRef>,
    nodes: Vec<LinearNode>,
    pub bounds: Bounds3f,
}

struct BuildNode<'a> {
    bounds: Bounds3f,
    children: Option<(&'a BuildNode<'a>, &'a BuildNode<'a>)>,
    split_axis: usize,
    first_tri: usize,
    tri_count: usize,
}

const MAX_TRIS_PER_LEAF: usize = 4;

impl Bvh {
    /// Build over one triangle per three indices. `positions` is indexed by
    /// the values in `indices`.
    pub fn build(indices: &[u32], positions: &[Point3f]) -> Self {
        assert_eq!(indices.len() % 3, 0);
        let mut tris: Vec<TriRef> = indices
            .chunks_exact(3)
            .enumerate()
            .map(|(prim_id, idx)| TriRef {
                p0: positions[idx[0] as usize],
                p1: positions[idx[1] as usize],
                p2: positions[idx[2] as usize],
                prim_id: prim_id as u32,
            })
            .collect();

        if tris.is_empty() {
            return Bvh {
                tris,
                nodes: Vec::new(),
                bounds: Bounds3f::empty(),
            };
        }

        let arena = Bump::new();
        let root = Self::build_recursive(&arena, &mut tris, 0);
        let bounds = root.bounds;

        let mut nodes = Vec::with_capacity(2 * tris.len());
        Self::flatten(&mut nodes, root);

        Bvh { tris, nodes, bounds }
    }

    fn build_recursive<'a>(arena: &'a Bump, tris: &mut [TriRef], first: usize) -> &'a BuildNode<'a> {
        let bounds = tris.iter().fold(Bounds3f::empty(), |b, t| {
            b.join_point(t.p0).join_point(t.p1).join_point(t.p2)
        });

        let centroid = |t: &TriRef| {
            Point3f::from_vec((t.p0.to_vec() + t.p1.to_vec() + t.p2.to_vec()) / 3.0)
        };
        let centroid_bounds = tris
            .iter()
            .fold(Bounds3f::empty(), |b, t| b.join_point(centroid(t)));

        let axis = centroid_bounds.max_extent();
        let extent = centroid_bounds.diagonal()[axis];

        if tris.len() <= MAX_TRIS_PER_LEAF || extent <= 0.0 {
            return arena.alloc(BuildNode {
                bounds,
                children: None,
                split_axis: axis,
                first_tri: first,
                tri_count: tris.len(),
            });
        }

        // Middle split on the widest centroid axis, falling back to an
        // equal-count split when everything lands on one side.
        let mid_value = centroid_bounds.centroid()[axis];
        let mut mid = itertools_partition(tris, |t| centroid(t)[axis] < mid_value);
        if mid == 0 || mid == tris.len() {
            tris.sort_unstable_by(|a, b| {
                centroid(a)[axis]
                    .partial_cmp(&centroid(b)[axis])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            mid = tris.len() / 2;
        }

        let (lo, hi) = tris.split_at_mut(mid);
        let left = Self::build_recursive(arena, lo, first);
        let right = Self::build_recursive(arena, hi, first + mid);

        arena.alloc(BuildNode {
            bounds: left.bounds.join(&right.bounds),
            children: Some((left, right)),
            split_axis: axis,
            first_tri: first,
            tri_count: 0,
        })
    }

    fn flatten(nodes: &mut Vec<LinearNode>, node: &BuildNode<'_>) -> usize {
        let index = nodes.len();
        nodes.push(LinearNode {
            bounds: node.bounds,
            offset: 0,
            count: node.tri_count as u16,
            _axis: node.split_axis as u8,
        });

        match node.children {
            None => nodes[index].offset = node.first_tri as u32,
            Some((left, right)) => {
                Self::flatten(nodes, left);
                let right_index = Self::flatten(nodes, right);
                nodes[index].offset = right_index as u32;
            }
        }
        index
    }

    /// Closest hit along the ray segment, or `None` on a miss.
    pub fn intersect(&self, ray: &Ray) -> Option<Intersection> {
        let mut best: Option<Intersection> = None;
        self.traverse(ray, |tri, tnear, limit| {
            match intersect_triangle(tri, ray.origin, ray.direction, tnear, limit) {
                Some((t, u, v)) => {
                    best = Some(Intersection {
                        prim_id: tri.prim_id,
                        t,
                        u,
                        v,
                    });
                    (t, false)
                }
                None => (limit, false),
            }
        });
        best
    }

    /// Any-hit query over `[tnear, tfar]`.
    pub fn occluded(&self, origin: Point3f, direction: Vec3f, tnear: Float, tfar: Float) -> bool {
        let ray = Ray {
            origin,
            direction,
            tnear,
            tfar,
            differentials: None,
        };
        let mut hit = false;
        self.traverse(&ray, |tri, tnear, limit| {
            if intersect_triangle(tri, origin, direction, tnear, limit).is_some() {
                hit = true;
                return (limit, true);
            }
            (limit, false)
        });
        hit
    }

    /// Shared stack traversal. The visitor returns the updated far limit and
    /// whether traversal should stop early.
    fn traverse(&self, ray: &Ray, mut visit: impl FnMut(&TriRef, Float, Float) -> (Float, bool)) {
        if self.nodes.is_empty() {
            return;
        }
        let inv_dir = Vec3f::new(
            1.0 / ray.direction.x,
            1.0 / ray.direction.y,
            1.0 / ray.direction.z,
        );

        let mut tfar = ray.tfar;
        let mut stack = [0usize; 64];
        let mut stack_len = 1;
        while stack_len > 0 {
            stack_len -= 1;
            let node_index = stack[stack_len];
            let node = &self.nodes[node_index];
            let clipped = Ray { tfar, ..*ray };
            if !node.bounds.intersects(&clipped, inv_dir) {
                continue;
            }
            if node.count > 0 {
                let first = node.offset as usize;
                for tri in &self.tris[first..first + node.count as usize] {
                    let (new_far, stop) = visit(tri, ray.tnear, tfar);
                    tfar = new_far;
                    if stop {
                        return;
                    }
                }
            } else {
                // the first child sits directly after its parent
                stack[stack_len] = node_index + 1;
                stack[stack_len + 1] = node.offset as usize;
                stack_len += 2;
            }
        }
    }
}

/// Stable partition returning the count of elements satisfying the
/// predicate.
fn itertools_partition<T>(slice: &mut [T], mut pred: impl FnMut(&T) -> bool) -> usize {
    let mut split = 0;
    for i in 0..slice.len() {
        if pred(&slice[i]) {
            slice.swap(split, i);
            split += 1;
        }
    }
    split
}

/// Watertight ray/triangle intersection: shear the triangle into a
/// ray-aligned coordinate system and evaluate edge functions at the origin.
/// Returns `(t, u, v)` with `u`/`v` the barycentric weights of `p1`/`p2`.
fn intersect_triangle(
    tri: &TriRef,
    origin: Point3f,
    direction: Vec3f,
    tnear: Float,
    tfar: Float,
) -> Option<(Float, Float, Float)> {
    // translate vertices based on ray origin
    let mut p0t = tri.p0 - origin.to_vec();
    let mut p1t = tri.p1 - origin.to_vec();
    let mut p2t = tri.p2 - origin.to_vec();

    // permute components so the dominant ray axis is z
    let kz = max_dimension(Vec3f::new(
        direction.x.abs(),
        direction.y.abs(),
        direction.z.abs(),
    ));
    let kx = (kz + 1) % 3;
    let ky = (kx + 1) % 3;
    let dir = permute(direction, kx, ky, kz);
    p0t = Point3f::from_vec(permute(p0t.to_vec(), kx, ky, kz));
    p1t = Point3f::from_vec(permute(p1t.to_vec(), kx, ky, kz));
    p2t = Point3f::from_vec(permute(p2t.to_vec(), kx, ky, kz));

    // shear to align the ray with +z
    let shear_x = -dir.x / dir.z;
    let shear_y = -dir.y / dir.z;
    let shear_z = 1.0 / dir.z;
    p0t.x += shear_x * p0t.z;
    p0t.y += shear_y * p0t.z;
    p1t.x += shear_x * p1t.z;
    p1t.y += shear_y * p1t.z;
    p2t.x += shear_x * p2t.z;
    p2t.y += shear_y * p2t.z;

    let e0 = p1t.x * p2t.y - p1t.y * p2t.x;
    let e1 = p2t.x * p0t.y - p2t.y * p0t.x;
    let e2 = p0t.x * p1t.y - p0t.y * p1t.x;

    if (e0 < 0.0 || e1 < 0.0 || e2 < 0.0) && (e0 > 0.0 || e1 > 0.0 || e2 > 0.0) {
        return None;
    }
    let det = e0 + e1 + e2;
    if det == 0.0 {
        return None;
    }

    let t_scaled = shear_z * (e0 * p0t.z + e1 * p1t.z + e2 * p2t.z);
    if det < 0.0 && (t_scaled > tnear * det || t_scaled < tfar * det) {
        return None;
    }
    if det > 0.0 && (t_scaled < tnear * det || t_scaled > tfar * det) {
        return None;
    }

    let inv_det = 1.0 / det;
    let t = t_scaled * inv_det;
    let u = e1 * inv_det;
    let v = e2 * inv_det;
    Some((t, u, v))
}

fn max_dimension(v: Vec3f) -> usize {
    if v.x > v.y && v.x > v.z {
        0
    } else if v.y > v.z {
        1
    } else {
        2
    }
}

fn permute(v: Vec3f, x: usize, y: usize, z: usize) -> Vec3f {
    Vec3f::new(v[x], v[y], v[z])
}
