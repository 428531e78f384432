//! Uniform-cell spatial hash over a 3D point set, rebuilt once per VCM pass.
//! Cells are `2 * radius` wide, so a radius query around any point overlaps
//! at most the 8 cells toward which the point leans.

use arrayvec::ArrayVec;
use cgmath::MetricSpace;

use crate::geometry::Bounds3f;
use crate::{Float, Point3f};

pub struct HashGrid {
    bounds: Bounds3f,
    inv_cell_size: Float,
    bucket_mask: u32,
    /// Exclusive prefix sums: bucket `b` owns `indices[cell_starts[b] ..
    /// cell_starts[b + 1]]`.
    cell_starts: Vec<u32>,
    indices: Vec<u32>,
    cursors: Vec<u32>,
    radius_sq: Float,
    point_count: usize,
}

impl HashGrid {
    pub fn new() -> Self {
        HashGrid {
            bounds: Bounds3f::empty(),
            inv_cell_size: 0.0,
            bucket_mask: 0,
            cell_starts: Vec::new(),
            indices: Vec::new(),
            cursors: Vec::new(),
            radius_sq: 0.0,
            point_count: 0,
        }
    }

    /// Rebuild over `points` for queries of `radius`. Storage is retained
    /// across rebuilds.
    pub fn build(&mut self, points: &[Point3f], radius: Float) {
        assert!(radius >= 0.0, "hash grid radius must be non-negative");

        self.point_count = points.len();
        self.radius_sq = radius * radius;
        if points.is_empty() {
            return;
        }

        self.bounds = Bounds3f::from_points(points.iter().copied());
        let cell_size = 2.0 * radius;
        self.inv_cell_size = if cell_size > 0.0 { 1.0 / cell_size } else { 0.0 };

        let bucket_count = (2 * points.len()).next_power_of_two();
        self.bucket_mask = bucket_count as u32 - 1;

        // counting sort: histogram, exclusive prefix sum, scatter
        self.cell_starts.clear();
        self.cell_starts.resize(bucket_count + 1, 0);
        for p in points {
            let bucket = self.bucket_of(*p);
            self.cell_starts[bucket as usize + 1] += 1;
        }
        for i in 1..self.cell_starts.len() {
            self.cell_starts[i] += self.cell_starts[i - 1];
        }

        self.cursors.clear();
        self.cursors.extend_from_slice(&self.cell_starts[..bucket_count]);
        self.indices.clear();
        self.indices.resize(points.len(), 0);
        for (i, p) in points.iter().enumerate() {
            let bucket = self.bucket_of(*p) as usize;
            let slot = self.cursors[bucket] as usize;
            self.indices[slot] = i as u32;
            self.cursors[bucket] += 1;
        }
    }

    /// Invoke `callback` with the index of every point within the build
    /// radius of `center`. Each index is delivered at most once, in no
    /// particular order.
    pub fn range(&self, points: &[Point3f], center: Point3f, mut callback: impl FnMut(u32)) {
        if self.point_count == 0 {
            return;
        }

        let scaled = (center - self.bounds.min) * self.inv_cell_size;
        let cx = scaled.x.floor() as i32;
        let cy = scaled.y.floor() as i32;
        let cz = scaled.z.floor() as i32;

        // lean toward the cell face the query sphere pokes through
        let dx = if scaled.x - cx as Float > 0.5 { 1 } else { -1 };
        let dy = if scaled.y - cy as Float > 0.5 { 1 } else { -1 };
        let dz = if scaled.z - cz as Float > 0.5 { 1 } else { -1 };

        // distinct buckets only; neighbouring cells may collide
        let mut buckets: ArrayVec<u32, 8> = ArrayVec::new();
        for &ox in &[0, dx] {
            for &oy in &[0, dy] {
                for &oz in &[0, dz] {
                    let bucket = hash_cell(cx + ox, cy + oy, cz + oz) & self.bucket_mask;
                    if !buckets.contains(&bucket) {
                        buckets.push(bucket);
                    }
                }
            }
        }

        for &bucket in &buckets {
            let start = self.cell_starts[bucket as usize] as usize;
            let end = self.cell_starts[bucket as usize + 1] as usize;
            for &index in &self.indices[start..end] {
                if points[index as usize].distance2(center) <= self.radius_sq {
                    callback(index);
                }
            }
        }
    }

    fn bucket_of(&self, p: Point3f) -> u32 {
        let scaled = (p - self.bounds.min) * self.inv_cell_size;
        hash_cell(
            scaled.x.floor() as i32,
            scaled.y.floor() as i32,
            scaled.z.floor() as i32,
        ) & self.bucket_mask
    }
}

impl Default for HashGrid {
    fn default() -> Self {
        HashGrid::new()
    }
}

/// Integer mix of cell coordinates into a bucket id; collisions are expected
/// and resolved by the radius check.
fn hash_cell(x: i32, y: i32, z: i32) -> u32 {
    let x = (x as u32).wrapping_mul(73_856_093);
    let y = (y as u32).wrapping_mul(19_349_663);
    let z = (z as u32).wrapping_mul(83_492_791);
    x ^ y ^ z
}
