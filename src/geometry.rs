use cgmath::{EuclideanSpace, InnerSpace};

use crate::{Float, Point3f, Vec3f, INFINITY};

/// Auxiliary offset rays used to estimate texture-space footprints.
#[derive(Clone, Copy, Debug)]
pub struct RayDifferentials {
    pub rx_origin: Point3f,
    pub rx_direction: Vec3f,
    pub ry_origin: Point3f,
    pub ry_direction: Vec3f,
}

#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Point3f,
    pub direction: Vec3f,
    pub tnear: Float,
    pub tfar: Float,
    pub differentials: Option<RayDifferentials>,
}

impl Ray {
    pub fn new(origin: Point3f, direction: Vec3f) -> Self {
        Ray {
            origin,
            direction,
            tnear: 1e-5,
            tfar: INFINITY,
            differentials: None,
        }
    }

    pub fn with_differentials(mut self, differentials: RayDifferentials) -> Self {
        self.differentials = Some(differentials);
        self
    }

    #[inline]
    pub fn at(&self, t: Float) -> Point3f {
        self.origin + t * self.direction
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug)]
pub struct Bounds3f {
    pub min: Point3f,
    pub max: Point3f,
}

impl Bounds3f {
    pub fn empty() -> Self {
        Bounds3f {
            min: Point3f::new(INFINITY, INFINITY, INFINITY),
            max: Point3f::new(-INFINITY, -INFINITY, -INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    pub fn join(&self, other: &Bounds3f) -> Bounds3f {
        Bounds3f {
            min: Point3f::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Point3f::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    pub fn join_point(&self, p: Point3f) -> Bounds3f {
        Bounds3f {
            min: Point3f::new(self.min.x.min(p.x), self.min.y.min(p.y), self.min.z.min(p.z)),
            max: Point3f::new(self.max.x.max(p.x), self.max.y.max(p.y), self.max.z.max(p.z)),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Point3f>) -> Bounds3f {
        points
            .into_iter()
            .fold(Bounds3f::empty(), |b, p| b.join_point(p))
    }

    pub fn centroid(&self) -> Point3f {
        self.min.midpoint(self.max)
    }

    pub fn diagonal(&self) -> Vec3f {
        self.max - self.min
    }

    /// Index of the widest axis.
    pub fn max_extent(&self) -> usize {
        let d = self.diagonal();
        if d.x > d.y && d.x > d.z {
            0
        } else if d.y > d.z {
            1
        } else {
            2
        }
    }

    pub fn bounding_sphere(&self) -> (Point3f, Float) {
        if self.is_empty() {
            return (Point3f::origin(), 0.0);
        }
        let center = self.centroid();
        (center, (self.max - center).magnitude())
    }

    /// Slab test against a ray segment; true when the segment overlaps the
    /// box.
    pub fn intersects(&self, ray: &Ray, inv_dir: Vec3f) -> bool {
        let mut t0 = ray.tnear;
        let mut t1 = ray.tfar;
        for axis in 0..3 {
            let near = (self.min[axis] - ray.origin[axis]) * inv_dir[axis];
            let far = (self.max[axis] - ray.origin[axis]) * inv_dir[axis];
            let (near, far) = if near > far { (far, near) } else { (near, far) };
            t0 = t0.max(near);
            t1 = t1.min(far);
            if t0 > t1 {
                return false;
            }
        }
        true
    }
}
