use cgmath::InnerSpace;
use rand::Rng;

use crate::geometry::{Ray, RayDifferentials};
use crate::{Float, Point2i, Point3f, Vec3f};

/// Scene-side description of the camera; resolution independent.
#[derive(Clone, Copy, Debug)]
pub struct CameraDesc {
    pub position: Point3f,
    pub look_at: Point3f,
    pub up: Vec3f,
    /// Vertical field of view, radians.
    pub fov: Float,
}

/// Camera prepared for ray casting against a concrete viewport.
pub struct RayCastCamera {
    pub position: Point3f,
    pub forward: Vec3f,
    right: Vec3f,
    up: Vec3f,
    /// Distance from the pinhole to the image plane, in pixel units.
    pub image_plane_distance: Float,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl RayCastCamera {
    pub fn new(desc: &CameraDesc, width: u32, height: u32) -> Self {
        let forward = (desc.look_at - desc.position).normalize();
        let right = forward.cross(desc.up).normalize();
        let up = right.cross(forward);
        let image_plane_distance = (height as Float * 0.5) / (desc.fov * 0.5).tan();

        RayCastCamera {
            position: desc.position,
            forward,
            right,
            up,
            image_plane_distance,
            viewport_width: width,
            viewport_height: height,
        }
    }

    /// Ray through a continuous image position, pixel units.
    pub fn ray_through(&self, px: Float, py: Float) -> Ray {
        let x = px - self.viewport_width as Float * 0.5;
        let y = self.viewport_height as Float * 0.5 - py;
        let dir = (x * self.right + y * self.up + self.image_plane_distance * self.forward)
            .normalize();
        Ray::new(self.position, dir)
    }

    /// Jittered primary ray through pixel `(x, y)`.
    pub fn jittered_ray(&self, rng: &mut impl Rng, x: u32, y: u32) -> Ray {
        let px = x as Float + rng.gen::<Float>();
        let py = y as Float + rng.gen::<Float>();
        self.ray_through(px, py)
    }

    /// Jittered primary ray carrying one-pixel offset differentials.
    pub fn jittered_ray_with_differentials(&self, rng: &mut impl Rng, x: u32, y: u32) -> Ray {
        let px = x as Float + rng.gen::<Float>();
        let py = y as Float + rng.gen::<Float>();
        let ray = self.ray_through(px, py);
        let rx = self.ray_through(px + 1.0, py);
        let ry = self.ray_through(px, py + 1.0);
        ray.with_differentials(RayDifferentials {
            rx_origin: rx.origin,
            rx_direction: rx.direction,
            ry_origin: ry.origin,
            ry_direction: ry.direction,
        })
    }

    /// Project a world position onto the image. The result may be outside
    /// the viewport; callers bounds-check.
    pub fn world_to_image(&self, p: Point3f) -> Point2i {
        let v = p - self.position;
        let z = v.dot(self.forward);
        let px = v.dot(self.right) * self.image_plane_distance / z
            + self.viewport_width as Float * 0.5;
        let py = self.viewport_height as Float * 0.5
            - v.dot(self.up) * self.image_plane_distance / z;
        Point2i::new(px.floor() as i32, py.floor() as i32)
    }

    /// Jacobian from image area to solid angle for a (unit) direction leaving
    /// the camera.
    pub fn image_to_solid_angle(&self, dir: Vec3f) -> Float {
        let cos_theta = self.forward.dot(dir);
        let image_point_distance = self.image_plane_distance / cos_theta;
        image_point_distance * image_point_distance / cos_theta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    fn test_camera() -> RayCastCamera {
        let desc = CameraDesc {
            position: Point3f::new(0.0, 0.0, -5.0),
            look_at: Point3f::new(0.0, 0.0, 0.0),
            up: Vec3f::new(0.0, 1.0, 0.0),
            fov: std::f32::consts::FRAC_PI_3,
        };
        RayCastCamera::new(&desc, 64, 48)
    }

    #[test]
    fn center_pixel_looks_forward() {
        let camera = test_camera();
        let ray = camera.ray_through(32.0, 24.0);
        assert!(ray.direction.dot(camera.forward) > 0.9999);
    }

    #[test]
    fn world_to_image_inverts_ray_through() {
        let camera = test_camera();
        for (px, py) in [(3.5, 7.5), (32.5, 24.5), (63.5, 0.5)] {
            let ray = camera.ray_through(px, py);
            let p = ray.at(7.0);
            let img = camera.world_to_image(p);
            assert_eq!(img.x, px.floor() as i32);
            assert_eq!(img.y, py.floor() as i32);
        }
    }

    #[test]
    fn jittered_ray_stays_near_its_pixel() {
        let camera = test_camera();
        let mut rng = Xoshiro256Plus::seed_from_u64(7);
        for _ in 0..32 {
            let ray = camera.jittered_ray(&mut rng, 10, 20);
            let img = camera.world_to_image(ray.at(3.0));
            // round-trip float error may push a jitter at the very edge of
            // the pixel into its neighbour
            assert!((img.x - 10).abs() <= 1, "x = {}", img.x);
            assert!((img.y - 20).abs() <= 1, "y = {}", img.y);
        }
    }
}
