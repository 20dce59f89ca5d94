//! Geometric model of the North Star reflector optics.
//!
//! A ray leaves the eye through the rendered image, reflects off the inside of an ellipsoid and
//! lands on the screen. Tracing that path maps a render uv to a display uv. Distortion needs
//! the inverse, which is found with a Newton solver seeded from previous solutions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use json::JsonValue;
use nalgebra::{Matrix2, Matrix4, Quaternion, UnitQuaternion, Vector3, Vector4};

use crate::hmd::config::{self, ConfigError};
use crate::hmd::{DistortionModel, DistortionType, HmdOptics};
use crate::prelude::*;

const CAMERA_NEAR: f64 = 0.07;
const CAMERA_FAR: f64 = 1000.0;

const SPHERE_RADIUS_SQUARED: f64 = 0.5 * 0.5;

const SOLVER_EPSILON: f64 = 0.0001;
const SOLVER_MAX_STEP: f64 = 0.1;
const SOLVER_TOLERANCE: f64 = 1e-9;
const SOLVER_ITERATIONS: u32 = 50;

/// Seeds kept per view. Covers the distortion tables and a default mesh.
pub const SEED_CACHE_CAPACITY: usize = 32 * 1024;

/// Describes one eye of the headset. All positions are in meters in the headset space.
#[derive(Clone, Debug, PartialEq)]
pub struct EyeOptics {
    pub ellipse_minor_axis: f64,
    pub ellipse_major_axis: f64,
    pub screen_forward: Vector3<f64>,
    pub screen_position: Vector3<f64>,
    pub eye_position: Vector3<f64>,
    pub eye_rotation: UnitQuaternion<f64>,

    /// Tangents of the rendered image edges, `(left, right, top, bottom)`.
    pub camera_projection: Vector4<f64>,
    pub sphere_to_world_space: Matrix4<f64>,
    pub world_to_screen_space: Matrix4<f64>,
}

impl EyeOptics {
    pub fn fov(&self) -> Fov {
        let p = &self.camera_projection;
        Fov::new(p.x.atan() as f32, p.y.atan() as f32, p.z.atan() as f32, p.w.atan() as f32)
    }

    pub fn eye_pose(&self) -> Pose {
        pose_f32(&self.eye_rotation, &self.eye_position)
    }
}

fn pose_f32(rotation: &UnitQuaternion<f64>, position: &Vector3<f64>) -> Pose {
    let q = rotation.quaternion();
    let orientation = UnitQuaternion::from_quaternion(Quaternion::new(q.w as f32, q.i as f32, q.j as f32, q.k as f32));
    Pose::new(orientation, Vec3f32::new(position.x as f32, position.y as f32, position.z as f32))
}

/// Off center projection working on tangents rather than near plane extents.
fn projection_off_center(left: f64, right: f64, bottom: f64, top: f64, near: f64, far: f64) -> Matrix4<f64> {
    let x = 2.0 / (right - left);
    let y = 2.0 / (top - bottom);
    let a = (right + left) / (right - left);
    let b = (top + bottom) / (top - bottom);
    let c = -(far + near) / (far - near);
    let d = -(2.0 * far * near) / (far - near);

    Matrix4::new(
        x, 0.0, a, 0.0,
        0.0, y, b, 0.0,
        0.0, 0.0, c, d,
        0.0, 0.0, -1.0, 0.0,
    )
}

fn multiply_point(matrix: &Matrix4<f64>, point: &Vector3<f64>) -> Vector3<f64> {
    let result = matrix * point.push(1.0);
    result.xyz() / result.w
}

fn multiply_point_affine(matrix: &Matrix4<f64>, point: &Vector3<f64>) -> Vector3<f64> {
    (matrix * point.push(1.0)).xyz()
}

fn multiply_vector(matrix: &Matrix4<f64>, vector: &Vector3<f64>) -> Vector3<f64> {
    matrix.fixed_slice::<3, 3>(0, 0) * vector
}

/// Far intersection of a ray with a sphere around the origin. `direction` must be normalized.
fn intersect_sphere(origin: &Vector3<f64>, direction: &Vector3<f64>, radius_squared: f64) -> Option<f64> {
    let b = direction.dot(origin);
    let c = origin.norm_squared() - radius_squared;
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }

    let t = -b + discriminant.sqrt();
    (t >= 0.0).then(|| t)
}

fn intersect_plane(normal: &Vector3<f64>, plane_point: &Vector3<f64>, origin: &Vector3<f64>, direction: &Vector3<f64>) -> Option<f64> {
    let denominator = normal.dot(direction);
    if denominator.abs() < 1e-12 {
        return None;
    }

    let t = normal.dot(&(plane_point - origin)) / denominator;
    (t >= 0.0).then(|| t)
}

fn reflect(direction: &Vector3<f64>, normal: &Vector3<f64>) -> Vector3<f64> {
    direction - normal * (2.0 * direction.dot(normal))
}

/// Traceable optics of one eye.
#[derive(Clone, Debug)]
pub struct OpticalSystem {
    eye: EyeOptics,
    world_to_sphere_space: Matrix4<f64>,
    clip_to_world: Matrix4<f64>,
}

impl OpticalSystem {
    pub fn new(eye: EyeOptics) -> Result<Self, ConfigError> {
        let world_to_sphere_space = eye.sphere_to_world_space.try_inverse()
            .ok_or_else(|| ConfigError::InvalidValue("sphereToWorldSpace".to_string()))?;

        let mut eye_to_world = Matrix4::new_translation(&eye.eye_position) * eye.eye_rotation.to_homogeneous();
        // The camera looks down -z, the headset forward is +z
        for row in 0..3 {
            eye_to_world[(row, 2)] *= -1.0;
        }

        let p = &eye.camera_projection;
        let projection = projection_off_center(p.x, p.y, p.w, p.z, CAMERA_NEAR, CAMERA_FAR);
        let clip_to_world = eye_to_world * projection.try_inverse()
            .ok_or_else(|| ConfigError::InvalidValue("cameraProjection".to_string()))?;

        Ok(Self { eye, world_to_sphere_space, clip_to_world })
    }

    pub fn get_eye(&self) -> &EyeOptics {
        &self.eye
    }

    fn render_uv_to_ray(&self, uv: &Vec2f64) -> Vector3<f64> {
        let clip = Vector3::new(uv.x * 2.0 - 1.0, uv.y * 2.0 - 1.0, 0.5);
        (multiply_point(&self.clip_to_world, &clip) - self.eye.eye_position).normalize()
    }

    /// Traces a ray through `uv` of the rendered image. Returns `None` if it misses the
    /// reflector or the screen.
    pub fn render_uv_to_display_uv(&self, uv: &Vec2f64) -> Option<Vec2f64> {
        let ray = self.render_uv_to_ray(uv);
        let eye = &self.eye;

        let origin = multiply_point(&self.world_to_sphere_space, &eye.eye_position);
        let direction = (multiply_point(&self.world_to_sphere_space, &(eye.eye_position + ray)) - origin).normalize();

        let t = intersect_sphere(&origin, &direction, SPHERE_RADIUS_SQUARED)?;
        let sphere_intersection = origin + direction * t;

        let minor = (eye.ellipse_minor_axis / 2.0).powi(2);
        let major = (eye.ellipse_major_axis / 2.0).powi(2);
        let inward = -sphere_intersection.normalize();
        let sphere_normal = Vector3::new(inward.x / minor, inward.y / minor, inward.z / major).normalize();

        let world_intersection = multiply_point(&eye.sphere_to_world_space, &sphere_intersection);
        let world_normal = multiply_vector(&eye.sphere_to_world_space, &sphere_normal).normalize();

        let bounce = reflect(&ray, &world_normal);
        let t = intersect_plane(&eye.screen_forward, &eye.screen_position, &world_intersection, &bounce)?;
        let screen = multiply_point_affine(&eye.world_to_screen_space, &(world_intersection + bounce * t));

        Some(Vec2f64::new(1.0 - (screen.y + 0.5), 1.0 - (screen.x + 0.5)))
    }

    /// Finds the render uv showing up at `display_uv`. Uses a damped Newton iteration with a
    /// finite difference jacobian.
    pub fn solve_display_uv_to_render_uv(&self, display_uv: &Vec2f64, seed: &Vec2f64, iterations: u32) -> Option<Vec2f64> {
        let mut uv = *seed;

        for _ in 0..iterations {
            let current = self.render_uv_to_display_uv(&uv)?;
            let error = current - display_uv;
            if error.norm() < SOLVER_TOLERANCE {
                break;
            }

            let dx = (self.render_uv_to_display_uv(&(uv + Vec2f64::new(SOLVER_EPSILON, 0.0)))? - current) / SOLVER_EPSILON;
            let dy = (self.render_uv_to_display_uv(&(uv + Vec2f64::new(0.0, SOLVER_EPSILON)))? - current) / SOLVER_EPSILON;
            let jacobian = Matrix2::from_columns(&[dx, dy]);

            let mut step = match jacobian.try_inverse() {
                Some(inverse) => inverse * error,
                None => jacobian.transpose() * error,
            };

            let length = step.norm();
            if length > SOLVER_MAX_STEP {
                step *= SOLVER_MAX_STEP / length;
            }
            uv -= step;
        }

        let residual = (self.render_uv_to_display_uv(&uv)? - display_uv).norm();
        if residual > 1e-4 {
            log::trace!("Solver for {:?} stopped with residual {}", display_uv, residual);
        }

        Some(uv)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeapTracker {
    pub name: Option<String>,
    pub serial: Option<String>,
    pub pose: Pose,
}

#[derive(Debug)]
pub struct NorthStarDistortion {
    eyes: [OpticalSystem; 2],
    leap_tracker: Option<LeapTracker>,

    /// Previous solutions keyed by the bits of the requested display uv.
    seeds: [Mutex<HashMap<(u32, u32), Vec2f64>>; 2],
    seed_capacity: usize,
}

impl NorthStarDistortion {
    pub fn new(left: EyeOptics, right: EyeOptics) -> Result<Self, ConfigError> {
        Ok(Self {
            eyes: [OpticalSystem::new(left)?, OpticalSystem::new(right)?],
            leap_tracker: None,
            seeds: [Mutex::new(HashMap::new()), Mutex::new(HashMap::new())],
            seed_capacity: SEED_CACHE_CAPACITY,
        })
    }

    /// Limits the number of cached seeds per view. A full cache is emptied before it grows.
    pub fn with_seed_capacity(mut self, capacity: usize) -> Self {
        self.seed_capacity = capacity.max(1);
        self
    }

    pub fn get_eye(&self, view: usize) -> Option<&OpticalSystem> {
        self.eyes.get(view)
    }

    pub fn get_leap_tracker(&self) -> Option<&LeapTracker> {
        self.leap_tracker.as_ref()
    }
}

impl DistortionModel for NorthStarDistortion {
    fn distortion_type(&self) -> DistortionType {
        DistortionType::GeometricNorthStar
    }

    fn compute_distortion(&self, view: usize, u: f32, v: f32) -> Option<UvTriplet> {
        let eye = self.eyes.get(view)?;
        let key = (u.to_bits(), v.to_bits());
        let target = Vec2f64::new(u as f64, v as f64);

        let mut seeds = self.seeds[view].lock().unwrap_or_else(|err| err.into_inner());
        let seed = seeds.get(&key).copied().unwrap_or_else(|| Vec2f64::new(0.5, 0.5));

        let uv = eye.solve_display_uv_to_render_uv(&target, &seed, SOLVER_ITERATIONS)?;
        if seeds.len() >= self.seed_capacity && !seeds.contains_key(&key) {
            log::trace!("Seed cache of view {} is full, dropping {} seeds", view, seeds.len());
            seeds.clear();
        }
        seeds.insert(key, uv);

        Some(UvTriplet::splat(Vec2f32::new(uv.x as f32, uv.y as f32)))
    }
}

fn parse_affine(value: &JsonValue, key: &str) -> Result<Matrix4<f64>, ConfigError> {
    let mut matrix = config::get_matrix4(value, key)?;
    matrix.set_row(3, &nalgebra::RowVector4::new(0.0, 0.0, 0.0, 1.0));
    Ok(matrix)
}

pub fn parse_eye(value: &JsonValue) -> Result<EyeOptics, ConfigError> {
    let projection = config::get_quat_raw(value, "cameraProjection")?;

    Ok(EyeOptics {
        ellipse_minor_axis: config::get_f64(value, "ellipseMinorAxis")?,
        ellipse_major_axis: config::get_f64(value, "ellipseMajorAxis")?,
        screen_forward: config::get_vec3(value, "screenForward")?,
        screen_position: config::get_vec3(value, "screenPosition")?,
        eye_position: config::get_vec3(value, "eyePosition")?,
        eye_rotation: config::get_unit_quat(value, "eyeRotation")?,
        camera_projection: Vector4::new(projection.i, projection.j, projection.k, projection.w),
        sphere_to_world_space: parse_affine(value, "sphereToWorldSpace")?,
        world_to_screen_space: parse_affine(value, "worldToScreenSpace")?,
    })
}

fn parse_leap_tracker(value: &JsonValue) -> Result<LeapTracker, ConfigError> {
    let local_pose = config::get(value, "localPose")?;
    let position = config::get_vec3(local_pose, "position")?;
    let rotation = config::get_unit_quat(local_pose, "rotation")?;

    Ok(LeapTracker {
        name: value["name"].as_str().map(str::to_string),
        serial: value["serial"].as_str().map(str::to_string),
        pose: pose_f32(&rotation, &position),
    })
}

pub fn parse_config(value: &JsonValue) -> Result<HmdOptics, ConfigError> {
    let left = parse_eye(config::get(value, "leftEye")?)?;
    let right = parse_eye(config::get(value, "rightEye")?)?;

    let fov = [left.fov(), right.fov()];
    for fov in &fov {
        config::validate_fov(fov)?;
    }
    let head_pose_to_eye = [left.eye_pose(), right.eye_pose()];

    let mut model = NorthStarDistortion::new(left, right)?;

    let leap = &value["leapTracker"];
    if !leap.is_null() {
        match parse_leap_tracker(leap) {
            Ok(tracker) => model.leap_tracker = Some(tracker),
            Err(err) => log::warn!("Ignoring malformed leap tracker: {}", err),
        }
    }

    Ok(HmdOptics::north_star(fov, head_pose_to_eye, Arc::new(model)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmd::mesh::DistortionMesh;

    fn test_eye() -> EyeOptics {
        EyeOptics {
            ellipse_minor_axis: 0.06,
            ellipse_major_axis: 0.08,
            screen_forward: Vector3::new(0.0, 0.0, 1.0),
            screen_position: Vector3::zeros(),
            eye_position: Vector3::new(0.0, 0.0, 0.04),
            eye_rotation: UnitQuaternion::identity(),
            camera_projection: Vector4::new(-0.15, 0.15, 0.15, -0.15),
            sphere_to_world_space: Matrix4::new_translation(&Vector3::new(0.0, 0.0, 0.06))
                * Matrix4::new_nonuniform_scaling(&Vector3::new(0.06, 0.06, 0.08)),
            world_to_screen_space: Matrix4::new_nonuniform_scaling(&Vector3::new(4.0, 4.0, 1.0)),
        }
    }

    #[test]
    fn center_maps_to_center() {
        let system = OpticalSystem::new(test_eye()).unwrap();
        let display = system.render_uv_to_display_uv(&Vec2f64::new(0.5, 0.5)).unwrap();
        assert!((display - Vec2f64::new(0.5, 0.5)).norm() < 1e-9);
    }

    #[test]
    fn solver_inverts_trace() {
        let model = NorthStarDistortion::new(test_eye(), test_eye()).unwrap();
        let system = model.get_eye(0).unwrap();

        for row in 1..127 {
            for col in 1..127 {
                let render = Vec2f64::new(col as f64 / 127.0, row as f64 / 127.0);
                let display = system.render_uv_to_display_uv(&render).unwrap();

                let uv = model.compute_distortion(0, display.x as f32, display.y as f32).unwrap().g;
                assert!((uv.x as f64 - render.x).abs() < 1e-3, "{:?} -> {:?}", render, uv);
                assert!((uv.y as f64 - render.y).abs() < 1e-3, "{:?} -> {:?}", render, uv);
            }
        }
    }

    #[test]
    fn seeds_are_reused() {
        let model = NorthStarDistortion::new(test_eye(), test_eye()).unwrap();
        let first = model.compute_distortion(1, 0.45, 0.55).unwrap();
        assert_eq!(model.seeds[1].lock().unwrap().len(), 1);

        let second = model.compute_distortion(1, 0.45, 0.55).unwrap();
        assert!((first.r - second.r).norm() < 1e-5);
        assert_eq!(model.seeds[1].lock().unwrap().len(), 1);
        assert!(model.seeds[0].lock().unwrap().is_empty());

        assert!(model.compute_distortion(2, 0.5, 0.5).is_none());
    }

    #[test]
    fn seed_cache_is_bounded() {
        let model = NorthStarDistortion::new(test_eye(), test_eye()).unwrap().with_seed_capacity(4);
        for step in 0..10 {
            let u = 0.3 + step as f32 * 0.02;
            model.compute_distortion(0, u, 0.5).unwrap();
            assert!(model.seeds[0].lock().unwrap().len() <= 4);
        }

        // Repeated lookups of a cached uv never evict
        let len = model.seeds[0].lock().unwrap().len();
        model.compute_distortion(0, 0.3 + 9.0 * 0.02, 0.5).unwrap();
        assert_eq!(model.seeds[0].lock().unwrap().len(), len);
    }

    #[test]
    fn mesh_round_trip() {
        let model = NorthStarDistortion::new(test_eye(), test_eye()).unwrap();
        let mesh = DistortionMesh::generate(&model, 16).unwrap();

        // One pixel of a 1440 x 1600 view
        let tolerance = 1.0 / 1440.0;
        for index in 0..mesh.vertex_count() {
            let vertex = mesh.vertex(index);
            let view = (index / mesh.vertex_count_per_view) as usize;
            let u = (vertex[0] + 1.0) / 2.0;
            let v = (vertex[1] + 1.0) / 2.0;

            let expected = model.compute_distortion(view, u, v).unwrap();
            for (channel, uv) in [expected.r, expected.g, expected.b].iter().enumerate() {
                assert!((uv.x - vertex[2 + channel * 2]).abs() < tolerance, "vertex {}", index);
                assert!((uv.y - vertex[3 + channel * 2]).abs() < tolerance, "vertex {}", index);
            }
        }
    }

    #[test]
    fn parse_geometric() {
        let eye = r#"{
            "ellipseMinorAxis": 0.06,
            "ellipseMajorAxis": 0.08,
            "screenForward": { "x": 0, "y": 0, "z": 1 },
            "screenPosition": { "x": 0, "y": 0, "z": 0 },
            "eyePosition": { "x": 0, "y": 0, "z": 0.04 },
            "eyeRotation": { "x": 0, "y": 0, "z": 0, "w": 1 },
            "cameraProjection": { "x": -0.15, "y": 0.15, "z": 0.15, "w": -0.15 },
            "sphereToWorldSpace": {
                "e00": 0.06, "e01": 0, "e02": 0, "e03": 0,
                "e10": 0, "e11": 0.06, "e12": 0, "e13": 0,
                "e20": 0, "e21": 0, "e22": 0.08, "e23": 0.06,
                "e30": 0, "e31": 0, "e32": 0, "e33": 1
            },
            "worldToScreenSpace": {
                "e00": 4, "e01": 0, "e02": 0, "e03": 0,
                "e10": 0, "e11": 4, "e12": 0, "e13": 0,
                "e20": 0, "e21": 0, "e22": 1, "e23": 0,
                "e30": 0, "e31": 0, "e32": 0, "e33": 0
            }
        }"#;
        let text = format!(r#"{{ "leftEye": {}, "rightEye": {},
            "leapTracker": {{ "name": "Leap", "localPose": {{
                "position": {{ "x": 0, "y": 0.01, "z": 0 }},
                "rotation": {{ "x": 0, "y": 0, "z": 0, "w": 1 }} }} }} }}"#, eye, eye);

        let optics = config::load_optics(&text).unwrap();
        assert_eq!(optics.distortion_type(), DistortionType::GeometricNorthStar);
        assert!((optics.views[0].fov.angle_left - (-0.15f32).atan()).abs() < 1e-6);
        assert!((optics.views[1].fov.angle_up - 0.15f32.atan()).abs() < 1e-6);
        assert!((optics.views[0].head_pose_to_eye.position.z - 0.04).abs() < 1e-6);

        let uv = optics.compute_distortion(0, 0.5, 0.5).unwrap().b;
        assert!((uv.x - 0.5).abs() < 1e-4);
        assert!((uv.y - 0.5).abs() < 1e-4);

        // Both eyes are required
        let text = format!(r#"{{ "leftEye": {} }}"#, eye);
        assert!(parse_config(&json::parse(&text).unwrap()).is_err());
    }
}
