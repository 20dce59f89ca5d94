//! Rotational timewarp.
//!
//! A frame rendered for one head orientation is reprojected for a newer one. The matrix maps a
//! tangent space direction of the new view into clip space of the rendered view.

use nalgebra::{Matrix4, UnitQuaternion};

use crate::prelude::*;

/// Projection built from the tangent bounds of the fov. The depth row is zero since only x, y
/// and w are used.
pub fn calc_time_warp_projection(fov: &Fov) -> Mat4f64 {
    let [tan_left, tan_right, tan_up, tan_down] = fov.tangents();

    let width = tan_right - tan_left;
    let height = tan_down - tan_up;

    let a11 = 2.0 / width;
    let a22 = 2.0 / height;
    let a31 = (tan_right + tan_left) / width;
    let a32 = (tan_up + tan_down) / height;

    Matrix4::new(
        a11, 0.0, a31, 0.0,
        0.0, a22, a32, 0.0,
        0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, -1.0, 0.0,
    )
}

fn rotation(orientation: &UnitQuaternion<f32>) -> Mat4f64 {
    let quat = orientation.quaternion();
    let orientation = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(quat.w as f64, quat.i as f64, quat.j as f64, quat.k as f64));
    orientation.to_homogeneous()
}

/// Returns `P * rot(src)^-1 * rot(new)` for the shader, column major.
pub fn calc_time_warp_matrix(src_pose: &Pose, src_fov: &Fov, new_pose: &Pose) -> Mat4f32 {
    let src_rot_inv = rotation(&src_pose.orientation);
    let new_rot = rotation(&new_pose.orientation).transpose();

    let delta = new_rot * src_rot_inv;
    let delta_inv = delta.transpose();

    let result = calc_time_warp_projection(src_fov) * delta_inv;
    result.map(|value| value as f32)
}

#[cfg(test)]
mod tests {
    use nalgebra::{Vector3, Vector4};
    use rand::Rng;

    use super::*;

    /// Mirrors the shader: tangent space from render uv, through the matrix and back to uv.
    fn warp_uv(matrix: &Mat4f32, uv_to_tan: &NormalizedRect, u: f32, v: f32) -> (f32, f32) {
        let x = u * uv_to_tan.w + uv_to_tan.x;
        let y = -(v * uv_to_tan.h + uv_to_tan.y);

        let result = matrix * Vector4::new(x, y, -1.0, 1.0);
        let w = result.w.max(0.00001);
        (result.x / w * 0.5 + 0.5, result.y / w * 0.5 + 0.5)
    }

    fn uv_to_tan(fov: &Fov) -> NormalizedRect {
        let [left, right, up, down] = fov.tangents();
        NormalizedRect::new(left as f32, -up as f32, (right - left) as f32, (up - down) as f32)
    }

    #[test]
    fn identity_is_projection() {
        let fov = Fov::new(-0.7, 0.6, 0.65, -0.75);
        let matrix = calc_time_warp_matrix(&Pose::identity(), &fov, &Pose::identity());
        let projection = calc_time_warp_projection(&fov).map(|value| value as f32);
        assert!((matrix - projection).norm() < 1e-6);

        let rect = uv_to_tan(&fov);
        for (u, v) in [(0.0, 0.0), (1.0, 1.0), (0.25, 0.8), (0.5, 0.5)] {
            let (wu, wv) = warp_uv(&matrix, &rect, u, v);
            assert!((wu - u).abs() < 1e-5, "u {} became {}", u, wu);
            assert!((wv - v).abs() < 1e-5, "v {} became {}", v, wv);
        }
    }

    #[test]
    fn same_orientation_cancels() {
        let mut rng = rand::thread_rng();
        let fov = Fov::symmetric(0.8);
        let projection = calc_time_warp_projection(&fov).map(|value| value as f32);

        for _ in 0..32 {
            let axis = Vector3::new(rng.gen_range(-1.0..1.0f32), rng.gen_range(-1.0..1.0f32), rng.gen_range(-1.0..1.0f32));
            let angle = rng.gen_range(-3.0..3.0f32);
            let orientation = UnitQuaternion::from_scaled_axis(axis.normalize() * angle);
            let pose = Pose::new(orientation, Vector3::zeros());

            let matrix = calc_time_warp_matrix(&pose, &fov, &pose);
            assert!((matrix - projection).norm() < 1e-4);
        }
    }

    #[test]
    fn yaw_shifts_horizontally() {
        let fov = Fov::symmetric(0.8);
        let rect = uv_to_tan(&fov);

        // Turning the head left moves the content right in the new view
        let new_pose = Pose::new(UnitQuaternion::from_euler_angles(0.0, 0.1, 0.0), Vector3::zeros());
        let matrix = calc_time_warp_matrix(&Pose::identity(), &fov, &new_pose);

        let (u, v) = warp_uv(&matrix, &rect, 0.5, 0.5);
        assert!(u < 0.5);
        assert!((v - 0.5).abs() < 1e-4);
    }
}
