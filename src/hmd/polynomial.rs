//! Polynomial 2D distortion.
//!
//! The calibration maps a display uv to a ray in tangent space with a bivariate cubic
//! polynomial per axis. Coefficient `i * 4 + j` multiplies `u^i * v^j`.

use std::sync::Arc;

use json::JsonValue;

use crate::hmd::config::{self, ConfigError};
use crate::hmd::{DistortionModel, DistortionType, HmdOptics};
use crate::prelude::*;

pub const COEFFICIENT_COUNT: usize = 16;

#[derive(Clone, Debug, PartialEq)]
pub struct PolynomialDistortion {
    pub x_coefficients: [[f64; COEFFICIENT_COUNT]; 2],
    pub y_coefficients: [[f64; COEFFICIENT_COUNT]; 2],
    pub fov: [Fov; 2],
}

fn evaluate(coefficients: &[f64; COEFFICIENT_COUNT], u: f64, v: f64) -> f64 {
    let mut result = 0.0;
    let mut u_pow = 1.0;
    for i in 0..4 {
        let mut v_pow = 1.0;
        for j in 0..4 {
            result += coefficients[i * 4 + j] * u_pow * v_pow;
            v_pow *= v;
        }
        u_pow *= u;
    }
    result
}

fn map_range(value: f64, from_low: f64, from_high: f64) -> f64 {
    (value - from_low) / (from_high - from_low)
}

impl DistortionModel for PolynomialDistortion {
    fn distortion_type(&self) -> DistortionType {
        DistortionType::Polynomial2d
    }

    fn compute_distortion(&self, view: usize, u: f32, v: f32) -> Option<UvTriplet> {
        let x_ray = evaluate(self.x_coefficients.get(view)?, u as f64, v as f64);
        let y_ray = evaluate(self.y_coefficients.get(view)?, u as f64, v as f64);

        let [left, right, up, down] = self.fov[view].tangents();

        // Results outside the rendered image would be clamped by the sampler anyway
        let uv = Vec2f32::new(
            map_range(x_ray, left, right).clamp(0.0, 1.0) as f32,
            map_range(y_ray, down, up).clamp(0.0, 1.0) as f32,
        );

        Some(UvTriplet::splat(uv))
    }
}

fn coefficients(value: &JsonValue, key: &str) -> Result<[f64; COEFFICIENT_COUNT], ConfigError> {
    let values = config::float_array(value, key, COEFFICIENT_COUNT)?;

    let mut result = [0.0; COEFFICIENT_COUNT];
    result.copy_from_slice(&values);
    Ok(result)
}

pub fn parse_config(value: &JsonValue) -> Result<HmdOptics, ConfigError> {
    // The calibrator swaps x and y relative to the display
    let y_right = coefficients(value, "left_uv_to_rect_x")?;
    let x_right = coefficients(value, "left_uv_to_rect_y")?;
    let y_left = coefficients(value, "right_uv_to_rect_x")?;
    let x_left = coefficients(value, "right_uv_to_rect_y")?;

    let ipd = config::try_get_ipd(value);
    let fov = config::try_get_fov(value)?;

    let model = PolynomialDistortion {
        x_coefficients: [x_left, x_right],
        y_coefficients: [y_left, y_right],
        fov,
    };

    Ok(HmdOptics::north_star(fov, config::ipd_head_poses(ipd), Arc::new(model)))
}
