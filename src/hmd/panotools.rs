//! Panotools style radial distortion with per channel chromatic aberration.

use crate::hmd::{DistortionModel, DistortionType};
use crate::prelude::*;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PanotoolsValues {
    /// Size of the view in meters.
    pub viewport_size: Vec2f32,
    pub lens_center: Vec2f32,
    pub scale: f32,

    /// Coefficients of `r^0` to `r^4`.
    pub distortion_k: [f32; 5],

    /// Scale applied to the red, green and blue channel.
    pub aberration_k: [f32; 3],
}

impl PanotoolsValues {
    fn radial_scale(&self, radius: f32) -> f32 {
        self.distortion_k.iter().rev().fold(0.0, |acc, k| acc * radius + k)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PanotoolsDistortion {
    pub views: [PanotoolsValues; 2],
}

impl PanotoolsDistortion {
    pub fn new(left: PanotoolsValues, right: PanotoolsValues) -> Self {
        Self { views: [left, right] }
    }
}

impl DistortionModel for PanotoolsDistortion {
    fn distortion_type(&self) -> DistortionType {
        DistortionType::Panotools
    }

    fn compute_distortion(&self, view: usize, u: f32, v: f32) -> Option<UvTriplet> {
        let values = self.views.get(view)?;

        let r = (Vec2f32::new(u, v).component_mul(&values.viewport_size) - values.lens_center) / values.scale;
        let distorted = r * values.radial_scale(r.norm()) * values.scale;

        let channel = |k: f32| (distorted * k + values.lens_center).component_div(&values.viewport_size);

        Some(UvTriplet {
            r: channel(values.aberration_k[0]),
            g: channel(values.aberration_k[1]),
            b: channel(values.aberration_k[2]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> PanotoolsValues {
        PanotoolsValues {
            viewport_size: Vec2f32::new(0.0625, 0.07),
            lens_center: Vec2f32::new(0.03125, 0.035),
            scale: 0.04,
            distortion_k: [1.0, 0.0, 0.0, 0.0, 0.0],
            aberration_k: [1.0, 1.0, 1.0],
        }
    }

    #[test]
    fn identity_coefficients() {
        let model = PanotoolsDistortion::new(values(), values());
        let result = model.compute_distortion(0, 0.3, 0.8).unwrap();
        assert!((result.g - Vec2f32::new(0.3, 0.8)).norm() < 1e-5);
        assert!(model.compute_distortion(2, 0.3, 0.8).is_none());
    }

    #[test]
    fn lens_center_is_fixed() {
        let mut values = values();
        values.distortion_k = [1.0, 0.3, 0.2, 0.1, 0.05];
        values.aberration_k = [0.98, 1.0, 1.02];
        let model = PanotoolsDistortion::new(values, values);

        let result = model.compute_distortion(1, 0.5, 0.5).unwrap();
        for channel in 0..3 {
            assert!((result.channel(channel) - Vec2f32::new(0.5, 0.5)).norm() < 1e-5);
        }
    }

    #[test]
    fn aberration_separates_channels() {
        let mut values = values();
        values.distortion_k = [1.0, 0.2, 0.0, 0.0, 0.0];
        values.aberration_k = [0.98, 1.0, 1.02];
        let model = PanotoolsDistortion::new(values, values);

        let result = model.compute_distortion(0, 0.9, 0.5).unwrap();
        assert!(result.r.x < result.g.x);
        assert!(result.g.x < result.b.x);
        // Barrel distortion pushes the sample outwards
        assert!(result.g.x > 0.9);
    }
}
