//! Loading of [`HmdOptics`] from JSON calibration documents.
//!
//! Four document formats are understood. They are tried in order and the first parser that
//! accepts the document wins:
//! 1. Geometric North Star calibration (`leftEye` / `rightEye`).
//! 2. Polynomial 2D calibration (`left_uv_to_rect_x` and friends).
//! 3. Meshgrid calibration (`version = 2` with `left.grid` / `right.grid`).
//! 4. Variable IPD meshgrids (`grids` keyed by IPD in millimeters).

use std::fmt::{Display, Formatter};

use json::JsonValue;
use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector3};

use crate::hmd::{meshgrid, north_star, polynomial, HmdOptics};
use crate::prelude::*;

const DEFAULT_IPD_MM: f64 = 64.0;
const DEFAULT_FOV_HALF_ANGLE: f32 = 0.7;

#[derive(Debug)]
pub enum ConfigError {
    Parse(json::Error),
    MissingKey(String),
    InvalidValue(String),
    UnknownFormat,

    /// The distortion function produced no result while generating the mesh.
    DistortionFailed { view: usize, u: f32, v: f32 },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Parse(err) => write!(f, "json parse error: {}", err),
            ConfigError::MissingKey(key) => write!(f, "missing key `{}`", key),
            ConfigError::InvalidValue(key) => write!(f, "invalid value for `{}`", key),
            ConfigError::UnknownFormat => write!(f, "document does not match any known calibration format"),
            ConfigError::DistortionFailed { view, u, v } => write!(f, "distortion failed for view {} at ({}, {})", view, u, v),
        }
    }
}

impl std::error::Error for ConfigError {
}

impl From<json::Error> for ConfigError {
    fn from(err: json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// Parses a calibration document.
pub fn load_optics(text: &str) -> Result<HmdOptics, ConfigError> {
    let value = json::parse(text)?;
    optics_from_json(&value)
}

pub fn optics_from_json(value: &JsonValue) -> Result<HmdOptics, ConfigError> {
    let parsers: [(&str, fn(&JsonValue) -> Result<HmdOptics, ConfigError>); 4] = [
        ("geometric", north_star::parse_config),
        ("polynomial 2d", polynomial::parse_config),
        ("meshgrid", meshgrid::parse_config),
        ("variable ipd meshgrid", meshgrid::parse_vipd_config),
    ];

    for (name, parser) in parsers {
        match parser(value) {
            Ok(optics) => {
                log::info!("Loaded {} distortion configuration", name);
                return Ok(optics);
            }
            Err(err) => log::debug!("Configuration is not {}: {}", name, err),
        }
    }

    log::error!("Unknown distortion configuration format");
    Err(ConfigError::UnknownFormat)
}

pub(crate) fn get<'a>(value: &'a JsonValue, key: &str) -> Result<&'a JsonValue, ConfigError> {
    let result = &value[key];
    if result.is_null() {
        Err(ConfigError::MissingKey(key.to_string()))
    } else {
        Ok(result)
    }
}

pub(crate) fn get_f64(value: &JsonValue, key: &str) -> Result<f64, ConfigError> {
    get(value, key)?.as_f64().ok_or_else(|| ConfigError::InvalidValue(key.to_string()))
}

pub(crate) fn get_vec3(value: &JsonValue, key: &str) -> Result<Vector3<f64>, ConfigError> {
    let obj = get(value, key)?;
    Ok(Vector3::new(get_f64(obj, "x")?, get_f64(obj, "y")?, get_f64(obj, "z")?))
}

/// Reads a `{ x, y, z, w }` object without normalizing it.
pub(crate) fn get_quat_raw(value: &JsonValue, key: &str) -> Result<Quaternion<f64>, ConfigError> {
    let obj = get(value, key)?;
    Ok(Quaternion::new(get_f64(obj, "w")?, get_f64(obj, "x")?, get_f64(obj, "y")?, get_f64(obj, "z")?))
}

pub(crate) fn get_unit_quat(value: &JsonValue, key: &str) -> Result<UnitQuaternion<f64>, ConfigError> {
    let quat = get_quat_raw(value, key)?;
    if quat.norm() < 1e-6 {
        return Err(ConfigError::InvalidValue(key.to_string()));
    }
    Ok(UnitQuaternion::from_quaternion(quat))
}

/// Reads a matrix stored as `e{row}{col}` entries.
pub(crate) fn get_matrix4(value: &JsonValue, key: &str) -> Result<Matrix4<f64>, ConfigError> {
    let obj = get(value, key)?;

    let mut matrix = Matrix4::zeros();
    for row in 0..4 {
        for col in 0..4 {
            let entry = format!("e{}{}", row, col);
            matrix[(row, col)] = obj[entry.as_str()].as_f64()
                .ok_or_else(|| ConfigError::MissingKey(format!("{}.{}", key, entry)))?;
        }
    }

    Ok(matrix)
}

pub(crate) fn float_array(value: &JsonValue, key: &str, len: usize) -> Result<Vec<f64>, ConfigError> {
    let array = get(value, key)?;
    if !array.is_array() || array.len() != len {
        return Err(ConfigError::InvalidValue(key.to_string()));
    }

    array.members()
        .map(|member| member.as_f64().ok_or_else(|| ConfigError::InvalidValue(key.to_string())))
        .collect()
}

/// Interpupillary distance in meters. Missing values default to 64 millimeters.
pub fn try_get_ipd(value: &JsonValue) -> f32 {
    let found = ["baseline", "ipd", "IPD"].iter()
        .find_map(|key| value[*key].as_f64().map(|ipd| (*key, ipd)));

    let ipd_mm = match found {
        Some((key, ipd)) => {
            if ipd > 250.0 {
                log::error!("IPD is way too high ({} millimeters!) Are you sure `{}` in your config file is correct?", ipd, key);
            } else if ipd < 10.0 {
                log::error!("IPD is way too low ({} millimeters!) Are you sure `{}` in your config file is correct?", ipd, key);
            }
            ipd
        }
        None => {
            log::info!("No key `baseline` (or `ipd`, or `IPD`) in config, guessing the IPD is {} millimeters", DEFAULT_IPD_MM);
            DEFAULT_IPD_MM
        }
    };

    (ipd_mm * 0.001) as f32
}

/// Fov used for both views. Either a `[left, right, up, down]` array or a single half angle.
pub fn try_get_fov(value: &JsonValue) -> Result<[Fov; 2], ConfigError> {
    let mut fov = None;
    for key in ["fov", "FOV"] {
        let obj = &value[key];
        if obj.is_null() {
            continue;
        }

        if let Ok(angles) = float_array(value, key, 4) {
            fov = Some(Fov::new(angles[0] as f32, angles[1] as f32, angles[2] as f32, angles[3] as f32));
            break;
        }
        if let Some(half_angle) = obj.as_f32() {
            fov = Some(Fov::symmetric(half_angle));
            break;
        }
    }

    let fov = fov.unwrap_or_else(|| {
        log::info!("No key `fov` in config, guessing {} radian half angles", DEFAULT_FOV_HALF_ANGLE);
        Fov::symmetric(DEFAULT_FOV_HALF_ANGLE)
    });
    validate_fov(&fov)?;

    Ok([fov, fov])
}

pub(crate) fn validate_fov(fov: &Fov) -> Result<(), ConfigError> {
    let half_pi = std::f32::consts::FRAC_PI_2;
    let angles = [fov.angle_left, fov.angle_right, fov.angle_up, fov.angle_down];

    if fov.angle_right <= fov.angle_left || fov.angle_up <= fov.angle_down || angles.iter().any(|a| a.abs() >= half_pi) {
        log::error!("Invalid fov {:?}", fov);
        return Err(ConfigError::InvalidValue("fov".to_string()));
    }
    Ok(())
}

/// Eye poses offset by half the IPD along x.
pub fn ipd_head_poses(ipd: f32) -> [Pose; 2] {
    [
        Pose::new(UnitQuaternion::identity(), Vec3f32::new(-ipd / 2.0, 0.0, 0.0)),
        Pose::new(UnitQuaternion::identity(), Vec3f32::new(ipd / 2.0, 0.0, 0.0)),
    ]
}
