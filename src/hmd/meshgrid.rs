//! Distortion from a pre-computed grid of sample positions.

use std::sync::Arc;

use json::JsonValue;

use crate::hmd::config::{self, ConfigError};
use crate::hmd::{DistortionModel, DistortionType, HmdOptics};
use crate::prelude::*;

/// Grid size of variable IPD calibrations.
const VIPD_GRID_POINTS: usize = 65;

#[derive(Clone, Debug, PartialEq)]
pub struct MeshgridDistortion {
    pub num_u: usize,
    pub num_v: usize,

    /// Sample positions per view, indexed `row * num_u + col`.
    pub grids: [Vec<Vec2f32>; 2],
}

impl MeshgridDistortion {
    pub fn new(num_u: usize, num_v: usize, grids: [Vec<Vec2f32>; 2]) -> Result<Self, ConfigError> {
        if num_u < 2 || num_v < 2 {
            return Err(ConfigError::InvalidValue("num_grid_points".to_string()));
        }
        if grids.iter().any(|grid| grid.len() != num_u * num_v) {
            return Err(ConfigError::InvalidValue("grid".to_string()));
        }

        Ok(Self { num_u, num_v, grids })
    }

    fn at(&self, view: usize, row: usize, col: usize) -> Vec2f32 {
        self.grids[view][row * self.num_u + col]
    }

    /// Splits a normalized coordinate into a cell index and the position inside the cell.
    fn locate(t: f32, count: usize) -> (usize, f32) {
        let scaled = t.clamp(0.0, 1.0) * (count - 1) as f32;
        let index = (scaled.floor() as usize).min(count - 2);
        (index, scaled - index as f32)
    }

    pub fn sample(&self, view: usize, u: f32, v: f32) -> Vec2f32 {
        let (col, tu) = Self::locate(u, self.num_u);
        let (row, tv) = Self::locate(v, self.num_v);

        let top = self.at(view, row, col).lerp(&self.at(view, row, col + 1), tu);
        let bottom = self.at(view, row + 1, col).lerp(&self.at(view, row + 1, col + 1), tu);
        top.lerp(&bottom, tv)
    }
}

impl DistortionModel for MeshgridDistortion {
    fn distortion_type(&self) -> DistortionType {
        DistortionType::Meshgrid
    }

    fn compute_distortion(&self, view: usize, u: f32, v: f32) -> Option<UvTriplet> {
        if view > 1 {
            return None;
        }
        Some(UvTriplet::splat(self.sample(view, u, v)))
    }
}

fn read_cell(cell: &JsonValue, what: &str) -> Result<Vec2f32, ConfigError> {
    match (cell[0].as_f32(), cell[1].as_f32()) {
        (Some(x), Some(y)) if cell.is_array() => Ok(Vec2f32::new(x, y)),
        _ => Err(ConfigError::InvalidValue(what.to_string())),
    }
}

/// Reads `grid[v][u]`, skipping `skip` leading entries of every row.
fn read_grid(grid: &JsonValue, num_u: usize, num_v: usize, skip: usize, what: &str) -> Result<Vec<Vec2f32>, ConfigError> {
    if !grid.is_array() || grid.len() < num_v {
        return Err(ConfigError::InvalidValue(what.to_string()));
    }

    let mut result = Vec::with_capacity(num_u * num_v);
    for row in grid.members().take(num_v) {
        if !row.is_array() || row.len() < num_u + skip {
            return Err(ConfigError::InvalidValue(what.to_string()));
        }
        for cell in row.members().skip(skip).take(num_u) {
            result.push(read_cell(cell, what)?);
        }
    }

    Ok(result)
}

fn grid_points(value: &JsonValue, key: &str) -> Result<usize, ConfigError> {
    value[key].as_usize().ok_or_else(|| ConfigError::MissingKey(key.to_string()))
}

pub fn parse_config(value: &JsonValue) -> Result<HmdOptics, ConfigError> {
    if value["version"].as_u32() != Some(2) {
        return Err(ConfigError::InvalidValue("version".to_string()));
    }

    let num_u = grid_points(value, "num_grid_points_x")?;
    let num_v = grid_points(value, "num_grid_points_y")?;

    let left = read_grid(config::get(config::get(value, "left")?, "grid")?, num_u, num_v, 0, "left.grid")?;
    let right = read_grid(config::get(config::get(value, "right")?, "grid")?, num_u, num_v, 0, "right.grid")?;
    let model = MeshgridDistortion::new(num_u, num_v, [left, right])?;

    let ipd = config::try_get_ipd(value);
    let fov = config::try_get_fov(value)?;

    Ok(HmdOptics::north_star(fov, config::ipd_head_poses(ipd), Arc::new(model)))
}

/// Parses a document with one meshgrid per IPD and blends the two grids surrounding the
/// configured IPD.
pub fn parse_vipd_config(value: &JsonValue) -> Result<HmdOptics, ConfigError> {
    let grids_json = config::get(value, "grids")?;
    if !grids_json.is_object() {
        return Err(ConfigError::InvalidValue("grids".to_string()));
    }

    let mut grids: Vec<(f32, [Vec<Vec2f32>; 2])> = Vec::new();
    for (key, entry) in grids_json.entries() {
        let ipd = match key.trim().parse::<f32>() {
            Ok(ipd_mm) => ipd_mm / 1000.0,
            Err(_) => {
                log::error!("Grid key `{}` is not a IPD, skipping", key);
                continue;
            }
        };
        if !(ipd < 0.100 && ipd > 0.030) {
            log::error!("Nonsense IPD in grid `{}`, skipping", key);
            continue;
        }

        // Every row starts with a label entry that is not part of the grid
        let left = read_grid(config::get(entry, "left")?, VIPD_GRID_POINTS, VIPD_GRID_POINTS, 1, "grids.left")?;
        let right = read_grid(config::get(entry, "right")?, VIPD_GRID_POINTS, VIPD_GRID_POINTS, 1, "grids.right")?;
        grids.push((ipd, [left, right]));
    }

    if grids.is_empty() {
        return Err(ConfigError::InvalidValue("grids".to_string()));
    }
    grids.sort_by(|a, b| a.0.total_cmp(&b.0));

    let ipd = config::try_get_ipd(value);
    let blended = blend_grids(&grids, ipd);
    let model = MeshgridDistortion::new(VIPD_GRID_POINTS, VIPD_GRID_POINTS, blended)?;

    let fov = config::try_get_fov(value)?;

    Ok(HmdOptics::north_star(fov, config::ipd_head_poses(ipd), Arc::new(model)))
}

/// Linear blend of the two grids around `ipd`. IPDs outside the calibrated range use the
/// closest grid.
fn blend_grids(grids: &[(f32, [Vec<Vec2f32>; 2])], ipd: f32) -> [Vec<Vec2f32>; 2] {
    let upper = grids.iter().position(|(grid_ipd, _)| *grid_ipd >= ipd);

    let (low, high, t) = match upper {
        Some(0) => (0, 0, 0.0),
        Some(index) => {
            let (low_ipd, high_ipd) = (grids[index - 1].0, grids[index].0);
            let t = if high_ipd > low_ipd { (ipd - low_ipd) / (high_ipd - low_ipd) } else { 0.0 };
            (index - 1, index, t)
        }
        None => (grids.len() - 1, grids.len() - 1, 0.0),
    };
    if upper.is_none() || upper == Some(0) && grids[0].0 != ipd {
        log::warn!("IPD {} is outside the calibrated range, using the closest grid", ipd);
    }
    log::debug!("Blending grids {} and {} with factor {}", low, high, t);

    let blend = |view: usize| -> Vec<Vec2f32> {
        grids[low].1[view].iter().zip(grids[high].1[view].iter())
            .map(|(a, b)| a.lerp(b, t))
            .collect()
    };

    [blend(0), blend(1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_grid(num_u: usize, num_v: usize) -> Vec<Vec2f32> {
        let mut grid = Vec::with_capacity(num_u * num_v);
        for row in 0..num_v {
            for col in 0..num_u {
                grid.push(Vec2f32::new(col as f32 / (num_u - 1) as f32, row as f32 / (num_v - 1) as f32));
            }
        }
        grid
    }

    fn grid_json(grid: &[Vec2f32], num_u: usize, label: bool) -> String {
        let rows: Vec<String> = grid.chunks(num_u).enumerate().map(|(index, row)| {
            let mut cells: Vec<String> = row.iter().map(|uv| format!("[{}, {}]", uv.x, uv.y)).collect();
            if label {
                cells.insert(0, format!("{}", index));
            }
            format!("[{}]", cells.join(", "))
        }).collect();
        format!("[{}]", rows.join(", "))
    }

    #[test]
    fn bilinear_sampling() {
        let model = MeshgridDistortion::new(3, 2, [identity_grid(3, 2), identity_grid(3, 2)]).unwrap();

        let uv = model.sample(0, 0.25, 0.5);
        assert!((uv.x - 0.25).abs() < 1e-6);
        assert!((uv.y - 0.5).abs() < 1e-6);

        // Clamped to the grid
        let uv = model.sample(1, 1.5, -0.5);
        assert!((uv.x - 1.0).abs() < 1e-6);
        assert!(uv.y.abs() < 1e-6);

        assert!(model.compute_distortion(2, 0.5, 0.5).is_none());
    }

    #[test]
    fn flat_indexing() {
        let mut grid = identity_grid(4, 3);
        grid[1 * 4 + 2] = Vec2f32::new(9.0, 9.0);
        let model = MeshgridDistortion::new(4, 3, [grid.clone(), grid]).unwrap();
        assert_eq!(model.sample(0, 2.0 / 3.0, 0.5), Vec2f32::new(9.0, 9.0));
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(MeshgridDistortion::new(1, 2, [vec![Vec2f32::zeros(); 2], vec![Vec2f32::zeros(); 2]]).is_err());
        assert!(MeshgridDistortion::new(2, 2, [identity_grid(2, 2), identity_grid(3, 2)]).is_err());
    }

    #[test]
    fn parse_meshgrid() {
        let grid = identity_grid(5, 4);
        let text = format!(
            r#"{{ "version": 2, "num_grid_points_x": 5, "num_grid_points_y": 4, "baseline": 62,
                 "left": {{ "grid": {} }}, "right": {{ "grid": {} }} }}"#,
            grid_json(&grid, 5, false), grid_json(&grid, 5, false)
        );
        let optics = config::load_optics(&text).unwrap();
        assert_eq!(optics.distortion_type(), DistortionType::Meshgrid);
        assert!((optics.views[1].head_pose_to_eye.position.x - 0.031).abs() < 1e-6);

        let uv = optics.compute_distortion(0, 0.5, 0.5).unwrap().r;
        assert!((uv.x - 0.5).abs() < 1e-6);
        assert!((uv.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn parse_vipd_blends() {
        let low = identity_grid(VIPD_GRID_POINTS, VIPD_GRID_POINTS);
        let high: Vec<_> = low.iter().map(|uv| uv + Vec2f32::new(0.1, 0.0)).collect();

        let entry = |grid: &[Vec2f32]| format!(
            r#"{{ "left": {}, "right": {} }}"#,
            grid_json(grid, VIPD_GRID_POINTS, true), grid_json(grid, VIPD_GRID_POINTS, true)
        );
        let text = format!(
            r#"{{ "baseline": 65, "grids": {{ "60": {}, "70": {}, "20": {} }} }}"#,
            entry(&low), entry(&high), entry(&low)
        );

        let optics = config::load_optics(&text).unwrap();
        let uv = optics.compute_distortion(0, 0.0, 0.0).unwrap().r;
        assert!((uv.x - 0.05).abs() < 1e-5);
        assert!(uv.y.abs() < 1e-5);
    }

    #[test]
    fn blend_outside_range_uses_closest() {
        let grids = vec![
            (0.060, [vec![Vec2f32::new(0.0, 0.0)], vec![Vec2f32::new(0.0, 0.0)]]),
            (0.070, [vec![Vec2f32::new(1.0, 0.0)], vec![Vec2f32::new(1.0, 0.0)]]),
        ];
        assert_eq!(blend_grids(&grids, 0.050)[0][0], Vec2f32::new(0.0, 0.0));
        assert_eq!(blend_grids(&grids, 0.080)[0][0], Vec2f32::new(1.0, 0.0));
        assert!((blend_grids(&grids, 0.065)[1][0] - Vec2f32::new(0.5, 0.0)).norm() < 1e-6);
    }
}
