//! Optical models of North Star style head mounted displays.
//!
//! A [`HmdOptics`] describes the screen, the per eye views and the distortion function mapping
//! a position on the display to the position in the rendered image that must be shown there.

pub mod config;
pub mod mesh;
pub mod meshgrid;
pub mod north_star;
pub mod panotools;
pub mod polynomial;

use std::fmt::Debug;
use std::sync::Arc;

use crate::hmd::config::ConfigError;
use crate::hmd::mesh::DistortionMesh;
use crate::prelude::*;

/// Default number of mesh cells along each axis.
pub const DEFAULT_MESH_CELLS: u32 = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DistortionType {
    GeometricNorthStar,
    Polynomial2d,
    Meshgrid,
    Panotools,
    None,
}

/// A distortion function. `u` and `v` are normalized display coordinates of one view.
pub trait DistortionModel: Send + Sync + Debug {
    fn distortion_type(&self) -> DistortionType;

    /// Returns where to sample each color channel in the rendered image, or `None` if the
    /// display position does not map to the rendered image.
    fn compute_distortion(&self, view: usize, u: f32, v: f32) -> Option<UvTriplet>;

    /// Mesh resolution suited for the model.
    fn preferred_mesh_cells(&self) -> u32 {
        DEFAULT_MESH_CELLS
    }
}

/// Passes coordinates through untouched.
#[derive(Debug, Default)]
pub struct NoDistortion;

impl DistortionModel for NoDistortion {
    fn distortion_type(&self) -> DistortionType {
        DistortionType::None
    }

    fn compute_distortion(&self, _: usize, u: f32, v: f32) -> Option<UvTriplet> {
        Some(UvTriplet::splat(Vec2f32::new(u, v)))
    }

    fn preferred_mesh_cells(&self) -> u32 {
        8
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HmdView {
    /// Where the view lands on the screen in pixels.
    pub viewport: RenderViewport,
    pub fov: Fov,
    pub head_pose_to_eye: Pose,
}

#[derive(Clone, Debug)]
pub struct HmdOptics {
    pub screen: Vec2u32,
    pub views: [HmdView; 2],
    pub blend_modes: Vec<BlendMode>,
    model: Arc<dyn DistortionModel>,
    mesh_cells: u32,
    mesh: Option<Arc<DistortionMesh>>,
}

impl HmdOptics {
    pub fn new(screen: Vec2u32, views: [HmdView; 2], blend_modes: Vec<BlendMode>, model: Arc<dyn DistortionModel>) -> Self {
        let mesh_cells = model.preferred_mesh_cells();
        Self {
            screen,
            views,
            blend_modes,
            model,
            mesh_cells,
            mesh: None,
        }
    }

    /// A North Star screen of 2 * 1440 x 1600 pixels split side by side with the given fovs.
    pub fn north_star(fovs: [Fov; 2], head_pose_to_eye: [Pose; 2], model: Arc<dyn DistortionModel>) -> Self {
        let view = |index: usize| HmdView {
            viewport: RenderViewport::new(index as u32 * 1440, 0, 1440, 1600),
            fov: fovs[index],
            head_pose_to_eye: head_pose_to_eye[index],
        };

        Self::new(
            Vec2u32::new(2880, 1600),
            [view(0), view(1)],
            vec![BlendMode::Additive, BlendMode::Opaque],
            model
        )
    }

    /// A screen split into two equally sized views sharing one fov, without eye offsets.
    pub fn side_by_side(screen: Vec2u32, fov: Fov, model: Arc<dyn DistortionModel>) -> Self {
        let width = screen.x / 2;
        let view = |index: u32| HmdView {
            viewport: RenderViewport::new(index * width, 0, width, screen.y),
            fov,
            head_pose_to_eye: Pose::identity(),
        };

        Self::new(screen, [view(0), view(1)], vec![BlendMode::Opaque], model)
    }

    /// Overrides the mesh resolution. Invalidates a previously generated mesh.
    pub fn with_mesh_cells(mut self, cells: u32) -> Self {
        self.mesh_cells = cells.max(1);
        self.mesh = None;
        self
    }

    pub fn distortion_type(&self) -> DistortionType {
        self.model.distortion_type()
    }

    pub fn get_model(&self) -> &Arc<dyn DistortionModel> {
        &self.model
    }

    pub fn compute_distortion(&self, view: usize, u: f32, v: f32) -> Option<UvTriplet> {
        self.model.compute_distortion(view, u, v)
    }

    /// Returns the distortion mesh generating it on first use.
    pub fn mesh(&mut self) -> Result<Arc<DistortionMesh>, ConfigError> {
        if let Some(mesh) = &self.mesh {
            return Ok(mesh.clone());
        }

        let mesh = Arc::new(DistortionMesh::generate(self.model.as_ref(), self.mesh_cells)?);
        self.mesh = Some(mesh.clone());
        Ok(mesh)
    }

    /// Per view transform from normalized render uv to tangent space, `[x, y, w, h]`.
    pub fn uv_to_tanangle(&self) -> [NormalizedRect; 2] {
        let rect = |fov: &Fov| {
            let [left, right, up, down] = fov.tangents();
            NormalizedRect::new(
                left as f32,
                -up as f32,
                (right - left) as f32,
                (up - down) as f32,
            )
        };

        [rect(&self.views[0].fov), rect(&self.views[1].fov)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn north_star_layout() {
        let optics = HmdOptics::north_star([Fov::symmetric(0.7); 2], [Pose::identity(); 2], Arc::new(NoDistortion));
        assert_eq!(optics.screen, Vec2u32::new(2880, 1600));
        assert_eq!(optics.views[1].viewport, RenderViewport::new(1440, 0, 1440, 1600));
        assert_eq!(optics.blend_modes, vec![BlendMode::Additive, BlendMode::Opaque]);
        assert_eq!(optics.distortion_type(), DistortionType::None);
    }

    #[test]
    fn uv_to_tanangle_covers_fov() {
        let fov = Fov::new(-0.5, 0.6, 0.4, -0.3);
        let optics = HmdOptics::north_star([fov; 2], [Pose::identity(); 2], Arc::new(NoDistortion));
        let rect = optics.uv_to_tanangle()[0];

        // uv (0, 0) is the top left corner, uv (1, 1) the bottom right one
        assert!((rect.x - (-0.5f32).tan()).abs() < 1e-6);
        assert!((rect.y - -(0.4f32).tan()).abs() < 1e-6);
        assert!((rect.x + rect.w - 0.6f32.tan()).abs() < 1e-6);
        assert!((rect.y + rect.h - -(-0.3f32).tan()).abs() < 1e-6);
    }

    #[test]
    fn mesh_is_cached() {
        let mut optics = HmdOptics::north_star([Fov::symmetric(0.7); 2], [Pose::identity(); 2], Arc::new(NoDistortion));
        let a = optics.mesh().unwrap();
        let b = optics.mesh().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.cells, 8);

        let mut optics = optics.with_mesh_cells(4);
        assert_eq!(optics.mesh().unwrap().cells, 4);
    }
}
