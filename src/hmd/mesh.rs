//! Distortion mesh generation.
//!
//! Every view is covered by a regular grid of `cells * cells` quads. Each vertex stores its
//! position in normalized device coordinates followed by the sample position of every color
//! channel. The indices of a view form a single triangle strip, rows are joined with degenerate
//! triangles.

use crate::hmd::DistortionModel;
use crate::hmd::config::ConfigError;

/// Floats per vertex: position, r uv, g uv, b uv.
pub const VERTEX_FLOATS: usize = 8;

pub const VERTEX_STRIDE: u32 = (VERTEX_FLOATS * std::mem::size_of::<f32>()) as u32;

#[derive(Clone, Debug, PartialEq)]
pub struct DistortionMesh {
    pub cells: u32,
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    pub vertex_count_per_view: u32,
    pub index_offsets: [u32; 2],
    pub index_counts: [u32; 2],
}

impl DistortionMesh {
    /// Evaluates the model on every grid vertex. Fails if any vertex does not map to the
    /// rendered image.
    pub fn generate(model: &dyn DistortionModel, cells: u32) -> Result<Self, ConfigError> {
        let cells = cells.max(1);
        let verts_per_row = cells + 1;
        let vertex_count_per_view = verts_per_row * verts_per_row;

        let mut vertices = Vec::with_capacity(vertex_count_per_view as usize * 2 * VERTEX_FLOATS);
        for view in 0..2usize {
            for row in 0..verts_per_row {
                let v = row as f32 / cells as f32;
                for col in 0..verts_per_row {
                    let u = col as f32 / cells as f32;

                    let uv = model.compute_distortion(view, u, v)
                        .ok_or(ConfigError::DistortionFailed { view, u, v })?;

                    vertices.extend_from_slice(&[
                        u * 2.0 - 1.0,
                        v * 2.0 - 1.0,
                        uv.r.x, uv.r.y,
                        uv.g.x, uv.g.y,
                        uv.b.x, uv.b.y,
                    ]);
                }
            }
        }

        let mut indices = Vec::new();
        let mut index_offsets = [0u32; 2];
        let mut index_counts = [0u32; 2];
        for view in 0..2u32 {
            index_offsets[view as usize] = indices.len() as u32;

            let base = view * vertex_count_per_view;
            let index = |row: u32, col: u32| base + row * verts_per_row + col;
            for row in 0..cells {
                // Degenerate start of the row
                indices.push(index(row, 0));
                for col in 0..verts_per_row {
                    indices.push(index(row, col));
                    indices.push(index(row + 1, col));
                }
                // Degenerate end of the row
                indices.push(index(row + 1, cells));
            }

            index_counts[view as usize] = indices.len() as u32 - index_offsets[view as usize];
        }

        Ok(Self {
            cells,
            vertices,
            indices,
            vertex_count_per_view,
            index_offsets,
            index_counts,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        (self.vertices.len() / VERTEX_FLOATS) as u32
    }

    pub fn index_count_total(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn vertex(&self, index: u32) -> &[f32] {
        let start = index as usize * VERTEX_FLOATS;
        &self.vertices[start..start + VERTEX_FLOATS]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::hmd::{DistortionType, NoDistortion};
    use crate::prelude::*;
    use super::*;

    #[test]
    fn layout() {
        let mesh = DistortionMesh::generate(&NoDistortion, 4).unwrap();
        assert_eq!(mesh.vertex_count_per_view, 25);
        assert_eq!(mesh.vertex_count(), 50);

        // Per row two vertices per column plus the two degenerates
        let per_view = 4 * (5 * 2 + 2);
        assert_eq!(mesh.index_counts, [per_view, per_view]);
        assert_eq!(mesh.index_offsets, [0, per_view]);
        assert_eq!(mesh.index_count_total(), 2 * per_view);

        // The second view only references its own vertices
        let second = &mesh.indices[per_view as usize..];
        assert!(second.iter().all(|index| *index >= 25 && *index < 50));

        assert_eq!(&mesh.indices[0..4], &[0, 0, 5, 1]);
        assert_eq!(mesh.indices[per_view as usize - 1], 24);
    }

    #[test]
    fn positions_cover_ndc() {
        let mesh = DistortionMesh::generate(&NoDistortion, 8).unwrap();
        assert_eq!(&mesh.vertex(0)[0..2], &[-1.0, -1.0]);
        assert_eq!(&mesh.vertex(80)[0..2], &[1.0, 1.0]);
        assert_eq!(&mesh.vertex(80)[2..8], &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[derive(Debug)]
    struct FailAfter(AtomicUsize);

    impl DistortionModel for FailAfter {
        fn distortion_type(&self) -> DistortionType {
            DistortionType::None
        }

        fn compute_distortion(&self, _: usize, u: f32, v: f32) -> Option<UvTriplet> {
            if self.0.fetch_sub(1, Ordering::Relaxed) == 0 {
                None
            } else {
                Some(UvTriplet::splat(Vec2f32::new(u, v)))
            }
        }
    }

    #[test]
    fn failing_vertex_aborts() {
        let result = DistortionMesh::generate(&FailAfter(AtomicUsize::new(30)), 4);
        assert!(matches!(result, Err(ConfigError::DistortionFailed { view: 1, .. })));
    }
}
