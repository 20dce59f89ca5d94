//! Mesh based distortion rendering.
//!
//! A [`GfxRendering`] records one command buffer that draws the distortion mesh of both views
//! into a single target.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::prelude::*;
use crate::render::buffer::RenderBuffer;
use crate::render::resources::RenderResources;
use crate::render::target::{GfxTarget, GfxTargetResources};
use crate::util::vk::{make_rect, make_viewport};

/// Per view uniform data of the mesh vertex shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshUbo {
    /// Columns of a 2x2 rotation applied to the vertex positions.
    pub vertex_rot: [f32; 4],

    /// Maps the distorted uv into the sub image, `uv * zw + xy`.
    pub post_transform: [f32; 4],
}

const_assert_eq!(std::mem::size_of::<MeshUbo>(), 32);

impl MeshUbo {
    pub const IDENTITY_ROTATION: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

    pub fn new(norm_rect: &NormalizedRect) -> Self {
        Self {
            vertex_rot: Self::IDENTITY_ROTATION,
            post_transform: norm_rect.to_array(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RecordState {
    Initial,
    Target,
    View(usize),
    Ended,
}

pub struct GfxRendering {
    resources: Arc<RenderResources>,
    command_buffer: vk::CommandBuffer,
    ubos: Vec<RenderBuffer>,
    sets: Vec<vk::DescriptorSet>,
    target: Option<Arc<GfxTargetResources>>,
    state: RecordState,
}

impl GfxRendering {
    pub fn new(resources: Arc<RenderResources>) -> Result<Self> {
        let env = resources.get_env().clone();

        let command_buffer = env.get_command_pool().lock().allocate(1)?[0];

        let mut result = Self {
            resources,
            command_buffer,
            ubos: Vec::with_capacity(2),
            sets: Vec::new(),
            target: None,
            state: RecordState::Initial,
        };

        let memory = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        for _ in 0..2 {
            let mut ubo = RenderBuffer::new(&env, vk::BufferUsageFlags::UNIFORM_BUFFER, memory, std::mem::size_of::<MeshUbo>() as vk::DeviceSize)?;
            ubo.map()?;
            result.ubos.push(ubo);
        }
        result.sets = result.resources.allocate_mesh_sets(2)?;

        Ok(result)
    }

    pub fn get_command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    fn expect_state(&self, state: RecordState, what: &'static str) -> Result<()> {
        if self.state != state {
            log::error!("Mesh rendering is in state {:?}: {}", self.state, what);
            return Err(CompositorError::InvalidState(what));
        }
        Ok(())
    }

    /// Starts the command buffer and the render pass. Only one target can be rendered.
    pub fn begin_target(&mut self, target: &GfxTarget) -> Result<()> {
        self.expect_state(RecordState::Initial, "begin_target called twice")?;

        let env = self.resources.get_env();
        let data = target.get_data();
        let target_resources = target.get_target_resources();

        let clear_values = [
            vk::ClearValue { color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 0.0] } }
        ];

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(target_resources.get_render_pass())
            .framebuffer(target.get_framebuffer())
            .render_area(make_rect(&RenderViewport::new(0, 0, data.width, data.height)))
            .clear_values(&clear_values);

        {
            let _pool = env.get_command_pool().lock();
            unsafe {
                env.vk().begin_command_buffer(self.command_buffer, &begin_info)?;
                env.vk().cmd_begin_render_pass(self.command_buffer, &pass_info, vk::SubpassContents::INLINE);
            }
        }

        self.target = Some(target_resources.clone());
        self.state = RecordState::Target;
        Ok(())
    }

    pub fn begin_view(&mut self, view: usize, viewport: &RenderViewport) -> Result<()> {
        self.expect_state(RecordState::Target, "begin_view outside of a target")?;
        if view >= 2 {
            return Err(CompositorError::invalid_state("view index out of range"));
        }

        let env = self.resources.get_env();
        let _pool = env.get_command_pool().lock();
        unsafe {
            env.vk().cmd_set_viewport(self.command_buffer, 0, std::slice::from_ref(&make_viewport(viewport)));
            env.vk().cmd_set_scissor(self.command_buffer, 0, std::slice::from_ref(&make_rect(viewport)));
        }

        self.state = RecordState::View(view);
        Ok(())
    }

    /// Draws the distortion mesh of the view sampling `source_view`.
    pub fn distortion(&mut self, view: usize, sampler: vk::Sampler, source_view: vk::ImageView, ubo: &MeshUbo) -> Result<()> {
        self.expect_state(RecordState::View(view), "distortion outside of its view")?;

        let pipeline = match &self.target {
            Some(target) => target.get_pipeline(),
            None => return Err(CompositorError::invalid_state("distortion without target")),
        };

        self.ubos[view].write(bytemuck::bytes_of(ubo))?;

        let set = self.sets[view];
        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view: source_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let buffer_info = vk::DescriptorBufferInfo {
            buffer: self.ubos[view].handle(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        };
        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(std::slice::from_ref(&image_info))
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(std::slice::from_ref(&buffer_info))
                .build(),
        ];

        let env = self.resources.get_env();
        let device = env.vk();
        let mesh = self.resources.get_mesh();

        let _pool = env.get_command_pool().lock();
        unsafe {
            device.update_descriptor_sets(&writes, &[]);

            device.cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
            device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.resources.get_mesh_pipeline_layout(),
                0,
                std::slice::from_ref(&set),
                &[]
            );

            if let Some(vbo) = self.resources.get_vbo() {
                device.cmd_bind_vertex_buffers(self.command_buffer, 0, std::slice::from_ref(&vbo), &[0]);
            }

            match self.resources.get_ibo() {
                Some(ibo) => {
                    device.cmd_bind_index_buffer(self.command_buffer, ibo, 0, vk::IndexType::UINT32);
                    device.cmd_draw_indexed(self.command_buffer, mesh.index_counts[view], 1, mesh.index_offsets[view], 0, 0);
                }
                None => {
                    device.cmd_draw(self.command_buffer, mesh.vertex_count(), 1, 0, 0);
                }
            }
        }

        log::trace!("Recorded mesh distortion for view {}", view);
        Ok(())
    }

    pub fn end_view(&mut self) -> Result<()> {
        match self.state {
            RecordState::View(_) => {
                self.state = RecordState::Target;
                Ok(())
            }
            _ => Err(CompositorError::InvalidState("end_view without begin_view")),
        }
    }

    /// Ends the render pass and the command buffer.
    pub fn end_target(&mut self) -> Result<()> {
        self.expect_state(RecordState::Target, "end_target without begin_target")?;

        let env = self.resources.get_env();
        {
            let _pool = env.get_command_pool().lock();
            unsafe {
                env.vk().cmd_end_render_pass(self.command_buffer);
                env.vk().end_command_buffer(self.command_buffer)?;
            }
        }

        self.state = RecordState::Ended;
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.state == RecordState::Ended
    }
}

impl Drop for GfxRendering {
    fn drop(&mut self) {
        self.resources.free_mesh_sets(&self.sets);
        self.resources.get_env().get_command_pool().lock().free(std::slice::from_ref(&self.command_buffer));
    }
}

assert_impl_all!(GfxRendering: Send);
