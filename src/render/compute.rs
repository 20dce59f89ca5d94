//! Compute based distortion, timewarp and clearing.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::prelude::*;
use crate::render::buffer::RenderBuffer;
use crate::render::resources::RenderResources;
use crate::render::target::final_layout;
use crate::render::timewarp::calc_time_warp_matrix;

pub const COMPUTE_GROUP_SIZE: u32 = 8;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct ComputeUbo {
    /// `(x, y, w, h)` of each view in the target.
    pub views: [[i32; 4]; 2],
    pub pre_transform: [[f32; 4]; 2],
    pub post_transform: [[f32; 4]; 2],

    /// Column major timewarp matrices.
    pub transform: [[f32; 16]; 2],
}

const_assert_eq!(std::mem::size_of::<ComputeUbo>(), 224);

const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

impl ComputeUbo {
    fn new(pre_transform: &[NormalizedRect; 2], norm_rects: &[NormalizedRect; 2], viewports: &[RenderViewport; 2]) -> Self {
        Self {
            views: [viewports[0].to_ivec4(), viewports[1].to_ivec4()],
            pre_transform: [pre_transform[0].to_array(), pre_transform[1].to_array()],
            post_transform: [norm_rects[0].to_array(), norm_rects[1].to_array()],
            transform: [IDENTITY_MATRIX; 2],
        }
    }
}

/// The images sampled for both views.
#[derive(Copy, Clone, Debug)]
pub struct ProjectionSources {
    pub samplers: [vk::Sampler; 2],
    pub views: [vk::ImageView; 2],
    pub norm_rects: [NormalizedRect; 2],
}

/// A storage image written by the compute shaders. The image must use `R8G8B8A8_UNORM`.
#[derive(Copy, Clone, Debug)]
pub struct ComputeTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub viewports: [RenderViewport; 2],
    pub is_external: bool,
}

/// Work group counts covering the larger of the two views, one layer per view.
pub fn dispatch_size(viewports: &[RenderViewport; 2]) -> (u32, u32, u32) {
    let width = viewports[0].w.max(viewports[1].w);
    let height = viewports[0].h.max(viewports[1].h);
    (
        (width + COMPUTE_GROUP_SIZE - 1) / COMPUTE_GROUP_SIZE,
        (height + COMPUTE_GROUP_SIZE - 1) / COMPUTE_GROUP_SIZE,
        2,
    )
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RecordState {
    Initial,
    Recording,
    Dispatched,
    Ended,
}

pub struct ComputeRendering {
    resources: Arc<RenderResources>,
    command_buffer: vk::CommandBuffer,
    set: vk::DescriptorSet,
    ubo: RenderBuffer,
    state: RecordState,
}

impl ComputeRendering {
    pub fn new(resources: Arc<RenderResources>) -> Result<Self> {
        let env = resources.get_env().clone();

        let memory = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let mut ubo = RenderBuffer::new(&env, vk::BufferUsageFlags::UNIFORM_BUFFER, memory, std::mem::size_of::<ComputeUbo>() as vk::DeviceSize)?;
        ubo.map()?;

        let set = resources.allocate_compute_set()?;
        let command_buffer = match env.get_command_pool().lock().allocate(1) {
            Ok(buffers) => buffers[0],
            Err(err) => {
                resources.release_compute_set();
                return Err(err.into());
            }
        };

        Ok(Self {
            resources,
            command_buffer,
            set,
            ubo,
            state: RecordState::Initial,
        })
    }

    pub fn get_command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.state != RecordState::Initial {
            return Err(CompositorError::InvalidState("compute rendering already started"));
        }

        let env = self.resources.get_env();
        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let _pool = env.get_command_pool().lock();
        unsafe { env.vk().begin_command_buffer(self.command_buffer, &info) }?;

        self.state = RecordState::Recording;
        Ok(())
    }

    /// Distorts both views and reprojects them from the rendered poses to `new_poses`.
    pub fn projection_timewarp(&mut self, sources: &ProjectionSources, src_poses: &[Pose; 2], src_fovs: &[Fov; 2], new_poses: &[Pose; 2], target: &ComputeTarget) -> Result<()> {
        let mut ubo = ComputeUbo::new(self.resources.get_uv_to_tanangle(), &sources.norm_rects, &target.viewports);
        for view in 0..2 {
            let matrix = calc_time_warp_matrix(&src_poses[view], &src_fovs[view], &new_poses[view]);
            ubo.transform[view].copy_from_slice(matrix.as_slice());
        }

        let pipeline = self.resources.get_timewarp_pipeline();
        self.dispatch(pipeline, &ubo, sources.samplers, sources.views, target)
    }

    pub fn projection(&mut self, sources: &ProjectionSources, target: &ComputeTarget) -> Result<()> {
        let ubo = ComputeUbo::new(self.resources.get_uv_to_tanangle(), &sources.norm_rects, &target.viewports);

        let pipeline = self.resources.get_distortion_pipeline();
        self.dispatch(pipeline, &ubo, sources.samplers, sources.views, target)
    }

    /// Writes opaque black into both views.
    pub fn clear(&mut self, target: &ComputeTarget) -> Result<()> {
        let ubo = ComputeUbo::new(self.resources.get_uv_to_tanangle(), &[NormalizedRect::FULL; 2], &target.viewports);

        let sampler = self.resources.get_default_sampler();
        let mock = self.resources.get_mock_view();
        let pipeline = self.resources.get_clear_pipeline();
        self.dispatch(pipeline, &ubo, [sampler; 2], [mock; 2], target)
    }

    fn dispatch(&mut self, pipeline: vk::Pipeline, ubo: &ComputeUbo, samplers: [vk::Sampler; 2], views: [vk::ImageView; 2], target: &ComputeTarget) -> Result<()> {
        // The set is written once, it may not change after being bound
        match self.state {
            RecordState::Recording => {}
            RecordState::Dispatched => return Err(CompositorError::InvalidState("compute rendering already dispatched")),
            _ => return Err(CompositorError::InvalidState("compute rendering not started")),
        }

        self.ubo.write(bytemuck::bytes_of(ubo))?;
        self.update_set(samplers, views, target.view);

        let env = self.resources.get_env();
        let device = env.vk();

        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        let to_general = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::SHADER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::GENERAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(target.image)
            .subresource_range(range);

        let to_final = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ)
            .old_layout(vk::ImageLayout::GENERAL)
            .new_layout(final_layout(target.is_external))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(target.image)
            .subresource_range(range);

        let (x, y, z) = dispatch_size(&target.viewports);

        let _pool = env.get_command_pool().lock();
        unsafe {
            device.cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_general)
            );

            device.cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline);
            device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                self.resources.get_compute_pipeline_layout(),
                0,
                std::slice::from_ref(&self.set),
                &[]
            );
            device.cmd_dispatch(self.command_buffer, x, y, z);

            device.cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_final)
            );
        }

        log::trace!("Recorded compute dispatch {}x{}x{}", x, y, z);
        self.state = RecordState::Dispatched;
        Ok(())
    }

    fn update_set(&self, samplers: [vk::Sampler; 2], views: [vk::ImageView; 2], target_view: vk::ImageView) {
        let source_infos: Vec<_> = samplers.iter().zip(views.iter()).map(|(sampler, view)| {
            vk::DescriptorImageInfo {
                sampler: *sampler,
                image_view: *view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }
        }).collect();

        let distortion_sampler = self.resources.get_distortion_sampler();
        let distortion_infos: Vec<_> = self.resources.get_distortion_views().into_iter().map(|view| {
            vk::DescriptorImageInfo {
                sampler: distortion_sampler,
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }
        }).collect();

        let target_info = vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: target_view,
            image_layout: vk::ImageLayout::GENERAL,
        };

        let ubo_info = vk::DescriptorBufferInfo {
            buffer: self.ubo.handle(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        };

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(self.set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&source_infos)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(self.set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&distortion_infos)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(self.set)
                .dst_binding(2)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(std::slice::from_ref(&target_info))
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(self.set)
                .dst_binding(3)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(std::slice::from_ref(&ubo_info))
                .build(),
        ];

        unsafe { self.resources.get_env().vk().update_descriptor_sets(&writes, &[]) };
    }

    pub fn end(&mut self) -> Result<()> {
        if self.state == RecordState::Initial || self.state == RecordState::Ended {
            return Err(CompositorError::InvalidState("compute rendering not recording"));
        }

        let env = self.resources.get_env();
        let _pool = env.get_command_pool().lock();
        unsafe { env.vk().end_command_buffer(self.command_buffer) }?;

        self.state = RecordState::Ended;
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.state == RecordState::Ended
    }
}

impl Drop for ComputeRendering {
    fn drop(&mut self) {
        self.resources.get_env().get_command_pool().lock().free(std::slice::from_ref(&self.command_buffer));
        self.resources.release_compute_set();
    }
}

assert_impl_all!(ComputeRendering: Send);
