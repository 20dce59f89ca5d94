//! Static gpu objects shared by every mesh and compute rendering of a compositor.

use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::hmd::config::ConfigError;
use crate::hmd::mesh::DistortionMesh;
use crate::hmd::HmdOptics;
use crate::prelude::*;
use crate::render::buffer::RenderBuffer;
use crate::render::image::{create_image_simple, create_sampler, AllocatedImage};
use crate::render::shaders::{entry_point, Shaders};
use crate::util::vk::full_color_range;

/// Edge length of the distortion images.
pub const DISTORTION_IMAGE_SIZE: u32 = 128;
pub const DISTORTION_IMAGE_FORMAT: vk::Format = vk::Format::R32G32_SFLOAT;

/// One image per color channel and view.
pub const DISTORTION_IMAGE_COUNT: usize = 6;

/// Mesh sets are allocated per view.
pub const MESH_POOL_SETS: u32 = 16 * 2;
pub const COMPUTE_POOL_SETS: u32 = 16;

pub const COMPUTE_SOURCE_COUNT: u32 = 2;

fn host_visible() -> vk::MemoryPropertyFlags {
    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
}

pub fn distortion_image_index(view: usize, channel: usize) -> usize {
    channel * 2 + view
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ComputeSpecialization {
    distortion_texel_count: i32,
    do_timewarp: vk::Bool32,
}

impl ComputeSpecialization {
    const MAP_ENTRIES: [vk::SpecializationMapEntry; 2] = [
        vk::SpecializationMapEntry { constant_id: 0, offset: 0, size: 4 },
        vk::SpecializationMapEntry { constant_id: 1, offset: 4, size: 4 },
    ];
}

/// Tracks the compute sets handed out from the compute pool. The pool is reset when the last
/// outstanding set is returned.
#[derive(Debug, Default)]
pub(crate) struct OutstandingSets {
    count: u32,
}

impl OutstandingSets {
    pub fn acquire(&mut self) -> bool {
        if self.count >= COMPUTE_POOL_SETS {
            return false;
        }
        self.count += 1;
        true
    }

    /// Returns true if the caller must reset the pool.
    pub fn release(&mut self) -> bool {
        match self.count {
            0 => false,
            count => {
                self.count = count - 1;
                self.count == 0
            }
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

struct ComputePool {
    pool: vk::DescriptorPool,
    outstanding: OutstandingSets,
}

/// Fills the distortion tables. Rows are `v`, columns `u`, each texel is a `(u, v)` pair.
pub(crate) fn build_distortion_tables(optics: &HmdOptics, size: u32) -> std::result::Result<Vec<Vec<f32>>, ConfigError> {
    let texels = (size * size) as usize;
    let mut tables = vec![Vec::with_capacity(texels * 2); DISTORTION_IMAGE_COUNT];
    let scale = (size.max(2) - 1) as f32;

    for view in 0..2usize {
        for row in 0..size {
            let v = row as f32 / scale;
            for col in 0..size {
                let u = col as f32 / scale;
                let uv = optics.compute_distortion(view, u, v).ok_or(ConfigError::DistortionFailed { view, u, v })?;

                for channel in 0..3usize {
                    let sample = uv.channel(channel);
                    tables[distortion_image_index(view, channel)].extend_from_slice(&[sample.x, sample.y]);
                }
            }
        }
    }

    Ok(tables)
}

pub struct RenderResources {
    env: DeviceEnvironment,
    shaders: Arc<Shaders>,
    pipeline_cache: vk::PipelineCache,

    mesh_pool: Mutex<vk::DescriptorPool>,
    compute_pool: Mutex<ComputePool>,

    mesh_set_layout: vk::DescriptorSetLayout,
    mesh_pipeline_layout: vk::PipelineLayout,
    compute_set_layout: vk::DescriptorSetLayout,
    compute_pipeline_layout: vk::PipelineLayout,

    distortion_pipeline: vk::Pipeline,
    timewarp_pipeline: vk::Pipeline,
    clear_pipeline: vk::Pipeline,

    mesh: Arc<DistortionMesh>,
    vbo: Option<RenderBuffer>,
    ibo: Option<RenderBuffer>,

    distortion_images: Vec<AllocatedImage>,
    uv_to_tanangle: [NormalizedRect; 2],
    default_sampler: vk::Sampler,
    distortion_sampler: vk::Sampler,
    mock_image: Option<AllocatedImage>,
}

impl RenderResources {
    pub fn init(env: &DeviceEnvironment, shaders: Arc<Shaders>, optics: &mut HmdOptics) -> Result<Arc<Self>> {
        let mesh = optics.mesh()?;

        // Every handle starts out null so a failure at any step only destroys what was created
        let mut resources = Self {
            env: env.clone(),
            shaders,
            pipeline_cache: vk::PipelineCache::null(),
            mesh_pool: Mutex::new(vk::DescriptorPool::null()),
            compute_pool: Mutex::new(ComputePool { pool: vk::DescriptorPool::null(), outstanding: OutstandingSets::default() }),
            mesh_set_layout: vk::DescriptorSetLayout::null(),
            mesh_pipeline_layout: vk::PipelineLayout::null(),
            compute_set_layout: vk::DescriptorSetLayout::null(),
            compute_pipeline_layout: vk::PipelineLayout::null(),
            distortion_pipeline: vk::Pipeline::null(),
            timewarp_pipeline: vk::Pipeline::null(),
            clear_pipeline: vk::Pipeline::null(),
            mesh,
            vbo: None,
            ibo: None,
            distortion_images: Vec::with_capacity(DISTORTION_IMAGE_COUNT),
            uv_to_tanangle: optics.uv_to_tanangle(),
            default_sampler: vk::Sampler::null(),
            distortion_sampler: vk::Sampler::null(),
            mock_image: None,
        };

        resources.pipeline_cache = unsafe { env.vk().create_pipeline_cache(&vk::PipelineCacheCreateInfo::builder(), None) }?;
        resources.create_descriptor_pools()?;
        resources.create_layouts()?;
        resources.create_compute_pipelines()?;
        resources.create_mesh_buffers(env)?;
        resources.create_images(env, optics)?;

        log::debug!("Initialized render resources with {} mesh cells", resources.mesh.cells);
        Ok(Arc::new(resources))
    }

    fn create_descriptor_pools(&mut self) -> Result<()> {
        let device = self.env.vk();

        let mesh_sizes = [
            vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: MESH_POOL_SETS },
            vk::DescriptorPoolSize { ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER, descriptor_count: MESH_POOL_SETS },
        ];
        let info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(MESH_POOL_SETS)
            .pool_sizes(&mesh_sizes);
        *self.mesh_pool.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner()) = unsafe { device.create_descriptor_pool(&info, None) }?;

        let samplers_per_set = COMPUTE_SOURCE_COUNT + DISTORTION_IMAGE_COUNT as u32;
        let compute_sizes = [
            vk::DescriptorPoolSize { ty: vk::DescriptorType::STORAGE_IMAGE, descriptor_count: COMPUTE_POOL_SETS },
            vk::DescriptorPoolSize { ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER, descriptor_count: COMPUTE_POOL_SETS * samplers_per_set },
            vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: COMPUTE_POOL_SETS },
        ];
        let info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(COMPUTE_POOL_SETS)
            .pool_sizes(&compute_sizes);
        self.compute_pool.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner()).pool = unsafe { device.create_descriptor_pool(&info, None) }?;

        Ok(())
    }

    fn create_layouts(&mut self) -> Result<()> {
        let device = self.env.vk();

        let mesh_bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX)
                .build(),
        ];
        let info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&mesh_bindings);
        self.mesh_set_layout = unsafe { device.create_descriptor_set_layout(&info, None) }?;

        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(std::slice::from_ref(&self.mesh_set_layout));
        self.mesh_pipeline_layout = unsafe { device.create_pipeline_layout(&info, None) }?;

        let compute_bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(COMPUTE_SOURCE_COUNT)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(DISTORTION_IMAGE_COUNT as u32)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(2)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(3)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
        ];
        let info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&compute_bindings);
        self.compute_set_layout = unsafe { device.create_descriptor_set_layout(&info, None) }?;

        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(std::slice::from_ref(&self.compute_set_layout));
        self.compute_pipeline_layout = unsafe { device.create_pipeline_layout(&info, None) }?;

        Ok(())
    }

    fn create_compute_pipelines(&mut self) -> Result<()> {
        let distortion_spec = ComputeSpecialization {
            distortion_texel_count: DISTORTION_IMAGE_SIZE as i32,
            do_timewarp: vk::FALSE,
        };
        let timewarp_spec = ComputeSpecialization {
            do_timewarp: vk::TRUE,
            ..distortion_spec
        };

        let distortion_info = vk::SpecializationInfo::builder()
            .map_entries(&ComputeSpecialization::MAP_ENTRIES)
            .data(bytemuck::bytes_of(&distortion_spec));
        let timewarp_info = vk::SpecializationInfo::builder()
            .map_entries(&ComputeSpecialization::MAP_ENTRIES)
            .data(bytemuck::bytes_of(&timewarp_spec));

        let stage = |module: vk::ShaderModule, spec: Option<&vk::SpecializationInfo>| {
            let mut stage = vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::COMPUTE)
                .module(module)
                .name(entry_point());
            if let Some(spec) = spec {
                stage = stage.specialization_info(spec);
            }
            stage.build()
        };

        let infos = [
            vk::ComputePipelineCreateInfo::builder()
                .stage(stage(self.shaders.distortion_comp, Some(&*distortion_info)))
                .layout(self.compute_pipeline_layout)
                .build(),
            vk::ComputePipelineCreateInfo::builder()
                .stage(stage(self.shaders.distortion_comp, Some(&*timewarp_info)))
                .layout(self.compute_pipeline_layout)
                .build(),
            vk::ComputePipelineCreateInfo::builder()
                .stage(stage(self.shaders.clear_comp, None))
                .layout(self.compute_pipeline_layout)
                .build(),
        ];

        let pipelines = unsafe {
            self.env.vk().create_compute_pipelines(self.pipeline_cache, &infos, None)
        }.map_err(|(pipelines, err)| {
            log::error!("Failed to create compute pipelines: {:?}", err);
            for pipeline in pipelines {
                unsafe { self.env.vk().destroy_pipeline(pipeline, None) };
            }
            err
        })?;

        self.distortion_pipeline = pipelines[0];
        self.timewarp_pipeline = pipelines[1];
        self.clear_pipeline = pipelines[2];
        Ok(())
    }

    fn create_mesh_buffers(&mut self, env: &DeviceEnvironment) -> Result<()> {
        let vertices: &[u8] = bytemuck::cast_slice(&self.mesh.vertices);
        if !vertices.is_empty() {
            self.vbo = Some(RenderBuffer::new_with_data(env, vk::BufferUsageFlags::VERTEX_BUFFER, host_visible(), vertices)?);
        }

        let indices: &[u8] = bytemuck::cast_slice(&self.mesh.indices);
        if !indices.is_empty() {
            self.ibo = Some(RenderBuffer::new_with_data(env, vk::BufferUsageFlags::INDEX_BUFFER, host_visible(), indices)?);
        }

        Ok(())
    }

    fn supports_linear_filter(&self, format: vk::Format) -> bool {
        let properties = unsafe {
            self.env.get_instance().vk().get_physical_device_format_properties(*self.env.get_device().get_physical_device(), format)
        };
        properties.optimal_tiling_features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    }

    fn create_images(&mut self, env: &DeviceEnvironment, optics: &HmdOptics) -> Result<()> {
        let device = env.get_device();

        self.default_sampler = create_sampler(device, vk::Filter::LINEAR)?;
        self.distortion_sampler = if self.supports_linear_filter(DISTORTION_IMAGE_FORMAT) {
            create_sampler(device, vk::Filter::LINEAR)?
        } else {
            log::warn!("Device can not linearly filter {:?}, distortion tables are sampled with nearest filtering", DISTORTION_IMAGE_FORMAT);
            create_sampler(device, vk::Filter::NEAREST)?
        };

        let extent = vk::Extent2D { width: DISTORTION_IMAGE_SIZE, height: DISTORTION_IMAGE_SIZE };
        let usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        for _ in 0..DISTORTION_IMAGE_COUNT {
            self.distortion_images.push(create_image_simple(env, extent, DISTORTION_IMAGE_FORMAT, usage)?);
        }

        self.mock_image = Some(create_image_simple(env, vk::Extent2D { width: 1, height: 1 }, vk::Format::R8G8B8A8_UNORM, usage)?);

        let tables = build_distortion_tables(optics, DISTORTION_IMAGE_SIZE)?;
        let table_bytes = (DISTORTION_IMAGE_SIZE * DISTORTION_IMAGE_SIZE * 2 * 4) as vk::DeviceSize;

        let mut staging_data = Vec::with_capacity(table_bytes as usize * DISTORTION_IMAGE_COUNT);
        for table in &tables {
            staging_data.extend_from_slice(bytemuck::cast_slice::<f32, u8>(table));
        }
        let staging = RenderBuffer::new_with_data(env, vk::BufferUsageFlags::TRANSFER_SRC, host_visible(), &staging_data)?;

        let mut images: Vec<vk::Image> = self.distortion_images.iter().map(AllocatedImage::handle).collect();
        if let Some(mock) = &self.mock_image {
            images.push(mock.handle());
        }

        let barrier = |image: vk::Image, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout, src_access: vk::AccessFlags, dst_access: vk::AccessFlags| {
            vk::ImageMemoryBarrier::builder()
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
                .old_layout(old_layout)
                .new_layout(new_layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(full_color_range())
                .build()
        };

        let to_transfer: Vec<_> = images.iter().map(|image| barrier(
            *image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
        )).collect();
        let to_shader_read: Vec<_> = images.iter().map(|image| barrier(
            *image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
        )).collect();

        let mock = self.mock_image.as_ref().map(AllocatedImage::handle);
        let distortion_images = &self.distortion_images;

        env.get_command_pool().submit_one_time(env.get_queue(), |device, cmd| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &to_transfer
            );

            for (index, image) in distortion_images.iter().enumerate() {
                let region = vk::BufferImageCopy {
                    buffer_offset: index as vk::DeviceSize * table_bytes,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                    image_extent: vk::Extent3D { width: DISTORTION_IMAGE_SIZE, height: DISTORTION_IMAGE_SIZE, depth: 1 },
                };
                device.cmd_copy_buffer_to_image(cmd, staging.handle(), image.handle(), vk::ImageLayout::TRANSFER_DST_OPTIMAL, std::slice::from_ref(&region));
            }

            if let Some(mock) = mock {
                let clear = vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 1.0] };
                device.cmd_clear_color_image(cmd, mock, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &clear, std::slice::from_ref(&full_color_range()));
            }

            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &to_shader_read
            );
        }).map_err(|err| {
            log::error!("Failed to upload distortion tables: {:?}", err);
            CompositorError::FailedToSubmit(err)
        })?;

        Ok(())
    }

    /// Releases this reference. The objects are destroyed once the last rendering using them is
    /// dropped.
    pub fn close(self: Arc<Self>) {
        if let Err(shared) = Arc::try_unwrap(self) {
            log::debug!("Render resources still referenced {} times", Arc::strong_count(&shared) - 1);
        }
    }

    pub fn get_env(&self) -> &DeviceEnvironment {
        &self.env
    }

    pub fn get_shaders(&self) -> &Arc<Shaders> {
        &self.shaders
    }

    pub fn get_pipeline_cache(&self) -> vk::PipelineCache {
        self.pipeline_cache
    }

    pub fn get_mesh(&self) -> &Arc<DistortionMesh> {
        &self.mesh
    }

    pub fn get_vbo(&self) -> Option<vk::Buffer> {
        self.vbo.as_ref().map(RenderBuffer::handle)
    }

    pub fn get_ibo(&self) -> Option<vk::Buffer> {
        self.ibo.as_ref().map(RenderBuffer::handle)
    }

    pub fn get_mesh_set_layout(&self) -> vk::DescriptorSetLayout {
        self.mesh_set_layout
    }

    pub fn get_mesh_pipeline_layout(&self) -> vk::PipelineLayout {
        self.mesh_pipeline_layout
    }

    pub fn get_compute_pipeline_layout(&self) -> vk::PipelineLayout {
        self.compute_pipeline_layout
    }

    pub fn get_distortion_pipeline(&self) -> vk::Pipeline {
        self.distortion_pipeline
    }

    pub fn get_timewarp_pipeline(&self) -> vk::Pipeline {
        self.timewarp_pipeline
    }

    pub fn get_clear_pipeline(&self) -> vk::Pipeline {
        self.clear_pipeline
    }

    pub fn get_distortion_view(&self, view: usize, channel: usize) -> vk::ImageView {
        self.distortion_images[distortion_image_index(view, channel)].view()
    }

    pub fn get_distortion_views(&self) -> Vec<vk::ImageView> {
        self.distortion_images.iter().map(AllocatedImage::view).collect()
    }

    pub fn get_uv_to_tanangle(&self) -> &[NormalizedRect; 2] {
        &self.uv_to_tanangle
    }

    pub fn get_default_sampler(&self) -> vk::Sampler {
        self.default_sampler
    }

    pub fn get_distortion_sampler(&self) -> vk::Sampler {
        self.distortion_sampler
    }

    pub fn get_mock_view(&self) -> vk::ImageView {
        self.mock_image.as_ref().map(AllocatedImage::view).unwrap_or_default()
    }

    fn lock_mesh_pool(&self) -> MutexGuard<vk::DescriptorPool> {
        self.mesh_pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_compute_pool(&self) -> MutexGuard<ComputePool> {
        self.compute_pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn allocate_mesh_sets(&self, count: usize) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![self.mesh_set_layout; count];
        let pool = self.lock_mesh_pool();

        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(*pool)
            .set_layouts(&layouts);

        Ok(unsafe { self.env.vk().allocate_descriptor_sets(&info) }.map_err(|err| {
            log::error!("Failed to allocate mesh descriptor sets: {:?}", err);
            err
        })?)
    }

    pub fn free_mesh_sets(&self, sets: &[vk::DescriptorSet]) {
        if sets.is_empty() {
            return;
        }

        let pool = self.lock_mesh_pool();
        if let Err(err) = unsafe { self.env.vk().free_descriptor_sets(*pool, sets) } {
            log::error!("Failed to free mesh descriptor sets: {:?}", err);
        }
    }

    pub fn allocate_compute_set(&self) -> Result<vk::DescriptorSet> {
        let mut pool = self.lock_compute_pool();
        if !pool.outstanding.acquire() {
            log::error!("All {} compute descriptor sets are in use", COMPUTE_POOL_SETS);
            return Err(CompositorError::Gpu(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }

        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool.pool)
            .set_layouts(std::slice::from_ref(&self.compute_set_layout));

        match unsafe { self.env.vk().allocate_descriptor_sets(&info) } {
            Ok(sets) => Ok(sets[0]),
            Err(err) => {
                log::error!("Failed to allocate compute descriptor set: {:?}", err);
                if pool.outstanding.release() {
                    Self::reset_compute_pool(&self.env, pool.pool);
                }
                Err(err.into())
            }
        }
    }

    /// Returns a compute set. The set must no longer be in use by the gpu.
    pub fn release_compute_set(&self) {
        let mut pool = self.lock_compute_pool();
        if pool.outstanding.release() {
            Self::reset_compute_pool(&self.env, pool.pool);
        }
    }

    fn reset_compute_pool(env: &DeviceEnvironment, pool: vk::DescriptorPool) {
        log::trace!("Resetting compute descriptor pool");
        if let Err(err) = unsafe { env.vk().reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty()) } {
            log::error!("Failed to reset compute descriptor pool: {:?}", err);
        }
    }

    pub fn outstanding_compute_sets(&self) -> u32 {
        self.lock_compute_pool().outstanding.count()
    }
}

impl Drop for RenderResources {
    fn drop(&mut self) {
        self.mock_image = None;
        self.distortion_images.clear();
        self.ibo = None;
        self.vbo = None;

        let mesh_pool = *self.mesh_pool.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        let compute_pool = self.compute_pool.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner()).pool;

        let device = self.env.vk();

        unsafe {
            device.destroy_sampler(self.distortion_sampler, None);
            device.destroy_sampler(self.default_sampler, None);

            device.destroy_pipeline(self.clear_pipeline, None);
            device.destroy_pipeline(self.timewarp_pipeline, None);
            device.destroy_pipeline(self.distortion_pipeline, None);

            device.destroy_pipeline_layout(self.compute_pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.compute_set_layout, None);
            device.destroy_pipeline_layout(self.mesh_pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.mesh_set_layout, None);

            device.destroy_descriptor_pool(compute_pool, None);
            device.destroy_descriptor_pool(mesh_pool, None);

            device.destroy_pipeline_cache(self.pipeline_cache, None);
        }
    }
}

assert_impl_all!(RenderResources: Send, Sync);
