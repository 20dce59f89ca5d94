//! Render passes, framebuffers and the mesh pipeline for distortion targets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ash::vk;

use crate::hmd::mesh::VERTEX_STRIDE;
use crate::prelude::*;
use crate::render::resources::RenderResources;
use crate::render::shaders::{entry_point, Shaders};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxTargetData {
    pub format: vk::Format,

    /// External targets are handed to a presentation engine and end in `PRESENT_SRC_KHR`.
    pub is_external: bool,
    pub width: u32,
    pub height: u32,
}

pub fn final_layout(is_external: bool) -> vk::ImageLayout {
    if is_external {
        vk::ImageLayout::PRESENT_SRC_KHR
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    }
}

pub fn mesh_topology(index_count: u32) -> vk::PrimitiveTopology {
    if index_count > 0 {
        vk::PrimitiveTopology::TRIANGLE_STRIP
    } else {
        vk::PrimitiveTopology::TRIANGLE_LIST
    }
}

/// The render pass and mesh pipeline for one target format.
pub struct GfxTargetResources {
    resources: Arc<RenderResources>,
    format: vk::Format,
    is_external: bool,
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
}

impl GfxTargetResources {
    pub fn new(resources: Arc<RenderResources>, shaders: &Shaders, format: vk::Format, is_external: bool) -> Result<Self> {
        let mut result = Self {
            resources,
            format,
            is_external,
            render_pass: vk::RenderPass::null(),
            pipeline: vk::Pipeline::null(),
        };

        result.render_pass = result.create_render_pass()?;
        result.pipeline = result.create_pipeline(shaders)?;

        log::debug!("Created distortion target resources for {:?} (external: {})", format, is_external);
        Ok(result)
    }

    fn create_render_pass(&self) -> Result<vk::RenderPass> {
        let attachments = [
            vk::AttachmentDescription::builder()
                .format(self.format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(final_layout(self.is_external))
                .build()
        ];

        let color_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_ref));

        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        Ok(unsafe { self.resources.get_env().vk().create_render_pass(&info, None) }?)
    }

    fn create_pipeline(&self, shaders: &Shaders) -> Result<vk::Pipeline> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(shaders.mesh_vert)
                .name(entry_point())
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(shaders.mesh_frag)
                .name(entry_point())
                .build(),
        ];

        let input_bindings = [
            vk::VertexInputBindingDescription {
                binding: 0,
                stride: VERTEX_STRIDE,
                input_rate: vk::VertexInputRate::VERTEX,
            }
        ];

        // Position and red uv, then green and blue uv
        let input_attributes = [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: 16,
            },
        ];

        let input_state = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&input_bindings)
            .vertex_attribute_descriptions(&input_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(mesh_topology(self.resources.get_mesh().index_count_total()))
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1f32);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(false)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

        let attachment_blend = vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::R | vk::ColorComponentFlags::G | vk::ColorComponentFlags::B | vk::ColorComponentFlags::A);

        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(std::slice::from_ref(&attachment_blend));

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(self.resources.get_mesh_pipeline_layout())
            .render_pass(self.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.resources.get_env().vk().create_graphics_pipelines(self.resources.get_pipeline_cache(), std::slice::from_ref(&info), None)
        }.map_err(|(_, err)| {
            log::error!("Failed to create mesh pipeline: {:?}", err);
            err
        })?;

        Ok(pipelines[0])
    }

    pub fn get_resources(&self) -> &Arc<RenderResources> {
        &self.resources
    }

    pub fn get_render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn get_pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn get_format(&self) -> vk::Format {
        self.format
    }

    pub fn is_external(&self) -> bool {
        self.is_external
    }
}

impl Drop for GfxTargetResources {
    fn drop(&mut self) {
        let device = self.resources.get_env().vk();
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// One [`GfxTargetResources`] per format and externality.
pub struct GfxTargetCache {
    resources: Arc<RenderResources>,
    targets: Mutex<HashMap<(vk::Format, bool), Arc<GfxTargetResources>>>,
}

impl GfxTargetCache {
    pub fn new(resources: Arc<RenderResources>) -> Self {
        Self {
            resources,
            targets: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, format: vk::Format, is_external: bool) -> Result<Arc<GfxTargetResources>> {
        let mut targets = self.targets.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(target) = targets.get(&(format, is_external)) {
            return Ok(target.clone());
        }

        let shaders = self.resources.get_shaders().clone();
        let target = Arc::new(GfxTargetResources::new(self.resources.clone(), &shaders, format, is_external)?);
        targets.insert((format, is_external), target.clone());
        Ok(target)
    }

    pub fn len(&self) -> usize {
        self.targets.lock().map(|targets| targets.len()).unwrap_or(0)
    }
}

/// A framebuffer around a single image view.
pub struct GfxTarget {
    target_resources: Arc<GfxTargetResources>,
    framebuffer: vk::Framebuffer,
    data: GfxTargetData,
}

impl GfxTarget {
    pub fn new(target_resources: Arc<GfxTargetResources>, view: vk::ImageView, data: GfxTargetData) -> Result<Self> {
        if data.format != target_resources.get_format() || data.is_external != target_resources.is_external() {
            return Err(CompositorError::invalid_state("target data does not match the target resources"));
        }

        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(target_resources.get_render_pass())
            .attachments(std::slice::from_ref(&view))
            .width(data.width)
            .height(data.height)
            .layers(1);

        let framebuffer = unsafe { target_resources.get_resources().get_env().vk().create_framebuffer(&info, None) }?;

        Ok(Self {
            target_resources,
            framebuffer,
            data,
        })
    }

    pub fn get_target_resources(&self) -> &Arc<GfxTargetResources> {
        &self.target_resources
    }

    pub fn get_framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub fn get_data(&self) -> &GfxTargetData {
        &self.data
    }
}

impl Drop for GfxTarget {
    fn drop(&mut self) {
        unsafe {
            self.target_resources.get_resources().get_env().vk().destroy_framebuffer(self.framebuffer, None);
        }
    }
}
