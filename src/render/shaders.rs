//! Runtime compilation of the compositor shaders.

use std::ffi::CStr;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use ash::vk;
use shaderc::{CompileOptions, Compiler, EnvVersion, ShaderKind, TargetEnv};

use crate::device::device::DeviceContext;

const MESH_VERTEX_SOURCE: &str = include_str!("shaders/mesh.vert");
const MESH_FRAGMENT_SOURCE: &str = include_str!("shaders/mesh.frag");
const DISTORTION_COMPUTE_SOURCE: &str = include_str!("shaders/distortion.comp");
const CLEAR_COMPUTE_SOURCE: &str = include_str!("shaders/clear.comp");

const ENTRY_POINT_NAME: &[u8] = b"main\0";

pub fn entry_point() -> &'static CStr {
    CStr::from_bytes_with_nul(ENTRY_POINT_NAME).unwrap_or_default()
}

pub enum ShaderError {
    /// The shaderc compiler library could not be initialized.
    CompilerUnavailable,
    Compile(shaderc::Error),
    Vulkan(vk::Result),
}

impl Debug for ShaderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderError::CompilerUnavailable => f.write_str("CompilerUnavailable"),
            ShaderError::Compile(err) => f.debug_tuple("Compile").field(&err.to_string()).finish(),
            ShaderError::Vulkan(err) => f.debug_tuple("Vulkan").field(err).finish(),
        }
    }
}

impl Display for ShaderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderError::CompilerUnavailable => write!(f, "shaderc compiler unavailable"),
            ShaderError::Compile(err) => write!(f, "failed to compile shader: {}", err),
            ShaderError::Vulkan(err) => write!(f, "failed to create shader module: {:?}", err),
        }
    }
}

impl std::error::Error for ShaderError {
}

impl From<shaderc::Error> for ShaderError {
    fn from(err: shaderc::Error) -> Self {
        ShaderError::Compile(err)
    }
}

impl From<vk::Result> for ShaderError {
    fn from(err: vk::Result) -> Self {
        ShaderError::Vulkan(err)
    }
}

/// The shader modules used by the mesh and compute paths. Destroyed on drop.
pub struct Shaders {
    device: Arc<DeviceContext>,
    pub mesh_vert: vk::ShaderModule,
    pub mesh_frag: vk::ShaderModule,
    pub distortion_comp: vk::ShaderModule,
    pub clear_comp: vk::ShaderModule,
}

impl Shaders {
    pub fn load(device: Arc<DeviceContext>) -> Result<Arc<Self>, ShaderError> {
        let mut compiler = ShaderCompiler::new()?;

        // Modules are created one by one so a failure destroys only the ones already made
        let mut shaders = Shaders {
            device,
            mesh_vert: vk::ShaderModule::null(),
            mesh_frag: vk::ShaderModule::null(),
            distortion_comp: vk::ShaderModule::null(),
            clear_comp: vk::ShaderModule::null(),
        };

        shaders.mesh_vert = compiler.create_module(&shaders.device, MESH_VERTEX_SOURCE, ShaderKind::Vertex, "mesh.vert")?;
        shaders.mesh_frag = compiler.create_module(&shaders.device, MESH_FRAGMENT_SOURCE, ShaderKind::Fragment, "mesh.frag")?;
        shaders.distortion_comp = compiler.create_module(&shaders.device, DISTORTION_COMPUTE_SOURCE, ShaderKind::Compute, "distortion.comp")?;
        shaders.clear_comp = compiler.create_module(&shaders.device, CLEAR_COMPUTE_SOURCE, ShaderKind::Compute, "clear.comp")?;

        log::debug!("Compiled compositor shaders");
        Ok(Arc::new(shaders))
    }

    pub fn get_device(&self) -> &Arc<DeviceContext> {
        &self.device
    }
}

impl Drop for Shaders {
    fn drop(&mut self) {
        let device = self.device.vk();
        for module in [self.mesh_vert, self.mesh_frag, self.distortion_comp, self.clear_comp] {
            if module != vk::ShaderModule::null() {
                unsafe { device.destroy_shader_module(module, None) };
            }
        }
    }
}

assert_impl_all!(Shaders: Send, Sync);

struct ShaderCompiler {
    compiler: Compiler,
    options: CompileOptions<'static>,
}

impl ShaderCompiler {
    fn new() -> Result<Self, ShaderError> {
        let compiler = Compiler::new().ok_or(ShaderError::CompilerUnavailable)?;
        let mut options = CompileOptions::new().ok_or(ShaderError::CompilerUnavailable)?;
        options.set_target_env(TargetEnv::Vulkan, EnvVersion::Vulkan1_1 as u32);

        Ok(Self { compiler, options })
    }

    fn compile(&mut self, source: &str, kind: ShaderKind, name: &str) -> Result<Vec<u32>, ShaderError> {
        let artifact = self.compiler.compile_into_spirv(source, kind, name, "main", Some(&self.options))?;
        if artifact.get_num_warnings() > 0 {
            log::warn!("Shader {} compiled with warnings: {}", name, artifact.get_warning_messages());
        }

        Ok(artifact.as_binary().to_vec())
    }

    fn create_module(&mut self, device: &DeviceContext, source: &str, kind: ShaderKind, name: &str) -> Result<vk::ShaderModule, ShaderError> {
        let code = self.compile(source, kind, name).map_err(|err| {
            log::error!("Failed to compile {}: {}", name, err);
            err
        })?;

        let info = vk::ShaderModuleCreateInfo::builder()
            .code(&code);

        Ok(unsafe { device.vk().create_shader_module(&info, None) }?)
    }
}
