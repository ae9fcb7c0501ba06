// Shader module loading
//
// SPIR-V is read at runtime from the configured shader directory. build.rs
// compiles the GLSL sources in shaders/ into that directory.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::VulkanDevice;

/// Shader module destroyed when dropped; only needed until pipeline creation
pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    /// Load a SPIR-V file from disk
    pub fn from_file(device: &Arc<VulkanDevice>, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read shader {:?}", path))?;

        Self::from_bytes(device, &bytes).with_context(|| format!("Invalid shader {:?}", path))
    }

    pub fn from_bytes(device: &Arc<VulkanDevice>, bytes: &[u8]) -> Result<Self> {
        // read_spv handles alignment and endianness
        let code = ash::util::read_spv(&mut Cursor::new(bytes))?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self {
            module,
            device: device.clone(),
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}
