// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// Typed fatal conditions of the Vulkan backend. Everything else surfaces as
/// a raw `vk::Result` wrapped in `anyhow` context.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("no physical device supports graphics, presentation, VK_KHR_swapchain and this surface")]
    NoSuitableDevice,

    #[error("validation layer {0} requested but not available")]
    MissingValidationLayer(String),

    #[error("no memory type matches bits {type_bits:#x} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("queue family for {0} was not resolved")]
    MissingQueueFamily(&'static str),

    #[error("shader {}", path.display())]
    Shader {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
