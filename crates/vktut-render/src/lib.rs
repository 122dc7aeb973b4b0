// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;

pub mod frame;
pub mod registry;

pub use frame::{FrameLoop, FrameStatus, SkipReason};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Zero-area framebuffer (minimized window): nothing can be presented.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Preferred presentation mode; FIFO is always the fallback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPreference {
    #[default]
    Mailbox,
    Fifo,
}

#[derive(Clone, Debug)]
pub struct RenderOptions {
    pub app_name: String,
    pub clear_color: [f32; 4],
    pub present: PresentPreference,
    /// Fixed number of frame slots; `None` ties it to the swapchain image count.
    pub frames_in_flight: Option<u32>,
    pub shader_dir: PathBuf,
    pub validation: bool,
    pub mesh_triangles: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            app_name: "vktut".to_owned(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            present: PresentPreference::Mailbox,
            frames_in_flight: None,
            shader_dir: PathBuf::from("shaders"),
            validation: cfg!(debug_assertions),
            mesh_triangles: 1000,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: &RenderOptions,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Record the new framebuffer size; the swapchain is rebuilt by the next frame.
    fn resize(&mut self, size: RenderSize);
    fn render(&mut self) -> Result<FrameStatus>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
