// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowAttributes};

/// Resizable window attributes with a logical-pixel inner size.
pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(winit::dpi::LogicalSize::new(width, height))
        .with_resizable(true)
}

/// Framebuffer size in physical pixels; zero while minimized on most platforms.
pub fn framebuffer_size(window: &Window) -> (u32, u32) {
    let PhysicalSize { width, height } = window.inner_size();
    tracing::trace!(width, height, "framebuffer size");
    (width, height)
}
