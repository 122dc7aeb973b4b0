// SPDX-License-Identifier: CEPL-1.0
pub use glam;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Degrees per second the model spins about +Z.
pub const SPIN_DEG_PER_SEC: f32 = 90.0;

/// Model/view/projection block consumed by the vertex shader (set 0, binding 0).
///
/// The projection is stored with its Y axis already flipped: Vulkan clip space
/// points +Y down, the matrices built by `glam` assume +Y up.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Uniform {
    model: Mat4,
    view: Mat4,
    projection: Mat4,
}

impl Default for Uniform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

impl Uniform {
    pub fn new(model: Mat4, view: Mat4, projection: Mat4) -> Self {
        Self {
            model,
            view,
            projection: flip_y(projection),
        }
    }

    pub fn model(&self) -> Mat4 {
        self.model
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    /// Projection as uploaded (Y already flipped).
    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn set_model(&mut self, model: Mat4) {
        self.model = model;
    }

    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
    }

    pub fn set_projection(&mut self, projection: Mat4) {
        self.projection = flip_y(projection);
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

fn flip_y(mut projection: Mat4) -> Mat4 {
    projection.y_axis.y *= -1.0;
    projection
}

/// Aspect ratio of a pixel extent; a degenerate extent maps to 1.0.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if width == 0 || height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

/// Per-frame animation: the mesh spins about Z, seen from (2, 2, 2).
pub fn spin(elapsed_secs: f32, aspect: f32) -> Uniform {
    let model = Mat4::from_rotation_z((elapsed_secs * SPIN_DEG_PER_SEC).to_radians());
    let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);
    let projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
    Uniform::new(model, view, projection)
}
