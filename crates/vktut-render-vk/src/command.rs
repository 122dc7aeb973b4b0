// SPDX-License-Identifier: CEPL-1.0
//! Per-frame command recording.
//!
//! [`CommandStream::build`] is a pure function of the render target and the
//! bindings; [`CommandStream::encode`] replays it into a freshly reset
//! command buffer. Recording the same inputs twice yields the same stream.

use anyhow::{Context, Result};
use ash::{vk, Device};

/// Where a frame is drawn: the framebuffer of the *acquired image*.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

/// What a frame draws with. `descriptor_set` belongs to the frame *slot*.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawBindings {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear: [f32; 4],
    },
    BindPipeline(vk::Pipeline),
    SetViewportScissor(vk::Extent2D),
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    BindDescriptorSet {
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    },
    DrawIndexed {
        index_count: u32,
    },
    EndRenderPass,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandStream {
    commands: Vec<Command>,
}

impl CommandStream {
    pub fn build(target: &DrawTarget, bindings: &DrawBindings, clear: [f32; 4]) -> Self {
        let commands = vec![
            Command::BeginRenderPass {
                render_pass: target.render_pass,
                framebuffer: target.framebuffer,
                extent: target.extent,
                clear,
            },
            Command::BindPipeline(bindings.pipeline),
            Command::SetViewportScissor(target.extent),
            Command::BindVertexBuffer(bindings.vertex_buffer),
            Command::BindIndexBuffer(bindings.index_buffer),
            Command::BindDescriptorSet {
                layout: bindings.layout,
                set: bindings.descriptor_set,
            },
            Command::DrawIndexed {
                index_count: bindings.index_count,
            },
            Command::EndRenderPass,
        ];
        Self { commands }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Reset `cmd` and record the stream into it. The caller guarantees the
    /// GPU is done with `cmd` (its slot fence has been waited on).
    pub unsafe fn encode(&self, device: &Device, cmd: vk::CommandBuffer) -> Result<()> {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .context("reset_command_buffer")?;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        device
            .begin_command_buffer(cmd, &begin)
            .context("begin_command_buffer")?;

        for c in &self.commands {
            match *c {
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    extent,
                    clear,
                } => {
                    let clear_value = vk::ClearValue {
                        color: vk::ClearColorValue { float32: clear },
                    };
                    let info = vk::RenderPassBeginInfo {
                        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                        render_pass,
                        framebuffer,
                        render_area: vk::Rect2D {
                            offset: vk::Offset2D { x: 0, y: 0 },
                            extent,
                        },
                        clear_value_count: 1,
                        p_clear_values: &clear_value,
                        ..Default::default()
                    };
                    device.cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE);
                }
                Command::BindPipeline(p) => {
                    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, p);
                }
                Command::SetViewportScissor(extent) => {
                    let vp = vk::Viewport {
                        x: 0.0,
                        y: 0.0,
                        width: extent.width as f32,
                        height: extent.height as f32,
                        min_depth: 0.0,
                        max_depth: 1.0,
                    };
                    let sc = vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    };
                    device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
                    device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&sc));
                }
                Command::BindVertexBuffer(b) => {
                    device.cmd_bind_vertex_buffers(cmd, 0, std::slice::from_ref(&b), &[0]);
                }
                Command::BindIndexBuffer(b) => {
                    device.cmd_bind_index_buffer(cmd, b, 0, vk::IndexType::UINT32);
                }
                Command::BindDescriptorSet { layout, set } => {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        layout,
                        0,
                        std::slice::from_ref(&set),
                        &[],
                    );
                }
                Command::DrawIndexed { index_count } => {
                    device.cmd_draw_indexed(cmd, index_count, 1, 0, 0, 0);
                }
                Command::EndRenderPass => device.cmd_end_render_pass(cmd),
            }
        }

        device
            .end_command_buffer(cmd)
            .context("end_command_buffer")?;
        Ok(())
    }
}
