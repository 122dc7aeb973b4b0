// SPDX-License-Identifier: CEPL-1.0
use std::time::Instant;

use anyhow::{Context, Result};
use ash::khr::swapchain as khr_swapchain;
use ash::{vk, Device};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use vktut_render::frame::{AcquireOutcome, FrameBackend, PresentOutcome};
use vktut_render::registry::ResourceRegistry;
use vktut_render::{FrameLoop, FrameStatus, RenderOptions, RenderSize, Renderer};

pub mod command;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod mesh;
pub mod pipeline;
pub mod swapchain;

pub use error::VkError;

use command::{CommandStream, DrawBindings, DrawTarget};
use device::LogicalDevice;
use frame::{slot_count, FrameSlots};
use instance::InstanceCtx;
use mesh::{Mesh, MeshBuffer};
use pipeline::ShaderSet;
use swapchain::{SwapchainConfig, SwapchainManager};

/// Objects that outlive every swapchain rebuild. Destroyed in reverse
/// creation order just before the device.
#[derive(Debug)]
enum GpuResource {
    DescriptorSetLayout(vk::DescriptorSetLayout),
    CommandPool(vk::CommandPool),
    Mesh(MeshBuffer),
}

impl GpuResource {
    unsafe fn destroy(self, device: &Device) {
        match self {
            Self::DescriptorSetLayout(l) => device.destroy_descriptor_set_layout(l, None),
            Self::CommandPool(p) => device.destroy_command_pool(p, None),
            Self::Mesh(m) => m.destroy(device),
        }
    }
}

/// Size to render at: zero while the surface reports a 0x0 current extent
/// (minimized), else the size the window last reported.
pub fn effective_size(current_extent: vk::Extent2D, requested: RenderSize) -> RenderSize {
    if current_extent.width == 0 || current_extent.height == 0 {
        RenderSize::new(0, 0)
    } else {
        requested
    }
}

/// The device-side half of the renderer: every Vulkan object, sequenced by
/// [`FrameLoop`] through [`FrameBackend`].
struct Gpu {
    device: LogicalDevice,
    swapchain: SwapchainManager,
    slots: FrameSlots,
    registry: ResourceRegistry<GpuResource>,
    command_pool: vk::CommandPool,
    set_layout: vk::DescriptorSetLayout,
    mesh: Option<MeshBuffer>,
    clear: [f32; 4],
    frames_in_flight: Option<u32>,
    started: Instant,
    // dropped after Gpu::drop has destroyed the device
    ctx: InstanceCtx,
}

impl Gpu {
    unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: &RenderOptions,
    ) -> Result<Self> {
        let validation = options.validation && cfg!(debug_assertions);
        let shaders = ShaderSet::resolve(&options.shader_dir).context("load shaders")?;

        let ctx = InstanceCtx::new(window, display, &options.app_name, validation)?;
        let choice = device::select_physical_device(&ctx)?;
        let device = device::create_logical_device(ctx.instance(), choice)?;

        let set_layout = match pipeline::create_descriptor_set_layout(&device.device) {
            Ok(l) => l,
            Err(e) => {
                device.device.destroy_device(None);
                return Err(e.context("create_descriptor_set_layout"));
            }
        };
        let mut registry = ResourceRegistry::new();
        registry.register("descriptor set layout", GpuResource::DescriptorSetLayout(set_layout));

        let swapchain = SwapchainManager::new(
            device.device.clone(),
            khr_swapchain::Device::new(ctx.instance(), &device.device),
            ctx.surface_loader().clone(),
            SwapchainConfig {
                phys: device.phys,
                surface: ctx.surface(),
                queues: device.queues,
                present: options.present,
                shaders,
                set_layout,
            },
        );

        // From here on Drop tears down whatever was built.
        let mut gpu = Self {
            device,
            swapchain,
            slots: FrameSlots::default(),
            registry,
            command_pool: vk::CommandPool::null(),
            set_layout,
            mesh: None,
            clear: options.clear_color,
            frames_in_flight: options.frames_in_flight.filter(|&n| n > 0),
            started: Instant::now(),
            ctx,
        };
        gpu.init(size, options.mesh_triangles)?;
        Ok(gpu)
    }

    unsafe fn init(&mut self, size: RenderSize, mesh_triangles: u32) -> Result<()> {
        let d = &self.device.device;
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: self.device.queues.graphics()?,
            ..Default::default()
        };
        self.command_pool = d
            .create_command_pool(&pool_info, None)
            .context("create_command_pool")?;
        self.registry
            .register("command pool", GpuResource::CommandPool(self.command_pool));
        debug!("command pool created");

        let mesh = MeshBuffer::upload(
            d,
            &self.device.memory,
            self.device.graphics_queue,
            self.command_pool,
            &Mesh::color_wheel(mesh_triangles),
        )
        .context("upload mesh")?;
        self.registry.register("mesh", GpuResource::Mesh(mesh));
        self.mesh = Some(mesh);
        info!(indices = mesh.index_count, "mesh uploaded");

        self.swapchain.create(size)?;
        self.create_slots()
    }

    unsafe fn create_slots(&mut self) -> Result<()> {
        let count = slot_count(self.frames_in_flight, self.swapchain.image_count());
        self.slots = FrameSlots::create(
            &self.device.device,
            &self.device.memory,
            self.command_pool,
            self.set_layout,
            count,
        )?;
        info!(
            frames_in_flight = count,
            images = self.swapchain.image_count(),
            "frame slots ready"
        );
        Ok(())
    }

    fn surface_size(&self, requested: RenderSize) -> Result<RenderSize> {
        let caps = unsafe {
            self.ctx
                .surface_loader()
                .get_physical_device_surface_capabilities(self.device.phys, self.ctx.surface())
        }
        .context("get_physical_device_surface_capabilities")?;
        Ok(effective_size(caps.current_extent, requested))
    }
}

impl FrameBackend for Gpu {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.slots.get(slot)?.in_flight;
        unsafe {
            self.device
                .device
                .wait_for_fences(std::slice::from_ref(&fence), true, u64::MAX)?;
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.slots.get(slot)?.image_available;
        let chain = self.swapchain.chain()?;
        let acquired = unsafe {
            self.swapchain.loader().acquire_next_image(
                chain.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        let fence = self.slots.get(slot)?.in_flight;
        unsafe {
            self.device
                .device
                .reset_fences(std::slice::from_ref(&fence))?;
        }
        Ok(())
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let chain = self.swapchain.chain()?;
        let image = chain
            .targets
            .get(image_index as usize)
            .with_context(|| format!("no render target for image {image_index}"))?;
        let s = self.slots.get(slot)?;
        let mesh = self.mesh.context("mesh not uploaded")?;

        let target = DrawTarget {
            render_pass: chain.render_pass,
            framebuffer: image.framebuffer,
            extent: chain.extent(),
        };
        let bindings = DrawBindings {
            pipeline: chain.pipeline,
            layout: chain.pipeline_layout,
            descriptor_set: s.descriptor_set,
            vertex_buffer: mesh.vertex.buffer,
            index_buffer: mesh.index.buffer,
            index_count: mesh.index_count,
        };
        let stream = CommandStream::build(&target, &bindings, self.clear);
        unsafe { stream.encode(&self.device.device, s.command_buffer) }
    }

    fn update_uniforms(&mut self, slot: usize) -> Result<()> {
        let extent = self.swapchain.chain()?.extent();
        let u = vktut_math::spin(
            self.started.elapsed().as_secs_f32(),
            vktut_math::aspect_ratio(extent.width, extent.height),
        );
        let s = self.slots.get(slot)?;
        unsafe { s.write_uniform(&u) };
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let s = self.slots.get(slot)?;
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let info = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &s.command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_finished,
            ..Default::default()
        };
        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                std::slice::from_ref(&info),
                s.in_flight,
            )?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let s = self.slots.get(slot)?;
        let chain = self.swapchain.chain()?;
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.render_finished,
            swapchain_count: 1,
            p_swapchains: &chain.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let presented = unsafe {
            self.swapchain
                .loader()
                .queue_present(self.device.present_queue, &info)
        };
        match presented {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::NeedsRecreate),
            Err(e) => Err(e.into()),
        }
    }

    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()> {
        unsafe {
            self.device
                .device
                .device_wait_idle()
                .context("device_wait_idle")?;
            self.slots.destroy(&self.device.device, self.command_pool);
            self.swapchain.recreate(size)?;
            self.create_slots()
        }
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device.device;
            if let Err(e) = d.device_wait_idle() {
                warn!("device_wait_idle on shutdown: {e}");
            }
            self.swapchain.destroy();
            self.slots.destroy(d, self.command_pool);
            for (_, res) in self.registry.drain_reverse() {
                res.destroy(d);
            }
            d.destroy_device(None);
            info!("device destroyed");
        }
    }
}

pub struct VkRenderer {
    frames: FrameLoop,
    gpu: Gpu,
    size: RenderSize,
}

impl VkRenderer {
    /// Frames presented since start.
    pub fn presented(&self) -> u64 {
        self.frames.presented()
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: &RenderOptions,
    ) -> Result<Self> {
        let gpu = unsafe { Gpu::new(window, display, size, options)? };
        info!(size.width, size.height, "Vulkan renderer ready");
        Ok(Self {
            frames: FrameLoop::new(),
            gpu,
            size,
        })
    }

    fn resize(&mut self, size: RenderSize) {
        if size != self.size {
            debug!(size.width, size.height, "resize requested");
            self.size = size;
            self.frames.mark_resized();
        }
    }

    fn render(&mut self) -> Result<FrameStatus> {
        let size = self.gpu.surface_size(self.size)?;
        self.frames.draw_frame(&mut self.gpu, size)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.gpu.clear = rgba;
    }
}
