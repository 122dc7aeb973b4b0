// SPDX-License-Identifier: CEPL-1.0
//! Swapchain manager: the presentable image chain plus everything that
//! depends on its format or extent (views, render pass, pipeline,
//! framebuffers). The chain is only ever built or torn down as a whole.

use anyhow::{bail, Context, Result};
use ash::khr::{surface, swapchain};
use ash::{vk, Device};
use tracing::{debug, info};
use vktut_render::{PresentPreference, RenderSize};

use crate::device::QueueFamilyIndices;
use crate::pipeline::{self, ShaderSet};

/// Capabilities, formats and present modes of a (device, surface) pair.
/// Queried fresh for every (re)creation and then discarded.
#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn query(
        loader: &surface::Instance,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: loader
                .get_physical_device_surface_capabilities(phys, surface)
                .context("get_physical_device_surface_capabilities")?,
            formats: loader
                .get_physical_device_surface_formats(phys, surface)
                .context("get_physical_device_surface_formats")?,
            present_modes: loader
                .get_physical_device_surface_present_modes(phys, surface)
                .context("get_physical_device_surface_present_modes")?,
        })
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// B8G8R8A8_SRGB with the sRGB non-linear colour space, else whatever the
/// driver lists first. Never fails on a non-empty list.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// Every surface supports FIFO, so it is the fallback.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentPreference,
) -> vk::PresentModeKHR {
    match pref {
        PresentPreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// The surface's fixed extent when it declares one, else the framebuffer
/// size clamped into `[min_image_extent, max_image_extent]`.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, size: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: size
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: size
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// `min + 1`, capped by `max` unless `max == 0` (unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 && want > caps.max_image_count {
        caps.max_image_count
    } else {
        want
    }
}

/// Concurrent sharing across the two families when they differ.
pub fn choose_sharing(queues: &QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    match (queues.graphics, queues.present) {
        (Some(g), Some(p)) if g != p => (vk::SharingMode::CONCURRENT, vec![g, p]),
        _ => (vk::SharingMode::EXCLUSIVE, Vec::new()),
    }
}

/// Every decision that goes into `vkCreateSwapchainKHR`, derived purely from
/// a support snapshot so identical inputs always give an identical plan.
#[derive(Clone, Debug)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
}

impl SwapchainPlan {
    pub fn new(
        support: &SwapchainSupport,
        size: RenderSize,
        pref: PresentPreference,
        queues: &QueueFamilyIndices,
    ) -> Result<Self> {
        let Some(surface_format) = choose_surface_format(&support.formats) else {
            bail!("surface reports no formats");
        };
        let caps = &support.capabilities;
        let (sharing_mode, queue_family_indices) = choose_sharing(queues);
        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes, pref),
            extent: choose_extent(caps, size),
            min_image_count: choose_image_count(caps),
            pre_transform: caps.current_transform,
            sharing_mode,
            queue_family_indices,
        })
    }
}

/// One presentable image and the objects rendered through it.
#[derive(Clone, Copy, Debug)]
pub struct RenderTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
}

#[derive(Debug)]
pub struct SwapchainChain {
    pub swapchain: vk::SwapchainKHR,
    pub plan: SwapchainPlan,
    pub targets: Vec<RenderTarget>,
    pub render_pass: vk::RenderPass,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl SwapchainChain {
    fn new(plan: SwapchainPlan) -> Self {
        Self {
            swapchain: vk::SwapchainKHR::null(),
            plan,
            targets: Vec::new(),
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        }
    }

    pub fn image_count(&self) -> usize {
        self.targets.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }
}

/// Fixed inputs for building a chain on this device and surface.
pub struct SwapchainConfig {
    pub phys: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub queues: QueueFamilyIndices,
    pub present: PresentPreference,
    pub shaders: ShaderSet,
    pub set_layout: vk::DescriptorSetLayout,
}

pub struct SwapchainManager {
    device: Device,
    loader: swapchain::Device,
    surface_loader: surface::Instance,
    cfg: SwapchainConfig,
    chain: Option<SwapchainChain>,
}

impl SwapchainManager {
    pub fn new(
        device: Device,
        loader: swapchain::Device,
        surface_loader: surface::Instance,
        cfg: SwapchainConfig,
    ) -> Self {
        Self {
            device,
            loader,
            surface_loader,
            cfg,
            chain: None,
        }
    }

    pub fn loader(&self) -> &swapchain::Device {
        &self.loader
    }

    pub fn chain(&self) -> Result<&SwapchainChain> {
        self.chain.as_ref().context("swapchain not created")
    }

    pub fn image_count(&self) -> usize {
        self.chain.as_ref().map_or(0, SwapchainChain::image_count)
    }

    pub unsafe fn create(&mut self, size: RenderSize) -> Result<()> {
        if self.chain.is_some() {
            bail!("swapchain already exists");
        }
        let support = SwapchainSupport::query(&self.surface_loader, self.cfg.phys, self.cfg.surface)?;
        let plan = SwapchainPlan::new(&support, size, self.cfg.present, &self.cfg.queues)?;

        let mut chain = SwapchainChain::new(plan);
        if let Err(e) = self.build(&mut chain) {
            destroy_chain(&self.device, &self.loader, &mut chain);
            return Err(e);
        }

        let p = &chain.plan;
        info!(
            format = ?p.surface_format.format,
            color_space = ?p.surface_format.color_space,
            present_mode = ?p.present_mode,
            width = p.extent.width,
            height = p.extent.height,
            images = chain.image_count(),
            sharing = ?p.sharing_mode,
            "swapchain created"
        );
        self.chain = Some(chain);
        Ok(())
    }

    unsafe fn build(&self, chain: &mut SwapchainChain) -> Result<()> {
        let d = &self.device;
        let plan = &chain.plan;

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.cfg.surface,
            min_image_count: plan.min_image_count,
            image_format: plan.surface_format.format,
            image_color_space: plan.surface_format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: plan.sharing_mode,
            queue_family_index_count: plan.queue_family_indices.len() as u32,
            p_queue_family_indices: plan.queue_family_indices.as_ptr(),
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        chain.swapchain = self
            .loader
            .create_swapchain(&info, None)
            .context("create_swapchain")?;
        let images = self
            .loader
            .get_swapchain_images(chain.swapchain)
            .context("get_swapchain_images")?;

        let format = plan.surface_format.format;
        let extent = plan.extent;
        for image in images {
            let view = pipeline::create_image_view(d, image, format).context("create_image_view")?;
            chain.targets.push(RenderTarget {
                image,
                view,
                framebuffer: vk::Framebuffer::null(),
            });
        }
        debug!(views = chain.targets.len(), "image views created");

        chain.render_pass = pipeline::create_render_pass(d, format).context("create_render_pass")?;
        let (layout, pipe) = pipeline::create_graphics_pipeline(
            d,
            chain.render_pass,
            self.cfg.set_layout,
            &self.cfg.shaders,
        )
        .context("create_graphics_pipeline")?;
        chain.pipeline_layout = layout;
        chain.pipeline = pipe;

        for t in &mut chain.targets {
            t.framebuffer = pipeline::create_framebuffer(d, chain.render_pass, t.view, extent)
                .context("create_framebuffer")?;
        }
        debug!(framebuffers = chain.targets.len(), "framebuffers created");
        Ok(())
    }

    /// Framebuffers, pipeline, render pass, image views, then the swapchain
    /// itself. The caller guarantees the GPU no longer uses any of them.
    pub unsafe fn destroy(&mut self) {
        if let Some(mut chain) = self.chain.take() {
            destroy_chain(&self.device, &self.loader, &mut chain);
            debug!("swapchain chain destroyed");
        }
    }

    /// Device idle, full teardown, full rebuild.
    pub unsafe fn recreate(&mut self, size: RenderSize) -> Result<()> {
        self.device
            .device_wait_idle()
            .context("device_wait_idle")?;
        self.destroy();
        self.create(size)
    }
}

unsafe fn destroy_chain(d: &Device, loader: &swapchain::Device, chain: &mut SwapchainChain) {
    for t in &mut chain.targets {
        if t.framebuffer != vk::Framebuffer::null() {
            d.destroy_framebuffer(t.framebuffer, None);
            t.framebuffer = vk::Framebuffer::null();
        }
    }
    if chain.pipeline != vk::Pipeline::null() {
        d.destroy_pipeline(chain.pipeline, None);
        chain.pipeline = vk::Pipeline::null();
    }
    if chain.pipeline_layout != vk::PipelineLayout::null() {
        d.destroy_pipeline_layout(chain.pipeline_layout, None);
        chain.pipeline_layout = vk::PipelineLayout::null();
    }
    if chain.render_pass != vk::RenderPass::null() {
        d.destroy_render_pass(chain.render_pass, None);
        chain.render_pass = vk::RenderPass::null();
    }
    // images belong to the swapchain
    for t in chain.targets.drain(..) {
        d.destroy_image_view(t.view, None);
    }
    if chain.swapchain != vk::SwapchainKHR::null() {
        loader.destroy_swapchain(chain.swapchain, None);
        chain.swapchain = vk::SwapchainKHR::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn support() -> SwapchainSupport {
        SwapchainSupport {
            capabilities: caps(2, 4),
            formats: vec![
                fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn prefers_bgra_srgb_nonlinear() {
        let f = choose_surface_format(&support().formats).unwrap();
        assert_eq!(f.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(f.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            // right format, wrong colour space
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let f = choose_surface_format(&formats).unwrap();
        assert_eq!(f.format, vk::Format::R16G16B16A16_SFLOAT);
        assert_eq!(choose_surface_format(&[]).map(|f| f.format), None);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let all = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let no_mailbox = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&all, PresentPreference::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&no_mailbox, PresentPreference::Mailbox),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&all, PresentPreference::Fifo),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn image_count_within_bounds_is_min_plus_one() {
        assert_eq!(choose_image_count(&caps(2, 4)), 3);
    }

    #[test]
    fn image_count_clamps_to_max() {
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn image_count_unbounded_when_max_is_zero() {
        assert_eq!(choose_image_count(&caps(5, 0)), 6);
    }

    #[test]
    fn extent_uses_fixed_surface_extent() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let e = choose_extent(&c, RenderSize::new(1920, 1080));
        assert_eq!(e, vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn extent_clamps_framebuffer_size() {
        let mut c = caps(2, 3);
        c.max_image_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        let e = choose_extent(&c, RenderSize::new(1920, 600));
        assert_eq!(e, vk::Extent2D { width: 1024, height: 600 });
    }

    #[test]
    fn zero_extent_is_clamped_not_rejected() {
        let e = choose_extent(&caps(2, 3), RenderSize::new(0, 0));
        assert_eq!(e, vk::Extent2D { width: 1, height: 1 });

        let mut minimized = caps(2, 3);
        minimized.current_extent = vk::Extent2D::default();
        assert_eq!(
            choose_extent(&minimized, RenderSize::new(900, 600)),
            vk::Extent2D::default()
        );
    }

    #[test]
    fn sharing_is_concurrent_only_across_families() {
        let same = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(0),
        };
        let split = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(2),
        };
        assert_eq!(choose_sharing(&same), (vk::SharingMode::EXCLUSIVE, vec![]));
        assert_eq!(choose_sharing(&split), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }

    #[test]
    fn plan_is_deterministic_for_same_inputs() {
        let queues = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(0),
        };
        let s = support();
        let size = RenderSize::new(900, 600);
        let a = SwapchainPlan::new(&s, size, PresentPreference::Mailbox, &queues).unwrap();
        for _ in 0..3 {
            let b = SwapchainPlan::new(&s, size, PresentPreference::Mailbox, &queues).unwrap();
            assert_eq!(a.surface_format.format, b.surface_format.format);
            assert_eq!(a.surface_format.color_space, b.surface_format.color_space);
            assert_eq!(a.present_mode, b.present_mode);
            assert_eq!(a.extent, b.extent);
            assert_eq!(a.min_image_count, b.min_image_count);
            assert_eq!(a.sharing_mode, b.sharing_mode);
        }
        assert_eq!(a.min_image_count, 3);
        assert_eq!(a.extent, vk::Extent2D { width: 900, height: 600 });
    }

    #[test]
    fn plan_rejects_surface_without_formats() {
        let mut s = support();
        s.formats.clear();
        assert!(!s.is_adequate());
        let queues = QueueFamilyIndices::default();
        assert!(SwapchainPlan::new(&s, RenderSize::new(1, 1), PresentPreference::Fifo, &queues).is_err());
    }
}
