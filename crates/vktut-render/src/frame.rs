// SPDX-License-Identifier: CEPL-1.0
//! Frame synchronization core.
//!
//! One CPU thread drives every frame. Each of the `N` frame slots owns an
//! image-available semaphore, a render-finished semaphore, an in-flight fence,
//! a command buffer and a uniform buffer. A frame runs strictly as:
//!
//! ```text
//! 1. wait     in_flight[slot]             (the only CPU block; caps GPU lead at N)
//! 2. acquire  -> image_index              (signals image_available[slot])
//!             out-of-date: recreate, return (fence untouched, nothing submitted)
//! 3. reset    in_flight[slot], re-record cmd[slot] against framebuffer[image_index]
//! 4. update   uniform[slot]
//! 5. submit   wait image_available[slot] @ COLOR_ATTACHMENT_OUTPUT,
//!             signal render_finished[slot] + in_flight[slot]
//! 6. present  image_index, wait render_finished[slot]
//!             out-of-date / suboptimal: recreate
//! 7. advance  slot = (slot + 1) % N
//! ```
//!
//! `slot` lives in `[0, N)`, `image_index` in `[0, image_count)`; the two are
//! never used interchangeably.

use anyhow::{bail, Context, Result};
use tracing::{debug, info, trace};

use crate::RenderSize;

/// Result of asking the presentation engine for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// The surface changed; the swapchain must be rebuilt before rendering.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal.
    NeedsRecreate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Zero-area framebuffer; nothing was touched.
    Minimized,
    /// Acquire reported out-of-date; the swapchain was rebuilt instead.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented {
        slot: usize,
        image_index: u32,
        /// The swapchain was rebuilt after presenting.
        recreated: bool,
    },
    Skipped(SkipReason),
}

/// Where the current slot is within one iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotState {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// GPU operations the frame loop sequences. Implemented over ash by the
/// Vulkan backend and over an in-memory queue model in tests.
///
/// Every method except `recreate_swapchain` operates on one frame slot; the
/// loop guarantees `slot < slot_count()` and `image_index < image_count()`.
pub trait FrameBackend {
    /// Number of frame slots (`N`).
    fn slot_count(&self) -> usize;
    /// Number of presentable images in the current swapchain.
    fn image_count(&self) -> usize;

    /// Block until the slot's in-flight fence is signaled.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;
    fn reset_slot_fence(&mut self, slot: usize) -> Result<()>;
    /// Reset and re-record the slot's command buffer targeting `image_index`.
    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn update_uniforms(&mut self, slot: usize) -> Result<()>;
    fn submit(&mut self, slot: usize) -> Result<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Wait for device idle, tear down the swapchain chain and frame slots,
    /// and build them again for `size`.
    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct FrameLoop {
    current: usize,
    presented: u64,
    recreations: u64,
    resized: bool,
    minimized: bool,
    phase: SlotState,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Frames presented since start.
    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    pub fn phase(&self) -> SlotState {
        self.phase
    }

    /// The window was resized; rebuild the swapchain at the next opportunity.
    pub fn mark_resized(&mut self) {
        self.resized = true;
    }

    pub fn draw_frame<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        size: RenderSize,
    ) -> Result<FrameStatus> {
        if size.is_empty() {
            if !self.minimized {
                info!("framebuffer is 0x0, skipping frames");
            }
            self.minimized = true;
            return Ok(FrameStatus::Skipped(SkipReason::Minimized));
        }
        if self.minimized {
            self.minimized = false;
            if self.resized {
                info!(size.width, size.height, "restored from 0x0");
                self.recreate(backend, size)?;
            }
        }

        let slots = backend.slot_count();
        if slots == 0 {
            bail!("frame loop has no frame slots");
        }
        if self.current >= slots {
            self.current = 0;
        }
        let slot = self.current;

        // 1) backpressure: slot's previous submission must be retired
        backend
            .wait_for_slot(slot)
            .context("wait_for_fences(in_flight)")?;

        // 2) acquire
        self.phase = SlotState::Acquiring;
        let image_index = match backend
            .acquire_image(slot)
            .context("acquire_next_image")?
        {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    debug!(slot, image_index, "acquired suboptimal image");
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                debug!(slot, "acquire: swapchain out of date");
                self.phase = SlotState::Idle;
                self.recreate(backend, size)?;
                return Ok(FrameStatus::Skipped(SkipReason::OutOfDate));
            }
        };
        let images = backend.image_count();
        if image_index as usize >= images {
            bail!("acquired image {image_index} outside swapchain of {images} images");
        }

        // 3) only now is this slot committed to a submit
        self.phase = SlotState::Recording;
        backend
            .reset_slot_fence(slot)
            .context("reset_fences(in_flight)")?;
        backend
            .record_commands(slot, image_index)
            .context("record command buffer")?;

        // 4)
        backend
            .update_uniforms(slot)
            .context("update uniform buffer")?;

        // 5)
        backend.submit(slot).context("queue_submit")?;
        self.phase = SlotState::Submitted;

        // 6)
        self.phase = SlotState::Presenting;
        let outcome = backend
            .present(slot, image_index)
            .context("queue_present")?;
        self.presented += 1;
        trace!(slot, image_index, frame = self.presented, "presented");

        // 7)
        self.current = (slot + 1) % slots;
        self.phase = SlotState::Idle;

        let recreated = outcome == PresentOutcome::NeedsRecreate || self.resized;
        if recreated {
            debug!(?outcome, resized = self.resized, "present: rebuilding swapchain");
            self.recreate(backend, size)?;
        }

        Ok(FrameStatus::Presented {
            slot,
            image_index,
            recreated,
        })
    }

    fn recreate<B: FrameBackend>(&mut self, backend: &mut B, size: RenderSize) -> Result<()> {
        backend
            .recreate_swapchain(size)
            .context("recreate swapchain")?;
        self.resized = false;
        // fresh slots, all fences signaled
        self.current = 0;
        self.recreations += 1;
        info!(
            size.width,
            size.height,
            slots = backend.slot_count(),
            images = backend.image_count(),
            "swapchain rebuilt"
        );
        Ok(())
    }
}
