// SPDX-License-Identifier: CEPL-1.0
//! Frame loop against an in-memory model of the GPU queue.
//!
//! `MockGpu` keeps every submission in a FIFO queue and only retires work when
//! the CPU blocks on a fence (or on device idle during recreation), so the
//! tests see the worst case: a GPU that never gets ahead on its own.

use std::collections::VecDeque;

use anyhow::{bail, Result};
use vktut_render::frame::{
    AcquireOutcome, FrameBackend, FrameLoop, FrameStatus, PresentOutcome, SkipReason, SlotState,
};
use vktut_render::RenderSize;

const SIZE: RenderSize = RenderSize::new(900, 600);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    /// `retired` lists the frames the wait had to see complete.
    Wait { slot: usize, retired: Vec<u64> },
    Acquire { slot: usize },
    ResetFence { slot: usize },
    Record { slot: usize, image: u32 },
    Uniforms { slot: usize },
    Submit { slot: usize, frame: u64 },
    Present { slot: usize, image: u32 },
    Recreate,
}

#[derive(Debug)]
struct Slot {
    fence_signaled: bool,
    image_available: bool,
    in_use_by: Option<u64>,
}

impl Slot {
    fn fresh() -> Self {
        Self {
            fence_signaled: true,
            image_available: false,
            in_use_by: None,
        }
    }
}

struct MockGpu {
    slots: Vec<Slot>,
    slots_after_recreate: usize,
    image_count: usize,
    next_image: u32,
    queue: VecDeque<(u64, usize)>,
    next_frame: u64,
    max_in_flight: usize,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    fail_submit: bool,
    events: Vec<Event>,
}

impl MockGpu {
    fn new(slots: usize, images: usize) -> Self {
        Self {
            slots: (0..slots).map(|_| Slot::fresh()).collect(),
            slots_after_recreate: slots,
            image_count: images,
            next_image: 0,
            queue: VecDeque::new(),
            next_frame: 0,
            max_in_flight: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fail_submit: false,
            events: Vec::new(),
        }
    }

    fn retire_oldest(&mut self) -> Option<u64> {
        let (frame, slot) = self.queue.pop_front()?;
        let s = &mut self.slots[slot];
        s.fence_signaled = true;
        s.in_use_by = None;
        Some(frame)
    }

    fn records(&self) -> Vec<(usize, u32)> {
        self.events
            .iter()
            .filter_map(|e| match *e {
                Event::Record { slot, image } => Some((slot, image)),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl FrameBackend for MockGpu {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn image_count(&self) -> usize {
        self.image_count
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let mut retired = Vec::new();
        while !self.slots[slot].fence_signaled {
            match self.retire_oldest() {
                Some(frame) => retired.push(frame),
                None => bail!("fence for slot {slot} can never signal"),
            }
        }
        self.events.push(Event::Wait { slot, retired });
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.events.push(Event::Acquire { slot });
        let outcome = match self.acquire_script.pop_front() {
            Some(o) => o,
            None => {
                let image_index = self.next_image;
                self.next_image = (image_index + 1) % self.image_count as u32;
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            }
        };
        if let AcquireOutcome::Acquired { .. } = outcome {
            self.slots[slot].image_available = true;
        }
        Ok(outcome)
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        if !self.slots[slot].fence_signaled {
            bail!("reset of a fence the GPU still owns (slot {slot})");
        }
        self.slots[slot].fence_signaled = false;
        self.events.push(Event::ResetFence { slot });
        Ok(())
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()> {
        if let Some(frame) = self.slots[slot].in_use_by {
            bail!("slot {slot} command buffer re-recorded while frame {frame} is in flight");
        }
        if image_index as usize >= self.image_count {
            bail!("image {image_index} out of range");
        }
        self.events.push(Event::Record {
            slot,
            image: image_index,
        });
        Ok(())
    }

    fn update_uniforms(&mut self, slot: usize) -> Result<()> {
        if let Some(frame) = self.slots[slot].in_use_by {
            bail!("slot {slot} uniforms written while frame {frame} is in flight");
        }
        self.events.push(Event::Uniforms { slot });
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        if self.fail_submit {
            bail!("device lost");
        }
        let s = &mut self.slots[slot];
        if !s.image_available {
            bail!("submit on slot {slot} without an acquired image");
        }
        if s.fence_signaled {
            bail!("submit on slot {slot} with a fence that was never reset");
        }
        s.image_available = false;
        let frame = self.next_frame;
        self.next_frame += 1;
        s.in_use_by = Some(frame);
        self.queue.push_back((frame, slot));
        self.max_in_flight = self.max_in_flight.max(self.queue.len());
        self.events.push(Event::Submit { slot, frame });
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        self.events.push(Event::Present {
            slot,
            image: image_index,
        });
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn recreate_swapchain(&mut self, _size: RenderSize) -> Result<()> {
        // device idle
        while self.retire_oldest().is_some() {}
        self.slots = (0..self.slots_after_recreate)
            .map(|_| Slot::fresh())
            .collect();
        self.next_image = 0;
        self.events.push(Event::Recreate);
        Ok(())
    }
}

#[test]
fn fence_wait_caps_frames_in_flight() {
    let mut gpu = MockGpu::new(2, 3);
    let mut frames = FrameLoop::new();

    for _ in 0..3 {
        frames.draw_frame(&mut gpu, SIZE).unwrap();
    }

    let waits: Vec<_> = gpu
        .events
        .iter()
        .filter(|e| matches!(e, Event::Wait { .. }))
        .cloned()
        .collect();
    assert_eq!(
        waits,
        vec![
            Event::Wait { slot: 0, retired: vec![] },
            Event::Wait { slot: 1, retired: vec![] },
            // third frame reuses slot 0: first frame must be complete
            Event::Wait { slot: 0, retired: vec![0] },
        ]
    );
    assert_eq!(gpu.max_in_flight, 2);
}

#[test]
fn long_run_never_exceeds_slot_count() {
    for slots in 1..=4 {
        let mut gpu = MockGpu::new(slots, 3);
        let mut frames = FrameLoop::new();
        for _ in 0..50 {
            frames.draw_frame(&mut gpu, SIZE).unwrap();
        }
        assert_eq!(gpu.max_in_flight, slots);
        assert_eq!(frames.presented(), 50);
    }
}

#[test]
fn slot_and_image_indices_rotate_independently() {
    let mut gpu = MockGpu::new(2, 3);
    let mut frames = FrameLoop::new();
    for _ in 0..6 {
        frames.draw_frame(&mut gpu, SIZE).unwrap();
    }

    let records = gpu.records();
    let slots: Vec<_> = records.iter().map(|r| r.0).collect();
    let images: Vec<_> = records.iter().map(|r| r.1).collect();
    assert_eq!(slots, [0, 1, 0, 1, 0, 1]);
    assert_eq!(images, [0, 1, 2, 0, 1, 2]);
    // frame 2 renders into image 2 with the sync objects of slot 0
    assert_eq!(records[2], (0, 2));
}

#[test]
fn out_of_date_acquire_recreates_and_skips_the_frame() {
    let mut gpu = MockGpu::new(2, 3);
    gpu.acquire_script.push_back(AcquireOutcome::OutOfDate);
    let mut frames = FrameLoop::new();

    let status = frames.draw_frame(&mut gpu, SIZE).unwrap();

    assert_eq!(status, FrameStatus::Skipped(SkipReason::OutOfDate));
    assert_eq!(
        gpu.events,
        vec![
            Event::Wait { slot: 0, retired: vec![] },
            Event::Acquire { slot: 0 },
            Event::Recreate,
        ]
    );
    assert!(gpu.slots.iter().all(|s| s.fence_signaled));
    assert_eq!(frames.recreations(), 1);
    assert_eq!(frames.current_slot(), 0);
}

#[test]
fn signaled_fence_returns_immediately_and_advances() {
    let mut gpu = MockGpu::new(2, 2);
    let mut frames = FrameLoop::new();

    let status = frames.draw_frame(&mut gpu, SIZE).unwrap();

    assert_eq!(
        status,
        FrameStatus::Presented {
            slot: 0,
            image_index: 0,
            recreated: false
        }
    );
    assert_eq!(
        gpu.events,
        vec![
            Event::Wait { slot: 0, retired: vec![] },
            Event::Acquire { slot: 0 },
            Event::ResetFence { slot: 0 },
            Event::Record { slot: 0, image: 0 },
            Event::Uniforms { slot: 0 },
            Event::Submit { slot: 0, frame: 0 },
            Event::Present { slot: 0, image: 0 },
        ]
    );
    assert_eq!(frames.current_slot(), 1);
    assert_eq!(frames.phase(), SlotState::Idle);
}

#[test]
fn minimized_window_touches_nothing() {
    let mut gpu = MockGpu::new(2, 3);
    let mut frames = FrameLoop::new();

    for _ in 0..5 {
        let status = frames.draw_frame(&mut gpu, RenderSize::new(900, 0)).unwrap();
        assert_eq!(status, FrameStatus::Skipped(SkipReason::Minimized));
    }
    assert!(gpu.events.is_empty());
}

#[test]
fn restore_after_minimize_rebuilds_before_acquiring() {
    let mut gpu = MockGpu::new(2, 3);
    let mut frames = FrameLoop::new();

    frames.draw_frame(&mut gpu, RenderSize::new(0, 0)).unwrap();
    frames.mark_resized();
    let status = frames.draw_frame(&mut gpu, SIZE).unwrap();

    assert_eq!(gpu.events[0], Event::Recreate);
    assert_eq!(gpu.events[1], Event::Wait { slot: 0, retired: vec![] });
    assert_eq!(
        status,
        FrameStatus::Presented {
            slot: 0,
            image_index: 0,
            recreated: false
        }
    );
    assert_eq!(gpu.count(|e| *e == Event::Recreate), 1);
}

#[test]
fn suboptimal_acquire_still_renders() {
    let mut gpu = MockGpu::new(2, 3);
    gpu.acquire_script.push_back(AcquireOutcome::Acquired {
        image_index: 1,
        suboptimal: true,
    });
    let mut frames = FrameLoop::new();

    let status = frames.draw_frame(&mut gpu, SIZE).unwrap();

    assert_eq!(
        status,
        FrameStatus::Presented {
            slot: 0,
            image_index: 1,
            recreated: false
        }
    );
    assert_eq!(gpu.count(|e| matches!(e, Event::Submit { .. })), 1);
    assert_eq!(gpu.count(|e| *e == Event::Recreate), 0);
}

#[test]
fn present_out_of_date_rebuilds_after_presenting() {
    let mut gpu = MockGpu::new(2, 3);
    gpu.present_script.push_back(PresentOutcome::NeedsRecreate);
    let mut frames = FrameLoop::new();

    let status = frames.draw_frame(&mut gpu, SIZE).unwrap();

    assert_eq!(
        status,
        FrameStatus::Presented {
            slot: 0,
            image_index: 0,
            recreated: true
        }
    );
    assert_eq!(gpu.events.last(), Some(&Event::Recreate));
    assert_eq!(frames.current_slot(), 0);
    assert!(gpu.queue.is_empty());
}

#[test]
fn resize_mark_rebuilds_once_after_present() {
    let mut gpu = MockGpu::new(2, 3);
    let mut frames = FrameLoop::new();

    frames.draw_frame(&mut gpu, SIZE).unwrap();
    frames.mark_resized();
    let status = frames.draw_frame(&mut gpu, RenderSize::new(1280, 720)).unwrap();
    assert!(matches!(status, FrameStatus::Presented { recreated: true, .. }));

    let status = frames.draw_frame(&mut gpu, RenderSize::new(1280, 720)).unwrap();
    assert!(matches!(status, FrameStatus::Presented { recreated: false, .. }));
    assert_eq!(frames.recreations(), 1);
}

#[test]
fn slot_count_follows_rebuilt_swapchain() {
    let mut gpu = MockGpu::new(2, 2);
    gpu.slots_after_recreate = 3;
    gpu.present_script.push_back(PresentOutcome::NeedsRecreate);
    let mut frames = FrameLoop::new();

    frames.draw_frame(&mut gpu, SIZE).unwrap();
    gpu.image_count = 3;
    for _ in 0..6 {
        frames.draw_frame(&mut gpu, SIZE).unwrap();
    }

    let slots: Vec<_> = gpu.records().iter().skip(1).map(|r| r.0).collect();
    assert_eq!(slots, [0, 1, 2, 0, 1, 2]);
    assert_eq!(gpu.max_in_flight, 3);
}

#[test]
fn repeated_recreation_is_stable() {
    let mut gpu = MockGpu::new(3, 3);
    let mut frames = FrameLoop::new();

    for _ in 0..3 {
        gpu.acquire_script.push_back(AcquireOutcome::OutOfDate);
        frames.draw_frame(&mut gpu, SIZE).unwrap();
        assert_eq!(gpu.slot_count(), 3);
        assert_eq!(gpu.image_count(), 3);
        assert_eq!(frames.current_slot(), 0);
    }
    assert_eq!(frames.recreations(), 3);
}

#[test]
fn fatal_errors_name_the_failing_step() {
    let mut gpu = MockGpu::new(2, 3);
    gpu.fail_submit = true;
    let mut frames = FrameLoop::new();

    let err = frames.draw_frame(&mut gpu, SIZE).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("queue_submit"), "{msg}");
    assert!(msg.contains("device lost"), "{msg}");
    assert_eq!(frames.presented(), 0);
}

#[test]
fn out_of_range_image_index_is_fatal() {
    let mut gpu = MockGpu::new(2, 3);
    gpu.acquire_script.push_back(AcquireOutcome::Acquired {
        image_index: 7,
        suboptimal: false,
    });
    let mut frames = FrameLoop::new();

    assert!(frames.draw_frame(&mut gpu, SIZE).is_err());
    assert_eq!(gpu.count(|e| matches!(e, Event::ResetFence { .. })), 0);
}
