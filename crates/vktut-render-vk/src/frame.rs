// SPDX-License-Identifier: CEPL-1.0
//! Frame slot records: one per frame in flight, built and destroyed together
//! with the swapchain chain.

use std::ffi::c_void;

use anyhow::{Context, Result};
use ash::{vk, Device};
use tracing::debug;
use vktut_math::Uniform;

use crate::memory::GpuBuffer;

/// `frames_in_flight` when fixed, else one slot per swapchain image.
pub fn slot_count(frames_in_flight: Option<u32>, image_count: usize) -> usize {
    match frames_in_flight {
        Some(n) if n > 0 => n as usize,
        _ => image_count.max(1),
    }
}

/// Everything one frame in flight owns. The CPU touches `command_buffer` and
/// the uniform memory only after `in_flight` has been waited on.
#[derive(Debug)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub command_buffer: vk::CommandBuffer,
    pub descriptor_set: vk::DescriptorSet,
    uniform: GpuBuffer,
    mapped: *mut c_void,
}

impl FrameSlot {
    /// Copy into the persistently mapped, host-coherent uniform buffer.
    pub unsafe fn write_uniform(&self, u: &Uniform) {
        let bytes = u.as_bytes();
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.cast::<u8>(), bytes.len());
    }
}

#[derive(Debug, Default)]
pub struct FrameSlots {
    slots: Vec<FrameSlot>,
    descriptor_pool: vk::DescriptorPool,
}

impl FrameSlots {
    pub unsafe fn create(
        device: &Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        command_pool: vk::CommandPool,
        set_layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> Result<Self> {
        let mut out = Self::default();
        if let Err(e) = out.build(device, mem_props, command_pool, set_layout, count) {
            out.destroy(device, command_pool);
            return Err(e);
        }
        debug!(slots = count, "frame slots created");
        Ok(out)
    }

    unsafe fn build(
        &mut self,
        device: &Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        command_pool: vk::CommandPool,
        set_layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> Result<()> {
        let n = count as u32;
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: n,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: n,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        self.descriptor_pool = device
            .create_descriptor_pool(&pool_info, None)
            .context("create_descriptor_pool")?;

        let layouts = vec![set_layout; count];
        let set_info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.descriptor_pool,
            descriptor_set_count: n,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = device
            .allocate_descriptor_sets(&set_info)
            .context("allocate_descriptor_sets")?;

        let cmd_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: n,
            ..Default::default()
        };
        let cmds = device
            .allocate_command_buffers(&cmd_info)
            .context("allocate_command_buffers")?;

        let sem_info = vk::SemaphoreCreateInfo::default();
        // signaled so the first wait on each slot returns at once
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let ubo_size = std::mem::size_of::<Uniform>() as vk::DeviceSize;

        for (i, (&command_buffer, &descriptor_set)) in cmds.iter().zip(&sets).enumerate() {
            let uniform = GpuBuffer::new(
                device,
                mem_props,
                ubo_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .with_context(|| format!("uniform buffer[{i}]"))?;
            // Pushed first so a later failure in this iteration still frees it.
            self.slots.push(FrameSlot {
                image_available: vk::Semaphore::null(),
                render_finished: vk::Semaphore::null(),
                in_flight: vk::Fence::null(),
                command_buffer,
                descriptor_set,
                uniform,
                mapped: std::ptr::null_mut(),
            });
            let slot = self.slots.last_mut().context("slot just pushed")?;
            slot.mapped = device
                .map_memory(uniform.memory, 0, ubo_size, vk::MemoryMapFlags::empty())
                .context("map_memory(uniform)")?;
            slot.image_available = device.create_semaphore(&sem_info, None)?;
            slot.render_finished = device.create_semaphore(&sem_info, None)?;
            slot.in_flight = device.create_fence(&fence_info, None)?;

            let buffer_info = vk::DescriptorBufferInfo {
                buffer: uniform.buffer,
                offset: 0,
                range: ubo_size,
            };
            let write = vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: descriptor_set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &buffer_info,
                ..Default::default()
            };
            device.update_descriptor_sets(std::slice::from_ref(&write), &[]);
        }
        Ok(())
    }

    /// The caller guarantees no slot is still in use by the GPU. Descriptor
    /// sets go with their pool; command buffers go back to `command_pool`.
    pub unsafe fn destroy(&mut self, device: &Device, command_pool: vk::CommandPool) {
        let cmds: Vec<_> = self.slots.iter().map(|s| s.command_buffer).collect();
        if !cmds.is_empty() {
            device.free_command_buffers(command_pool, &cmds);
        }
        for s in self.slots.drain(..) {
            device.destroy_fence(s.in_flight, None);
            device.destroy_semaphore(s.render_finished, None);
            device.destroy_semaphore(s.image_available, None);
            if !s.mapped.is_null() {
                device.unmap_memory(s.uniform.memory);
            }
            s.uniform.destroy(device);
        }
        if self.descriptor_pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.descriptor_pool = vk::DescriptorPool::null();
        }
        debug!("frame slots destroyed");
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Result<&FrameSlot> {
        self.slots
            .get(slot)
            .with_context(|| format!("frame slot {slot} out of {}", self.slots.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tied_to_image_count_by_default() {
        assert_eq!(slot_count(None, 3), 3);
        assert_eq!(slot_count(Some(0), 4), 4);
    }

    #[test]
    fn fixed_count_is_independent_of_images() {
        assert_eq!(slot_count(Some(2), 3), 2);
        assert_eq!(slot_count(Some(4), 2), 4);
    }

    #[test]
    fn never_zero_slots() {
        assert_eq!(slot_count(None, 0), 1);
    }
}
