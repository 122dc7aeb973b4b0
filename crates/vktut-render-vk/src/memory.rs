// SPDX-License-Identifier: CEPL-1.0
//! Buffers with their paired device memory, and the staging upload path.

use anyhow::{Context, Result};
use ash::{vk, Device};
use tracing::debug;

use crate::error::VkError;

/// First memory type allowed by `type_bits` whose properties include `flags`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32, VkError> {
    (0..props.memory_type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(flags)
        })
        .ok_or(VkError::NoMemoryType { type_bits, flags })
}

/// A buffer and the allocation bound to it; destroyed together.
#[derive(Clone, Copy, Debug)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub unsafe fn new(
        device: &Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = device.create_buffer(&info, None).context("create_buffer")?;

        let req = device.get_buffer_memory_requirements(buffer);
        let memory = find_memory_type(mem_props, req.memory_type_bits, flags)
            .map_err(anyhow::Error::from)
            .and_then(|memory_type_index| {
                let alloc = vk::MemoryAllocateInfo {
                    s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                    allocation_size: req.size,
                    memory_type_index,
                    ..Default::default()
                };
                Ok(device.allocate_memory(&alloc, None).context("allocate_memory")?)
            });
        let memory = match memory {
            Ok(m) => m,
            Err(e) => {
                device.destroy_buffer(buffer, None);
                return Err(e);
            }
        };
        if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
            return Err(anyhow::Error::from(e).context("bind_buffer_memory"));
        }

        debug!(size, ?usage, "buffer created");
        Ok(Self {
            buffer,
            memory,
            size,
        })
    }

    pub unsafe fn destroy(self, device: &Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}

/// Host -> staging -> `dst` through a one-time command buffer on `queue`;
/// returns once the copy has completed. `dst` needs TRANSFER_DST usage.
pub unsafe fn upload_via_staging(
    device: &Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    queue: vk::Queue,
    pool: vk::CommandPool,
    dst: &GpuBuffer,
    data: &[u8],
) -> Result<()> {
    let size = data.len() as vk::DeviceSize;
    let staging = GpuBuffer::new(
        device,
        mem_props,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
    .context("staging buffer")?;

    let alloc = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = match device.allocate_command_buffers(&alloc) {
        Ok(v) => v[0],
        Err(e) => {
            staging.destroy(device);
            return Err(anyhow::Error::from(e).context("allocate_command_buffers(staging)"));
        }
    };

    let copy = || -> Result<()> {
        let ptr = device
            .map_memory(staging.memory, 0, size, vk::MemoryMapFlags::empty())
            .context("map_memory(staging)")?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
        device.unmap_memory(staging.memory);

        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device.begin_command_buffer(cmd, &begin)?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        device.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, std::slice::from_ref(&region));
        device.end_command_buffer(cmd)?;

        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        device
            .queue_submit(queue, std::slice::from_ref(&submit), vk::Fence::null())
            .context("queue_submit(staging)")?;
        device
            .queue_wait_idle(queue)
            .context("queue_wait_idle(staging)")?;
        Ok(())
    };
    let result = copy();

    device.free_command_buffers(pool, std::slice::from_ref(&cmd));
    staging.destroy(device);
    debug!(size, "staging upload finished");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            p.memory_types[i].property_flags = flags;
        }
        p
    }

    const LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn picks_first_matching_type() {
        let p = props(&[LOCAL, HOST, HOST]);
        assert_eq!(find_memory_type(&p, 0b111, HOST).unwrap(), 1);
        assert_eq!(find_memory_type(&p, 0b111, LOCAL).unwrap(), 0);
    }

    #[test]
    fn honours_type_bits() {
        let p = props(&[HOST, HOST]);
        assert_eq!(find_memory_type(&p, 0b10, HOST).unwrap(), 1);
    }

    #[test]
    fn superset_of_flags_matches() {
        let p = props(&[LOCAL | HOST]);
        assert_eq!(find_memory_type(&p, 1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(), 0);
    }

    #[test]
    fn no_match_is_typed_error() {
        let p = props(&[LOCAL]);
        let err = find_memory_type(&p, 0b1, HOST).unwrap_err();
        assert!(matches!(err, VkError::NoMemoryType { type_bits: 1, .. }));
        // types beyond memory_type_count are ignored
        assert!(find_memory_type(&p, 0b10, LOCAL).is_err());
    }
}
