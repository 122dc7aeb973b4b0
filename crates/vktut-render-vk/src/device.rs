// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection and logical device creation.
//!
//! A device qualifies iff it has a graphics family, some family that can
//! present to the surface, every extension in [`REQUIRED_DEVICE_EXTENSIONS`]
//! and an adequate swapchain support snapshot. The first qualifying device in
//! enumeration order wins; there is no scoring.

use std::ffi::CStr;

use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::{vk, Device, Instance};
use tracing::{debug, info};

use crate::error::VkError;
use crate::instance::{missing_names, InstanceCtx};
use crate::swapchain::SwapchainSupport;

pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Walks the families in order and stops as soon as both roles are
    /// resolved. A later family that can do both replaces an earlier
    /// graphics-only pick.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> Result<bool>,
    ) -> Result<Self> {
        let mut out = Self::default();
        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            if family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                out.graphics = Some(i);
            }
            if supports_present(i)? {
                out.present = Some(i);
            }
            if out.is_complete() {
                break;
            }
        }
        Ok(out)
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn graphics(&self) -> Result<u32, VkError> {
        self.graphics.ok_or(VkError::MissingQueueFamily("graphics"))
    }

    pub fn present(&self) -> Result<u32, VkError> {
        self.present.ok_or(VkError::MissingQueueFamily("present"))
    }

    /// Distinct family indices, ascending; one queue is created per entry.
    pub fn unique(&self) -> Vec<u32> {
        let mut v: Vec<u32> = self.graphics.into_iter().chain(self.present).collect();
        v.sort_unstable();
        v.dedup();
        v
    }
}

/// What selection learned about one enumerated device.
#[derive(Clone, Debug, Default)]
pub struct DeviceCandidate {
    pub name: String,
    pub queues: QueueFamilyIndices,
    pub extensions_supported: bool,
    /// Only queried when the swapchain extension is present.
    pub swapchain_adequate: bool,
}

impl DeviceCandidate {
    pub fn is_suitable(&self) -> bool {
        self.queues.is_complete() && self.extensions_supported && self.swapchain_adequate
    }
}

pub fn pick_first_suitable(candidates: &[DeviceCandidate]) -> Option<usize> {
    candidates.iter().position(DeviceCandidate::is_suitable)
}

#[derive(Clone, Copy, Debug)]
pub struct PhysicalDeviceChoice {
    pub phys: vk::PhysicalDevice,
    pub queues: QueueFamilyIndices,
}

unsafe fn describe(ctx: &InstanceCtx, phys: vk::PhysicalDevice) -> Result<DeviceCandidate> {
    let instance = ctx.instance();
    let props = instance.get_physical_device_properties(phys);
    let name = CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned();

    let families = instance.get_physical_device_queue_family_properties(phys);
    let queues = QueueFamilyIndices::find(&families, |i| {
        ctx.surface_loader()
            .get_physical_device_surface_support(phys, i, ctx.surface())
            .context("get_physical_device_surface_support")
    })?;

    let ext_props = instance
        .enumerate_device_extension_properties(phys)
        .context("enumerate_device_extension_properties")?;
    let ext_names: Vec<&CStr> = ext_props
        .iter()
        .map(|e| CStr::from_ptr(e.extension_name.as_ptr()))
        .collect();
    let extensions_supported = missing_names(&ext_names, &REQUIRED_DEVICE_EXTENSIONS).is_empty();

    let swapchain_adequate = extensions_supported
        && SwapchainSupport::query(ctx.surface_loader(), phys, ctx.surface())?.is_adequate();

    Ok(DeviceCandidate {
        name,
        queues,
        extensions_supported,
        swapchain_adequate,
    })
}

pub unsafe fn select_physical_device(ctx: &InstanceCtx) -> Result<PhysicalDeviceChoice> {
    let devices = ctx
        .instance()
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?;

    let mut candidates = Vec::with_capacity(devices.len());
    for &phys in &devices {
        let c = describe(ctx, phys)?;
        debug!(
            name = %c.name,
            graphics = ?c.queues.graphics,
            present = ?c.queues.present,
            extensions = c.extensions_supported,
            swapchain = c.swapchain_adequate,
            "device candidate"
        );
        candidates.push(c);
    }

    let i = pick_first_suitable(&candidates).ok_or(VkError::NoSuitableDevice)?;
    info!(name = %candidates[i].name, "physical device selected");
    Ok(PhysicalDeviceChoice {
        phys: devices[i],
        queues: candidates[i].queues,
    })
}

/// Logical device plus the queues it was created with. Destroyed explicitly
/// by the renderer once every child object is gone.
pub struct LogicalDevice {
    pub device: Device,
    pub phys: vk::PhysicalDevice,
    pub queues: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub memory: vk::PhysicalDeviceMemoryProperties,
}

pub unsafe fn create_logical_device(
    instance: &Instance,
    choice: PhysicalDeviceChoice,
) -> Result<LogicalDevice> {
    let graphics = choice.queues.graphics()?;
    let present = choice.queues.present()?;

    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = choice
        .queues
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let features = vk::PhysicalDeviceFeatures::default();
    let extensions: Vec<*const std::ffi::c_char> = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|e| e.as_ptr())
        .collect();

    let info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        p_enabled_features: &features,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };

    let device = instance
        .create_device(choice.phys, &info, None)
        .context("create_device")?;
    let graphics_queue = device.get_device_queue(graphics, 0);
    let present_queue = device.get_device_queue(present, 0);
    let memory = instance.get_physical_device_memory_properties(choice.phys);
    info!(graphics, present, queues = queue_infos.len(), "logical device created");

    Ok(LogicalDevice {
        device,
        phys: choice.phys,
        queues: choice.queues,
        graphics_queue,
        present_queue,
        memory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn suitable(name: &str) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_owned(),
            queues: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            extensions_supported: true,
            swapchain_adequate: true,
        }
    }

    #[test]
    fn same_family_for_both_roles() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let q = QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap();
        assert_eq!(q.graphics, Some(0));
        assert_eq!(q.present, Some(0));
        assert_eq!(q.unique(), [0]);
    }

    #[test]
    fn distinct_families_yield_two_queues() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let q = QueueFamilyIndices::find(&families, |i| Ok(i == 1)).unwrap();
        assert_eq!((q.graphics, q.present), (Some(0), Some(1)));
        assert_eq!(q.unique(), [0, 1]);
    }

    #[test]
    fn later_family_with_both_roles_wins() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let q = QueueFamilyIndices::find(&families, |i| Ok(i == 1)).unwrap();
        assert_eq!((q.graphics, q.present), (Some(1), Some(1)));
    }

    #[test]
    fn search_stops_once_complete() {
        let families = [family(vk::QueueFlags::GRAPHICS); 4];
        let mut asked = Vec::new();
        QueueFamilyIndices::find(&families, |i| {
            asked.push(i);
            Ok(true)
        })
        .unwrap();
        assert_eq!(asked, [0]);
    }

    #[test]
    fn empty_families_are_skipped_for_graphics() {
        let families = [vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS,
            queue_count: 0,
            ..Default::default()
        }];
        let q = QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap();
        assert_eq!(q.graphics, None);
        assert!(!q.is_complete());
    }

    #[test]
    fn missing_role_is_a_typed_error() {
        let q = QueueFamilyIndices {
            graphics: Some(2),
            present: None,
        };
        assert_eq!(q.graphics().unwrap(), 2);
        assert!(matches!(q.present(), Err(VkError::MissingQueueFamily("present"))));
    }

    #[test]
    fn rejects_devices_without_graphics_or_present() {
        let mut no_graphics = suitable("compute-only");
        no_graphics.queues.graphics = None;
        let mut no_present = suitable("headless");
        no_present.queues.present = None;

        assert!(!no_graphics.is_suitable());
        assert!(!no_present.is_suitable());
        assert_eq!(pick_first_suitable(&[no_graphics, no_present]), None);
    }

    #[test]
    fn rejects_missing_extension_or_inadequate_swapchain() {
        let mut no_ext = suitable("old");
        no_ext.extensions_supported = false;
        let mut no_modes = suitable("odd");
        no_modes.swapchain_adequate = false;
        assert_eq!(pick_first_suitable(&[no_ext, no_modes]), None);
    }

    #[test]
    fn first_suitable_device_wins() {
        let mut bad = suitable("igpu");
        bad.queues.present = None;
        let picked = pick_first_suitable(&[bad, suitable("dgpu"), suitable("other")]);
        assert_eq!(picked, Some(1));
    }
}
