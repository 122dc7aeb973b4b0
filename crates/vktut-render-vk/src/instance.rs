// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface and the validation-layer messenger.

use std::ffi::{c_void, CStr, CString};

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, trace, warn, Level};

use crate::error::VkError;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Entries of `required` absent from `available`, in request order.
pub fn missing_names<'a>(available: &[&CStr], required: &[&'a CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|r| !available.contains(r))
        .collect()
}

pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Level::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Level::WARN
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        Level::DEBUG
    } else {
        Level::TRACE
    }
}

// Logs only; never alters control flow.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    match severity_level(severity) {
        Level::ERROR => error!(target: "vulkan", ?types, "{msg}"),
        Level::WARN => warn!(target: "vulkan", ?types, "{msg}"),
        Level::DEBUG => debug!(target: "vulkan", ?types, "{msg}"),
        _ => trace!(target: "vulkan", ?types, "{msg}"),
    }
    vk::FALSE
}

fn messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

unsafe fn check_validation_layer(entry: &Entry) -> Result<()> {
    let props = entry
        .enumerate_instance_layer_properties()
        .context("enumerate_instance_layer_properties")?;
    let names: Vec<&CStr> = props
        .iter()
        .map(|p| CStr::from_ptr(p.layer_name.as_ptr()))
        .collect();
    if let Some(missing) = missing_names(&names, &[VALIDATION_LAYER]).first() {
        return Err(VkError::MissingValidationLayer(missing.to_string_lossy().into_owned()).into());
    }
    debug!("validation layer is supported");
    Ok(())
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    app_name: &str,
    validation: bool,
) -> Result<Instance> {
    let app = CString::new(app_name).context("application name contains NUL")?;
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: c"vktut".as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut layers = Vec::new();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    // Covers messages from vkCreateInstance / vkDestroyInstance themselves.
    let instance_debug = messenger_info();

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_next: if validation {
            (&instance_debug as *const vk::DebugUtilsMessengerCreateInfoEXT).cast::<c_void>()
        } else {
            std::ptr::null()
        },
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    Ok(entry.create_instance(&create_info, None)?)
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Owns the loader entry, the instance, the window surface and, with
/// validation on, the debug messenger. Dropped after the logical device.
pub struct InstanceCtx {
    entry: Entry,
    instance: Instance,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    debug: Option<DebugMessenger>,
}

impl InstanceCtx {
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        app_name: &str,
        validation: bool,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = Entry::load().context("load Vulkan loader")?;
        if validation {
            check_validation_layer(&entry)?;
        }
        let instance = create_instance(&entry, dh, app_name, validation)
            .context("create_instance")?;
        debug!(validation, "instance created");

        let surface_loader = surface::Instance::new(&entry, &instance);
        // From here on a failure still tears down what exists.
        let mut ctx = Self {
            entry,
            instance,
            surface_loader,
            surface: vk::SurfaceKHR::null(),
            debug: None,
        };

        if validation {
            let loader = debug_utils::Instance::new(&ctx.entry, &ctx.instance);
            let messenger = loader
                .create_debug_utils_messenger(&messenger_info(), None)
                .context("create_debug_utils_messenger")?;
            ctx.debug = Some(DebugMessenger { loader, messenger });
            debug!("debug messenger created");
        }

        ctx.surface = ash_window::create_surface(&ctx.entry, &ctx.instance, dh, wh, None)
            .context("ash_window::create_surface")?;
        info!("surface created");
        Ok(ctx)
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl Drop for InstanceCtx {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
                debug!("surface destroyed");
            }
            if let Some(d) = self.debug.take() {
                d.loader.destroy_debug_utils_messenger(d.messenger, None);
                debug!("debug messenger destroyed");
            }
            self.instance.destroy_instance(None);
            debug!("instance destroyed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_only_absent_names() {
        let available = [c"VK_LAYER_LUNARG_monitor", VALIDATION_LAYER];
        assert!(missing_names(&available, &[VALIDATION_LAYER]).is_empty());

        let missing = missing_names(&available[..1], &[VALIDATION_LAYER, c"VK_LAYER_LUNARG_monitor"]);
        assert_eq!(missing, [VALIDATION_LAYER]);
    }

    #[test]
    fn severity_maps_to_matching_level() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(severity_level(S::ERROR), Level::ERROR);
        assert_eq!(severity_level(S::WARNING), Level::WARN);
        assert_eq!(severity_level(S::INFO), Level::DEBUG);
        assert_eq!(severity_level(S::VERBOSE), Level::TRACE);
    }
}
