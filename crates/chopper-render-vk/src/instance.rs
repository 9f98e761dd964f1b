// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr, CString};

use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, trace, warn};

use crate::error::{VkResultExt, VulkanError};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"Chopper Engine";

pub(crate) fn load_entry() -> Result<Entry, VulkanError> {
    // SAFETY: the loader stays alive for as long as the returned Entry.
    Ok(unsafe { Entry::load() }?)
}

/// Names in `required` that `available` does not list, in request order.
pub(crate) fn missing_extensions(required: &[&CStr], available: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|r| !available.contains(r))
        .map(|r| r.to_string_lossy().into_owned())
        .collect()
}

unsafe fn validation_layer_available(entry: &Entry) -> bool {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    layers
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER))
}

/// Creates the instance with the window-system extensions, plus debug utils and the
/// Khronos validation layer in debug builds. Returns whether validation is on.
pub(crate) unsafe fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    app_name: &str,
) -> Result<(Instance, bool), VulkanError> {
    let app = CString::new(app_name.replace('\0', "")).unwrap_or_default();

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: ENGINE_NAME.as_ptr(),
        engine_version: vk::make_api_version(0, 0, 1, 0),
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let validation = cfg!(debug_assertions) && {
        let found = unsafe { validation_layer_available(entry) };
        if !found {
            warn!("vk: {:?} not installed, running without validation", VALIDATION_LAYER);
        }
        found
    };

    let mut ext_ptrs: Vec<*const c_char> =
        ash_window::enumerate_required_extensions(display)
            .call("ash_window::enumerate_required_extensions")?
            .to_vec();
    if validation {
        ext_ptrs.push(debug_utils::NAME.as_ptr());
    }

    let available = unsafe { entry.enumerate_instance_extension_properties(None) }
        .call("vkEnumerateInstanceExtensionProperties")?;
    let available: Vec<&CStr> = available
        .iter()
        .filter_map(|e| e.extension_name_as_c_str().ok())
        .collect();
    // SAFETY: every pointer above comes from a 'static CStr.
    let required: Vec<&CStr> = ext_ptrs
        .iter()
        .map(|&p| unsafe { CStr::from_ptr(p) })
        .collect();
    let missing = missing_extensions(&required, &available);
    if !missing.is_empty() {
        return Err(VulkanError::MissingExtensions(missing));
    }
    for ext in &required {
        debug!("vk: instance extension {:?}", ext);
    }

    let layers = [VALIDATION_LAYER.as_ptr()];
    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        enabled_layer_count: if validation { layers.len() as u32 } else { 0 },
        pp_enabled_layer_names: if validation {
            layers.as_ptr()
        } else {
            std::ptr::null()
        },
        ..Default::default()
    };

    let instance =
        unsafe { entry.create_instance(&create_info, None) }.call("vkCreateInstance")?;
    info!("vk: instance created (validation={})", validation);
    Ok((instance, validation))
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback payload for the duration of the call.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan {:?}] {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan {:?}] {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan {:?}] {}", types, msg);
    } else {
        trace!("[vulkan {:?}] {}", types, msg);
    }
    vk::FALSE
}

/// Routes validation output into tracing.
pub struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub(crate) unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self, VulkanError> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
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
        };
        let handle = unsafe { loader.create_debug_utils_messenger(&ci, None) }
            .call("vkCreateDebugUtilsMessengerEXT")?;
        Ok(Self { loader, handle })
    }

    pub(crate) unsafe fn destroy(self) {
        unsafe { self.loader.destroy_debug_utils_messenger(self.handle, None) };
    }
}

/// Presentation target bound to the native window.
pub struct Surface {
    pub(crate) loader: surface::Instance,
    pub(crate) handle: vk::SurfaceKHR,
}

impl Surface {
    pub(crate) unsafe fn new(
        entry: &Entry,
        instance: &Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self, VulkanError> {
        let loader = surface::Instance::new(entry, instance);
        let handle = unsafe { ash_window::create_surface(entry, instance, display, window, None) }
            .call("ash_window::create_surface")?;
        Ok(Self { loader, handle })
    }

    pub(crate) unsafe fn destroy(self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_only_missing_extensions_in_order() {
        let required = [c"VK_KHR_surface", c"VK_KHR_xcb_surface", c"VK_EXT_debug_utils"];
        let available = [c"VK_EXT_debug_utils", c"VK_KHR_surface"];
        assert_eq!(
            missing_extensions(&required, &available),
            vec!["VK_KHR_xcb_surface".to_owned()]
        );
    }

    #[test]
    fn nothing_missing() {
        let exts = [c"VK_KHR_surface", c"VK_KHR_wayland_surface"];
        assert!(missing_extensions(&exts, &exts).is_empty());
    }
}
