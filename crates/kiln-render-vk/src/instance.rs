// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr, CString};

use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, trace, warn};

use crate::error::{VkBackendError, VkBackendResult};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[vulkan] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("[vulkan] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!("[vulkan] {message}"),
        _ => trace!("[vulkan] {message}"),
    }
    vk::FALSE
}

/// First wanted layer that is not among the available ones.
pub fn missing_layer<'a>(wanted: &[&'a CStr], available: &[CString]) -> Option<&'a CStr> {
    wanted
        .iter()
        .copied()
        .find(|&want| !available.iter().any(|have| have.as_c_str() == want))
}

/// Instance-level objects: entry, instance, optional debug messenger and the
/// window surface.
pub struct VulkanInstance {
    _entry: Entry,
    pub instance: ash::Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl VulkanInstance {
    pub fn create(
        app_name: &str,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation: bool,
    ) -> VkBackendResult<Self> {
        let entry = Entry::linked();

        let dh: RawDisplayHandle = display
            .display_handle()
            .map_err(|e| VkBackendError::Platform(e.to_string()))?
            .as_raw();
        let wh: RawWindowHandle = window
            .window_handle()
            .map_err(|e| VkBackendError::Platform(e.to_string()))?
            .as_raw();

        let instance = unsafe { create_instance(&entry, app_name, dh, validation)? };

        let debug = if validation {
            match unsafe { create_debug_messenger(&entry, &instance) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let surface = match unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe {
                    if let Some((loader, messenger)) = &debug {
                        loader.destroy_debug_utils_messenger(*messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(VkBackendError::Platform(format!("surface creation failed: {e}")));
            }
        };
        let surface_loader = surface::Instance::new(&entry, &instance);
        info!("vulkan surface created");

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
        })
    }

    /// Surface, then messenger, then instance. Every device object must be
    /// gone by now.
    pub fn destroy(self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug {
                debug!("destroying debug messenger");
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("vulkan instance destroyed");
    }
}

unsafe fn create_instance(
    entry: &Entry,
    app_name: &str,
    display: RawDisplayHandle,
    validation: bool,
) -> VkBackendResult<ash::Instance> {
    let app_name = CString::new(app_name).unwrap_or_else(|_| c"kiln".to_owned());
    let engine_name = c"Kiln Engine";

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: engine_name.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
        .map_err(|e| VkBackendError::Platform(format!("no surface extensions: {e}")))?
        .to_vec();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
    }
    for ext in &extensions {
        debug!("instance extension: {:?}", CStr::from_ptr(*ext));
    }

    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        info!("validation layers enabled, enumerating...");
        let available: Vec<CString> = entry
            .enumerate_instance_layer_properties()?
            .iter()
            .map(|l| CStr::from_ptr(l.layer_name.as_ptr()).to_owned())
            .collect();
        if let Some(missing) = missing_layer(&[VALIDATION_LAYER], &available) {
            error!("required validation layer is missing: {missing:?}");
            return Err(VkBackendError::MissingValidationLayer(
                missing.to_string_lossy().into_owned(),
            ));
        }
        layers.push(VALIDATION_LAYER.as_ptr());
        info!("all required validation layers are present");
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };

    let instance = entry.create_instance(&create_info, None)?;
    info!("vulkan instance created");
    Ok(instance)
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> ash::prelude::VkResult<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let info = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader.create_debug_utils_messenger(&info, None)?;
    debug!("vulkan debugger created");
    Ok((loader, messenger))
}
