//! Vulkan instance, device selection and the shared GPU device bundle

use crate::render::{RenderError, RenderResult};
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use log::{debug, info, warn};
use std::ffi::{CStr, CString};
use std::sync::Arc;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Surface extension loader
    pub surface_loader: Surface,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a Vulkan 1.3 instance
    ///
    /// `required_extensions` are the window system's instance extensions.
    /// With `enable_validation` the Khronos validation layer is enabled and
    /// its messages are routed into `log`.
    pub fn new(app_name: &str, required_extensions: &[String], enable_validation: bool) -> RenderResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e)))?;

        let app_name_cstr = c_string(app_name)?;
        let engine_name_cstr = c_string("frame_core")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let cstr_extensions = required_extensions
            .iter()
            .map(|ext| c_string(ext))
            .collect::<RenderResult<Vec<_>>>()?;
        let mut extensions: Vec<*const i8> = cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();

        let validation = enable_validation && Self::has_validation_layer(&entry);
        if enable_validation && !validation {
            warn!("Validation requested but {} is not installed", VALIDATION_LAYER);
        }
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if validation { vec![c_string(VALIDATION_LAYER)?] } else { Vec::new() };
        let layer_name_ptrs: Vec<*const i8> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_name_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(RenderError::Api)? };

        let debug_utils = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            Some((debug_utils, messenger))
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);
        debug!("Created Vulkan instance (validation: {})", validation);

        Ok(Self {
            entry,
            instance,
            surface_loader,
            debug_utils,
        })
    }

    fn has_validation_layer(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers.iter().any(|layer| {
                    let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                    name.to_str().map_or(false, |name| name == VALIDATION_LAYER)
                })
            })
            .unwrap_or(false)
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> RenderResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(RenderError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = &self.debug_utils {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("Destroyed Vulkan instance");
    }
}

fn c_string(value: &str) -> RenderResult<CString> {
    CString::new(value).map_err(|_| RenderError::InitializationFailed(format!("Interior NUL in '{}'", value)))
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported core features
    pub features: vk::PhysicalDeviceFeatures,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Select the first device that supports Vulkan 1.3 dynamic rendering and
    /// can present to `surface`, preferring discrete GPUs
    pub fn select_suitable_device(instance: &VulkanInstance, surface: vk::SurfaceKHR) -> RenderResult<Self> {
        let devices = unsafe { instance.instance.enumerate_physical_devices().map_err(RenderError::Api)? };

        let mut candidates = Vec::new();
        let mut last_rejection = None;
        for device in devices {
            match Self::evaluate_device(instance, device, surface) {
                Ok(info) => candidates.push(info),
                Err(e) => {
                    debug!("Rejected GPU: {}", e);
                    last_rejection = Some(e);
                }
            }
        }

        candidates.sort_by_key(|info| info.properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU);
        match candidates.into_iter().next() {
            Some(info) => {
                info!("Selected GPU: {}", info.name());
                Ok(info)
            }
            None => Err(last_rejection
                .unwrap_or_else(|| RenderError::InitializationFailed("No Vulkan devices found".to_string()))),
        }
    }

    /// Device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    fn evaluate_device(
        instance: &VulkanInstance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> RenderResult<Self> {
        let vk_instance = &instance.instance;
        let properties = unsafe { vk_instance.get_physical_device_properties(device) };
        let features = unsafe { vk_instance.get_physical_device_features(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();

        if properties.api_version < vk::API_VERSION_1_3 {
            return Err(RenderError::UnsupportedDevice(format!("{} does not support Vulkan 1.3", name)));
        }

        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::builder().push_next(&mut features13);
        unsafe { vk_instance.get_physical_device_features2(device, &mut features2) };
        if features13.dynamic_rendering == vk::FALSE {
            return Err(RenderError::UnsupportedDevice(format!("{} lacks dynamic rendering", name)));
        }

        let queue_families = unsafe { vk_instance.get_physical_device_queue_family_properties(device) };
        let mut graphics_family = None;
        let mut present_family = None;

        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;

            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
                graphics_family = Some(index);
            }

            let present_support = unsafe {
                instance
                    .surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .map_err(RenderError::Api)?
            };
            if present_support && present_family.is_none() {
                present_family = Some(index);
            }

            if graphics_family.is_some() && present_family.is_some() {
                break;
            }
        }

        let graphics_family = graphics_family
            .ok_or_else(|| RenderError::UnsupportedDevice(format!("{} has no graphics queue", name)))?;
        let present_family = present_family
            .ok_or_else(|| RenderError::UnsupportedDevice(format!("{} cannot present to the surface", name)))?;

        let extensions = unsafe {
            vk_instance
                .enumerate_device_extension_properties(device)
                .map_err(RenderError::Api)?
        };
        let has_swapchain = extensions.iter().any(|available| {
            let extension_name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            extension_name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(RenderError::UnsupportedDevice(format!("{} lacks VK_KHR_swapchain", name)));
        }

        Ok(Self {
            device,
            properties,
            features,
            graphics_family,
            present_family,
        })
    }
}

/// Index of the first memory type allowed by `type_bits` with all `flags`
pub fn select_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0 && memory_properties.memory_types[i as usize].property_flags.contains(flags)
    })
}

/// Logical device plus everything resources need to allocate and submit
///
/// Shared by every GPU resource through `Arc`; dropped after all of them.
pub struct GpuDevice {
    /// Instance function table
    pub instance: Instance,
    /// Logical device
    pub device: Device,
    /// Physical device handle
    pub physical_device: vk::PhysicalDevice,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Device limits
    pub limits: vk::PhysicalDeviceLimits,
    /// Graphics queue
    pub graphics_queue: vk::Queue,
    /// Graphics queue family
    pub graphics_family: u32,
    /// Present queue
    pub present_queue: vk::Queue,
    /// Present queue family
    pub present_family: u32,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
    transient_pool: vk::CommandPool,
}

impl GpuDevice {
    /// Create the logical device with dynamic rendering enabled
    pub fn new(instance: &VulkanInstance, physical: &PhysicalDeviceInfo) -> RenderResult<Arc<Self>> {
        let mut families = vec![physical.graphics_family];
        if physical.present_family != physical.graphics_family {
            families.push(physical.present_family);
        }

        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(physical.features.sampler_anisotropy == vk::TRUE)
            .shader_sampled_image_array_dynamic_indexing(
                physical.features.shader_sampled_image_array_dynamic_indexing == vk::TRUE,
            )
            .build();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features)
            .push_next(&mut features13);

        let vk_instance = &instance.instance;
        let device = unsafe {
            vk_instance
                .create_device(physical.device, &create_info, None)
                .map_err(RenderError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.present_family, 0) };
        let memory_properties = unsafe { vk_instance.get_physical_device_memory_properties(physical.device) };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(physical.graphics_family);
        let transient_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(RenderError::Api(e));
            }
        };

        let swapchain_loader = SwapchainLoader::new(vk_instance, &device);
        debug!("Created logical device");

        Ok(Arc::new(Self {
            instance: vk_instance.clone(),
            device,
            physical_device: physical.device,
            memory_properties,
            limits: physical.properties.limits,
            graphics_queue,
            graphics_family: physical.graphics_family,
            present_queue,
            present_family: physical.present_family,
            swapchain_loader,
            transient_pool,
        }))
    }

    /// Memory type index for an allocation
    pub fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> RenderResult<u32> {
        select_memory_type(&self.memory_properties, type_bits, flags).ok_or(RenderError::NoSuitableMemoryType)
    }

    /// Minimum dynamic offset alignment for uniform buffers
    pub fn min_uniform_alignment(&self) -> u64 {
        self.limits.min_uniform_buffer_offset_alignment
    }

    /// Minimum dynamic offset alignment for storage buffers
    pub fn min_storage_alignment(&self) -> u64 {
        self.limits.min_storage_buffer_offset_alignment
    }

    /// Alignment for flush/invalidate ranges on non-coherent memory
    pub fn non_coherent_atom_size(&self) -> u64 {
        self.limits.non_coherent_atom_size
    }

    /// Record and synchronously execute a one-shot command buffer
    pub fn one_shot(&self, record: impl FnOnce(&Device, vk::CommandBuffer)) -> RenderResult<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.transient_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(RenderError::Api)?[0]
        };

        let result = self.submit_one_shot(command_buffer, record);

        unsafe {
            self.device
                .free_command_buffers(self.transient_pool, &[command_buffer]);
        }
        result
    }

    fn submit_one_shot(
        &self,
        command_buffer: vk::CommandBuffer,
        record: impl FnOnce(&Device, vk::CommandBuffer),
    ) -> RenderResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(RenderError::Api)?;
            record(&self.device, command_buffer);
            self.device
                .end_command_buffer(command_buffer)
                .map_err(RenderError::Api)?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], vk::Fence::null())
                .map_err(RenderError::Api)?;
            self.device
                .queue_wait_idle(self.graphics_queue)
                .map_err(RenderError::Api)
        }
    }

    /// Block until the device is idle
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle().map_err(RenderError::Api) }
    }
}

impl Drop for GpuDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.transient_pool, None);
            self.device.destroy_device(None);
        }
        debug!("Destroyed logical device");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = types.len() as u32;
        for (i, flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = *flags;
        }
        props
    }

    #[test]
    fn test_memory_type_respects_type_bits() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(select_memory_type(&props, 0b111, host), Some(1));
        assert_eq!(select_memory_type(&props, 0b100, host), Some(2));
        assert_eq!(select_memory_type(&props, 0b001, host), None);
        assert_eq!(select_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(0));
    }
}
