//! Metal system device, the integrated accelerator on Apple silicon.
//!
//! Metal exposes no per-driver counter, so `currentAllocatedSize` is reported
//! for both the driver and the current allocation.

use super::runtime::{AcceleratorRuntime, IntegratedCounters};
use objc2::msg_send;
use objc2::rc::autoreleasepool;
use objc2::runtime::{AnyObject, Bool};
use std::ffi::{c_char, c_void, CStr};

type MTLDeviceRef = *mut c_void;

#[link(name = "Metal", kind = "framework")]
#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn MTLCreateSystemDefaultDevice() -> MTLDeviceRef;
}

pub struct MetalRuntime {
    device: MTLDeviceRef,
}

// SAFETY: MTLDevice is documented as thread-safe and the handle is only read.
unsafe impl Send for MetalRuntime {}

impl MetalRuntime {
    pub fn load() -> Result<Self, String> {
        let device = unsafe { MTLCreateSystemDefaultDevice() };
        if device.is_null() {
            return Err("no Metal device".to_string());
        }
        Ok(Self { device })
    }

    fn object(&self) -> &AnyObject {
        // SAFETY: non-null and retained for the lifetime of `self`.
        unsafe { &*self.device.cast::<AnyObject>() }
    }

    fn unified_memory(&self) -> bool {
        let unified: Bool = unsafe { msg_send![self.object(), hasUnifiedMemory] };
        unified.as_bool()
    }
}

impl AcceleratorRuntime for MetalRuntime {
    fn discrete_available(&self) -> bool {
        false
    }

    fn device_count(&self) -> Result<u32, String> {
        Ok(0)
    }

    fn device_name(&self, index: u32) -> Result<String, String> {
        Err(format!("no discrete device {index}"))
    }

    fn memory_allocated(&self, index: u32) -> Result<Option<u64>, String> {
        Err(format!("no discrete device {index}"))
    }

    fn memory_reserved(&self, index: u32) -> Result<Option<u64>, String> {
        Err(format!("no discrete device {index}"))
    }

    fn integrated_available(&self) -> bool {
        self.unified_memory()
    }

    fn integrated_name(&self) -> String {
        autoreleasepool(|_| unsafe {
            let name: *mut AnyObject = msg_send![self.object(), name];
            if name.is_null() {
                return "Apple GPU".to_string();
            }
            let utf8: *const c_char = msg_send![name, UTF8String];
            if utf8.is_null() {
                return "Apple GPU".to_string();
            }
            CStr::from_ptr(utf8).to_string_lossy().trim().to_string()
        })
    }

    fn integrated_counters(&self) -> Result<IntegratedCounters, String> {
        let recommended: u64 = unsafe { msg_send![self.object(), recommendedMaxWorkingSetSize] };
        let current: usize = unsafe { msg_send![self.object(), currentAllocatedSize] };
        Ok(IntegratedCounters {
            recommended_max_memory: recommended,
            driver_allocated_memory: current as u64,
            current_allocated_memory: current as u64,
        })
    }
}

impl Drop for MetalRuntime {
    fn drop(&mut self) {
        // MTLCreateSystemDefaultDevice returns a +1 reference.
        unsafe { objc2::ffi::objc_release(self.device.cast()) };
    }
}
