//! CUDA driver API, loaded at runtime.
//!
//! Only device enumeration and memory counters are used. Memory is read
//! through the primary context and only when that context is already active
//! in this process; creating one just to look would itself allocate device
//! memory. Without an active context the counters are unknown.
//!
//! `cuMemGetInfo` reports device-wide usage, including other processes. The
//! driver has no caching allocator, so reserved and allocated coincide.

use super::decode_device_name;
use super::runtime::AcceleratorRuntime;
use libloading::Library;
use std::ffi::{c_char, c_int, c_uint, c_void};
use std::ptr;

type CuResult = c_int;
type CuDevice = c_int;
type CuContext = *mut c_void;

const CUDA_SUCCESS: CuResult = 0;
const CUDA_ERROR_NO_DEVICE: CuResult = 100;
const NAME_LEN: usize = 256;

#[cfg(windows)]
const LIBRARY_NAMES: &[&str] = &["nvcuda.dll"];
#[cfg(not(windows))]
const LIBRARY_NAMES: &[&str] = &["libcuda.so.1", "libcuda.so"];

type CuInit = unsafe extern "C" fn(c_uint) -> CuResult;
type CuDeviceGetCount = unsafe extern "C" fn(*mut c_int) -> CuResult;
type CuDeviceGet = unsafe extern "C" fn(*mut CuDevice, c_int) -> CuResult;
type CuDeviceGetName = unsafe extern "C" fn(*mut c_char, c_int, CuDevice) -> CuResult;
type CuPrimaryCtxGetState = unsafe extern "C" fn(CuDevice, *mut c_uint, *mut c_int) -> CuResult;
type CuPrimaryCtxRetain = unsafe extern "C" fn(*mut CuContext, CuDevice) -> CuResult;
type CuPrimaryCtxRelease = unsafe extern "C" fn(CuDevice) -> CuResult;
type CuCtxPushCurrent = unsafe extern "C" fn(CuContext) -> CuResult;
type CuCtxPopCurrent = unsafe extern "C" fn(*mut CuContext) -> CuResult;
type CuMemGetInfo = unsafe extern "C" fn(*mut usize, *mut usize) -> CuResult;

pub struct CudaDriver {
    lib: Library,
    device_count: u32,
}

impl CudaDriver {
    pub fn load() -> Result<Self, String> {
        let lib = open_library()?;
        let mut driver = Self {
            lib,
            device_count: 0,
        };

        let init = driver.symbol::<CuInit>(b"cuInit\0")?;
        if !devices_present(unsafe { init(0) })? {
            return Ok(driver);
        }

        let get_count = driver.symbol::<CuDeviceGetCount>(b"cuDeviceGetCount\0")?;
        let mut count: c_int = 0;
        check("cuDeviceGetCount", unsafe { get_count(&mut count) })?;
        driver.device_count = count.max(0) as u32;
        Ok(driver)
    }

    fn symbol<T: Copy>(&self, name: &[u8]) -> Result<T, String> {
        // SAFETY: every `T` used here matches the documented driver API signature.
        unsafe { self.lib.get::<T>(name) }
            .map(|sym| *sym)
            .map_err(|e| e.to_string())
    }

    fn device(&self, index: u32) -> Result<CuDevice, String> {
        if index >= self.device_count {
            return Err(format!("invalid device ordinal {index}"));
        }
        let get = self.symbol::<CuDeviceGet>(b"cuDeviceGet\0")?;
        let mut device: CuDevice = 0;
        check("cuDeviceGet", unsafe { get(&mut device, index as c_int) })?;
        Ok(device)
    }

    fn used_memory(&self, index: u32) -> Result<Option<u64>, String> {
        let device = self.device(index)?;

        let get_state = self.symbol::<CuPrimaryCtxGetState>(b"cuDevicePrimaryCtxGetState\0")?;
        let mut flags: c_uint = 0;
        let mut active: c_int = 0;
        check("cuDevicePrimaryCtxGetState", unsafe {
            get_state(device, &mut flags, &mut active)
        })?;
        if active == 0 {
            return Ok(None);
        }

        let retain = self.symbol::<CuPrimaryCtxRetain>(b"cuDevicePrimaryCtxRetain\0")?;
        let release = self.symbol::<CuPrimaryCtxRelease>(b"cuDevicePrimaryCtxRelease_v2\0")?;
        let mut ctx: CuContext = ptr::null_mut();
        check("cuDevicePrimaryCtxRetain", unsafe { retain(&mut ctx, device) })?;
        let used = self.used_in_context(ctx);
        unsafe { release(device) };
        used.map(Some)
    }

    fn used_in_context(&self, ctx: CuContext) -> Result<u64, String> {
        let push = self.symbol::<CuCtxPushCurrent>(b"cuCtxPushCurrent_v2\0")?;
        let pop = self.symbol::<CuCtxPopCurrent>(b"cuCtxPopCurrent_v2\0")?;
        let mem_info = self.symbol::<CuMemGetInfo>(b"cuMemGetInfo_v2\0")?;

        check("cuCtxPushCurrent", unsafe { push(ctx) })?;
        let mut free: usize = 0;
        let mut total: usize = 0;
        let rc = unsafe { mem_info(&mut free, &mut total) };
        let mut popped: CuContext = ptr::null_mut();
        unsafe { pop(&mut popped) };
        check("cuMemGetInfo", rc)?;
        Ok(total.saturating_sub(free) as u64)
    }
}

impl AcceleratorRuntime for CudaDriver {
    fn discrete_available(&self) -> bool {
        self.device_count > 0
    }

    fn device_count(&self) -> Result<u32, String> {
        Ok(self.device_count)
    }

    fn device_name(&self, index: u32) -> Result<String, String> {
        let device = self.device(index)?;
        let get_name = self.symbol::<CuDeviceGetName>(b"cuDeviceGetName\0")?;
        let mut buf = [0u8; NAME_LEN];
        check("cuDeviceGetName", unsafe {
            get_name(buf.as_mut_ptr().cast::<c_char>(), NAME_LEN as c_int, device)
        })?;
        Ok(decode_device_name(&buf))
    }

    fn memory_allocated(&self, index: u32) -> Result<Option<u64>, String> {
        self.used_memory(index)
    }

    fn memory_reserved(&self, index: u32) -> Result<Option<u64>, String> {
        self.used_memory(index)
    }
}

fn open_library() -> Result<Library, String> {
    let mut errors = Vec::new();
    for name in LIBRARY_NAMES {
        // SAFETY: loading the vendor driver runs only its own initialisers.
        match unsafe { Library::new(name) } {
            Ok(lib) => return Ok(lib),
            Err(err) => errors.push(err.to_string()),
        }
    }
    Err(errors.join("; "))
}

/// `cuInit` outcome: a driver without any GPU is a valid, empty runtime.
fn devices_present(rc: CuResult) -> Result<bool, String> {
    match rc {
        CUDA_ERROR_NO_DEVICE => Ok(false),
        rc => check("cuInit", rc).map(|()| true),
    }
}

fn check(call: &str, rc: CuResult) -> Result<(), String> {
    if rc == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(format!("{call} failed with CUDA error {rc}"))
    }
}
