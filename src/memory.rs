// Motion Play — Reading Pool
//
// Backing storage for the capture buffer. It is reserved once, at boot, from
// a region separate from the general heap: PSRAM on the ESP32-S3, a
// dedicated allocation on the host. A full capture buffer is hundreds of KB;
// taking that from internal RAM starves Wi-Fi and MQTT of heap.

use std::fmt;
use std::ptr::NonNull;

use crate::error::BufferError;
use crate::events::Reading;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegion {
    /// External SPI RAM via `heap_caps_calloc(MALLOC_CAP_SPIRAM)`.
    Psram,
    /// Dedicated host allocation (tests, simulation).
    Dedicated,
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Psram => f.write_str("PSRAM"),
            Self::Dedicated => f.write_str("dedicated"),
        }
    }
}

/// Fixed-size, zero-initialised array of readings. Never grows.
pub struct ReadingPool {
    ptr: NonNull<Reading>,
    len: usize,
    region: MemoryRegion,
}

// SAFETY: the pool owns its allocation exclusively, like a `Box<[Reading]>`.
unsafe impl Send for ReadingPool {}
// SAFETY: shared access only hands out `&[Reading]`.
unsafe impl Sync for ReadingPool {}

impl ReadingPool {
    pub fn reserve(len: usize) -> Result<Self, BufferError> {
        let bytes = len.saturating_mul(std::mem::size_of::<Reading>());
        if len == 0 {
            return Err(BufferError::Reservation { bytes });
        }

        let (raw, region) = Self::allocate(len)?;
        let ptr = NonNull::new(raw).ok_or(BufferError::Reservation { bytes })?;

        log::info!("Reading pool reserved: {} bytes ({} readings) in {}", bytes, len, region);
        Ok(Self { ptr, len, region })
    }

    #[cfg(target_os = "espidf")]
    fn allocate(len: usize) -> Result<(*mut Reading, MemoryRegion), BufferError> {
        // SAFETY: calloc-style call; a null result is handled by the caller.
        let raw = unsafe {
            esp_idf_sys::heap_caps_calloc(
                len,
                std::mem::size_of::<Reading>(),
                esp_idf_sys::MALLOC_CAP_SPIRAM,
            )
        };
        Ok((raw as *mut Reading, MemoryRegion::Psram))
    }

    #[cfg(not(target_os = "espidf"))]
    fn allocate(len: usize) -> Result<(*mut Reading, MemoryRegion), BufferError> {
        let layout = std::alloc::Layout::array::<Reading>(len).map_err(|_| BufferError::Reservation {
            bytes: len.saturating_mul(std::mem::size_of::<Reading>()),
        })?;
        // SAFETY: `layout` has non-zero size because `len > 0`.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        Ok((raw as *mut Reading, MemoryRegion::Dedicated))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> usize {
        self.len * std::mem::size_of::<Reading>()
    }

    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    pub fn as_slice(&self) -> &[Reading] {
        // SAFETY: `ptr` owns `len` zero-initialised readings, and all-zero is
        // a valid `Reading`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [Reading] {
        // SAFETY: as above; `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for ReadingPool {
    #[cfg(target_os = "espidf")]
    fn drop(&mut self) {
        // SAFETY: allocated by heap_caps_calloc in `allocate`.
        unsafe { esp_idf_sys::heap_caps_free(self.ptr.as_ptr() as *mut core::ffi::c_void) }
    }

    #[cfg(not(target_os = "espidf"))]
    fn drop(&mut self) {
        if let Ok(layout) = std::alloc::Layout::array::<Reading>(self.len) {
            // SAFETY: allocated with this exact layout in `allocate`.
            unsafe { std::alloc::dealloc(self.ptr.as_ptr() as *mut u8, layout) }
        }
    }
}

impl fmt::Debug for ReadingPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadingPool")
            .field("len", &self.len)
            .field("bytes", &self.bytes())
            .field("region", &self.region)
            .finish()
    }
}
