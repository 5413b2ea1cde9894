//! Memory release used on suspend and after low-memory notices.

use tracing::debug;

/// Returns freed heap memory to the OS.
pub trait MemoryTrimmer {
    fn trim(&mut self);
}

/// Trims the C allocator with `malloc_trim(0)` where available.
#[derive(Debug, Default)]
pub struct AllocatorTrim;

impl MemoryTrimmer for AllocatorTrim {
    fn trim(&mut self) {
        #[cfg(all(target_os = "linux", target_env = "gnu"))]
        {
            // SAFETY: malloc_trim has no preconditions.
            let released = unsafe { libc::malloc_trim(0) };
            debug!("Memory: malloc_trim released={}", released);
        }
        #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
        debug!("Memory: allocator trim not supported on this target");
    }
}

/// Native memory-release hook plus allocator trim.
pub struct MemoryFlush {
    native: Option<Box<dyn FnMut()>>,
    trimmer: Box<dyn MemoryTrimmer>,
    flushes: u64,
}

impl MemoryFlush {
    pub fn new(trimmer: Box<dyn MemoryTrimmer>) -> Self {
        Self {
            native: None,
            trimmer,
            flushes: 0,
        }
    }

    /// Install a hook run before the allocator trim on suspend.
    pub fn set_native_hook(&mut self, hook: impl FnMut() + 'static) {
        self.native = Some(Box::new(hook));
    }

    /// Run the native hook (if any), then trim.
    pub fn flush(&mut self) {
        if let Some(native) = self.native.as_mut() {
            native();
        }
        self.trimmer.trim();
        self.flushes += 1;
    }

    /// Allocator trim only.
    pub fn trim(&mut self) {
        self.trimmer.trim();
    }

    /// Number of full flushes so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }
}

impl Default for MemoryFlush {
    fn default() -> Self {
        Self::new(Box::new(AllocatorTrim))
    }
}

impl std::fmt::Debug for MemoryFlush {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFlush")
            .field("native", &self.native.is_some())
            .field("flushes", &self.flushes)
            .finish()
    }
}
