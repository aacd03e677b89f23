//! Resource ceilings of an isolate.
//!
//! Memory is bounded by the V8 heap limit: when the heap nears it, a callback
//! terminates the running script and grants temporary headroom so the
//! engine can unwind instead of aborting. Time is bounded from the host,
//! which stops the script through a [`Terminator`].

use std::ffi::{c_char, c_void, CStr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Smallest headroom granted past the ceiling while a script unwinds.
const MIN_HEAP_GRACE: usize = 64 * 1024 * 1024;

/// Isolate parameters with the heap capped at `max_heap` bytes.
pub(crate) fn create_params(max_heap: usize) -> v8::CreateParams {
    v8::CreateParams::default().heap_limits(0, max_heap)
}

/// Heap in use by `isolate`, in bytes.
pub(crate) fn heap_used(isolate: &mut v8::Isolate) -> usize {
    let stats = isolate.get_heap_statistics();
    stats.used_heap_size()
}

/// Configured heap ceiling, stored in an isolate slot for native helpers
/// that build strings outside the V8 heap.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeapLimit(pub(crate) usize);

/// State shared with the near-heap-limit callback.
pub(crate) struct HeapCeiling {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

impl HeapCeiling {
    /// Register the ceiling callbacks on `isolate`.
    ///
    /// The returned box is the callback's data pointer and must be dropped
    /// after the isolate.
    pub(crate) fn install(isolate: &mut v8::Isolate) -> Box<Self> {
        let ceiling = Box::new(Self {
            handle: isolate.thread_safe_handle(),
            triggered: AtomicBool::new(false),
        });
        let data = &*ceiling as *const Self as *mut c_void;
        isolate.add_near_heap_limit_callback(near_heap_limit, data);
        isolate.set_oom_error_handler(oom_error_handler);
        ceiling
    }

    /// Whether the ceiling was reached since the last reset.
    pub(crate) fn triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.triggered.store(false, Ordering::SeqCst);
    }
}

unsafe extern "C" fn near_heap_limit(
    data: *mut c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points at the `HeapCeiling` boxed by `install`, which
    // the runtime drops only after the isolate.
    let ceiling = unsafe { &*(data as *const HeapCeiling) };
    if !ceiling.triggered.swap(true, Ordering::SeqCst) {
        tracing::debug!(current_heap_limit, "heap ceiling reached, terminating script");
        ceiling.handle.terminate_execution();
    }
    current_heap_limit + current_heap_limit.max(MIN_HEAP_GRACE)
}

/// Last resort when an allocation overshoots even the granted headroom.
unsafe extern "C" fn oom_error_handler(location: *const c_char, details: &v8::OomDetails) {
    let location = if location.is_null() {
        "unknown".into()
    } else {
        // SAFETY: V8 passes a NUL-terminated static string.
        unsafe { CStr::from_ptr(location) }.to_string_lossy()
    };
    tracing::error!(%location, is_heap_oom = details.is_heap_oom, "V8 out of memory, aborting");
    std::process::abort();
}

/// Cross-thread handle that stops whatever script the isolate is running.
///
/// The isolate thread publishes a fresh handle whenever it rebuilds its
/// engine.
#[derive(Default)]
pub(crate) struct Terminator {
    handle: Mutex<Option<v8::IsolateHandle>>,
}

impl Terminator {
    pub(crate) fn publish(&self, handle: v8::IsolateHandle) {
        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle);
        }
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut slot) = self.handle.lock() {
            slot.take();
        }
    }

    /// Terminate the running script. Returns false if no engine is live.
    pub(crate) fn terminate(&self) -> bool {
        match self.handle.lock() {
            Ok(slot) => slot.as_ref().is_some_and(|handle| handle.terminate_execution()),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for Terminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let live = self.handle.lock().map(|slot| slot.is_some()).unwrap_or(false);
        f.debug_struct("Terminator").field("live", &live).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminator_without_engine() {
        let terminator = Terminator::default();
        assert!(!terminator.terminate());
        terminator.clear();
        assert!(!terminator.terminate());
    }
}
