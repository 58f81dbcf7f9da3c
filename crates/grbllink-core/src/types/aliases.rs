//! Type aliases for commonly used complex types.
//!
//! Complex types like `Arc<parking_lot::RwLock<DeviceStatus>>` are hard to
//! read at a glance. The aliases here give the shared-state and callback
//! shapes used across the protocol layer a single name each.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use grbllink_core::types::*;
//!
//! // Instead of: Arc<RwLock<DeviceStatus>>
//! let status: ThreadSafeRw<DeviceStatus> = thread_safe_rw(DeviceStatus::default());
//! ```

use parking_lot::RwLock;
use std::sync::Arc;

// =============================================================================
// THREAD-SAFE SHARED TYPES
// =============================================================================

/// A thread-safe reader-writer lock wrapper for read-heavy workloads.
///
/// Uses `parking_lot::RwLock`, which does not poison and needs no `unwrap()`
/// on lock. The device status model is read by every poll loop and written
/// only by the receive path, so it lives behind this alias.
pub type ThreadSafeRw<T> = Arc<RwLock<T>>;

// =============================================================================
// CALLBACK TYPES
// =============================================================================

/// A progress callback receiving (current, total) values.
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

// =============================================================================
// CONSTRUCTOR HELPERS
// =============================================================================

/// Create a new `ThreadSafeRw<T>` from a value.
#[inline]
pub fn thread_safe_rw<T>(value: T) -> ThreadSafeRw<T> {
    Arc::new(RwLock::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_thread_safe_rw() {
        let value: ThreadSafeRw<i32> = thread_safe_rw(42);

        assert_eq!(*value.read(), 42);
        assert_eq!(*value.read(), 42);

        *value.write() = 100;
        assert_eq!(*value.read(), 100);
    }

    #[test]
    fn test_progress_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let callback: ProgressCallback = Box::new(move |index, total| {
            seen_clone.lock().push((index, total));
        });

        callback(0, 3);
        callback(1, 3);

        assert_eq!(*seen.lock(), vec![(0, 3), (1, 3)]);
    }
}
