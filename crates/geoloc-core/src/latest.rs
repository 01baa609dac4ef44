//! Single-slot latest-value register.
//!
//! Producers overwrite, consumers read the freshest value. Nothing is ever
//! queued, so a slow consumer only ever sees fewer values, never older ones.

use parking_lot::RwLock;
use std::sync::Arc;

/// Holds at most one value; `publish` replaces it, `get` returns a shared handle.
#[derive(Debug)]
pub struct Latest<T> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T> Latest<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Replace the held value. The write lock is held only for the pointer swap.
    pub fn publish(&self, value: T) {
        let value = Arc::new(value);
        *self.slot.write() = Some(value);
    }

    /// Current value, if any. Never waits on a producer beyond the swap.
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.read().clone()
    }

    /// Drop the held value so subsequent reads see nothing.
    pub fn clear(&self) {
        self.slot.write().take();
    }

    pub fn is_empty(&self) -> bool {
        self.slot.read().is_none()
    }
}

impl<T> Default for Latest<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_empty_until_published() {
        let latest: Latest<u32> = Latest::new();
        assert!(latest.get().is_none());
        assert!(latest.is_empty());

        latest.publish(7);
        assert_eq!(latest.get().as_deref(), Some(&7));
    }

    #[test]
    fn test_repeated_reads_return_same_value() {
        let latest = Latest::new();
        latest.publish(String::from("frame-1"));

        let first = latest.get().unwrap();
        let second = latest.get().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_publish_overwrites() {
        let latest = Latest::new();
        latest.publish(1);
        let old = latest.get().unwrap();
        latest.publish(2);

        assert_eq!(*old, 1);
        assert_eq!(latest.get().as_deref(), Some(&2));
    }

    #[test]
    fn test_clear() {
        let latest = Latest::new();
        latest.publish(1);
        latest.clear();
        assert!(latest.get().is_none());
    }

    #[test]
    fn test_reader_does_not_block_while_producer_holds_value() {
        let latest = Arc::new(Latest::new());
        latest.publish(vec![0u8; 16]);

        // A reader keeping its handle alive must not stall the producer.
        let held = latest.get().unwrap();

        let producer = Arc::clone(&latest);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for i in 0..1000u32 {
                producer.publish(vec![(i % 255) as u8; 16]);
            }
            tx.send(()).unwrap();
        });

        rx.recv_timeout(Duration::from_secs(5))
            .expect("producer stalled behind reader");
        assert_eq!(held[0], 0);
        assert!(latest.get().is_some());
    }
}
