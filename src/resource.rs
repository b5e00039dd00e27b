//! Lazily acquired, explicitly released per-node handles.

use std::fmt;
use tracing::debug;

/// Holds a heavyweight handle (a model client) for one node instance.
///
/// The handle is built on first use and kept until [`ResourceSlot::release`]
/// or until the slot is dropped. Cloning a slot yields an empty one: a copy of
/// a node builds its own handle.
pub struct ResourceSlot<T> {
    label: String,
    value: Option<T>,
}

impl<T> ResourceSlot<T> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: None,
        }
    }

    pub fn get_or_try_init<E>(&mut self, init: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        let value = match self.value.take() {
            Some(v) => v,
            None => {
                let v = init()?;
                debug!(resource = %self.label, "resource acquired");
                v
            }
        };
        Ok(self.value.insert(value))
    }

    /// Async variant of [`ResourceSlot::get_or_try_init`] for handles whose
    /// construction needs config or secret lookups.
    pub async fn get_or_try_init_async<E, F, Fut>(&mut self, init: F) -> Result<&T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let value = match self.value.take() {
            Some(v) => v,
            None => {
                let v = init().await?;
                debug!(resource = %self.label, "resource acquired");
                v
            }
        };
        Ok(self.value.insert(value))
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.value.is_some()
    }

    /// Drop the handle now. Returns whether anything was held.
    pub fn release(&mut self) -> bool {
        let released = self.value.take().is_some();
        if released {
            debug!(resource = %self.label, "resource released");
        }
        released
    }
}

impl<T> Default for ResourceSlot<T> {
    fn default() -> Self {
        Self::new("resource")
    }
}

impl<T> Clone for ResourceSlot<T> {
    fn clone(&self) -> Self {
        Self::new(self.label.clone())
    }
}

impl<T> fmt::Debug for ResourceSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSlot")
            .field("label", &self.label)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl<T> Drop for ResourceSlot<T> {
    fn drop(&mut self) {
        if self.value.is_some() {
            debug!(resource = %self.label, "resource released on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn init_runs_once_until_release() {
        let mut slot = ResourceSlot::new("client");
        let mut builds = 0;
        for _ in 0..3 {
            let v: Result<&u32, ()> = slot.get_or_try_init(|| {
                builds += 1;
                Ok(7)
            });
            assert_eq!(v, Ok(&7));
        }
        assert_eq!(builds, 1);
        assert!(slot.release());
        assert!(!slot.release());
        assert!(!slot.is_loaded());
    }

    #[test]
    fn failed_init_leaves_slot_empty() {
        let mut slot: ResourceSlot<u32> = ResourceSlot::new("client");
        assert_eq!(slot.get_or_try_init(|| Err("no key")), Err("no key"));
        assert!(slot.get().is_none());
    }

    #[tokio::test]
    async fn async_init_caches_like_sync() {
        let mut slot = ResourceSlot::new("client");
        let first: Result<&String, ()> = slot.get_or_try_init_async(|| async { Ok("a".to_string()) }).await;
        assert_eq!(first, Ok(&"a".to_string()));
        let second: Result<&String, ()> = slot.get_or_try_init_async(|| async { Ok("b".to_string()) }).await;
        assert_eq!(second, Ok(&"a".to_string()));
    }

    #[test]
    fn drop_and_release_free_the_handle() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let mut slot = ResourceSlot::new("tracked");
            let _ = slot.get_or_try_init(|| Ok::<_, ()>(Tracked(drops.clone())));
            let copy = slot.clone();
            assert!(!copy.is_loaded());
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        let mut slot = ResourceSlot::new("tracked");
        let _ = slot.get_or_try_init(|| Ok::<_, ()>(Tracked(drops.clone())));
        slot.release();
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }
}
