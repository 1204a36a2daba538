use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

/// 0 = UNINIT, 1 = INITING, 2 = READY
const UNINIT: u8 = 0;
const INITING: u8 = 1;
const READY: u8 = 2;

/// Error returned by [`SyncOnceCell::set`] when the cell already holds a value
/// (or an initialization is in flight).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct AlreadyInitialized;

/// A cell that is written exactly once and then shared.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Returns `Some(&T)` if already initialized.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            // SAFETY: READY guarantees the write is done
            Some(unsafe { &*(*self.value.get()).as_ptr() })
        } else {
            None
        }
    }

    /// Store `value`, failing if the cell was ever initialized before.
    ///
    /// This is the boot-sequence entry point: a second call is a bug in the
    /// caller and is reported, never absorbed.
    ///
    /// # Errors
    /// Returns [`AlreadyInitialized`] when a value is present or being
    /// written.
    pub fn set(&self, value: T) -> Result<(), AlreadyInitialized> {
        if self
            .state
            .compare_exchange(UNINIT, INITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(AlreadyInitialized);
        }
        unsafe {
            (*self.value.get()).write(value);
        }
        // Publish value before marking READY
        self.state.store(READY, Ordering::Release);
        Ok(())
    }

    /// Initialize at most once and return `&T`.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        // Fast path
        if let Some(v) = self.get() {
            return v;
        }

        if self
            .state
            .compare_exchange(UNINIT, INITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            // We are the initializer
            let v = init();
            unsafe {
                (*self.value.get()).write(v);
            }
            self.state.store(READY, Ordering::Release);
            // SAFETY: just wrote it
            return unsafe { &*(*self.value.get()).as_ptr() };
        }

        // Someone else is initializing; wait until READY
        while self.state.load(Ordering::Acquire) != READY {
            spin_loop();
        }
        // SAFETY: READY
        unsafe { &*(*self.value.get()).as_ptr() }
    }

    /// Like [`get`](Self::get) but panics with the given message when the
    /// cell is still empty. Used for "not yet initialized" boot invariants.
    #[inline]
    pub fn expect(&self, msg: &str) -> &T {
        self.get().expect(msg)
    }
}

// Safety: shared after READY; initialization is single-writer.
unsafe impl<T: Sync> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_once_then_read() {
        let cell = SyncOnceCell::new();
        assert!(cell.get().is_none());
        assert_eq!(cell.set(42u64), Ok(()));
        assert_eq!(cell.get(), Some(&42));
    }

    #[test]
    fn second_set_is_rejected() {
        let cell = SyncOnceCell::new();
        cell.set(1u32).unwrap();
        assert_eq!(cell.set(2), Err(AlreadyInitialized));
        assert_eq!(cell.get(), Some(&1));
    }

    #[test]
    fn get_or_init_runs_once() {
        let cell = SyncOnceCell::new();
        let a = *cell.get_or_init(|| 7u8);
        let b = *cell.get_or_init(|| 9u8);
        assert_eq!((a, b), (7, 7));
    }
}
