//! Exclusive ownership of native resources.
//!
//! Every FFmpeg object the pipeline touches (packets, frames, codec and
//! format contexts, scaler contexts) is held in a [`Handle`] bound to the
//! release function of its [`Resource`] kind. A handle is never null: a
//! failed allocation surfaces as [`Error::Allocation`] at construction.

use std::{fmt, marker::PhantomData, ptr::NonNull};

use crate::error::{Error, Result};

/// A kind of native resource together with its release function.
///
/// # Safety
///
/// `release` must free exactly the resource behind `raw` and must accept
/// any non-null pointer produced by the allocator paired with this kind.
/// Such a pointer stays valid for reads and writes until it is released.
pub unsafe trait Resource {
    type Raw;

    /// Name used in allocation errors and logs.
    const NAME: &'static str;

    /// Frees the resource. Called exactly once per handle.
    unsafe fn release(raw: *mut Self::Raw);
}

pub struct Handle<R: Resource> {
    ptr: NonNull<R::Raw>,
    _kind: PhantomData<R>,
}

impl<R: Resource> Handle<R> {
    /// Takes ownership of `raw`. A null pointer is an allocation failure.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a live resource of kind `R` that nothing else
    /// will release.
    pub unsafe fn from_raw(raw: *mut R::Raw) -> Result<Self> {
        NonNull::new(raw)
            .map(|ptr| Self {
                ptr,
                _kind: PhantomData,
            })
            .ok_or(Error::Allocation(R::NAME))
    }

    /// Shared view of the resource, for plain field access.
    pub fn get(&self) -> &R::Raw {
        unsafe { self.ptr.as_ref() }
    }

    pub fn get_mut(&mut self) -> &mut R::Raw {
        unsafe { self.ptr.as_mut() }
    }

    pub fn as_ptr(&self) -> *const R::Raw {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut R::Raw {
        self.ptr.as_ptr()
    }

    /// Gives up ownership without releasing. The caller becomes
    /// responsible for the resource.
    pub fn into_raw(self) -> *mut R::Raw {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }
}

impl<R: Resource> Drop for Handle<R> {
    fn drop(&mut self) {
        unsafe { R::release(self.ptr.as_ptr()) }
    }
}

impl<R: Resource> fmt::Debug for Handle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>({:p})", R::NAME, self.ptr)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    thread_local! {
        static RELEASED: Cell<usize> = const { Cell::new(0) };
    }

    struct Counted;

    unsafe impl Resource for Counted {
        type Raw = u64;
        const NAME: &'static str = "counted";

        unsafe fn release(raw: *mut u64) {
            drop(unsafe { Box::from_raw(raw) });
            RELEASED.with(|c| c.set(c.get() + 1));
        }
    }

    fn counted(value: u64) -> Handle<Counted> {
        unsafe { Handle::from_raw(Box::into_raw(Box::new(value))) }.unwrap()
    }

    fn released() -> usize {
        RELEASED.with(|c| c.get())
    }

    #[test]
    fn test_null_is_allocation_failure() {
        let res = unsafe { Handle::<Counted>::from_raw(std::ptr::null_mut()) };
        assert!(matches!(res, Err(Error::Allocation("counted"))));
        assert_eq!(released(), 0);
    }

    #[test]
    fn test_drop_releases_once() {
        let handle = counted(7);
        assert_eq!(*handle.get(), 7);
        drop(handle);
        assert_eq!(released(), 1);
    }

    #[test]
    fn test_field_access_through_handle() {
        let mut handle = counted(4);
        *handle.get_mut() += 1;
        assert_eq!(*handle.get(), 5);
        assert_eq!(handle.as_ptr(), handle.get() as *const u64);
        drop(handle);
        assert_eq!(released(), 1);
    }

    #[test]
    fn test_move_does_not_release() {
        let handle = counted(1);
        let moved = handle;
        let boxed = vec![moved];
        assert_eq!(released(), 0);
        drop(boxed);
        assert_eq!(released(), 1);
    }

    #[test]
    fn test_release_on_early_return() {
        fn fails(handle: Handle<Counted>) -> Result<Handle<Counted>> {
            let _held = handle;
            Err(Error::InvalidState("early"))
        }
        assert!(fails(counted(2)).is_err());
        assert_eq!(released(), 1);
    }

    #[test]
    fn test_into_raw_skips_release() {
        let raw = counted(3).into_raw();
        assert_eq!(released(), 0);
        let handle = unsafe { Handle::<Counted>::from_raw(raw) }.unwrap();
        drop(handle);
        assert_eq!(released(), 1);
    }
}
