//! Shared handles for data objects bound to tracks.
//!
//! A waveform, sample or instrument can be bound to several tracks while the
//! control thread keeps editing it. The handle is an `Arc<RwLock<T>>`; the
//! render thread takes read guards, the control thread takes the write guard
//! while holding the owning context's lock.

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::attr::{AttrKind, AttrValue, Attributes};
use crate::error::Result;

pub struct Shared<T>(Arc<RwLock<T>>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read()
    }

    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write()
    }

    /// True when both handles refer to the same object.
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&*self.0.read()).finish()
    }
}

impl<T: Attributes> Attributes for Shared<T> {
    fn attribute(&self, kind: AttrKind) -> Result<AttrValue> {
        self.read().attribute(kind)
    }

    fn set_attribute(&self, kind: AttrKind, value: &AttrValue) -> Result<()> {
        self.read().set_attribute(kind, value)
    }
}
