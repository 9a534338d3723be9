//! Opaque native handles

use std::fmt;

/// An address-sized integer naming a native memory block, function pointer or
/// platform object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Handle(usize);

impl Handle {
    /// Address zero
    pub const NULL: Handle = Handle(0);

    /// Wrap a raw address
    pub const fn from_addr(addr: usize) -> Self {
        Handle(addr)
    }

    /// Wrap a raw pointer
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Handle(ptr as usize)
    }

    /// The raw address
    pub const fn addr(self) -> usize {
        self.0
    }

    /// The address as a typed pointer
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Whether this is address zero
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for Handle {
    fn from(addr: usize) -> Self {
        Handle(addr)
    }
}
