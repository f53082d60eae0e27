//! Numeric element types accepted by the dispatcher.
//!
//! The dispatcher is written once over [`Element`]; the C ABI picks the
//! instantiation (`f32` or `f64`) by which entry point the host calls.

use std::fmt;

/// Runtime tag for the element type a kernel is instantiated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F64,
}

impl ElementType {
    /// Byte size of one element.
    pub fn byte_size(self) -> usize {
        match self {
            ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }

    /// C type name substituted into kernel source.
    pub fn c_name(self) -> &'static str {
        match self {
            ElementType::F32 => "float",
            ElementType::F64 => "double",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::F32 => write!(f, "f32"),
            ElementType::F64 => write!(f, "f64"),
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// A scalar the dispatcher can stage on the device and read back.
pub trait Element: sealed::Sealed + Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const TYPE: ElementType;

    /// Additive identity, returned by non-reducing kernels.
    fn zero() -> Self;

    /// Append the native-endian bytes of `self` to `out`.
    fn extend_bytes(self, out: &mut Vec<u8>);

    /// Decode one element from native-endian bytes. `bytes` must hold exactly
    /// `TYPE.byte_size()` bytes.
    fn from_bytes(bytes: &[u8]) -> Option<Self>;

    /// Encode a slice for a host-to-device copy.
    fn slice_to_bytes(values: &[Self]) -> Vec<u8> {
        let mut out = Vec::with_capacity(values.len() * Self::TYPE.byte_size());
        for v in values {
            v.extend_bytes(&mut out);
        }
        out
    }
}

impl Element for f32 {
    const TYPE: ElementType = ElementType::F32;

    fn zero() -> Self {
        0.0
    }

    fn extend_bytes(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(f32::from_ne_bytes)
    }
}

impl Element for f64 {
    const TYPE: ElementType = ElementType::F64;

    fn zero() -> Self {
        0.0
    }

    fn extend_bytes(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(f64::from_ne_bytes)
    }
}
