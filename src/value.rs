//! Boundary value representation
//!
//! Two value types cross the bridge:
//! - `HostValue`: what Rust callbacks receive and return
//! - `GenericValue`: a native-typed container (type tag + payload) handed to
//!   and received from the native runtime
//!
//! `GenericValue::from_host` and `GenericValue::to_host` are mutual inverses
//! for every representable kind. The only asymmetry is ownership: converting an
//! object payload into a host value through a descriptor yields a borrowed
//! handle, never a new reference.

use std::fmt;

use crate::native::NativeError;
use crate::object::ObjectHandle;
use crate::types::{Type, TypeDescriptor};

// =========================================================================
// Host Values
// =========================================================================

/// A dynamically typed host value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    /// No value (void return, empty result slot).
    #[default]
    None,
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    /// Raw native address.
    Pointer(u64),
    Object(ObjectHandle),
}

impl HostValue {
    /// Short name of the variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            HostValue::None => "none",
            HostValue::Bool(_) => "bool",
            HostValue::I32(_) => "i32",
            HostValue::U32(_) => "u32",
            HostValue::I64(_) => "i64",
            HostValue::U64(_) => "u64",
            HostValue::F32(_) => "f32",
            HostValue::F64(_) => "f64",
            HostValue::String(_) => "String",
            HostValue::Pointer(_) => "pointer",
            HostValue::Object(_) => "object",
        }
    }

    /// Check if this value can fill a slot described by `desc`.
    ///
    /// Objects conform to an object descriptor when their runtime type is the
    /// named type or one of its subtypes, and always conform to `Pointer`.
    pub fn conforms_to(&self, desc: &TypeDescriptor) -> bool {
        match (self, desc) {
            (HostValue::Object(_), TypeDescriptor::Pointer) => true,
            (HostValue::Object(handle), TypeDescriptor::Object(name)) => {
                let native = handle.native();
                match (handle.type_(), native.type_from_name(name)) {
                    (Ok(ty), Some(want)) => native.is_a(ty, want),
                    _ => false,
                }
            }
            (HostValue::Pointer(_), TypeDescriptor::Pointer) => true,
            (value, desc) => match (value.fundamental(), desc.fundamental()) {
                (Some(have), Some(want)) => have == want,
                _ => false,
            },
        }
    }

    /// Fundamental native type of a non-object value.
    fn fundamental(&self) -> Option<Type> {
        match self {
            HostValue::None => Some(Type::NONE),
            HostValue::Bool(_) => Some(Type::BOOL),
            HostValue::I32(_) => Some(Type::I32),
            HostValue::U32(_) => Some(Type::U32),
            HostValue::I64(_) => Some(Type::I64),
            HostValue::U64(_) => Some(Type::U64),
            HostValue::F32(_) => Some(Type::F32),
            HostValue::F64(_) => Some(Type::F64),
            HostValue::String(_) => Some(Type::STRING),
            HostValue::Pointer(_) => Some(Type::POINTER),
            HostValue::Object(_) => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, HostValue::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            HostValue::I32(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HostValue::I64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            HostValue::U64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::F64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<u64> {
        match self {
            HostValue::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match self {
            HostValue::Object(handle) => Some(handle),
            _ => None,
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<i32> for HostValue {
    fn from(n: i32) -> Self {
        HostValue::I32(n)
    }
}

impl From<u32> for HostValue {
    fn from(n: u32) -> Self {
        HostValue::U32(n)
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::I64(n)
    }
}

impl From<u64> for HostValue {
    fn from(n: u64) -> Self {
        HostValue::U64(n)
    }
}

impl From<f32> for HostValue {
    fn from(n: f32) -> Self {
        HostValue::F32(n)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::F64(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<ObjectHandle> for HostValue {
    fn from(handle: ObjectHandle) -> Self {
        HostValue::Object(handle)
    }
}

impl From<&ObjectHandle> for HostValue {
    fn from(handle: &ObjectHandle) -> Self {
        HostValue::Object(handle.clone())
    }
}

// =========================================================================
// Generic Values
// =========================================================================

/// Payload of a `GenericValue`. The variant always agrees with the value's
/// fundamental type.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    None,
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Pointer(u64),
    /// Held the same way the host value held it (owning or borrowed).
    Object(ObjectHandle),
}

/// A tagged native value: a type tag plus the payload for that type.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericValue {
    ty: Type,
    data: ValueData,
}

impl GenericValue {
    /// The empty value (`Type::NONE`).
    pub fn none() -> Self {
        Self {
            ty: Type::NONE,
            data: ValueData::None,
        }
    }

    /// Zero value of a non-object fundamental type.
    pub fn default_for(ty: Type) -> Option<Self> {
        let data = match ty {
            Type::NONE => ValueData::None,
            Type::BOOL => ValueData::Bool(false),
            Type::I32 => ValueData::I32(0),
            Type::U32 => ValueData::U32(0),
            Type::I64 => ValueData::I64(0),
            Type::U64 => ValueData::U64(0),
            Type::F32 => ValueData::F32(0.0),
            Type::F64 => ValueData::F64(0.0),
            Type::STRING => ValueData::String(String::new()),
            Type::POINTER => ValueData::Pointer(0),
            _ => return None,
        };
        Some(Self { ty, data })
    }

    /// Build a tagged value from a host value.
    ///
    /// Objects are tagged with their runtime type, queried from the native
    /// runtime, which fails only if the object is no longer alive.
    pub fn from_host(value: &HostValue) -> Result<Self, NativeError> {
        let (ty, data) = match value {
            HostValue::None => (Type::NONE, ValueData::None),
            HostValue::Bool(b) => (Type::BOOL, ValueData::Bool(*b)),
            HostValue::I32(n) => (Type::I32, ValueData::I32(*n)),
            HostValue::U32(n) => (Type::U32, ValueData::U32(*n)),
            HostValue::I64(n) => (Type::I64, ValueData::I64(*n)),
            HostValue::U64(n) => (Type::U64, ValueData::U64(*n)),
            HostValue::F32(n) => (Type::F32, ValueData::F32(*n)),
            HostValue::F64(n) => (Type::F64, ValueData::F64(*n)),
            HostValue::String(s) => (Type::STRING, ValueData::String(s.clone())),
            HostValue::Pointer(p) => (Type::POINTER, ValueData::Pointer(*p)),
            HostValue::Object(handle) => (handle.type_()?, ValueData::Object(handle.clone())),
        };
        Ok(Self { ty, data })
    }

    /// Convert to a host value for a slot described by `want`.
    ///
    /// # Panics
    /// If the payload can't fill `want`. Connect validates every slot against
    /// the signal signature, so reaching this is a bridge bug.
    pub fn to_host(&self, want: &TypeDescriptor) -> HostValue {
        match (&self.data, want) {
            (ValueData::Bool(b), TypeDescriptor::Bool) => HostValue::Bool(*b),
            (ValueData::I32(n), TypeDescriptor::I32) => HostValue::I32(*n),
            (ValueData::U32(n), TypeDescriptor::U32) => HostValue::U32(*n),
            (ValueData::I64(n), TypeDescriptor::I64) => HostValue::I64(*n),
            (ValueData::U64(n), TypeDescriptor::U64) => HostValue::U64(*n),
            (ValueData::F32(n), TypeDescriptor::F32) => HostValue::F32(*n),
            (ValueData::F64(n), TypeDescriptor::F64) => HostValue::F64(*n),
            (ValueData::String(s), TypeDescriptor::String) => HostValue::String(s.clone()),
            (ValueData::Pointer(p), TypeDescriptor::Pointer) => HostValue::Pointer(*p),
            (ValueData::Object(handle), TypeDescriptor::Object(name)) => {
                let native = handle.native();
                let fits = native
                    .type_from_name(name)
                    .is_some_and(|slot| native.is_a(self.ty, slot));
                if !fits {
                    panic!(
                        "native object of type {} does not fit host slot {}",
                        native.type_name(self.ty).unwrap_or_else(|| self.ty.to_string()),
                        want
                    );
                }
                HostValue::Object(handle.borrowed())
            }
            (ValueData::Object(handle), TypeDescriptor::Pointer) => {
                HostValue::Pointer(handle.id().to_bits())
            }
            (_, want) => panic!(
                "cannot convert native {} value (type {}) to host type {}",
                self.kind_name(),
                self.ty,
                want
            ),
        }
    }

    /// Convert to the host value that naturally represents this payload.
    ///
    /// Objects keep the payload's ownership mode.
    pub fn to_host_natural(&self) -> HostValue {
        match &self.data {
            ValueData::None => HostValue::None,
            ValueData::Bool(b) => HostValue::Bool(*b),
            ValueData::I32(n) => HostValue::I32(*n),
            ValueData::U32(n) => HostValue::U32(*n),
            ValueData::I64(n) => HostValue::I64(*n),
            ValueData::U64(n) => HostValue::U64(*n),
            ValueData::F32(n) => HostValue::F32(*n),
            ValueData::F64(n) => HostValue::F64(*n),
            ValueData::String(s) => HostValue::String(s.clone()),
            ValueData::Pointer(p) => HostValue::Pointer(*p),
            ValueData::Object(handle) => HostValue::Object(handle.clone()),
        }
    }

    /// The value's type tag. For objects this is the runtime type.
    #[inline]
    pub fn ty(&self) -> Type {
        self.ty
    }

    #[inline]
    pub fn data(&self) -> &ValueData {
        &self.data
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self.data, ValueData::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.data {
            ValueData::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            ValueData::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn object(&self) -> Option<&ObjectHandle> {
        match &self.data {
            ValueData::Object(handle) => Some(handle),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self.data {
            ValueData::None => "none",
            ValueData::Bool(_) => "bool",
            ValueData::I32(_) => "i32",
            ValueData::U32(_) => "u32",
            ValueData::I64(_) => "i64",
            ValueData::U64(_) => "u64",
            ValueData::F32(_) => "f32",
            ValueData::F64(_) => "f64",
            ValueData::String(_) => "string",
            ValueData::Pointer(_) => "pointer",
            ValueData::Object(_) => "object",
        }
    }
}

impl fmt::Display for GenericValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            ValueData::None => write!(f, "none"),
            ValueData::Bool(b) => write!(f, "{}", b),
            ValueData::I32(n) => write!(f, "{}", n),
            ValueData::U32(n) => write!(f, "{}", n),
            ValueData::I64(n) => write!(f, "{}", n),
            ValueData::U64(n) => write!(f, "{}", n),
            ValueData::F32(n) => write!(f, "{}", n),
            ValueData::F64(n) => write!(f, "{}", n),
            ValueData::String(s) => write!(f, "{:?}", s),
            ValueData::Pointer(p) => write!(f, "0x{:x}", p),
            ValueData::Object(handle) => write!(f, "<{} {:?}>", self.ty, handle.id()),
        }
    }
}
