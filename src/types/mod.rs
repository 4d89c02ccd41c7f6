//! Native Type Tags and Signature Matching
//!
//! This module provides the type vocabulary shared by both sides of the bridge:
//! - `Type`: a native runtime type tag (fundamental or registered object type)
//! - `TypeDescriptor`: the host-side description of a callback slot
//! - `TypeSignature`: a signal's declared parameter and return types
//! - `type_matches`: the single predicate used by every signature check

pub mod registry;

use std::fmt;

use crate::native::NativeRuntime;

// ============================================================================
// Native Type Tags
// ============================================================================

/// A native runtime type tag.
///
/// Fundamental types occupy the low ids in a fixed order; object types
/// registered at runtime get ids above `Type::OBJECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Type(pub u32);

impl Type {
    /// The "no value" marker.
    pub const NONE: Type = Type(0);
    pub const BOOL: Type = Type(1);
    pub const I32: Type = Type(2);
    pub const U32: Type = Type(3);
    pub const I64: Type = Type(4);
    pub const U64: Type = Type(5);
    pub const F32: Type = Type(6);
    pub const F64: Type = Type(7);
    pub const STRING: Type = Type(8);
    pub const POINTER: Type = Type(9);
    /// Root of every object type.
    pub const OBJECT: Type = Type(10);

    /// Fundamentals in id order, with their native names.
    pub const FUNDAMENTALS: [(Type, &'static str); 11] = [
        (Type::NONE, "none"),
        (Type::BOOL, "bool"),
        (Type::I32, "i32"),
        (Type::U32, "u32"),
        (Type::I64, "i64"),
        (Type::U64, "u64"),
        (Type::F32, "f32"),
        (Type::F64, "f64"),
        (Type::STRING, "string"),
        (Type::POINTER, "pointer"),
        (Type::OBJECT, "Object"),
    ];
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Type::FUNDAMENTALS.get(self.0 as usize) {
            Some((_, name)) => write!(f, "{}", name),
            None => write!(f, "type#{}", self.0),
        }
    }
}

// ============================================================================
// Host Type Descriptors
// ============================================================================

/// Host-side type of one callback slot or return value.
///
/// Callbacks carry these explicitly instead of being reflected on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Bool,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
    /// Raw pointer capability. Accepts pointers and any object.
    Pointer,
    /// Object capability declared by native type name.
    Object(String),
}

impl TypeDescriptor {
    /// Object descriptor for the given native type name.
    pub fn object(name: impl Into<String>) -> Self {
        TypeDescriptor::Object(name.into())
    }

    /// The fundamental native type this descriptor maps to one-to-one, if any.
    pub fn fundamental(&self) -> Option<Type> {
        match self {
            TypeDescriptor::Bool => Some(Type::BOOL),
            TypeDescriptor::I32 => Some(Type::I32),
            TypeDescriptor::U32 => Some(Type::U32),
            TypeDescriptor::I64 => Some(Type::I64),
            TypeDescriptor::U64 => Some(Type::U64),
            TypeDescriptor::F32 => Some(Type::F32),
            TypeDescriptor::F64 => Some(Type::F64),
            TypeDescriptor::String => Some(Type::STRING),
            TypeDescriptor::Pointer => Some(Type::POINTER),
            TypeDescriptor::Object(_) => None,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Bool => write!(f, "bool"),
            TypeDescriptor::I32 => write!(f, "i32"),
            TypeDescriptor::U32 => write!(f, "u32"),
            TypeDescriptor::I64 => write!(f, "i64"),
            TypeDescriptor::U64 => write!(f, "u64"),
            TypeDescriptor::F32 => write!(f, "f32"),
            TypeDescriptor::F64 => write!(f, "f64"),
            TypeDescriptor::String => write!(f, "String"),
            TypeDescriptor::Pointer => write!(f, "*mut ()"),
            TypeDescriptor::Object(name) => write!(f, "&{}", name),
        }
    }
}

// ============================================================================
// Signal Signatures
// ============================================================================

/// Declared parameter and return types of a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSignature {
    pub param_types: Vec<Type>,
    pub return_type: Type,
}

impl TypeSignature {
    pub fn new(param_types: Vec<Type>, return_type: Type) -> Self {
        Self {
            param_types,
            return_type,
        }
    }

    /// Number of declared parameters, not counting the instance.
    pub fn n_params(&self) -> usize {
        self.param_types.len()
    }

    /// Check if the signal declares a return value.
    pub fn has_return(&self) -> bool {
        self.return_type != Type::NONE
    }
}

// ============================================================================
// Matching
// ============================================================================

/// Check whether a host slot of type `want` is compatible with native type `ty`.
///
/// `want == None` stands for an absent host value (no return slot), which only
/// matches `Type::NONE`. Object descriptors match when their named native type
/// is `ty` or a subtype of it. Never fails: unknown names simply don't match.
pub fn type_matches(native: &dyn NativeRuntime, ty: Type, want: Option<&TypeDescriptor>) -> bool {
    match want {
        None => ty == Type::NONE,
        Some(TypeDescriptor::Object(name)) => native
            .type_from_name(name)
            .is_some_and(|host| native.is_a(host, ty)),
        Some(TypeDescriptor::Pointer) => ty == Type::POINTER || native.is_a(ty, Type::OBJECT),
        Some(desc) => desc.fundamental() == Some(ty),
    }
}

/// Human readable name of a native type, falling back to its tag.
pub(crate) fn type_display(native: &dyn NativeRuntime, ty: Type) -> String {
    native.type_name(ty).unwrap_or_else(|| ty.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::in_process::InProcessRuntime;

    #[test]
    fn test_none_matches_absent_only() {
        let rt = InProcessRuntime::new();
        assert!(type_matches(&*rt, Type::NONE, None));
        assert!(!type_matches(&*rt, Type::STRING, None));
        assert!(!type_matches(&*rt, Type::NONE, Some(&TypeDescriptor::Bool)));
    }

    #[test]
    fn test_fundamentals_match_exactly() {
        let rt = InProcessRuntime::new();
        assert!(type_matches(&*rt, Type::STRING, Some(&TypeDescriptor::String)));
        assert!(type_matches(&*rt, Type::I32, Some(&TypeDescriptor::I32)));
        assert!(!type_matches(&*rt, Type::I32, Some(&TypeDescriptor::I64)));
        assert!(!type_matches(&*rt, Type::F64, Some(&TypeDescriptor::F32)));
    }

    #[test]
    fn test_object_descriptor_follows_is_a() {
        let rt = InProcessRuntime::new();
        let widget = rt.register_object_type("Widget", Type::OBJECT, false);
        let button = rt.register_object_type("Button", widget, false);

        assert!(type_matches(&*rt, widget, Some(&TypeDescriptor::object("Widget"))));
        assert!(type_matches(&*rt, widget, Some(&TypeDescriptor::object("Button"))));
        assert!(!type_matches(&*rt, button, Some(&TypeDescriptor::object("Widget"))));
        assert!(!type_matches(&*rt, widget, Some(&TypeDescriptor::object("Missing"))));
        assert!(!type_matches(&*rt, Type::STRING, Some(&TypeDescriptor::object("Widget"))));
    }

    #[test]
    fn test_pointer_accepts_objects() {
        let rt = InProcessRuntime::new();
        let widget = rt.register_object_type("Widget", Type::OBJECT, false);
        assert!(type_matches(&*rt, Type::POINTER, Some(&TypeDescriptor::Pointer)));
        assert!(type_matches(&*rt, widget, Some(&TypeDescriptor::Pointer)));
        assert!(!type_matches(&*rt, Type::U64, Some(&TypeDescriptor::Pointer)));
    }

    #[test]
    fn test_signature_counts() {
        let sig = TypeSignature::new(vec![Type::STRING, Type::I32], Type::NONE);
        assert_eq!(sig.n_params(), 2);
        assert!(!sig.has_return());
        assert!(TypeSignature::new(vec![], Type::BOOL).has_return());
    }
}
