//! Native Runtime Boundary
//!
//! The bridge consumes the native object runtime only through `NativeRuntime`:
//! signal introspection, the subtype predicate, emission, closure connection,
//! property access and reference counting. Closures installed with
//! `NativeRuntime::connect` implement `NativeClosure`; the runtime drops them
//! when they are disconnected or their object is finalized.
//!
//! `in_process` provides a complete implementation of the boundary.

pub mod in_process;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{Type, TypeSignature};
use crate::value::GenericValue;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque native object identity.
///
/// The generation makes a recycled slot compare unequal to the dead object
/// that used it before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub index: u32,
    pub generation: u32,
}

impl ObjectId {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Pack into a single word (raw pointer representation).
    #[inline]
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpack from `to_bits`.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

/// Numeric signal identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(pub u32);

/// Interned string used as a signal detail. `Quark::NONE` means no detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Quark(pub u32);

impl Quark {
    pub const NONE: Quark = Quark(0);
}

/// Connection handle returned by `NativeRuntime::connect`. Unique per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of a signal introspection query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalQuery {
    pub id: SignalId,
    pub name: String,
    /// Type the signal is declared on.
    pub owner: Type,
    pub signature: TypeSignature,
    /// Accepts a detail qualifier.
    pub detailed: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// Failures reported by the native runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NativeError {
    #[error("object {0:?} is not alive")]
    DeadObject(ObjectId),

    #[error("no signal with id {0:?}")]
    NoSuchSignal(SignalId),

    #[error("signal {0:?} is not declared on the instance type")]
    SignalNotOnInstance(SignalId),

    #[error("no handler {1} connected on object {0:?}")]
    NoSuchHandler(ObjectId, SubscriptionId),

    #[error("type {type_name} has no property '{name}'")]
    NoSuchProperty { type_name: String, name: String },

    #[error("property '{name}' has never been set")]
    PropertyUnset { name: String },

    #[error("property '{name}' expects {expected}, got {got}")]
    PropertyTypeMismatch {
        name: String,
        expected: String,
        got: String,
    },

    #[error("emission argument vector is missing the instance")]
    MissingInstance,

    #[error("{0} isn't an instantiable object type")]
    NotInstantiable(String),
}

// ============================================================================
// Boundary Traits
// ============================================================================

/// A native-side closure connected to a signal.
pub trait NativeClosure: Send + Sync {
    /// Called by the native emission with `[instance, params...]`. The returned
    /// value feeds the signal's accumulator.
    fn invoke(&self, params: &[GenericValue]) -> Option<GenericValue>;
}

/// Capabilities the bridge consumes from the native object runtime.
pub trait NativeRuntime: Send + Sync + fmt::Debug {
    /// Signal introspection. Side-effect free and idempotent.
    fn query_signal(&self, signal: SignalId) -> Option<SignalQuery>;

    /// Resolve `"name"` or `"name::detail"` on `owner` or its ancestors.
    fn lookup_signal(&self, name: &str, owner: Type) -> Option<(SignalId, Quark)>;

    /// Runtime subtype predicate. Reflexive and transitive.
    fn is_a(&self, ty: Type, ancestor: Type) -> bool;

    fn type_from_name(&self, name: &str) -> Option<Type>;

    fn type_name(&self, ty: Type) -> Option<String>;

    /// Runtime type of a live object.
    fn object_type(&self, object: ObjectId) -> Result<Type, NativeError>;

    /// Synchronous emission. `args[0]` is the instance. Calls every connected
    /// closure in connection order and returns the accumulated value.
    fn emit(
        &self,
        signal: SignalId,
        detail: Quark,
        args: &[GenericValue],
    ) -> Result<Option<GenericValue>, NativeError>;

    fn connect(
        &self,
        object: ObjectId,
        signal: SignalId,
        detail: Quark,
        closure: Arc<dyn NativeClosure>,
    ) -> Result<SubscriptionId, NativeError>;

    fn disconnect(&self, object: ObjectId, subscription: SubscriptionId) -> Result<(), NativeError>;

    fn get_property(&self, object: ObjectId, name: &str) -> Result<GenericValue, NativeError>;

    fn set_property(
        &self,
        object: ObjectId,
        name: &str,
        value: &GenericValue,
    ) -> Result<(), NativeError>;

    fn object_ref(&self, object: ObjectId) -> Result<(), NativeError>;

    /// Drops one reference; the last one finalizes the object.
    fn object_unref(&self, object: ObjectId) -> Result<(), NativeError>;

    /// Sinks a floating reference, or adds one if the object isn't floating.
    fn object_ref_sink(&self, object: ObjectId) -> Result<(), NativeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_bits_roundtrip() {
        let id = ObjectId::new(0xDEAD, 7);
        assert_eq!(ObjectId::from_bits(id.to_bits()), id);
        assert_ne!(ObjectId::new(1, 0).to_bits(), ObjectId::new(1, 1).to_bits());
    }
}
