//! Bridge Error Definitions
//!
//! Errors surfaced by Connect, Emit and the native boundary. Every variant is a
//! programmer error or state corruption; none of them is transient.

use thiserror::Error;

use crate::native::{NativeError, ObjectId, SubscriptionId};

/// Errors raised by the signal bridge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The signal is not declared on the object's type or its ancestors.
    #[error("unknown signal '{name}' on type {owner}")]
    UnknownSignal { name: String, owner: String },

    /// The callback's positional slot count does not match the signal.
    #[error("callback takes {got} parameters, signal spec requires {expected}")]
    ArityMismatch { expected: usize, got: usize },

    /// The instance slot does not accept the emitting object's type.
    #[error("callback #{slot} parameter type {host} doesn't match signal source {native}")]
    InstanceTypeMismatch {
        slot: usize,
        host: String,
        native: String,
    },

    /// A signal parameter does not match the callback slot at the same position.
    #[error("signal parameter #{index} of type {native} doesn't match callback type {host}")]
    ParamTypeMismatch {
        index: usize,
        native: String,
        host: String,
    },

    /// The callback's return type does not match the signal's return type.
    #[error("callback return type {host} doesn't match signal return type {native}")]
    ReturnTypeMismatch { native: String, host: String },

    /// The bound first argument can't be passed in callback slot #0.
    #[error("bound argument of type {value} doesn't match callback #0 parameter type {host}")]
    BoundArgTypeMismatch { value: String, host: String },

    /// Emit was called with the wrong number of arguments.
    #[error("emit got {got} arguments, signal spec requires {expected}")]
    EmitArityMismatch { expected: usize, got: usize },

    /// An emitted argument is not an instance of the declared parameter type.
    #[error("emit argument #{index} of type {got} isn't a {expected}")]
    EmitTypeMismatch {
        index: usize,
        expected: String,
        got: String,
    },

    /// A dispatch looked up a handler that isn't registered.
    #[error("no handler registered for {object:?} subscription {subscription}")]
    UnregisteredHandler {
        object: ObjectId,
        subscription: SubscriptionId,
    },

    /// The callback panicked or its task was dropped before completing.
    #[error("callback for {object:?} subscription {subscription} did not complete")]
    CallbackPanicked {
        object: ObjectId,
        subscription: SubscriptionId,
    },

    /// The callback returned a value the signal can't carry.
    #[error("callback returned {got}, signal expects {expected}")]
    InvalidReturnValue { expected: String, got: String },

    /// The host scheduler could not be started.
    #[error("failed to start host runtime: {0}")]
    HostRuntime(String),

    /// A native runtime call failed.
    #[error(transparent)]
    Native(#[from] NativeError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
