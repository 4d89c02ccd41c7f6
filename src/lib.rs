//! sigbridge: signal marshaling between a native object runtime and Rust
//!
//! Host callbacks are connected to signals of a reference-counted, dynamically
//! typed native object runtime (GObject style). Connect verifies the callback
//! shape against the signal's introspected signature; a native emission hands
//! each firing to a tokio scheduler and waits for the callback's result.
//!
//! Modules:
//! - `value`: `HostValue` and the tagged `GenericValue` crossing the boundary
//! - `types`: native type tags, host type descriptors, signature matching
//! - `object`: owning and borrowed native object handles
//! - `callback`: host callbacks with explicit signatures
//! - `registry`: (object, subscription) to handler record table
//! - `dispatch`: the native-thread to scheduler handoff
//! - `bridge`: Connect, Disconnect and Emit
//! - `native`: the runtime boundary traits, plus an in-process runtime

pub mod bridge;
pub mod callback;
pub mod dispatch;
pub mod error;
pub mod native;
pub mod object;
pub mod registry;
pub mod types;
pub mod value;

pub use bridge::{Bridge, BridgeConfig};
pub use callback::{Callback, CallbackBuilder};
pub use error::{BridgeError, Result};
pub use native::in_process::{Accumulator, InProcessRuntime, SignalSpec};
pub use native::{
    NativeClosure, NativeError, NativeRuntime, ObjectId, Quark, SignalId, SignalQuery,
    SubscriptionId,
};
pub use object::ObjectHandle;
pub use types::{Type, TypeDescriptor, TypeSignature, type_matches};
pub use value::{GenericValue, HostValue};
