//! Signal Bridge
//!
//! Connect and Emit. Connect checks a callback's declared shape against the
//! signal's native signature before anything is registered, so a dispatch can
//! never meet a type it doesn't expect. Emit checks arity and argument types
//! before the native emission is started.
//!
//! Callback slot layout, for every connect variant:
//!
//! ```text
//! [bound argument?] [emitting instance?] [signal params...]
//! ```

use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};

use crate::callback::Callback;
use crate::dispatch::{DispatchLoop, Trampoline};
use crate::error::{BridgeError, Result};
use crate::native::{NativeClosure, NativeRuntime, Quark, SignalId, SignalQuery, SubscriptionId};
use crate::object::ObjectHandle;
use crate::registry::{HandlerKey, HandlerRecord, HandlerRegistry};
use crate::types::{Type, TypeSignature, type_display, type_matches};
use crate::value::{GenericValue, HostValue};

// =========================================================================
// Configuration
// =========================================================================

/// Host scheduler configuration for a `Bridge` that owns its runtime.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Worker threads of the tokio runtime running callbacks.
    pub worker_threads: usize,
    /// Name given to those threads.
    pub thread_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            thread_name: "sigbridge-worker".to_string(),
        }
    }
}

// =========================================================================
// Bridge
// =========================================================================

/// Connects host callbacks to signals of one native runtime.
pub struct Bridge {
    native: Arc<dyn NativeRuntime>,
    registry: Arc<HandlerRegistry>,
    dispatch: DispatchLoop,
    handle: Handle,
    /// Present when the bridge built its own scheduler.
    runtime: Option<Runtime>,
}

impl Bridge {
    /// Bridge with its own multi-thread scheduler, default configuration.
    pub fn new(native: Arc<dyn NativeRuntime>) -> Result<Self> {
        Self::with_config(native, BridgeConfig::default())
    }

    pub fn with_config(native: Arc<dyn NativeRuntime>, config: BridgeConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name(config.thread_name)
            .enable_time()
            .build()
            .map_err(|e| BridgeError::HostRuntime(e.to_string()))?;
        let mut bridge = Self::with_handle(native, runtime.handle().clone());
        bridge.runtime = Some(runtime);
        Ok(bridge)
    }

    /// Bridge running callbacks on an existing scheduler.
    ///
    /// Emissions must not block a thread that the scheduler needs to make
    /// progress: use a multi-thread runtime, or emit from outside it.
    pub fn with_handle(native: Arc<dyn NativeRuntime>, handle: Handle) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let dispatch = DispatchLoop::start(&handle, registry.clone());
        Self {
            native,
            registry,
            dispatch,
            handle,
            runtime: None,
        }
    }

    #[inline]
    pub fn native(&self) -> &Arc<dyn NativeRuntime> {
        &self.native
    }

    /// Scheduler the callbacks run on.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Number of registered handler records.
    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    /// Subscriptions this bridge holds on an object, in connection order.
    pub fn subscriptions(&self, object: &ObjectHandle) -> Vec<SubscriptionId> {
        self.registry.subscriptions(object.id())
    }

    /// Number of callback dispatches started so far.
    pub fn dispatched_count(&self) -> usize {
        self.dispatch.spawned()
    }

    // =====================================================================
    // Connect
    // =====================================================================

    /// Connect `callback` to `signal` (`"name"` or `"name::detail"`), passing
    /// the emitting instance after the bound argument.
    ///
    /// The instance slot is matched like every other slot: its named type
    /// must be the object's runtime type or a subtype of it. A slot declared
    /// with a supertype of the object's type (`Widget` for a `Button`) is
    /// refused with `InstanceTypeMismatch`; declare the exact type, or use
    /// `TypeDescriptor::Pointer`.
    pub fn connect(
        &self,
        object: &ObjectHandle,
        signal: &str,
        callback: Callback,
        bound: Option<HostValue>,
    ) -> Result<SubscriptionId> {
        let (id, detail) = resolve_signal(&*self.native, object, signal)?;
        self.connect_full(object, id, detail, callback, bound, true)
    }

    /// Like `connect`, without the emitting instance in the callback's slots.
    pub fn connect_no_instance(
        &self,
        object: &ObjectHandle,
        signal: &str,
        callback: Callback,
        bound: Option<HostValue>,
    ) -> Result<SubscriptionId> {
        let (id, detail) = resolve_signal(&*self.native, object, signal)?;
        self.connect_full(object, id, detail, callback, bound, false)
    }

    pub fn connect_by_id(
        &self,
        object: &ObjectHandle,
        signal: SignalId,
        detail: Quark,
        callback: Callback,
        bound: Option<HostValue>,
    ) -> Result<SubscriptionId> {
        self.connect_full(object, signal, detail, callback, bound, true)
    }

    pub fn connect_by_id_no_instance(
        &self,
        object: &ObjectHandle,
        signal: SignalId,
        detail: Quark,
        callback: Callback,
        bound: Option<HostValue>,
    ) -> Result<SubscriptionId> {
        self.connect_full(object, signal, detail, callback, bound, false)
    }

    fn connect_full(
        &self,
        object: &ObjectHandle,
        signal: SignalId,
        detail: Quark,
        callback: Callback,
        bound: Option<HostValue>,
        pass_instance: bool,
    ) -> Result<SubscriptionId> {
        let native = &*self.native;
        let instance_ty = object.type_()?;
        let query = query_on_instance(native, signal, instance_ty)?;
        check_callback(
            native,
            &query.signature,
            instance_ty,
            &callback,
            bound.as_ref(),
            pass_instance,
        )?;

        let key = Arc::new(HandlerKey::new(object.id()));
        let trampoline = Arc::new(Trampoline::new(key.clone(), self.dispatch.clone()));
        let record = HandlerRecord::new(callback, bound, pass_instance);
        // Our reference keeps the record alive until it is registered, even if
        // the native side drops its closure right away.
        let closure: Arc<dyn NativeClosure> = trampoline.clone();
        let (subscription, stale) = self.registry.insert_with(&key, record, || {
            native.connect(object.id(), signal, detail, closure)
        })?;
        // Records of a dead object whose slot was recycled.
        drop(stale);
        drop(trampoline);

        log::debug!(
            "connected '{}' on {:?} as subscription {}",
            query.name,
            object.id(),
            subscription
        );
        Ok(subscription)
    }

    /// Disconnect a subscription made through this bridge.
    ///
    /// The handler record goes away once the native runtime releases the
    /// subscription's closure; an emission already running keeps it until it
    /// finishes.
    pub fn disconnect(&self, object: &ObjectHandle, subscription: SubscriptionId) -> Result<()> {
        if !self.registry.contains(object.id(), subscription) {
            return Err(BridgeError::UnregisteredHandler {
                object: object.id(),
                subscription,
            });
        }
        self.native.disconnect(object.id(), subscription)?;
        log::debug!(
            "disconnected subscription {} on {:?}",
            subscription,
            object.id()
        );
        Ok(())
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which panics inside async code.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("native", &self.native)
            .field("handlers", &self.registry.len())
            .field("dispatch", &self.dispatch)
            .field("owns_runtime", &self.runtime.is_some())
            .finish()
    }
}

// =========================================================================
// Emit
// =========================================================================

impl ObjectHandle {
    /// Emit `signal` (`"name"` or `"name::detail"`) on this object and
    /// return the accumulated handler result (`HostValue::None` for signals
    /// without a return value).
    ///
    /// Blocks until every connected handler has run.
    pub fn emit(&self, signal: &str, args: &[HostValue]) -> Result<HostValue> {
        let (id, detail) = resolve_signal(&**self.native(), self, signal)?;
        self.emit_by_id(id, detail, args)
    }

    pub fn emit_by_id(&self, signal: SignalId, detail: Quark, args: &[HostValue]) -> Result<HostValue> {
        let native = &**self.native();
        let instance_ty = self.type_()?;
        let query = query_on_instance(native, signal, instance_ty)?;
        let params = &query.signature.param_types;
        if args.len() != params.len() {
            return Err(BridgeError::EmitArityMismatch {
                expected: params.len(),
                got: args.len(),
            });
        }

        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(GenericValue::from_host(&HostValue::Object(self.borrowed()))?);
        for (index, (arg, &ty)) in args.iter().zip(params).enumerate() {
            let value = GenericValue::from_host(arg)?;
            if !native.is_a(value.ty(), ty) {
                return Err(BridgeError::EmitTypeMismatch {
                    index,
                    expected: type_display(native, ty),
                    got: type_display(native, value.ty()),
                });
            }
            values.push(value);
        }

        log::trace!("emitting '{}' on {:?}", query.name, self.id());
        let ret = native.emit(signal, detail, &values)?;
        // No handler produced a value: a declared return type still gets one.
        let ret = ret.or_else(|| GenericValue::default_for(query.signature.return_type));
        Ok(ret.map(|v| v.to_host_natural()).unwrap_or_default())
    }
}

// =========================================================================
// Validation
// =========================================================================

/// Resolve `"name"` or `"name::detail"` on the object's runtime type.
fn resolve_signal(
    native: &dyn NativeRuntime,
    object: &ObjectHandle,
    name: &str,
) -> Result<(SignalId, Quark)> {
    let ty = object.type_()?;
    native
        .lookup_signal(name, ty)
        .ok_or_else(|| BridgeError::UnknownSignal {
            name: name.to_string(),
            owner: type_display(native, ty),
        })
}

/// Query a signal, requiring it to be declared on `instance_ty` or an
/// ancestor.
fn query_on_instance(
    native: &dyn NativeRuntime,
    signal: SignalId,
    instance_ty: Type,
) -> Result<SignalQuery> {
    native
        .query_signal(signal)
        .filter(|query| native.is_a(instance_ty, query.owner))
        .ok_or_else(|| BridgeError::UnknownSignal {
            name: native
                .query_signal(signal)
                .map_or_else(|| format!("{:?}", signal), |query| query.name),
            owner: type_display(native, instance_ty),
        })
}

/// Check a callback's declared shape against a signal signature.
///
/// Arity first, so a wrong slot count is always reported as such; then the
/// instance slot, the return type, each signal parameter and the bound
/// argument.
fn check_callback(
    native: &dyn NativeRuntime,
    signature: &TypeSignature,
    instance_ty: Type,
    callback: &Callback,
    bound: Option<&HostValue>,
    pass_instance: bool,
) -> Result<()> {
    let slots = callback.params();
    let mut offset = usize::from(bound.is_some());
    let expected = offset + usize::from(pass_instance) + signature.n_params();
    if slots.len() != expected {
        return Err(BridgeError::ArityMismatch {
            expected,
            got: slots.len(),
        });
    }

    if pass_instance {
        let slot = &slots[offset];
        if !type_matches(native, instance_ty, Some(slot)) {
            return Err(BridgeError::InstanceTypeMismatch {
                slot: offset,
                host: slot.to_string(),
                native: type_display(native, instance_ty),
            });
        }
        offset += 1;
    }

    // A callback without a return value may serve any signal; one with a
    // return value needs a signal returning a matching type.
    if let Some(ret) = callback.return_type() {
        if !signature.has_return() || !type_matches(native, signature.return_type, Some(ret)) {
            return Err(BridgeError::ReturnTypeMismatch {
                native: type_display(native, signature.return_type),
                host: ret.to_string(),
            });
        }
    }

    for (index, (&ty, slot)) in signature.param_types.iter().zip(&slots[offset..]).enumerate() {
        if !type_matches(native, ty, Some(slot)) {
            return Err(BridgeError::ParamTypeMismatch {
                index,
                native: type_display(native, ty),
                host: slot.to_string(),
            });
        }
    }

    if let Some(value) = bound {
        if !value.conforms_to(&slots[0]) {
            return Err(BridgeError::BoundArgTypeMismatch {
                value: value.kind_name().to_string(),
                host: slots[0].to_string(),
            });
        }
    }
    Ok(())
}
