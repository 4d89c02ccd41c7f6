//! Host callbacks
//!
//! A `Callback` is a host closure plus its explicit shape: one
//! `TypeDescriptor` per positional slot and an optional return descriptor.
//! Connect checks that shape against the signal; the closure itself only ever
//! sees `HostValue`s that already fit it.
//!
//! ```ignore
//! let cb = Callback::builder()
//!     .param(TypeDescriptor::object("Widget"))
//!     .param(TypeDescriptor::String)
//!     .build(|args| {
//!         println!("{} changed", args[1].as_str().unwrap_or_default());
//!         HostValue::None
//!     });
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::types::TypeDescriptor;
use crate::value::HostValue;

/// Future produced by one callback invocation.
pub type CallbackFuture = Pin<Box<dyn Future<Output = HostValue> + Send>>;

type CallbackFn = dyn Fn(Vec<HostValue>) -> CallbackFuture + Send + Sync;

/// A host function value with a declared signature.
#[derive(Clone)]
pub struct Callback {
    params: Vec<TypeDescriptor>,
    ret: Option<TypeDescriptor>,
    func: Arc<CallbackFn>,
}

impl Callback {
    pub fn builder() -> CallbackBuilder {
        CallbackBuilder::default()
    }

    /// Positional slot types, in call order.
    pub fn params(&self) -> &[TypeDescriptor] {
        &self.params
    }

    /// Declared return type. `None` means the callback returns nothing.
    pub fn return_type(&self) -> Option<&TypeDescriptor> {
        self.ret.as_ref()
    }

    /// Start one invocation. Synchronous callbacks run to completion here.
    pub(crate) fn call(&self, args: Vec<HostValue>) -> CallbackFuture {
        (self.func)(args)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("params", &self.params)
            .field("ret", &self.ret)
            .finish_non_exhaustive()
    }
}

/// Builder for `Callback`.
#[derive(Debug, Default)]
pub struct CallbackBuilder {
    params: Vec<TypeDescriptor>,
    ret: Option<TypeDescriptor>,
}

impl CallbackBuilder {
    /// Append a positional slot.
    pub fn param(mut self, desc: TypeDescriptor) -> Self {
        self.params.push(desc);
        self
    }

    pub fn params(mut self, descs: impl IntoIterator<Item = TypeDescriptor>) -> Self {
        self.params.extend(descs);
        self
    }

    pub fn returns(mut self, desc: TypeDescriptor) -> Self {
        self.ret = Some(desc);
        self
    }

    /// Finish with a synchronous closure.
    pub fn build<F>(self, f: F) -> Callback
    where
        F: Fn(Vec<HostValue>) -> HostValue + Send + Sync + 'static,
    {
        self.finish(Arc::new(move |args: Vec<HostValue>| {
            Box::pin(std::future::ready(f(args))) as CallbackFuture
        }))
    }

    /// Finish with an async closure. Its body runs as a task on the host
    /// scheduler and may await freely.
    pub fn build_async<F, Fut>(self, f: F) -> Callback
    where
        F: Fn(Vec<HostValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HostValue> + Send + 'static,
    {
        self.finish(Arc::new(move |args: Vec<HostValue>| Box::pin(f(args)) as CallbackFuture))
    }

    fn finish(self, func: Arc<CallbackFn>) -> Callback {
        Callback {
            params: self.params,
            ret: self.ret,
            func,
        }
    }
}
