//! In-process native object runtime
//!
//! A complete implementation of the `NativeRuntime` boundary:
//! - a type registry with single inheritance and per-type properties
//! - signals declared per type, looked up through ancestors, with optional
//!   detail qualifiers and a return value accumulator
//! - reference counted objects in a generation-checked slot table, with
//!   floating references for initially-unowned types
//!
//! No lock is held while a connected closure runs or while removed state
//! (closures, property values) is dropped: both can call back into the
//! runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::{
    NativeClosure, NativeError, NativeRuntime, ObjectId, Quark, SignalId, SignalQuery,
    SubscriptionId,
};
use crate::object::ObjectHandle;
use crate::types::registry::TypeRegistry;
use crate::types::{Type, TypeSignature};
use crate::value::{GenericValue, HostValue};

// =========================================================================
// Signal declarations
// =========================================================================

/// How an emission combines the values returned by its handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accumulator {
    /// The last handler that returned a value wins.
    #[default]
    Last,
    /// Stop the emission at the first handler returning `true`.
    TrueHandled,
}

/// Declaration of a signal, passed to `InProcessRuntime::register_signal`.
#[derive(Debug, Clone)]
pub struct SignalSpec {
    pub name: String,
    pub params: Vec<Type>,
    pub return_type: Type,
    pub detailed: bool,
    pub accumulator: Accumulator,
}

impl SignalSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            return_type: Type::NONE,
            detailed: false,
            accumulator: Accumulator::Last,
        }
    }

    pub fn param(mut self, ty: Type) -> Self {
        self.params.push(ty);
        self
    }

    pub fn returns(mut self, ty: Type) -> Self {
        self.return_type = ty;
        self
    }

    pub fn detailed(mut self) -> Self {
        self.detailed = true;
        self
    }

    pub fn accumulator(mut self, accumulator: Accumulator) -> Self {
        self.accumulator = accumulator;
        self
    }
}

struct SignalEntry {
    owner: Type,
    spec: SignalSpec,
}

#[derive(Default)]
struct SignalTable {
    /// Indexed by `SignalId.0`.
    signals: Vec<SignalEntry>,
    by_name: HashMap<(Type, String), SignalId>,
}

#[derive(Default)]
struct QuarkTable {
    /// Index 0 is the empty quark.
    names: Vec<String>,
    ids: HashMap<String, Quark>,
}

impl QuarkTable {
    fn intern(&mut self, name: &str) -> Quark {
        if name.is_empty() {
            return Quark::NONE;
        }
        if self.names.is_empty() {
            self.names.push(String::new());
        }
        if let Some(q) = self.ids.get(name) {
            return *q;
        }
        let q = Quark(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), q);
        q
    }
}

// =========================================================================
// Object table
// =========================================================================

struct HandlerEntry {
    id: SubscriptionId,
    signal: SignalId,
    detail: Quark,
    closure: Arc<dyn NativeClosure>,
    connected: AtomicBool,
}

struct ObjectEntry {
    ty: Type,
    ref_count: u32,
    floating: bool,
    properties: HashMap<String, GenericValue>,
    /// In connection order.
    handlers: Vec<Arc<HandlerEntry>>,
}

struct ObjectSlot {
    generation: u32,
    entry: Option<ObjectEntry>,
}

/// Slot table with generation-checked ids. A freed slot bumps its generation
/// before it is reused.
#[derive(Default)]
struct ObjectTable {
    slots: Vec<ObjectSlot>,
    free: Vec<u32>,
}

impl ObjectTable {
    fn insert(&mut self, entry: ObjectEntry) -> ObjectId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return ObjectId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(ObjectSlot {
            generation: 0,
            entry: Some(entry),
        });
        ObjectId::new(index, 0)
    }

    fn get(&self, id: ObjectId) -> Result<&ObjectEntry, NativeError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(NativeError::DeadObject(id))
    }

    fn get_mut(&mut self, id: ObjectId) -> Result<&mut ObjectEntry, NativeError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(NativeError::DeadObject(id))
    }

    fn remove(&mut self, id: ObjectId) -> Option<ObjectEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(entry)
    }
}

// =========================================================================
// Runtime
// =========================================================================

/// Thread-safe in-process object runtime.
pub struct InProcessRuntime {
    this: Weak<InProcessRuntime>,
    types: RwLock<TypeRegistry>,
    signals: RwLock<SignalTable>,
    quarks: Mutex<QuarkTable>,
    objects: Mutex<ObjectTable>,
    next_subscription: AtomicU64,
    emissions: AtomicUsize,
}

impl InProcessRuntime {
    /// Create a runtime with the fundamental types and the base `Object`
    /// type's `notify` signal (detailed, one string parameter: the property
    /// name).
    pub fn new() -> Arc<Self> {
        let runtime = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            types: RwLock::new(TypeRegistry::new()),
            signals: RwLock::new(SignalTable::default()),
            quarks: Mutex::new(QuarkTable::default()),
            objects: Mutex::new(ObjectTable::default()),
            next_subscription: AtomicU64::new(1),
            emissions: AtomicUsize::new(0),
        });
        runtime.register_signal(
            Type::OBJECT,
            SignalSpec::new("notify").param(Type::STRING).detailed(),
        );
        runtime
    }

    fn shared(&self) -> Arc<dyn NativeRuntime> {
        // `self` is only reachable through the Arc built in `new`.
        self.this.upgrade().expect("runtime used after being dropped")
    }

    // =====================================================================
    // Declarations
    // =====================================================================

    pub fn register_object_type(&self, name: &str, parent: Type, initially_unowned: bool) -> Type {
        self.types
            .write()
            .register_object_type(name, parent, initially_unowned)
    }

    pub fn install_property(&self, owner: Type, name: &str, ty: Type) {
        self.types.write().install_property(owner, name, ty);
    }

    /// Declare a signal on `owner`. Panics if the name is already declared on
    /// that type.
    pub fn register_signal(&self, owner: Type, spec: SignalSpec) -> SignalId {
        assert!(
            self.types.read().is_object(owner),
            "signals can only be declared on object types"
        );
        let mut table = self.signals.write();
        let key = (owner, spec.name.clone());
        assert!(
            !table.by_name.contains_key(&key),
            "signal '{}' already declared",
            spec.name
        );
        let id = SignalId(table.signals.len() as u32);
        table.signals.push(SignalEntry { owner, spec });
        table.by_name.insert(key, id);
        id
    }

    pub fn quark_from_str(&self, name: &str) -> Quark {
        self.quarks.lock().intern(name)
    }

    pub fn quark_to_string(&self, quark: Quark) -> Option<String> {
        self.quarks.lock().names.get(quark.0 as usize).cloned()
    }

    // =====================================================================
    // Objects
    // =====================================================================

    /// Instantiate an object type and set its initial properties.
    ///
    /// The returned handle owns the initial reference, except for
    /// initially-unowned types: their reference is floating and the handle is
    /// borrowed until someone calls `ref_sink`.
    pub fn new_object(
        &self,
        ty: Type,
        properties: &[(&str, HostValue)],
    ) -> Result<ObjectHandle, NativeError> {
        let floating = {
            let types = self.types.read();
            if !types.is_object(ty) {
                return Err(NativeError::NotInstantiable(
                    types.get_name(ty).unwrap_or("?").to_string(),
                ));
            }
            types.is_initially_unowned(ty)
        };
        let id = self.objects.lock().insert(ObjectEntry {
            ty,
            ref_count: 1,
            floating,
            properties: HashMap::new(),
            handlers: Vec::new(),
        });
        log::trace!("new object {:?} of type {}", id, ty);

        let handle = if floating {
            ObjectHandle::from_borrowed(self.shared(), id)
        } else {
            ObjectHandle::from_owned(self.shared(), id)
        };
        for (name, value) in properties {
            handle.set_property(name, value.clone())?;
        }
        Ok(handle)
    }

    pub fn is_alive(&self, id: ObjectId) -> bool {
        self.objects.lock().get(id).is_ok()
    }

    pub fn ref_count(&self, id: ObjectId) -> Option<u32> {
        self.objects.lock().get(id).ok().map(|e| e.ref_count)
    }

    pub fn is_floating(&self, id: ObjectId) -> Option<bool> {
        self.objects.lock().get(id).ok().map(|e| e.floating)
    }

    /// Number of closures connected to an object.
    pub fn handler_count(&self, id: ObjectId) -> usize {
        self.objects
            .lock()
            .get(id)
            .map(|e| e.handlers.len())
            .unwrap_or(0)
    }

    /// Number of emissions started so far.
    pub fn emission_count(&self) -> usize {
        self.emissions.load(Ordering::SeqCst)
    }

    fn finalize(&self, id: ObjectId, entry: ObjectEntry) {
        log::debug!(
            "finalizing {:?}, dropping {} handlers",
            id,
            entry.handlers.len()
        );
        for handler in &entry.handlers {
            handler.connected.store(false, Ordering::SeqCst);
        }
        drop(entry);
    }
}

impl std::fmt::Debug for InProcessRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessRuntime")
            .field("signals", &self.signals.read().signals.len())
            .field("objects", &self.objects.lock().slots.len())
            .field("emissions", &self.emission_count())
            .finish()
    }
}

impl NativeRuntime for InProcessRuntime {
    fn query_signal(&self, signal: SignalId) -> Option<SignalQuery> {
        let table = self.signals.read();
        let entry = table.signals.get(signal.0 as usize)?;
        Some(SignalQuery {
            id: signal,
            name: entry.spec.name.clone(),
            owner: entry.owner,
            signature: TypeSignature::new(entry.spec.params.clone(), entry.spec.return_type),
            detailed: entry.spec.detailed,
        })
    }

    fn lookup_signal(&self, name: &str, owner: Type) -> Option<(SignalId, Quark)> {
        let (name, detail) = match name.split_once("::") {
            Some((name, detail)) => (name, Some(detail)),
            None => (name, None),
        };
        let id = {
            let types = self.types.read();
            let table = self.signals.read();
            types
                .ancestors(owner)
                .find_map(|ty| table.by_name.get(&(ty, name.to_string())).copied())?
        };
        let detail = match detail {
            None => Quark::NONE,
            Some(detail) => {
                let detailed = self.signals.read().signals[id.0 as usize].spec.detailed;
                if !detailed || detail.is_empty() {
                    return None;
                }
                self.quark_from_str(detail)
            }
        };
        Some((id, detail))
    }

    fn is_a(&self, ty: Type, ancestor: Type) -> bool {
        self.types.read().is_a(ty, ancestor)
    }

    fn type_from_name(&self, name: &str) -> Option<Type> {
        self.types.read().lookup_by_name(name)
    }

    fn type_name(&self, ty: Type) -> Option<String> {
        self.types.read().get_name(ty).map(str::to_string)
    }

    fn object_type(&self, object: ObjectId) -> Result<Type, NativeError> {
        self.objects.lock().get(object).map(|e| e.ty)
    }

    fn emit(
        &self,
        signal: SignalId,
        detail: Quark,
        args: &[GenericValue],
    ) -> Result<Option<GenericValue>, NativeError> {
        let (owner, accumulator) = {
            let table = self.signals.read();
            let entry = table
                .signals
                .get(signal.0 as usize)
                .ok_or(NativeError::NoSuchSignal(signal))?;
            (entry.owner, entry.spec.accumulator)
        };
        let instance = args
            .first()
            .and_then(GenericValue::object)
            .ok_or(NativeError::MissingInstance)?
            .id();

        let handlers: Vec<Arc<HandlerEntry>> = {
            let objects = self.objects.lock();
            let entry = objects.get(instance)?;
            if !self.types.read().is_a(entry.ty, owner) {
                return Err(NativeError::SignalNotOnInstance(signal));
            }
            entry
                .handlers
                .iter()
                .filter(|h| h.signal == signal && (h.detail == Quark::NONE || h.detail == detail))
                .cloned()
                .collect()
        };
        self.emissions.fetch_add(1, Ordering::SeqCst);
        log::trace!(
            "emitting {:?} on {:?} to {} handlers",
            signal,
            instance,
            handlers.len()
        );

        let mut accumulated = None;
        for handler in handlers {
            // Disconnected by an earlier handler of this emission.
            if !handler.connected.load(Ordering::SeqCst) {
                continue;
            }
            let ret = handler.closure.invoke(args);
            match accumulator {
                Accumulator::Last => {
                    if ret.is_some() {
                        accumulated = ret;
                    }
                }
                Accumulator::TrueHandled => {
                    let handled = ret.as_ref().and_then(GenericValue::as_bool) == Some(true);
                    if ret.is_some() {
                        accumulated = ret;
                    }
                    if handled {
                        break;
                    }
                }
            }
        }
        Ok(accumulated)
    }

    fn connect(
        &self,
        object: ObjectId,
        signal: SignalId,
        detail: Quark,
        closure: Arc<dyn NativeClosure>,
    ) -> Result<SubscriptionId, NativeError> {
        let owner = self
            .signals
            .read()
            .signals
            .get(signal.0 as usize)
            .map(|entry| entry.owner)
            .ok_or(NativeError::NoSuchSignal(signal))?;
        let mut objects = self.objects.lock();
        let entry = objects.get_mut(object)?;
        if !self.types.read().is_a(entry.ty, owner) {
            return Err(NativeError::SignalNotOnInstance(signal));
        }
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        entry.handlers.push(Arc::new(HandlerEntry {
            id,
            signal,
            detail,
            closure,
            connected: AtomicBool::new(true),
        }));
        Ok(id)
    }

    fn disconnect(&self, object: ObjectId, subscription: SubscriptionId) -> Result<(), NativeError> {
        let removed = {
            let mut objects = self.objects.lock();
            let entry = objects.get_mut(object)?;
            let pos = entry
                .handlers
                .iter()
                .position(|h| h.id == subscription)
                .ok_or(NativeError::NoSuchHandler(object, subscription))?;
            entry.handlers.remove(pos)
        };
        removed.connected.store(false, Ordering::SeqCst);
        drop(removed);
        Ok(())
    }

    fn get_property(&self, object: ObjectId, name: &str) -> Result<GenericValue, NativeError> {
        let (ty, value) = {
            let objects = self.objects.lock();
            let entry = objects.get(object)?;
            (entry.ty, entry.properties.get(name).cloned())
        };
        let spec_ty = {
            let types = self.types.read();
            types
                .find_property(ty, name)
                .map(|spec| spec.ty)
                .ok_or_else(|| NativeError::NoSuchProperty {
                    type_name: types.get_name(ty).unwrap_or("?").to_string(),
                    name: name.to_string(),
                })?
        };
        value
            .or_else(|| GenericValue::default_for(spec_ty))
            .ok_or_else(|| NativeError::PropertyUnset {
                name: name.to_string(),
            })
    }

    fn set_property(
        &self,
        object: ObjectId,
        name: &str,
        value: &GenericValue,
    ) -> Result<(), NativeError> {
        let ty = self.object_type(object)?;
        {
            let types = self.types.read();
            let spec = types
                .find_property(ty, name)
                .ok_or_else(|| NativeError::NoSuchProperty {
                    type_name: types.get_name(ty).unwrap_or("?").to_string(),
                    name: name.to_string(),
                })?;
            if !types.is_a(value.ty(), spec.ty) {
                return Err(NativeError::PropertyTypeMismatch {
                    name: name.to_string(),
                    expected: types.get_name(spec.ty).unwrap_or("?").to_string(),
                    got: types.get_name(value.ty()).unwrap_or("?").to_string(),
                });
            }
        }
        let previous = {
            let mut objects = self.objects.lock();
            objects
                .get_mut(object)?
                .properties
                .insert(name.to_string(), value.clone())
        };
        drop(previous);

        let Some((notify, detail)) = self.lookup_signal(&format!("notify::{}", name), ty) else {
            return Ok(());
        };
        let instance = ObjectHandle::from_borrowed(self.shared(), object);
        let args = [
            GenericValue::from_host(&HostValue::Object(instance))?,
            GenericValue::from_host(&HostValue::from(name))?,
        ];
        self.emit(notify, detail, &args)?;
        Ok(())
    }

    fn object_ref(&self, object: ObjectId) -> Result<(), NativeError> {
        let mut objects = self.objects.lock();
        objects.get_mut(object)?.ref_count += 1;
        Ok(())
    }

    fn object_unref(&self, object: ObjectId) -> Result<(), NativeError> {
        let finalized = {
            let mut objects = self.objects.lock();
            let entry = objects.get_mut(object)?;
            entry.ref_count -= 1;
            if entry.ref_count == 0 {
                objects.remove(object)
            } else {
                None
            }
        };
        if let Some(entry) = finalized {
            self.finalize(object, entry);
        }
        Ok(())
    }

    fn object_ref_sink(&self, object: ObjectId) -> Result<(), NativeError> {
        let mut objects = self.objects.lock();
        let entry = objects.get_mut(object)?;
        if entry.floating {
            entry.floating = false;
        } else {
            entry.ref_count += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Closure that counts calls and returns a fixed value.
    struct Counting {
        calls: Arc<AtomicUsize>,
        ret: Option<GenericValue>,
    }

    impl NativeClosure for Counting {
        fn invoke(&self, _params: &[GenericValue]) -> Option<GenericValue> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ret.clone()
        }
    }

    fn counting(ret: Option<GenericValue>) -> (Arc<AtomicUsize>, Arc<dyn NativeClosure>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let closure = Arc::new(Counting {
            calls: calls.clone(),
            ret,
        });
        (calls, closure)
    }

    fn bool_value(b: bool) -> GenericValue {
        GenericValue::from_host(&HostValue::Bool(b)).unwrap()
    }

    #[test]
    fn test_lookup_walks_ancestors_and_parses_detail() {
        let rt = InProcessRuntime::new();
        let widget = rt.register_object_type("Widget", Type::OBJECT, false);
        let clicked = rt.register_signal(widget, SignalSpec::new("clicked"));

        assert_eq!(rt.lookup_signal("clicked", widget), Some((clicked, Quark::NONE)));
        assert_eq!(rt.lookup_signal("clicked", Type::OBJECT), None);

        let (notify, detail) = rt.lookup_signal("notify::label", widget).expect("inherited");
        assert_eq!(rt.query_signal(notify).unwrap().name, "notify");
        assert_eq!(rt.quark_to_string(detail).as_deref(), Some("label"));

        // Details are only accepted on detailed signals.
        assert_eq!(rt.lookup_signal("clicked::x", widget), None);
        assert_eq!(rt.lookup_signal("notify::", widget), None);
    }

    #[test]
    fn test_emit_calls_handlers_in_connection_order() {
        let rt = InProcessRuntime::new();
        let obj = rt.new_object(Type::OBJECT, &[]).unwrap();
        let (notify, _) = rt.lookup_signal("notify", Type::OBJECT).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        struct Recording(Arc<Mutex<Vec<u32>>>, u32);
        impl NativeClosure for Recording {
            fn invoke(&self, _params: &[GenericValue]) -> Option<GenericValue> {
                self.0.lock().push(self.1);
                None
            }
        }
        for n in 0..3 {
            rt.connect(obj.id(), notify, Quark::NONE, Arc::new(Recording(order.clone(), n)))
                .unwrap();
        }
        let args = [obj.value().unwrap(), GenericValue::from_host(&"x".into()).unwrap()];
        rt.emit(notify, Quark::NONE, &args).unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_detail_filtering() {
        let rt = InProcessRuntime::new();
        let obj = rt.new_object(Type::OBJECT, &[]).unwrap();
        let (notify, label) = rt.lookup_signal("notify::label", Type::OBJECT).unwrap();
        let (_, other) = rt.lookup_signal("notify::other", Type::OBJECT).unwrap();

        let (any_calls, any) = counting(None);
        let (label_calls, only_label) = counting(None);
        rt.connect(obj.id(), notify, Quark::NONE, any).unwrap();
        rt.connect(obj.id(), notify, label, only_label).unwrap();

        let args = [obj.value().unwrap(), GenericValue::from_host(&"x".into()).unwrap()];
        rt.emit(notify, label, &args).unwrap();
        rt.emit(notify, other, &args).unwrap();
        rt.emit(notify, Quark::NONE, &args).unwrap();

        assert_eq!(any_calls.load(Ordering::SeqCst), 3);
        assert_eq!(label_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_true_handled_accumulator_stops_emission() {
        let rt = InProcessRuntime::new();
        let widget = rt.register_object_type("Widget", Type::OBJECT, false);
        let event = rt.register_signal(
            widget,
            SignalSpec::new("event")
                .returns(Type::BOOL)
                .accumulator(Accumulator::TrueHandled),
        );
        let obj = rt.new_object(widget, &[]).unwrap();

        let (first_calls, first) = counting(Some(bool_value(false)));
        let (second_calls, second) = counting(Some(bool_value(true)));
        let (third_calls, third) = counting(Some(bool_value(false)));
        for closure in [first, second, third] {
            rt.connect(obj.id(), event, Quark::NONE, closure).unwrap();
        }

        let ret = rt.emit(event, Quark::NONE, &[obj.value().unwrap()]).unwrap();
        assert_eq!(ret.and_then(|v| v.as_bool()), Some(true));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_true_handled_ignores_handlers_without_value() {
        let rt = InProcessRuntime::new();
        let widget = rt.register_object_type("Widget", Type::OBJECT, false);
        let event = rt.register_signal(
            widget,
            SignalSpec::new("event")
                .returns(Type::BOOL)
                .accumulator(Accumulator::TrueHandled),
        );
        let obj = rt.new_object(widget, &[]).unwrap();

        let (_, unhandled) = counting(Some(bool_value(false)));
        let (void_calls, void) = counting(None);
        rt.connect(obj.id(), event, Quark::NONE, unhandled).unwrap();
        rt.connect(obj.id(), event, Quark::NONE, void).unwrap();

        let ret = rt.emit(event, Quark::NONE, &[obj.value().unwrap()]).unwrap();
        assert_eq!(void_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ret.and_then(|v| v.as_bool()), Some(false));
    }

    #[test]
    fn test_last_accumulator_keeps_last_value() {
        let rt = InProcessRuntime::new();
        let widget = rt.register_object_type("Widget", Type::OBJECT, false);
        let query = rt.register_signal(widget, SignalSpec::new("query").returns(Type::BOOL));
        let obj = rt.new_object(widget, &[]).unwrap();

        let (_, first) = counting(Some(bool_value(true)));
        let (_, second) = counting(Some(bool_value(false)));
        rt.connect(obj.id(), query, Quark::NONE, first).unwrap();
        rt.connect(obj.id(), query, Quark::NONE, second).unwrap();

        let ret = rt.emit(query, Quark::NONE, &[obj.value().unwrap()]).unwrap();
        assert_eq!(ret.and_then(|v| v.as_bool()), Some(false));
    }

    #[test]
    fn test_signal_must_be_declared_on_instance() {
        let rt = InProcessRuntime::new();
        let widget = rt.register_object_type("Widget", Type::OBJECT, false);
        let clicked = rt.register_signal(widget, SignalSpec::new("clicked"));
        let plain = rt.new_object(Type::OBJECT, &[]).unwrap();
        let (_, closure) = counting(None);

        assert_eq!(
            rt.connect(plain.id(), clicked, Quark::NONE, closure),
            Err(NativeError::SignalNotOnInstance(clicked))
        );
        assert_eq!(
            rt.emit(clicked, Quark::NONE, &[plain.value().unwrap()]),
            Err(NativeError::SignalNotOnInstance(clicked))
        );
    }

    #[test]
    fn test_finalize_drops_handlers_and_recycles_slot() {
        let rt = InProcessRuntime::new();
        let obj = rt.new_object(Type::OBJECT, &[]).unwrap();
        let (notify, _) = rt.lookup_signal("notify", Type::OBJECT).unwrap();
        let (calls, closure) = counting(None);
        let weak = Arc::downgrade(&closure);
        rt.connect(obj.id(), notify, Quark::NONE, closure).unwrap();
        assert_eq!(rt.handler_count(obj.id()), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let old = obj.id();
        drop(obj);
        assert!(weak.upgrade().is_none(), "closure released on finalize");

        let reused = rt.new_object(Type::OBJECT, &[]).unwrap();
        assert_eq!(reused.id().index, old.index);
        assert_ne!(reused.id(), old);
        assert!(!rt.is_alive(old));
    }

    #[test]
    fn test_set_property_emits_notify_with_detail() {
        let rt = InProcessRuntime::new();
        let widget = rt.register_object_type("Widget", Type::OBJECT, false);
        rt.install_property(widget, "label", Type::STRING);
        rt.install_property(widget, "width", Type::I32);
        let obj = rt.new_object(widget, &[("label", HostValue::from("a"))]).unwrap();

        let (notify, label) = rt.lookup_signal("notify::label", widget).unwrap();
        let (calls, closure) = counting(None);
        rt.connect(obj.id(), notify, label, closure).unwrap();

        obj.set_property("width", 10i32).unwrap();
        obj.set_property("label", "b").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(obj.get_property("width").unwrap(), HostValue::I32(10));
    }

    #[test]
    fn test_disconnect_unknown_handler() {
        let rt = InProcessRuntime::new();
        let obj = rt.new_object(Type::OBJECT, &[]).unwrap();
        assert_eq!(
            rt.disconnect(obj.id(), SubscriptionId(99)),
            Err(NativeError::NoSuchHandler(obj.id(), SubscriptionId(99)))
        );
    }

    #[test]
    fn test_new_object_rejects_fundamentals() {
        let rt = InProcessRuntime::new();
        assert!(matches!(
            rt.new_object(Type::STRING, &[]),
            Err(NativeError::NotInstantiable(_))
        ));
    }
}
