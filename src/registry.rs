//! Handler Registry
//!
//! Maps (object identity, subscription id) to the record registered at
//! Connect time. Storage is a slot table indexed by `ObjectId.index`; each slot
//! remembers the generation it was filled for, so a record left behind by a
//! dead object can never be found through a recycled id.
//!
//! One lock guards the whole table. It is held for map operations only: never
//! across a native call or a callback, and never while a removed record is
//! dropped (dropping a record can release native references, which can
//! re-enter the registry).

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::callback::Callback;
use crate::native::{NativeError, ObjectId, SubscriptionId};
use crate::value::{GenericValue, HostValue};

/// What Connect registered for one subscription. Immutable once created.
#[derive(Debug)]
pub struct HandlerRecord {
    pub callback: Callback,
    /// Passed in callback slot #0 on every call.
    pub bound: Option<HostValue>,
    /// The emitting instance is passed after the bound argument.
    pub pass_instance: bool,
}

impl HandlerRecord {
    pub fn new(callback: Callback, bound: Option<HostValue>, pass_instance: bool) -> Self {
        Self {
            callback,
            bound,
            pass_instance,
        }
    }

    /// Build the callback's argument list from a native `[instance, params...]`
    /// vector: `[bound?] [instance?] [params...]`.
    ///
    /// # Panics
    /// If the native vector doesn't fit the slots validated at Connect time.
    pub fn host_arguments(&self, native_args: &[GenericValue]) -> Vec<HostValue> {
        let slots = self.callback.params();
        let skip = usize::from(!self.pass_instance);
        let forwarded = native_args.get(skip..).unwrap_or_default();
        let offset = usize::from(self.bound.is_some());
        assert_eq!(
            offset + forwarded.len(),
            slots.len(),
            "native emission passed {} values for {} callback slots",
            native_args.len(),
            slots.len()
        );

        let mut args = Vec::with_capacity(slots.len());
        if let Some(bound) = &self.bound {
            args.push(bound.clone());
        }
        for (value, desc) in forwarded.iter().zip(&slots[offset..]) {
            args.push(value.to_host(desc));
        }
        args
    }
}

/// Identity of one subscription as seen by its trampoline.
///
/// The subscription id is only known once the native connect returns, and
/// the native runtime may fire the closure before that. A firing that arrives
/// early waits in `bound` until Connect settles the key.
#[derive(Debug)]
pub struct HandlerKey {
    object: ObjectId,
    binding: Mutex<Binding>,
    settled: Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Pending,
    Bound(SubscriptionId),
    /// The native connect failed.
    Abandoned,
}

impl HandlerKey {
    pub fn new(object: ObjectId) -> Self {
        Self {
            object,
            binding: Mutex::new(Binding::Pending),
            settled: Notify::new(),
        }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// The bound subscription, without waiting.
    pub fn subscription(&self) -> Option<SubscriptionId> {
        match *self.binding.lock() {
            Binding::Bound(subscription) => Some(subscription),
            Binding::Pending | Binding::Abandoned => None,
        }
    }

    /// Wait until Connect settles the key. `None` if the connect failed.
    pub async fn bound(&self) -> Option<SubscriptionId> {
        loop {
            // Registered before the check, so a settle in between still wakes us.
            let settled = self.settled.notified();
            let binding = *self.binding.lock();
            match binding {
                Binding::Pending => settled.await,
                Binding::Bound(subscription) => return Some(subscription),
                Binding::Abandoned => return None,
            }
        }
    }

    fn settle(&self, binding: Binding) {
        let mut current = self.binding.lock();
        // A fresh key is created per Connect and settled exactly once.
        if *current == Binding::Pending {
            *current = binding;
        }
        drop(current);
        self.settled.notify_waiters();
    }
}

struct RegistrySlot {
    generation: u32,
    handlers: BTreeMap<SubscriptionId, Arc<HandlerRecord>>,
}

#[derive(Default)]
struct Table {
    /// Indexed by `ObjectId.index`.
    slots: Vec<Option<RegistrySlot>>,
    len: usize,
}

impl Table {
    fn slot(&self, object: ObjectId) -> Option<&RegistrySlot> {
        self.slots
            .get(object.index as usize)?
            .as_ref()
            .filter(|slot| slot.generation == object.generation)
    }

    fn slot_mut(&mut self, object: ObjectId) -> Option<&mut RegistrySlot> {
        self.slots
            .get_mut(object.index as usize)?
            .as_mut()
            .filter(|slot| slot.generation == object.generation)
    }
}

/// Process-wide subscription table.
#[derive(Default)]
pub struct HandlerRegistry {
    table: Mutex<Table>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the native `connect`, record its subscription and bind `key` to it.
    ///
    /// The native connect runs without the registry lock. The caller keeps
    /// the connected closure alive until this returns, so the record can't be
    /// released before it is inserted.
    ///
    /// Returns records left in a stale slot (from a dead object whose index
    /// was recycled) so the caller drops them after the lock is released.
    pub fn insert_with<F>(
        &self,
        key: &HandlerKey,
        record: HandlerRecord,
        connect: F,
    ) -> Result<(SubscriptionId, Vec<Arc<HandlerRecord>>), NativeError>
    where
        F: FnOnce() -> Result<SubscriptionId, NativeError>,
    {
        let subscription = match connect() {
            Ok(subscription) => subscription,
            Err(e) => {
                key.settle(Binding::Abandoned);
                return Err(e);
            }
        };

        let object = key.object;
        let mut stale = Vec::new();
        {
            let mut table = self.table.lock();
            let index = object.index as usize;
            if table.slots.len() <= index {
                table.slots.resize_with(index + 1, || None);
            }
            let fresh =
                !matches!(&table.slots[index], Some(slot) if slot.generation == object.generation);
            if fresh {
                if let Some(old) = table.slots[index].take() {
                    stale.extend(old.handlers.into_values());
                }
                table.slots[index] = Some(RegistrySlot {
                    generation: object.generation,
                    handlers: BTreeMap::new(),
                });
            }
            table.len -= stale.len();
            if let Some(slot) = table.slots[index].as_mut() {
                slot.handlers.insert(subscription, Arc::new(record));
            }
            table.len += 1;
        }
        // Only now can an early firing find the record it waits for.
        key.settle(Binding::Bound(subscription));
        Ok((subscription, stale))
    }

    /// Find the record for a key. `None` if the key isn't bound yet or its
    /// record is gone.
    pub fn lookup(&self, key: &HandlerKey) -> Option<Arc<HandlerRecord>> {
        let subscription = key.subscription()?;
        let table = self.table.lock();
        table.slot(key.object)?.handlers.get(&subscription).cloned()
    }

    pub fn contains(&self, object: ObjectId, subscription: SubscriptionId) -> bool {
        self.table
            .lock()
            .slot(object)
            .is_some_and(|slot| slot.handlers.contains_key(&subscription))
    }

    /// Remove one record and hand it back; the lock is released before the
    /// caller drops it.
    pub fn remove(
        &self,
        object: ObjectId,
        subscription: SubscriptionId,
    ) -> Option<Arc<HandlerRecord>> {
        let mut table = self.table.lock();
        let slot = table.slot_mut(object)?;
        let record = slot.handlers.remove(&subscription)?;
        if slot.handlers.is_empty() {
            table.slots[object.index as usize] = None;
        }
        table.len -= 1;
        Some(record)
    }

    /// Subscriptions registered for an object, in id order.
    pub fn subscriptions(&self, object: ObjectId) -> Vec<SubscriptionId> {
        self.table
            .lock()
            .slot(object)
            .map(|slot| slot.handlers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.table.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor;

    fn record() -> HandlerRecord {
        let cb = Callback::builder().build(|_| HostValue::None);
        HandlerRecord::new(cb, None, false)
    }

    fn insert(registry: &HandlerRegistry, object: ObjectId, sub: u64) -> HandlerKey {
        let key = HandlerKey::new(object);
        registry
            .insert_with(&key, record(), || Ok(SubscriptionId(sub)))
            .expect("connect");
        key
    }

    #[test]
    fn test_insert_binds_key_and_lookup_finds_record() {
        let registry = HandlerRegistry::new();
        let obj = ObjectId::new(3, 0);
        let key = insert(&registry, obj, 7);

        assert_eq!(key.subscription(), Some(SubscriptionId(7)));
        assert!(registry.lookup(&key).is_some());
        assert!(registry.contains(obj, SubscriptionId(7)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unbound_key_is_a_miss() {
        let registry = HandlerRegistry::new();
        insert(&registry, ObjectId::new(0, 0), 1);
        assert!(registry.lookup(&HandlerKey::new(ObjectId::new(0, 0))).is_none());
    }

    #[test]
    fn test_failed_connect_leaves_registry_unchanged() {
        let registry = HandlerRegistry::new();
        let key = HandlerKey::new(ObjectId::new(0, 0));
        let err = registry
            .insert_with(&key, record(), || Err(NativeError::DeadObject(ObjectId::new(0, 0))))
            .unwrap_err();
        assert_eq!(err, NativeError::DeadObject(ObjectId::new(0, 0)));
        assert!(registry.is_empty());
        assert_eq!(key.subscription(), None);
    }

    #[tokio::test]
    async fn test_failed_connect_releases_waiters() {
        let registry = HandlerRegistry::new();
        let key = HandlerKey::new(ObjectId::new(0, 0));
        let _ = registry.insert_with(&key, record(), || {
            Err(NativeError::DeadObject(ObjectId::new(0, 0)))
        });
        assert_eq!(key.bound().await, None);
    }

    #[test]
    fn test_native_connect_runs_without_the_lock() {
        let registry = HandlerRegistry::new();
        let obj = ObjectId::new(0, 0);
        insert(&registry, obj, 1);

        // A native connect that reads the table would hang on a held lock.
        let key = HandlerKey::new(obj);
        registry
            .insert_with(&key, record(), || {
                assert_eq!(registry.len(), 1);
                assert!(registry.contains(obj, SubscriptionId(1)));
                assert_eq!(key.subscription(), None);
                Ok(SubscriptionId(2))
            })
            .unwrap();
        assert_eq!(key.subscription(), Some(SubscriptionId(2)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_stale_generation_never_matches() {
        let registry = HandlerRegistry::new();
        let old = ObjectId::new(1, 0);
        let old_key = insert(&registry, old, 1);

        // Same slot, next generation: the old record is evicted and returned.
        let new = ObjectId::new(1, 1);
        let new_key = HandlerKey::new(new);
        let (_, stale) = registry
            .insert_with(&new_key, record(), || Ok(SubscriptionId(1)))
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert!(registry.lookup(&old_key).is_none());
        assert!(registry.lookup(&new_key).is_some());
        assert!(!registry.contains(old, SubscriptionId(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = HandlerRegistry::new();
        let a = ObjectId::new(0, 0);
        let b = ObjectId::new(1, 0);
        insert(&registry, a, 1);
        insert(&registry, a, 2);
        insert(&registry, b, 3);
        assert_eq!(registry.subscriptions(a), vec![SubscriptionId(1), SubscriptionId(2)]);

        assert!(registry.remove(a, SubscriptionId(1)).is_some());
        assert!(registry.remove(a, SubscriptionId(1)).is_none());
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(b, SubscriptionId(3)).is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.subscriptions(b).is_empty());
        assert_eq!(registry.subscriptions(a), vec![SubscriptionId(2)]);
    }

    #[test]
    fn test_host_arguments_slot_order() {
        let rt = crate::native::in_process::InProcessRuntime::new();
        let obj = rt.new_object(crate::types::Type::OBJECT, &[]).unwrap();
        let native_args = vec![
            obj.value().unwrap(),
            GenericValue::from_host(&HostValue::from("v")).unwrap(),
        ];
        let cb = Callback::builder()
            .param(TypeDescriptor::I64)
            .param(TypeDescriptor::object("Object"))
            .param(TypeDescriptor::String)
            .build(|_| HostValue::None);

        let with_instance = HandlerRecord::new(cb.clone(), Some(HostValue::I64(9)), true);
        let args = with_instance.host_arguments(&native_args);
        assert_eq!(args[0], HostValue::I64(9));
        assert_eq!(args[1].as_object(), Some(&obj));
        assert_eq!(args[2], HostValue::from("v"));

        let cb = Callback::builder()
            .param(TypeDescriptor::I64)
            .param(TypeDescriptor::String)
            .build(|_| HostValue::None);
        let no_instance = HandlerRecord::new(cb, Some(HostValue::I64(9)), false);
        let args = no_instance.host_arguments(&native_args);
        assert_eq!(args, vec![HostValue::I64(9), HostValue::from("v")]);
    }
}
