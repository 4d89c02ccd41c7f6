//! Dispatch Loop
//!
//! Moves callback execution off the native thread that fired a signal and onto
//! the host tokio scheduler, while the native emission still gets its return
//! value synchronously:
//!
//! 1. the trampoline (the closure the native runtime calls) posts a
//!    `PendingMarshal` onto an unbounded FIFO and blocks on its completion
//! 2. the loop task drains the FIFO and spawns one marshal task per entry
//! 3. the marshal task looks up the handler record, converts arguments, runs
//!    the callback to completion, converts the return value and completes
//! 4. the trampoline wakes up and returns the value to the native emission
//!
//! There is no timeout: a callback that never finishes blocks its emitting
//! thread forever. Dispatch-time failures (missing record, panicking callback,
//! bad return value) are raised as a panic on the emitting thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;

use crate::error::BridgeError;
use crate::native::{NativeClosure, ObjectId, SubscriptionId};
use crate::registry::{HandlerKey, HandlerRecord, HandlerRegistry};
use crate::value::{GenericValue, HostValue};

type MarshalResult = Result<Option<GenericValue>, BridgeError>;

// =========================================================================
// Completion rendezvous
// =========================================================================

/// Write-once result slot plus the signal that it was written.
#[derive(Default)]
pub(crate) struct Completion {
    state: Mutex<CompletionState>,
    ready: Condvar,
}

#[derive(Default)]
struct CompletionState {
    done: bool,
    result: Option<MarshalResult>,
}

impl Completion {
    /// Store the result and wake the waiter. Later calls are ignored.
    fn complete(&self, result: MarshalResult) -> bool {
        let mut state = self.state.lock();
        if state.done {
            return false;
        }
        state.done = true;
        state.result = Some(result);
        self.ready.notify_all();
        true
    }

    fn is_complete(&self) -> bool {
        self.state.lock().done
    }

    /// Block until completed and take the result. Called once per marshal.
    fn wait(&self) -> MarshalResult {
        let mut state = self.state.lock();
        loop {
            if let Some(result) = state.result.take() {
                return result;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Block without starving the scheduler when called from one of its
    /// worker threads (nested emission from inside a callback).
    fn wait_blocking(&self) -> MarshalResult {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.wait())
            }
            _ => self.wait(),
        }
    }
}

/// Completes its marshal with `CallbackPanicked` if dropped before anything
/// else completed it: the marshal task unwound or was cancelled.
struct CompletionGuard {
    completion: Arc<Completion>,
    key: Arc<HandlerKey>,
}

impl CompletionGuard {
    fn complete(self, result: MarshalResult) {
        self.completion.complete(result);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.completion.is_complete() {
            let object = self.key.object();
            let subscription = self.key.subscription().unwrap_or(SubscriptionId(0));
            log::warn!(
                "callback for {:?} subscription {} did not complete",
                object,
                subscription
            );
            self.completion.complete(Err(BridgeError::CallbackPanicked {
                object,
                subscription,
            }));
        }
    }
}

// =========================================================================
// Marshal
// =========================================================================

/// One in-flight signal firing, owned by the loop until its task starts.
pub(crate) struct PendingMarshal {
    key: Arc<HandlerKey>,
    /// `[instance, params...]` as the native emission passed them.
    args: Vec<GenericValue>,
    completion: Arc<Completion>,
}

async fn marshal(registry: Arc<HandlerRegistry>, pending: PendingMarshal) {
    let PendingMarshal {
        key,
        args,
        completion,
    } = pending;
    let object = key.object();
    let guard = CompletionGuard {
        completion,
        key: key.clone(),
    };

    // A firing can arrive while Connect is still waiting on the native side.
    let subscription = key.bound().await.unwrap_or(SubscriptionId(0));
    let Some(record) = registry.lookup(&key) else {
        log::warn!(
            "dispatch for unregistered handler {:?} subscription {}",
            object,
            subscription
        );
        guard.complete(Err(BridgeError::UnregisteredHandler {
            object,
            subscription,
        }));
        return;
    };
    log::trace!(
        "marshalling {} native values for {:?} subscription {}",
        args.len(),
        object,
        subscription
    );

    let host_args = record.host_arguments(&args);
    drop(args);
    let ret = record.callback.call(host_args).await;
    let result = return_value(&record, ret);
    // Release our share of the record before the emitter resumes.
    drop(record);
    guard.complete(result);
}

/// Check a callback's return against its declared return slot and convert it.
fn return_value(record: &HandlerRecord, ret: HostValue) -> MarshalResult {
    let Some(want) = record.callback.return_type() else {
        return Ok(None);
    };
    if !ret.conforms_to(want) {
        return Err(BridgeError::InvalidReturnValue {
            expected: want.to_string(),
            got: ret.kind_name().to_string(),
        });
    }
    Ok(Some(GenericValue::from_host(&ret)?))
}

// =========================================================================
// Loop
// =========================================================================

/// Handle to the running dispatch loop. Cheap to clone.
#[derive(Clone)]
pub struct DispatchLoop {
    sender: mpsc::UnboundedSender<PendingMarshal>,
    registry: Arc<HandlerRegistry>,
    spawned: Arc<AtomicUsize>,
}

impl DispatchLoop {
    /// Spawn the loop task on `handle`. It runs until every `DispatchLoop`
    /// clone (and so every trampoline) is gone, or the runtime shuts down.
    pub fn start(handle: &Handle, registry: Arc<HandlerRegistry>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<PendingMarshal>();
        let spawned = Arc::new(AtomicUsize::new(0));

        let loop_registry = registry.clone();
        let loop_spawned = spawned.clone();
        handle.spawn(async move {
            log::debug!("dispatch loop started");
            while let Some(pending) = receiver.recv().await {
                loop_spawned.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(marshal(loop_registry.clone(), pending));
            }
            log::debug!("dispatch loop stopped");
        });

        Self {
            sender,
            registry,
            spawned,
        }
    }

    /// Number of marshal tasks spawned so far.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Post one firing and block until its callback has run.
    fn dispatch(&self, key: Arc<HandlerKey>, args: &[GenericValue]) -> MarshalResult {
        let completion = Arc::new(Completion::default());
        let pending = PendingMarshal {
            key,
            args: args.to_vec(),
            completion: completion.clone(),
        };
        if self.sender.send(pending).is_err() {
            panic!("signal dispatch loop has shut down");
        }
        completion.wait_blocking()
    }
}

impl std::fmt::Debug for DispatchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchLoop")
            .field("spawned", &self.spawned())
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

// =========================================================================
// Trampoline
// =========================================================================

/// The closure installed with the native runtime for one subscription.
///
/// Dropping it (native disconnect or object finalize) removes the handler
/// record from the registry.
pub(crate) struct Trampoline {
    key: Arc<HandlerKey>,
    dispatch: DispatchLoop,
}

impl Trampoline {
    pub(crate) fn new(key: Arc<HandlerKey>, dispatch: DispatchLoop) -> Self {
        Self { key, dispatch }
    }
}

impl NativeClosure for Trampoline {
    fn invoke(&self, params: &[GenericValue]) -> Option<GenericValue> {
        match self.dispatch.dispatch(self.key.clone(), params) {
            Ok(ret) => ret,
            Err(e) => panic!("signal dispatch failed: {}", e),
        }
    }
}

impl Drop for Trampoline {
    fn drop(&mut self) {
        let Some(subscription) = self.key.subscription() else {
            // The native connect never completed.
            return;
        };
        let removed = self
            .dispatch
            .registry
            .remove(self.key.object(), subscription);
        if removed.is_some() {
            log::debug!(
                "released handler {:?} subscription {}",
                self.key.object(),
                subscription
            );
        }
        // Dropped here, with the registry lock already released.
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Callback;
    use crate::types::TypeDescriptor;

    fn string_value(s: &str) -> GenericValue {
        GenericValue::from_host(&HostValue::from(s)).unwrap()
    }

    /// Register a record under a fake subscription and build its trampoline.
    fn install(
        dispatch: &DispatchLoop,
        object: ObjectId,
        sub: u64,
        record: HandlerRecord,
    ) -> Trampoline {
        let key = Arc::new(HandlerKey::new(object));
        dispatch
            .registry()
            .insert_with(&key, record, || Ok(SubscriptionId(sub)))
            .unwrap();
        Trampoline::new(key, dispatch.clone())
    }

    #[test]
    fn test_completion_is_write_once() {
        let completion = Completion::default();
        assert!(completion.complete(Ok(None)));
        assert!(!completion.complete(Err(BridgeError::HostRuntime("late".into()))));
        assert_eq!(completion.wait(), Ok(None));
    }

    #[test]
    fn test_guard_reports_incomplete_marshal() {
        let completion = Arc::new(Completion::default());
        drop(CompletionGuard {
            completion: completion.clone(),
            key: Arc::new(HandlerKey::new(ObjectId::new(0, 0))),
        });
        assert!(matches!(
            completion.wait(),
            Err(BridgeError::CallbackPanicked { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_trampoline_runs_callback_and_returns() {
        let dispatch = DispatchLoop::start(&Handle::current(), Arc::new(HandlerRegistry::new()));
        let cb = Callback::builder()
            .param(TypeDescriptor::String)
            .returns(TypeDescriptor::String)
            .build(|args| HostValue::String(args[0].as_str().unwrap_or_default().to_uppercase()));
        let trampoline = install(
            &dispatch,
            ObjectId::new(0, 0),
            1,
            HandlerRecord::new(cb, None, false),
        );

        // Slot 0 is the instance, skipped for this record.
        let ret = trampoline.invoke(&[GenericValue::none(), string_value("hi")]);
        assert_eq!(ret.as_ref().and_then(GenericValue::as_str), Some("HI"));
        assert_eq!(dispatch.spawned(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[should_panic(expected = "no handler registered")]
    async fn test_unregistered_handler_is_fatal() {
        let dispatch = DispatchLoop::start(&Handle::current(), Arc::new(HandlerRegistry::new()));
        let cb = Callback::builder().build(|_| HostValue::None);
        let trampoline = install(
            &dispatch,
            ObjectId::new(0, 0),
            1,
            HandlerRecord::new(cb, None, false),
        );
        dispatch.registry().remove(ObjectId::new(0, 0), SubscriptionId(1));
        trampoline.invoke(&[GenericValue::none()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[should_panic(expected = "did not complete")]
    async fn test_callback_panic_is_fatal() {
        let dispatch = DispatchLoop::start(&Handle::current(), Arc::new(HandlerRegistry::new()));
        let cb = Callback::builder().build(|_| panic!("boom"));
        let trampoline = install(
            &dispatch,
            ObjectId::new(0, 0),
            1,
            HandlerRecord::new(cb, None, false),
        );
        trampoline.invoke(&[GenericValue::none()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[should_panic(expected = "callback returned")]
    async fn test_invalid_return_value_is_fatal() {
        let dispatch = DispatchLoop::start(&Handle::current(), Arc::new(HandlerRegistry::new()));
        let cb = Callback::builder()
            .returns(TypeDescriptor::Bool)
            .build(|_| HostValue::from("not a bool"));
        let trampoline = install(
            &dispatch,
            ObjectId::new(0, 0),
            1,
            HandlerRecord::new(cb, None, false),
        );
        trampoline.invoke(&[GenericValue::none()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_firing_during_connect_waits_for_binding() {
        let dispatch = DispatchLoop::start(&Handle::current(), Arc::new(HandlerRegistry::new()));
        let key = Arc::new(HandlerKey::new(ObjectId::new(0, 0)));
        let trampoline = Arc::new(Trampoline::new(key.clone(), dispatch.clone()));
        let cb = Callback::builder()
            .returns(TypeDescriptor::Bool)
            .build(|_| HostValue::Bool(true));

        let early = trampoline.clone();
        let mut emitter = None;
        dispatch
            .registry()
            .insert_with(&key, HandlerRecord::new(cb, None, false), || {
                // Fire before the native connect hands back its id.
                emitter = Some(std::thread::spawn(move || {
                    early.invoke(&[GenericValue::none()])
                }));
                std::thread::sleep(std::time::Duration::from_millis(50));
                Ok(SubscriptionId(1))
            })
            .unwrap();

        let ret = emitter.expect("emitter").join().expect("emission");
        assert_eq!(ret.as_ref().and_then(GenericValue::as_bool), Some(true));
        assert_eq!(dispatch.spawned(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropping_trampoline_removes_record() {
        let registry = Arc::new(HandlerRegistry::new());
        let dispatch = DispatchLoop::start(&Handle::current(), registry.clone());
        let cb = Callback::builder().build(|_| HostValue::None);
        let trampoline = install(
            &dispatch,
            ObjectId::new(2, 0),
            5,
            HandlerRecord::new(cb, None, false),
        );
        assert!(registry.contains(ObjectId::new(2, 0), SubscriptionId(5)));
        drop(trampoline);
        assert!(registry.is_empty());
    }
}
