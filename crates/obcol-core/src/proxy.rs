#![forbid(unsafe_code)]

//! Transparent observable wrapper around a map or sequence.
//!
//! # Design
//!
//! An [`ObservableProxy`] owns a subject [`Container`] for notification
//! purposes and routes every operation through one interception path:
//!
//! 1. Unless a lock batch is active on this proxy, broadcast
//!    `(subject, before)`.
//! 2. Forward the operation to the subject. Errors propagate unchanged and
//!    abort the call.
//! 3. Adopt the result:
//!    - already a proxy: observe it and return it as is;
//!    - a raw container other than the subject: wrap it in a new proxy with
//!      the same lock file, observe it, return the wrapper;
//!    - anything else (scalars, or the subject itself as returned by `push`
//!      and friends): return it raw.
//! 4. If the operation is mutating, or `always_update_after` is set,
//!    broadcast `(subject, after)`.
//!
//! A proxy observes the proxies it hands out. When one of them emits
//! `after`, the parent re-emits `after` with its *own* subject, so a change
//! three levels down reaches the root subscriber as a single root-level
//! `after`. `before` events are not bubbled.
//!
//! # Ownership
//!
//! Observation edges point from child to parent. A wrapper minted by a proxy
//! holds its parent strongly: callers may drop intermediate proxies of a
//! chain (`root.get("a")?.get("b")?`) and changes still reach the root.
//! A proxy that was already stored inside the parent's subject is linked
//! weakly, because the subject owns it and a strong back-link would be a
//! reference cycle.
//!
//! # Invariants
//!
//! 1. Exactly one wrapper is created per container-valued result.
//! 2. A descendant `after` produces one `after` at every live ancestor.
//! 3. While locked, this proxy skips its per-call `before` only; `after`
//!    emission and bubbling are unchanged.
//! 4. A proxy never observes itself. An `after` raised while the same
//!    proxy is still delivering one is deferred, not nested: if some
//!    operation changed a container since the running delivery began, one
//!    more `after` follows once it returns. A re-entrant `after` with no
//!    change behind it is the echo of this proxy's own emission and is
//!    dropped, so mutually observing proxies terminate.
//!
//! # Failure Modes
//!
//! - **Unsupported operation**: the subject's error is returned verbatim
//!   after `before` was emitted; no `after` follows.
//! - **Unknown operation name** (`invoke_named`): fails before anything is
//!   emitted.
//! - **Cycles through inserted wrappers**: inserting a wrapper into one of
//!   its own ancestors links it weakly on the next read, which breaks the
//!   cycle; until then both stay alive.

use std::borrow::Cow;
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::broker::{NotificationBroker, Observer, Phase, SubscriberId};
use crate::container::{Container, ContainerKind};
use crate::error::{Error, Result};
use crate::lock;
use crate::ops::Op;
use crate::options::ProxyOptions;
use crate::value::{Key, Value};

thread_local! {
    /// Bumped by every intercepted operation that is about to emit `after`.
    static CHANGE_EPOCH: Cell<u64> = const { Cell::new(0) };
}

fn change_epoch() -> u64 {
    CHANGE_EPOCH.with(Cell::get)
}

fn record_change() {
    CHANGE_EPOCH.with(|epoch| epoch.set(epoch.get().wrapping_add(1)));
}

struct ProxyInner {
    subject: Container,
    options: ProxyOptions,
    locked: Cell<bool>,
    /// Epoch at the start of the running `after` delivery, if any.
    delivering: Cell<Option<u64>>,
    /// A change arrived while delivering; one more `after` is owed.
    pending: Cell<bool>,
    broker: NotificationBroker,
}

/// Clears the delivery state, also when a subscriber unwinds.
struct Delivery<'a>(&'a ProxyInner);

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        self.0.delivering.set(None);
        self.0.pending.set(false);
    }
}

impl ProxyInner {
    fn emit(&self, phase: Phase) -> usize {
        self.broker.mark_dirty();
        self.broker.broadcast(&self.subject.to_value(), phase)
    }

    /// Emit `after`, or defer it when this proxy is already delivering one.
    ///
    /// Returns the number of deliveries made by this call; zero when the
    /// `after` was deferred or dropped as an echo.
    fn emit_after(&self) -> usize {
        if let Some(started) = self.delivering.get() {
            if change_epoch() != started {
                self.pending.set(true);
            }
            return 0;
        }

        let _delivery = Delivery(self);
        let mut delivered = 0;
        loop {
            self.delivering.set(Some(change_epoch()));
            delivered += self.emit(Phase::After);
            if !self.pending.replace(false) {
                break;
            }
            debug!(kind = %self.subject.kind(), "re-emitting after deferred change");
        }
        delivered
    }
}

impl Observer for ProxyInner {
    /// Bubbling handler. The descendant's payload is discarded: only the
    /// fact that something below changed is propagated.
    fn update(&self, _payload: &Value, phase: Phase) {
        if phase != Phase::After {
            return;
        }
        let delivered = self.emit_after();
        trace!(kind = %self.subject.kind(), delivered, "bubbled after");
    }
}

/// Results of forwarded operations; only values can hold containers.
trait Adopt: Sized {
    fn adopt(self, _parent: &ObservableProxy) -> Self {
        self
    }
}

impl Adopt for Value {
    fn adopt(self, parent: &ObservableProxy) -> Self {
        parent.adopt_value(self)
    }
}

impl Adopt for usize {}
impl Adopt for bool {}
impl Adopt for String {}

/// A map or sequence that notifies subscribers about every operation.
///
/// Cloning a proxy creates a new handle to the **same** proxy: both share
/// the subject, options and subscribers.
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use obcol_core::{create, Phase, ProxyOptions, Value};
///
/// let root = create(Value::empty_map(), None, ProxyOptions::default())
///     .into_proxy()
///     .unwrap();
/// let changes = Rc::new(Cell::new(0));
/// let seen = Rc::clone(&changes);
/// root.subscribe_fn(move |_, phase| {
///     if phase == Phase::After {
///         seen.set(seen.get() + 1);
///     }
/// });
///
/// root.set("config", Value::empty_map()).unwrap();
/// let config = root.get("config").unwrap().into_proxy().unwrap();
/// config.set("depth", 3).unwrap();
/// assert_eq!(changes.get(), 2);
/// ```
#[derive(Clone)]
pub struct ObservableProxy {
    inner: Rc<ProxyInner>,
}

impl fmt::Debug for ObservableProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableProxy")
            .field("subject", &self.inner.subject)
            .field("subscriber_count", &self.inner.broker.len())
            .field("locked", &self.inner.locked.get())
            .finish()
    }
}

/// Renders the subject without intercepting anything.
impl fmt::Display for ObservableProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.subject, f)
    }
}

/// Wrap `subject` if it is a raw map or sequence and subscribe `observer`
/// to the new proxy. Everything else, including values that are already
/// observed, is returned unchanged.
pub fn create(
    subject: impl Into<Value>,
    observer: Option<Rc<dyn Observer>>,
    options: ProxyOptions,
) -> Value {
    let subject = subject.into();
    match Container::from_value(&subject) {
        Some(container) => {
            let proxy = ObservableProxy::new(container, options);
            if let Some(observer) = observer {
                proxy.subscribe(observer);
            }
            Value::Observed(proxy)
        }
        None => subject,
    }
}

impl ObservableProxy {
    /// Wrap `subject`. The proxy starts with no subscribers.
    #[must_use]
    pub fn new(subject: Container, options: ProxyOptions) -> Self {
        Self {
            inner: Rc::new(ProxyInner {
                subject,
                options,
                locked: Cell::new(false),
                delivering: Cell::new(None),
                pending: Cell::new(false),
                broker: NotificationBroker::new(),
            }),
        }
    }

    /// The wrapped container. Operations on it are not intercepted.
    #[must_use]
    pub fn subject(&self) -> &Container {
        &self.inner.subject
    }

    #[must_use]
    pub fn kind(&self) -> ContainerKind {
        self.inner.subject.kind()
    }

    #[must_use]
    pub fn options(&self) -> &ProxyOptions {
        &self.inner.options
    }

    /// Whether a lock batch is active on this proxy.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.locked.get()
    }

    pub(crate) fn set_locked(&self, locked: bool) {
        self.inner.locked.set(locked);
    }

    /// Whether both handles refer to the same proxy.
    #[must_use]
    pub fn ptr_eq(&self, other: &ObservableProxy) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn broker(&self) -> &NotificationBroker {
        &self.inner.broker
    }

    // -- subscribers ------------------------------------------------------

    /// Subscribe under the default `update` callback.
    pub fn subscribe(&self, observer: Rc<dyn Observer>) -> SubscriberId {
        self.inner.broker.subscribe(observer)
    }

    /// Subscribe with notifications routed to `method`, recorded as
    /// `callback`.
    pub fn subscribe_as<O: 'static>(
        &self,
        observer: &Rc<O>,
        callback: impl Into<Cow<'static, str>>,
        method: fn(&O, &Value, Phase),
    ) -> SubscriberId {
        self.inner.broker.subscribe_as(observer, callback, method)
    }

    pub fn subscribe_fn(&self, f: impl Fn(&Value, Phase) + 'static) -> SubscriberId {
        self.inner.broker.subscribe_fn(f)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.broker.unsubscribe(id)
    }

    pub fn clear_subscribers(&self) {
        self.inner.broker.clear();
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.broker.len()
    }

    /// Make this proxy bubble `after` events from `child`, the same link it
    /// creates for wrappers it returns.
    pub fn watch(&self, child: &ObservableProxy) {
        if !child.ptr_eq(self) {
            child.inner.broker.subscribe(self.as_observer());
        }
    }

    fn as_observer(&self) -> Rc<dyn Observer> {
        Rc::clone(&self.inner) as Rc<dyn Observer>
    }

    fn as_weak_observer(&self) -> Weak<dyn Observer> {
        Rc::downgrade(&self.inner) as Weak<dyn Observer>
    }

    /// Broadcast `(subject, phase)` to this proxy's subscribers.
    pub(crate) fn emit(&self, phase: Phase) -> usize {
        self.inner.emit(phase)
    }

    // -- interception -----------------------------------------------------

    fn intercept<R: Adopt>(
        &self,
        op: Op,
        forward: impl FnOnce(&Container) -> Result<R>,
    ) -> Result<R> {
        let inner = &self.inner;
        let locked = inner.locked.get();
        trace!(op = op.name(), mutating = op.is_mutating(), locked, "intercept");

        if !locked {
            inner.emit(Phase::Before);
        }
        let result = forward(&inner.subject)?.adopt(self);
        if op.is_mutating() || inner.options.always_update_after {
            record_change();
            inner.emit_after();
        }
        Ok(result)
    }

    fn adopt_value(&self, result: Value) -> Value {
        if let Value::Observed(child) = &result {
            if !child.ptr_eq(self) {
                child.inner.broker.subscribe_weak(self.as_weak_observer());
                trace!(kind = %child.kind(), "observing stored proxy");
            }
            return result;
        }
        match Container::from_value(&result) {
            Some(subject) if !subject.ptr_eq(&self.inner.subject) => {
                trace!(kind = %subject.kind(), "wrapping nested container");
                let child = ObservableProxy::new(subject, self.inner.options.for_child());
                child.inner.broker.subscribe(self.as_observer());
                Value::Observed(child)
            }
            _ => result,
        }
    }

    /// Run any callback-free operation with positional arguments.
    pub fn invoke(&self, op: Op, args: &[Value]) -> Result<Value> {
        self.intercept(op, |subject| subject.apply(op, args))
    }

    /// Run an operation by name (canonical or alias).
    pub fn invoke_named(&self, name: &str, args: &[Value]) -> Result<Value> {
        let op = Op::from_name(name).ok_or_else(|| Error::UnsupportedOperation {
            op: name.to_owned(),
            kind: self.kind(),
        })?;
        self.invoke(op, args)
    }

    // -- reads ------------------------------------------------------------

    /// Element at `key`, or null. Nested containers come back wrapped.
    pub fn get(&self, key: impl Into<Key>) -> Result<Value> {
        let key = key.into();
        self.intercept(Op::Get, |subject| subject.get(&key))
    }

    pub fn fetch(&self, key: impl Into<Key>) -> Result<Value> {
        let key = key.into();
        self.intercept(Op::Fetch, |subject| subject.fetch(&key))
    }

    pub fn len(&self) -> Result<usize> {
        self.intercept(Op::Len, |subject| Ok(subject.len()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.intercept(Op::IsEmpty, |subject| Ok(subject.is_empty()))
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        self.intercept(Op::ContainsKey, |subject| subject.contains_key(key))
    }

    pub fn contains(&self, needle: &Value) -> Result<bool> {
        self.intercept(Op::Contains, |subject| Ok(subject.contains(needle)))
    }

    pub fn keys(&self) -> Result<Value> {
        self.intercept(Op::Keys, Container::keys)
    }

    pub fn values(&self) -> Result<Value> {
        self.intercept(Op::Values, Container::values)
    }

    pub fn first(&self) -> Result<Value> {
        self.intercept(Op::First, |subject| Ok(subject.first()))
    }

    pub fn last(&self) -> Result<Value> {
        self.intercept(Op::Last, Container::last)
    }

    /// Shallow copy of the subject, returned wrapped.
    pub fn dup(&self) -> Result<Value> {
        self.intercept(Op::Dup, |subject| Ok(subject.dup()))
    }

    /// Intercepted string conversion. Unlike `Display`, this notifies.
    pub fn inspect(&self) -> Result<String> {
        self.intercept(Op::Inspect, |subject| Ok(subject.inspect()))
    }

    // -- writes -----------------------------------------------------------

    /// Store `value` at `key`, returning the previous element.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<Value> {
        let (key, value) = (key.into(), value.into());
        self.intercept(Op::Set, |subject| subject.set(key, value))
    }

    /// Append. Returns the raw subject.
    pub fn push(&self, value: impl Into<Value>) -> Result<Value> {
        let value = value.into();
        self.intercept(Op::Push, |subject| subject.push(value))
    }

    pub fn pop(&self) -> Result<Value> {
        self.intercept(Op::Pop, Container::pop)
    }

    pub fn shift(&self) -> Result<Value> {
        self.intercept(Op::Shift, Container::shift)
    }

    pub fn unshift(&self, value: impl Into<Value>) -> Result<Value> {
        let value = value.into();
        self.intercept(Op::Unshift, |subject| subject.unshift(value))
    }

    pub fn insert(&self, index: i64, value: impl Into<Value>) -> Result<Value> {
        let value = value.into();
        self.intercept(Op::Insert, |subject| subject.insert(index, value))
    }

    /// Remove by key or index, returning the removed element.
    pub fn remove(&self, key: impl Into<Key>) -> Result<Value> {
        let key = key.into();
        self.intercept(Op::Remove, |subject| subject.remove(&key))
    }

    pub fn remove_value(&self, needle: &Value) -> Result<Value> {
        self.intercept(Op::RemoveValue, |subject| Ok(subject.remove_value(needle)))
    }

    pub fn clear(&self) -> Result<Value> {
        self.intercept(Op::Clear, |subject| Ok(subject.clear()))
    }

    pub fn concat(&self, other: &Value) -> Result<Value> {
        self.intercept(Op::Concat, |subject| subject.concat(other))
    }

    pub fn merge(&self, other: &Value) -> Result<Value> {
        self.intercept(Op::Merge, |subject| subject.merge(other))
    }

    pub fn replace(&self, other: &Value) -> Result<Value> {
        self.intercept(Op::Replace, |subject| subject.replace(other))
    }

    pub fn retain(&self, keep: impl FnMut(&Value) -> bool) -> Result<Value> {
        self.intercept(Op::Retain, |subject| subject.retain(keep))
    }

    pub fn retain_pairs(&self, keep: impl FnMut(&str, &Value) -> bool) -> Result<Value> {
        self.intercept(Op::Retain, |subject| subject.retain_pairs(keep))
    }

    pub fn reject(&self, reject: impl FnMut(&Value) -> bool) -> Result<Value> {
        self.intercept(Op::RejectIf, |subject| subject.reject(reject))
    }

    pub fn reject_pairs(&self, reject: impl FnMut(&str, &Value) -> bool) -> Result<Value> {
        self.intercept(Op::RejectIf, |subject| subject.reject_pairs(reject))
    }

    /// Drop null elements (or null-valued entries).
    pub fn compact(&self) -> Result<Value> {
        self.intercept(Op::Compact, |subject| Ok(subject.compact()))
    }

    pub fn map_in_place(&self, f: impl FnMut(&Value) -> Value) -> Result<Value> {
        self.intercept(Op::MapInPlace, |subject| subject.map_in_place(f))
    }

    pub fn sort(&self) -> Result<Value> {
        self.intercept(Op::Sort, Container::sort)
    }

    pub fn sort_by_key(&self, key: impl FnMut(&Value) -> Value) -> Result<Value> {
        self.intercept(Op::SortBy, |subject| subject.sort_by_key(key))
    }

    pub fn reverse(&self) -> Result<Value> {
        self.intercept(Op::Reverse, Container::reverse)
    }

    pub fn rotate(&self, count: i64) -> Result<Value> {
        self.intercept(Op::Rotate, |subject| subject.rotate(count))
    }

    pub fn dedup(&self) -> Result<Value> {
        self.intercept(Op::Dedup, Container::dedup)
    }

    pub fn fill(&self, value: impl Into<Value>) -> Result<Value> {
        let value = value.into();
        self.intercept(Op::Fill, |subject| subject.fill(value))
    }

    // -- iteration --------------------------------------------------------

    /// Visit each element (map entries as `[key, value]` pairs). Counts as
    /// a mutation.
    pub fn each(&self, f: impl FnMut(&Value)) -> Result<Value> {
        self.intercept(Op::Each, |subject| Ok(subject.each(f)))
    }

    pub fn each_pair(&self, f: impl FnMut(&str, &Value)) -> Result<Value> {
        self.intercept(Op::EachPair, |subject| subject.each_pair(f))
    }

    pub fn each_key(&self, f: impl FnMut(&str)) -> Result<Value> {
        self.intercept(Op::EachKey, |subject| subject.each_key(f))
    }

    pub fn each_value(&self, f: impl FnMut(&Value)) -> Result<Value> {
        self.intercept(Op::EachValue, |subject| subject.each_value(f))
    }

    // -- locking ----------------------------------------------------------

    /// Run `body` while holding the exclusive lock on this proxy's lock
    /// file. See [`run_locked`](crate::run_locked).
    pub fn lock<R>(&self, body: impl FnOnce(&ObservableProxy) -> R) -> Result<R> {
        lock::run_locked(self, body)
    }

    /// Like [`lock`](Self::lock) for bodies that return their own `Result`.
    pub fn lock_with<T, E>(
        &self,
        body: impl FnOnce(&ObservableProxy) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        self.lock(body)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Recorder;
    use serde_json::json;

    fn observed(json: serde_json::Value, recorder: &Rc<Recorder>) -> ObservableProxy {
        create(Value::from(json), Some(recorder.clone()), ProxyOptions::default())
            .into_proxy()
            .expect("containers are wrapped")
    }

    #[test]
    fn set_brackets_with_before_and_after() {
        let rec = Recorder::new();
        let h = observed(json!({}), &rec);
        h.set("a", "x").unwrap();

        assert_eq!(
            rec.events(),
            vec![
                (Phase::Before, json!({})),
                (Phase::After, json!({"a": "x"})),
            ]
        );
        assert_eq!(h.get("a").unwrap(), Value::from("x"));
    }

    #[test]
    fn reads_emit_before_only() {
        let rec = Recorder::new();
        let h = observed(json!({"a": 1}), &rec);
        assert_eq!(h.len().unwrap(), 1);
        assert!(h.contains_key("a").unwrap());
        h.inspect().unwrap();
        assert_eq!(rec.count(Phase::After), 0);
        assert_eq!(rec.count(Phase::Before), 3);
    }

    #[test]
    fn always_update_after_notifies_reads() {
        let rec = Recorder::new();
        let h = create(
            Value::from(json!({"foo": "bar"})),
            Some(rec.clone()),
            ProxyOptions::new().with_always_update_after(true),
        )
        .into_proxy()
        .unwrap();
        assert_eq!(h.inspect().unwrap(), r#"{"foo":"bar"}"#);
        assert_eq!(rec.count(Phase::After), 1);
    }

    #[test]
    fn scalars_pass_through_create() {
        let rec = Recorder::new();
        let v = create(42, Some(rec.clone()), ProxyOptions::default());
        assert_eq!(v.as_i64(), Some(42));
        assert!(!v.is_observed());
    }

    #[test]
    fn observed_values_pass_through_create() {
        let rec = Recorder::new();
        let first = observed(json!([]), &rec);
        let again = create(Value::Observed(first.clone()), None, ProxyOptions::default());
        assert!(again.as_proxy().unwrap().ptr_eq(&first));
    }

    #[test]
    fn nested_mutation_bubbles_once_with_root_payload() {
        let rec = Recorder::new();
        let root = observed(json!({"a": {"b": {}}}), &rec);

        root.get("a")
            .unwrap()
            .into_proxy()
            .unwrap()
            .get("b")
            .unwrap()
            .into_proxy()
            .unwrap()
            .set("c", 1)
            .unwrap();

        let afters = rec.payloads(Phase::After);
        assert_eq!(afters, vec![json!({"a": {"b": {"c": 1}}})]);
    }

    #[test]
    fn dropped_intermediate_still_bubbles() {
        let rec = Recorder::new();
        let root = observed(json!({"a": {"b": {}}}), &rec);
        let b = {
            let a = root.get("a").unwrap().into_proxy().unwrap();
            a.get("b").unwrap().into_proxy().unwrap()
        };
        b.set("c", 1).unwrap();
        assert_eq!(rec.count(Phase::After), 1);
    }

    #[test]
    fn push_returns_raw_subject() {
        let rec = Recorder::new();
        let arr = observed(json!([]), &rec);
        let out = arr.push(1).unwrap();
        assert!(!out.is_observed());
        assert!(arr.subject().is_handle_of(&out));
    }

    #[test]
    fn stored_proxy_is_not_wrapped_twice() {
        let outer = Recorder::new();
        let inner = Recorder::new();
        let arr = observed(json!([]), &outer);
        let map = observed(json!({}), &inner);
        arr.push(Value::Observed(map.clone())).unwrap();

        let last = arr.last().unwrap().into_proxy().unwrap();
        assert!(last.ptr_eq(&map));
        // Reading twice does not register the parent twice.
        arr.last().unwrap();
        assert_eq!(map.subscriber_count(), 2);

        outer.reset();
        last.set("k", 1).unwrap();
        assert_eq!(inner.count(Phase::After), 1);
        assert_eq!(outer.payloads(Phase::After), vec![json!([{"k": 1}])]);
    }

    #[test]
    fn stored_proxy_link_is_weak() {
        let rec = Recorder::new();
        let map = observed(json!({}), &rec);
        {
            let arr = observed(json!([]), &Recorder::new());
            arr.push(Value::Observed(map.clone())).unwrap();
            arr.last().unwrap();
        }
        map.set("k", 1).unwrap();
        assert_eq!(map.subscriber_count(), 1);
    }

    #[test]
    fn new_containers_from_reads_are_wrapped() {
        let rec = Recorder::new();
        let h = observed(json!({"a": 1}), &rec);
        let copy = h.dup().unwrap().into_proxy().unwrap();
        assert!(!copy.subject().ptr_eq(h.subject()));

        let values = h.values().unwrap();
        assert!(values.is_observed());
        assert_eq!(values.to_json(), json!([1]));
    }

    #[test]
    fn unsupported_operation_propagates() {
        let rec = Recorder::new();
        let h = observed(json!({}), &rec);
        let err = h.push(1).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { kind: ContainerKind::Map, .. }));
        assert_eq!(rec.count(Phase::Before), 1);
        assert_eq!(rec.count(Phase::After), 0);
    }

    #[test]
    fn invoke_named_runs_through_interception() {
        let rec = Recorder::new();
        let h = observed(json!({}), &rec);
        h.invoke_named("store", &[Value::from("a"), Value::Int(1)]).unwrap();
        assert_eq!(rec.count(Phase::After), 1);
        assert_eq!(h.invoke(Op::Get, &[Value::from("a")]).unwrap(), Value::Int(1));

        let err = h.invoke_named("frobnicate", &[]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
    }

    #[test]
    fn each_counts_as_mutation() {
        let rec = Recorder::new();
        let arr = observed(json!([1, 2]), &rec);
        let mut total = 0;
        arr.each(|v| total += v.as_i64().unwrap_or(0)).unwrap();
        assert_eq!(total, 3);
        assert_eq!(rec.count(Phase::After), 1);
    }

    #[test]
    fn mutually_watching_proxies_terminate() {
        let rec = Recorder::new();
        let a = observed(json!({}), &rec);
        let b = observed(json!({}), &Recorder::new());
        a.watch(&b);
        b.watch(&a);
        a.set("x", 1).unwrap();
        assert_eq!(rec.count(Phase::After), 1);
    }

    #[test]
    fn change_made_during_after_delivery_is_delivered_too() {
        let root = create(Value::from(json!({"child": {}})), None, ProxyOptions::default())
            .into_proxy()
            .unwrap();
        let child = root.get("child").unwrap().into_proxy().unwrap();
        let stamped = Rc::new(Cell::new(false));
        let once = Rc::clone(&stamped);
        root.subscribe_fn(move |_, phase| {
            if phase == Phase::After && !once.replace(true) {
                child.set("stamp", 1).unwrap();
            }
        });
        let rec = Recorder::new();
        root.subscribe(rec.clone());

        root.set("n", 1).unwrap();

        assert!(stamped.get());
        assert_eq!(rec.count(Phase::After), 2);
        assert_eq!(
            rec.payloads(Phase::After).last(),
            Some(&json!({"child": {"stamp": 1}, "n": 1}))
        );
    }

    #[test]
    fn subscriber_writing_back_to_the_root_gets_another_after() {
        let rec = Recorder::new();
        let h = observed(json!([]), &rec);
        let handle = h.clone();
        let wrote = Rc::new(Cell::new(false));
        let once = Rc::clone(&wrote);
        h.subscribe_fn(move |_, phase| {
            if phase == Phase::After && !once.replace(true) {
                handle.push("echo").unwrap();
            }
        });

        h.push(1).unwrap();

        assert_eq!(rec.count(Phase::After), 2);
        assert_eq!(rec.payloads(Phase::After)[1], json!([1, "echo"]));
        assert_eq!(rec.count(Phase::Before), 2);
    }

    #[test]
    fn panicking_subscriber_does_not_wedge_delivery() {
        let rec = Recorder::new();
        let h = observed(json!([]), &rec);
        let armed = Rc::new(Cell::new(true));
        let trip = Rc::clone(&armed);
        h.subscribe_fn(move |_, phase| {
            if phase == Phase::After && trip.replace(false) {
                panic!("subscriber failed");
            }
        });

        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| h.push(1).unwrap()));
        assert!(outcome.is_err());
        h.push(2).unwrap();
        assert_eq!(rec.count(Phase::After), 2);
        assert_eq!(rec.payloads(Phase::After)[1], json!([1, 2]));
    }

    #[test]
    fn oversized_insert_fails_without_after() {
        let rec = Recorder::new();
        let h = observed(json!([1]), &rec);
        assert!(matches!(
            h.insert(i64::MAX / 2, 1),
            Err(Error::IndexOutOfRange { len: 1, .. })
        ));
        assert!(h.set(i64::MAX, 1).is_err());
        assert_eq!(rec.count(Phase::Before), 2);
        assert_eq!(rec.count(Phase::After), 0);
        assert_eq!(h.subject().to_json(), json!([1]));
    }

    #[test]
    fn reject_and_compact_notify() {
        let rec = Recorder::new();
        let h = observed(json!([1, null, 2]), &rec);
        h.compact().unwrap();
        h.reject(|v| v == &Value::Int(2)).unwrap();
        assert_eq!(
            rec.payloads(Phase::After),
            vec![json!([1, 2]), json!([1])]
        );
        assert!(h.invoke_named("reject!", &[]).is_err());
        assert_eq!(h.invoke_named("compact!", &[]).unwrap().to_json(), json!([1]));
    }

    #[test]
    fn proxy_never_watches_itself() {
        let rec = Recorder::new();
        let a = observed(json!({}), &rec);
        a.watch(&a);
        assert_eq!(a.subscriber_count(), 1);
    }

    #[test]
    fn named_callback_routing() {
        struct Special {
            hits: Cell<u32>,
        }
        impl Special {
            fn special_update(&self, _payload: &Value, phase: Phase) {
                if phase == Phase::After {
                    self.hits.set(self.hits.get() + 1);
                }
            }
        }

        let h = ObservableProxy::new(Container::new_map(), ProxyOptions::default());
        let special = Rc::new(Special { hits: Cell::new(0) });
        h.subscribe_as(&special, "special_update", Special::special_update);
        h.set("a", "foo").unwrap();
        assert_eq!(special.hits.get(), 1);
        assert_eq!(h.broker().callbacks(), vec!["special_update".to_string()]);
    }

    #[test]
    fn display_does_not_notify() {
        let rec = Recorder::new();
        let h = observed(json!({"a": 1}), &rec);
        assert_eq!(h.to_string(), r#"{"a":1}"#);
        assert!(format!("{h:?}").contains("ObservableProxy"));
        assert!(rec.events().is_empty());
    }
}
