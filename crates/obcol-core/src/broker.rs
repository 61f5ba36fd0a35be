#![forbid(unsafe_code)]

//! Publish/subscribe substrate embedded in every proxy.
//!
//! # Design
//!
//! A [`NotificationBroker`] keeps an ordered subscriber list and a dirty
//! flag. [`broadcast`](NotificationBroker::broadcast) only delivers when the
//! flag was set by [`mark_dirty`](NotificationBroker::mark_dirty) since the
//! last broadcast, then clears it. Each broker owns its own flag; nothing is
//! shared between brokers.
//!
//! Subscribers are held either strongly (external observers) or weakly
//! (proxies observing proxies that their own subject already owns). Dead weak
//! entries are pruned lazily during broadcast.
//!
//! # Invariants
//!
//! 1. Delivery order is registration order.
//! 2. Registering the same observer again replaces its entry in place.
//! 3. A broadcast without a preceding `mark_dirty` delivers nothing.
//! 4. The dirty flag is cleared before delivery, so an observer that causes
//!    another change can re-arm it.
//!
//! # Failure Modes
//!
//! - **Subscriber list mutation during delivery**: safe. Live subscribers
//!   are collected before any callback runs.
//! - **Zero subscribers**: broadcast is a no-op returning 0.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Callback name used when none is given.
pub const DEFAULT_CALLBACK: &str = "update";

/// Notification timing relative to the intercepted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Before,
    After,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of change notifications.
///
/// `payload` is the notifying proxy's subject at the time of the
/// notification.
pub trait Observer {
    fn update(&self, payload: &Value, phase: Phase);
}

/// Identity of a registered subscriber (the observer's address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(usize);

impl SubscriberId {
    /// Identity of an observer held in an `Rc`.
    #[must_use]
    pub fn of<T: ?Sized>(observer: &Rc<T>) -> Self {
        Self(Rc::as_ptr(observer).cast::<()>() as usize)
    }

    fn of_weak<T: ?Sized>(observer: &Weak<T>) -> Self {
        Self(Weak::as_ptr(observer).cast::<()>() as usize)
    }
}

/// Routes notifications to a named method of `target`.
struct MethodObserver<O> {
    target: Rc<O>,
    method: fn(&O, &Value, Phase),
}

impl<O> Observer for MethodObserver<O> {
    fn update(&self, payload: &Value, phase: Phase) {
        (self.method)(&self.target, payload, phase);
    }
}

/// Adapts a closure to [`Observer`].
struct FnObserver<F>(F);

impl<F: Fn(&Value, Phase)> Observer for FnObserver<F> {
    fn update(&self, payload: &Value, phase: Phase) {
        (self.0)(payload, phase);
    }
}

enum Target {
    Strong(Rc<dyn Observer>),
    Weak(Weak<dyn Observer>),
}

impl Target {
    fn upgrade(&self) -> Option<Rc<dyn Observer>> {
        match self {
            Self::Strong(rc) => Some(Rc::clone(rc)),
            Self::Weak(weak) => weak.upgrade(),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Self::Strong(_) => true,
            Self::Weak(weak) => weak.strong_count() > 0,
        }
    }
}

struct Subscriber {
    id: SubscriberId,
    callback: Cow<'static, str>,
    target: Target,
}

/// Ordered subscriber registry with a per-broadcast dirty flag.
#[derive(Default)]
pub struct NotificationBroker {
    subscribers: RefCell<Vec<Subscriber>>,
    dirty: Cell<bool>,
}

impl fmt::Debug for NotificationBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBroker")
            .field("subscriber_count", &self.len())
            .field("dirty", &self.dirty.get())
            .finish()
    }
}

impl NotificationBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, id: SubscriberId, callback: Cow<'static, str>, target: Target) {
        let mut subscribers = self.subscribers.borrow_mut();
        if let Some(existing) = subscribers.iter_mut().find(|s| s.id == id) {
            existing.callback = callback;
            existing.target = target;
        } else {
            subscribers.push(Subscriber {
                id,
                callback,
                target,
            });
        }
    }

    /// Subscribe an observer under the default `update` callback. The broker
    /// keeps it alive.
    pub fn subscribe(&self, observer: Rc<dyn Observer>) -> SubscriberId {
        let id = SubscriberId::of(&observer);
        self.register(id, Cow::Borrowed(DEFAULT_CALLBACK), Target::Strong(observer));
        id
    }

    /// Subscribe `observer` so that notifications are delivered to `method`,
    /// recorded under `callback`.
    ///
    /// ```
    /// use std::rc::Rc;
    /// use obcol_core::{NotificationBroker, Phase, Value};
    ///
    /// struct Audit;
    /// impl Audit {
    ///     fn on_change(&self, _payload: &Value, _phase: Phase) {}
    /// }
    ///
    /// let broker = NotificationBroker::new();
    /// broker.subscribe_as(&Rc::new(Audit), "on_change", Audit::on_change);
    /// assert_eq!(broker.callbacks(), vec!["on_change".to_string()]);
    /// ```
    pub fn subscribe_as<O: 'static>(
        &self,
        observer: &Rc<O>,
        callback: impl Into<Cow<'static, str>>,
        method: fn(&O, &Value, Phase),
    ) -> SubscriberId {
        let id = SubscriberId::of(observer);
        let routed: Rc<dyn Observer> = Rc::new(MethodObserver {
            target: Rc::clone(observer),
            method,
        });
        self.register(id, callback.into(), Target::Strong(routed));
        id
    }

    /// Subscribe a closure.
    pub fn subscribe_fn(&self, f: impl Fn(&Value, Phase) + 'static) -> SubscriberId {
        let observer: Rc<dyn Observer> = Rc::new(FnObserver(f));
        let id = SubscriberId::of(&observer);
        self.register(id, Cow::Borrowed(DEFAULT_CALLBACK), Target::Strong(observer));
        id
    }

    /// Subscribe without keeping the observer alive.
    pub fn subscribe_weak(&self, observer: Weak<dyn Observer>) -> SubscriberId {
        let id = SubscriberId::of_weak(&observer);
        self.register(id, Cow::Borrowed(DEFAULT_CALLBACK), Target::Weak(observer));
        id
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn clear(&self) {
        self.subscribers.borrow_mut().clear();
    }

    /// Number of registered subscribers, including dead weak entries not yet
    /// pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.borrow().iter().any(|s| s.id == id)
    }

    /// Callback names in delivery order.
    #[must_use]
    pub fn callbacks(&self) -> Vec<String> {
        self.subscribers
            .borrow()
            .iter()
            .map(|s| s.callback.to_string())
            .collect()
    }

    /// Arm the next broadcast. Idempotent.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Deliver `(payload, phase)` to every live subscriber if armed.
    /// Returns the number of deliveries.
    pub fn broadcast(&self, payload: &Value, phase: Phase) -> usize {
        if !self.dirty.replace(false) {
            return 0;
        }

        // Collect live observers first (to avoid holding the borrow during calls).
        let live: Vec<Rc<dyn Observer>> = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.retain(|s| s.target.is_live());
            subscribers
                .iter()
                .filter_map(|s| s.target.upgrade())
                .collect()
        };

        for observer in &live {
            observer.update(payload, phase);
        }
        live.len()
    }
}
