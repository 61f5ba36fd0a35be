#![forbid(unsafe_code)]

//! Observable nested collections.
//!
//! This crate provides:
//! - [`ObservableProxy`], a map or sequence wrapper that notifies
//!   subscribers before and after each operation and wraps nested
//!   collections it hands out, so changes anywhere in a tree reach the root
//! - [`NotificationBroker`] for ordered subscriber registration and phased
//!   broadcast
//! - [`ScopedLock`] and [`run_locked`] for batching operations under an
//!   exclusive file lock with a single `before` notification
//! - [`Value`] and [`Container`], the dynamic data model the proxies wrap

/// Subscriber registry and phased broadcast.
pub mod broker;
/// Raw map and sequence containers.
pub mod container;
pub mod error;
/// File-lock batching.
pub mod lock;
/// Operation table and mutation classification.
pub mod ops;
pub mod options;
/// Intercepting proxy and the `create` factory.
pub mod proxy;
/// Dynamic values and keys.
pub mod value;

#[cfg(test)]
pub(crate) mod test_support;

pub use broker::{DEFAULT_CALLBACK, NotificationBroker, Observer, Phase, SubscriberId};
pub use container::{Container, ContainerKind};
pub use error::{Error, Result};
pub use lock::{ScopedLock, run_locked};
pub use ops::{MUTATING, Op};
pub use options::ProxyOptions;
pub use proxy::{ObservableProxy, create};
pub use value::{Key, Map, Seq, Shared, Value};
