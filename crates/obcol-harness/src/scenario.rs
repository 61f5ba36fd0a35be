#![forbid(unsafe_code)]

//! Regression scenarios.
//!
//! Each scenario drives a small sequence of operations against observed
//! collections and returns the printed transcript: one `update: <payload>`
//! line per `after` notification, in delivery order. Expected transcripts
//! live in `tests/regression.rs`.

use std::path::Path;
use std::rc::Rc;

use obcol_core::{Container, ObservableProxy, Observer, ProxyOptions, Result, Value};
use serde_json::json;

use crate::recorder::{Printer, Transcript, observed};

/// A named regression scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Scalar and nested assignment on a map.
    Basic,
    /// Mutation through a retained reference to a nested map.
    Nested,
    /// Sequences and maps stored inside each other.
    Combo,
    /// In-place mapping and mutation during iteration.
    Iteration,
    /// Default and custom callback names.
    Construct,
    /// Reads with and without `always_update_after`.
    AlwaysUpdateAfter,
    /// A batch under the file lock, printing `before` lines too.
    Locking,
}

impl Scenario {
    pub const ALL: &'static [Scenario] = &[
        Scenario::Basic,
        Scenario::Nested,
        Scenario::Combo,
        Scenario::Iteration,
        Scenario::Construct,
        Scenario::AlwaysUpdateAfter,
        Scenario::Locking,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Nested => "nested",
            Self::Combo => "combo",
            Self::Iteration => "iteration",
            Self::Construct => "construct",
            Self::AlwaysUpdateAfter => "always_update_after",
            Self::Locking => "locking",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// Run the scenario. `workdir` holds the lock file for
    /// [`Scenario::Locking`] and is unused otherwise.
    pub fn run(self, workdir: &Path) -> Result<Vec<String>> {
        let transcript = Transcript::new();
        let printer: Rc<dyn Observer> = Rc::new(Printer::new("update", &transcript));
        match self {
            Self::Basic => basic(printer)?,
            Self::Nested => nested(printer)?,
            Self::Combo => combo(printer)?,
            Self::Iteration => iteration(printer)?,
            Self::Construct => construct(&transcript)?,
            Self::AlwaysUpdateAfter => always_update_after(printer)?,
            Self::Locking => locking(&transcript, workdir)?,
        }
        Ok(transcript.lines())
    }
}

fn basic(printer: Rc<dyn Observer>) -> Result<()> {
    let hash = observed(json!({}), printer, ProxyOptions::default())?;
    hash.set("a", "foo")?;
    hash.set("b", Value::empty_map())?;
    if let Some(b) = hash.get("b")?.into_proxy() {
        b.set("foo", "bar")?;
    }
    Ok(())
}

fn nested(printer: Rc<dyn Observer>) -> Result<()> {
    let hash = observed(json!({}), printer, ProxyOptions::default())?;
    hash.set("b", Value::from(json!({"a": "foo", "b": {}})))?;
    if let Some(b) = hash.get("b")?.into_proxy() {
        b.set("c", "set from nested reference")?;
    }
    Ok(())
}

fn combo(printer: Rc<dyn Observer>) -> Result<()> {
    let hash = observed(json!({}), Rc::clone(&printer), ProxyOptions::default())?;
    let array = observed(json!([]), Rc::clone(&printer), ProxyOptions::default())?;

    hash.set("a", array.clone())?;
    array.push(1)?;
    array.push(2)?;

    array.push(observed(json!({}), printer, ProxyOptions::default())?)?;
    if let Some(last) = array.last()?.into_proxy() {
        last.set("c", "woot")?;
    }
    Ok(())
}

fn iteration(printer: Rc<dyn Observer>) -> Result<()> {
    let hash = observed(json!({"foo": "bar"}), Rc::clone(&printer), ProxyOptions::default())?;
    let array = observed(json!([1, 2, 3]), printer, ProxyOptions::default())?;

    array.map_in_place(|x| Value::from(x.as_i64().unwrap_or_default() + 1))?;

    array.push(hash)?;
    let mut failure = None;
    array.each(|x| {
        if let Some(map) = x.as_proxy() {
            if let Err(err) = map.set("foo", "baz") {
                if failure.is_none() {
                    failure = Some(err);
                }
            }
        }
    })?;
    failure.map_or(Ok(()), Err)
}

fn construct(transcript: &Transcript) -> Result<()> {
    let hash = ObservableProxy::new(Container::new_map(), ProxyOptions::default());
    hash.subscribe(Rc::new(Printer::new("Default update", transcript)));
    hash.set("a", "foo")?;

    let special = ObservableProxy::new(Container::new_map(), ProxyOptions::default());
    let observer = Rc::new(Printer::new("Special update", transcript));
    special.subscribe_as(&observer, "special_update", Printer::print);
    special.set("a", "foo")?;
    Ok(())
}

fn always_update_after(printer: Rc<dyn Observer>) -> Result<()> {
    let never = observed(json!({"foo": "bar"}), Rc::clone(&printer), ProxyOptions::default())?;
    never.inspect()?;

    let always = observed(
        json!({"foo": "bar"}),
        printer,
        ProxyOptions::new().with_always_update_after(true),
    )?;
    always.inspect()?;
    Ok(())
}

fn locking(transcript: &Transcript, workdir: &Path) -> Result<()> {
    let printer = Rc::new(Printer::new("update", transcript).with_before(true));
    let hash = observed(
        json!({}),
        printer,
        ProxyOptions::new().with_lock_file(workdir.join("scenario.lock")),
    )?;
    hash.lock_with(|hash| {
        hash.set("a", 1)?;
        hash.set("b", Value::empty_map())?;
        if let Some(b) = hash.get("b")?.into_proxy() {
            b.set("c", 2)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for scenario in Scenario::ALL {
            assert_eq!(Scenario::from_name(scenario.name()), Some(*scenario));
        }
        assert_eq!(Scenario::from_name("missing"), None);
    }
}
