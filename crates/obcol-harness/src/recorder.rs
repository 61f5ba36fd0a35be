#![forbid(unsafe_code)]

//! Observers that capture notifications for assertions and logs.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use obcol_core::{Error, ObservableProxy, Observer, Phase, ProxyOptions, Result, Value, create};
use serde::{Deserialize, Serialize};

/// One delivered notification. The payload is snapshotted at delivery time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub seq: u64,
    pub phase: Phase,
    pub payload: serde_json::Value,
}

/// Observer that keeps every notification it receives, in order.
#[derive(Debug, Default)]
pub struct Recorder {
    events: RefCell<Vec<Notification>>,
    next_seq: Cell<u64>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    #[must_use]
    pub fn events(&self) -> Vec<Notification> {
        self.events.borrow().clone()
    }

    /// Payloads of `after` notifications.
    #[must_use]
    pub fn afters(&self) -> Vec<serde_json::Value> {
        self.payloads(Phase::After)
    }

    /// Payloads of `before` notifications.
    #[must_use]
    pub fn befores(&self) -> Vec<serde_json::Value> {
        self.payloads(Phase::Before)
    }

    fn payloads(&self, phase: Phase) -> Vec<serde_json::Value> {
        self.events
            .borrow()
            .iter()
            .filter(|n| n.phase == phase)
            .map(|n| n.payload.clone())
            .collect()
    }

    #[must_use]
    pub fn phases(&self) -> Vec<Phase> {
        self.events.borrow().iter().map(|n| n.phase).collect()
    }

    #[must_use]
    pub fn count(&self, phase: Phase) -> usize {
        self.events.borrow().iter().filter(|n| n.phase == phase).count()
    }

    #[must_use]
    pub fn last(&self) -> Option<Notification> {
        self.events.borrow().last().cloned()
    }

    /// Forget recorded events. Sequence numbers keep counting.
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    /// One JSON object per line.
    pub fn to_jsonl(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for event in self.events.borrow().iter() {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Parse a log written by [`to_jsonl`](Self::to_jsonl). Blank lines are
    /// skipped.
    pub fn parse_jsonl(text: &str) -> serde_json::Result<Vec<Notification>> {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect()
    }
}

impl Observer for Recorder {
    fn update(&self, payload: &Value, phase: Phase) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.events.borrow_mut().push(Notification {
            seq,
            phase,
            payload: payload.to_json(),
        });
    }
}

/// Shared, ordered output lines written by [`Printer`]s.
#[derive(Debug, Clone, Default)]
pub struct Transcript(Rc<RefCell<Vec<String>>>);

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.0.borrow_mut().push(line.into());
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Observer writing `label: payload` lines to a [`Transcript`].
///
/// Only `after` notifications are printed unless
/// [`with_before`](Self::with_before) is set, in which case `before`
/// notifications appear as `before: payload`.
#[derive(Debug)]
pub struct Printer {
    label: &'static str,
    include_before: bool,
    transcript: Transcript,
}

impl Printer {
    #[must_use]
    pub fn new(label: &'static str, transcript: &Transcript) -> Self {
        Self {
            label,
            include_before: false,
            transcript: transcript.clone(),
        }
    }

    #[must_use]
    pub fn with_before(mut self, include: bool) -> Self {
        self.include_before = include;
        self
    }

    /// Plain method form, for subscribing under a custom callback name.
    pub fn print(&self, payload: &Value, phase: Phase) {
        match phase {
            Phase::After => self.transcript.push(format!("{}: {payload}", self.label)),
            Phase::Before if self.include_before => {
                self.transcript.push(format!("before: {payload}"));
            }
            Phase::Before => {}
        }
    }
}

impl Observer for Printer {
    fn update(&self, payload: &Value, phase: Phase) {
        self.print(payload, phase);
    }
}

/// Wrap a JSON container and subscribe `observer`.
///
/// # Errors
///
/// [`Error::InvalidArgument`] when `json` is not an object or array.
pub fn observed(
    json: serde_json::Value,
    observer: Rc<dyn Observer>,
    options: ProxyOptions,
) -> Result<ObservableProxy> {
    create(Value::from(json), Some(observer), options)
        .into_proxy()
        .ok_or(Error::InvalidArgument {
            op: "create",
            expected: "a map or sequence",
        })
}
