//! Notification recorder shared by unit tests.

use std::cell::RefCell;
use std::rc::Rc;

use crate::broker::{Observer, Phase};
use crate::value::Value;

/// Records every notification with a JSON snapshot of its payload.
#[derive(Default)]
pub(crate) struct Recorder {
    events: RefCell<Vec<(Phase, serde_json::Value)>>,
}

impl Recorder {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<(Phase, serde_json::Value)> {
        self.events.borrow().clone()
    }

    pub(crate) fn count(&self, phase: Phase) -> usize {
        self.events.borrow().iter().filter(|(p, _)| *p == phase).count()
    }

    pub(crate) fn payloads(&self, phase: Phase) -> Vec<serde_json::Value> {
        self.events
            .borrow()
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub(crate) fn reset(&self) {
        self.events.borrow_mut().clear();
    }
}

impl Observer for Recorder {
    fn update(&self, payload: &Value, phase: Phase) {
        self.events.borrow_mut().push((phase, payload.to_json()));
    }
}
