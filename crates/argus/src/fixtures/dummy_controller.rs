//
// dummy_controller.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crossbeam::channel::unbounded;
use crossbeam::channel::Receiver;
use crossbeam::channel::Sender;

use crate::controller::Controller;
use crate::controller::ControllerError;
use crate::model::Breakpoint;
use crate::model::Debuggee;
use crate::model::ListBreakpointsResponse;
use crate::model::RegisterResponse;
use crate::model::RegisteredDebuggee;

struct Inner {
    debuggee_id: String,
    disabled: bool,
    breakpoints: Vec<Breakpoint>,
    register_count: usize,
    list_count: usize,
    fail_lists: VecDeque<u16>,
    updates: Vec<(String, Breakpoint)>,
}

/// A scripted Controller. Polls return the currently staged breakpoint set
/// after a short delay; updates are recorded and announced on a channel so
/// tests can wait for them deterministically.
pub struct DummyController {
    inner: Mutex<Inner>,
    poll_delay: Duration,
    update_tx: Sender<Breakpoint>,
    update_rx: Receiver<Breakpoint>,
}

impl DummyController {
    pub fn new(debuggee_id: &str) -> Self {
        let (update_tx, update_rx) = unbounded();
        Self {
            inner: Mutex::new(Inner {
                debuggee_id: debuggee_id.to_string(),
                disabled: false,
                breakpoints: Vec::new(),
                register_count: 0,
                list_count: 0,
                fail_lists: VecDeque::new(),
                updates: Vec::new(),
            }),
            poll_delay: Duration::from_millis(20),
            update_tx,
            update_rx,
        }
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.inner.lock().unwrap().disabled = disabled;
    }

    /// Stages the breakpoint set returned by subsequent polls.
    pub fn stage_breakpoints(&self, breakpoints: Vec<Breakpoint>) {
        self.inner.lock().unwrap().breakpoints = breakpoints;
    }

    /// Makes the next list call fail with the given HTTP status.
    pub fn fail_next_list(&self, status: u16) {
        self.inner.lock().unwrap().fail_lists.push_back(status);
    }

    pub fn register_count(&self) -> usize {
        self.inner.lock().unwrap().register_count
    }

    pub fn list_count(&self) -> usize {
        self.inner.lock().unwrap().list_count
    }

    pub fn updates(&self) -> Vec<(String, Breakpoint)> {
        self.inner.lock().unwrap().updates.clone()
    }

    /// Blocks until the next `updateBreakpoint` lands or `timeout` passes.
    pub fn wait_for_update(&self, timeout: Duration) -> Option<Breakpoint> {
        self.update_rx.recv_timeout(timeout).ok()
    }

    /// Drains updates that arrive within `timeout` of each other.
    pub fn drain_updates(&self, timeout: Duration) -> Vec<Breakpoint> {
        let mut out = Vec::new();
        let deadline = Instant::now() + timeout;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match self.update_rx.recv_timeout(remaining) {
                Ok(breakpoint) => out.push(breakpoint),
                Err(_) => break,
            }
        }
        out
    }
}

impl Controller for DummyController {
    fn register(&self, _debuggee: &Debuggee) -> Result<RegisterResponse, ControllerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.register_count += 1;

        Ok(RegisterResponse {
            debuggee: RegisteredDebuggee {
                id: inner.debuggee_id.clone(),
                is_disabled: inner.disabled.then_some(true),
            },
            active_period_sec: Some(600),
        })
    }

    fn list_breakpoints(
        &self,
        _debuggee_id: &str,
    ) -> Result<ListBreakpointsResponse, ControllerError> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.list_count += 1;
            if let Some(status) = inner.fail_lists.pop_front() {
                return Err(ControllerError::Status(status));
            }
        }

        // Keeps the poll loop from spinning; stands in for the server-held
        // hanging GET.
        std::thread::sleep(self.poll_delay);

        let inner = self.inner.lock().unwrap();
        Ok(ListBreakpointsResponse {
            breakpoints: Some(inner.breakpoints.clone()),
            wait_expired: None,
            kind: None,
        })
    }

    fn update_breakpoint(
        &self,
        debuggee_id: &str,
        breakpoint: &Breakpoint,
    ) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .updates
            .push((debuggee_id.to_string(), breakpoint.clone()));
        let _ = self.update_tx.send(breakpoint.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_staging() {
        let controller = DummyController::new("bar");

        let response = controller.register(&Debuggee::default()).unwrap();
        assert_eq!(response.debuggee.id, "bar");
        assert_eq!(controller.register_count(), 1);

        controller.stage_breakpoints(vec![Breakpoint {
            id: String::from("test"),
            ..Default::default()
        }]);
        let list = controller.list_breakpoints("bar").unwrap();
        assert_eq!(list.into_breakpoints().len(), 1);
    }

    #[test]
    fn test_update_recording() {
        let controller = DummyController::new("bar");
        let bp = Breakpoint {
            id: String::from("test"),
            is_final_state: true,
            ..Default::default()
        };

        controller.update_breakpoint("bar", &bp).unwrap();
        assert_eq!(controller.updates().len(), 1);
        assert!(controller
            .wait_for_update(Duration::from_millis(10))
            .is_some());
    }
}
