//
// scripted_inspector.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::inspector::EvalError;
use crate::inspector::Inspector;
use crate::inspector::LowLevelId;
use crate::inspector::NamedValue;
use crate::inspector::ObjectHandle;
use crate::inspector::PauseEvent;
use crate::inspector::PauseListener;
use crate::inspector::PausedFrame;
use crate::inspector::Property;
use crate::inspector::Value;

/// One recorded installation, in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledBreakpoint {
    pub script: String,
    pub line: u32,
    pub column: u32,
    pub condition: Option<String>,
}

#[derive(Default)]
struct Inner {
    next_id: LowLevelId,
    /// Append-only install log for indexed assertions.
    installs: Vec<InstalledBreakpoint>,
    /// Low-level id → index into `installs`, for currently-armed hooks.
    active: HashMap<LowLevelId, usize>,
    objects: HashMap<u64, Vec<Property>>,
    evals: HashMap<String, Result<Value, EvalError>>,
    disconnected: bool,
}

/// A programmable stand-in for the runtime's low-level debugger.
///
/// Tests install breakpoints through the agent as usual, then fire pause
/// events with `trigger_pause*`. Object graphs and evaluation results are
/// scripted up front.
pub struct ScriptedInspector {
    inner: Mutex<Inner>,
    listener: Mutex<Option<Arc<PauseListener>>>,
    module_wrap_prefix: u32,
}

impl ScriptedInspector {
    pub fn new() -> Self {
        Self::with_module_wrap_prefix(0)
    }

    pub fn with_module_wrap_prefix(module_wrap_prefix: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            listener: Mutex::new(None),
            module_wrap_prefix,
        }
    }

    /// Defines the own properties returned for the object with this
    /// identity.
    pub fn define_object(&self, id: u64, properties: Vec<Property>) {
        self.inner.lock().unwrap().objects.insert(id, properties);
    }

    /// Scripts the outcome of evaluating `expression` on any frame.
    pub fn script_eval(&self, expression: &str, result: Result<Value, EvalError>) {
        self.inner
            .lock()
            .unwrap()
            .evals
            .insert(expression.to_string(), result);
    }

    pub fn installed_count(&self) -> usize {
        self.inner.lock().unwrap().installs.len()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap().active.len()
    }

    pub fn installed_position(&self, index: usize) -> (u32, u32) {
        let inner = self.inner.lock().unwrap();
        let install = &inner.installs[index];
        (install.line, install.column)
    }

    pub fn installed_condition(&self, index: usize) -> Option<String> {
        self.inner.lock().unwrap().installs[index].condition.clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.lock().unwrap().disconnected
    }

    /// Fires a pause naming every armed breakpoint, with a single frame
    /// located at the first armed install and carrying `locals`.
    pub fn trigger_pause_with_locals(&self, function_name: &str, locals: Vec<NamedValue>) {
        let (ids, frame) = {
            let inner = self.inner.lock().unwrap();
            let mut ids: Vec<LowLevelId> = inner.active.keys().copied().collect();
            ids.sort_unstable();

            let (script, line) = ids
                .first()
                .and_then(|id| inner.active.get(id))
                .map(|index| {
                    let install = &inner.installs[*index];
                    (install.script.clone(), install.line)
                })
                .unwrap_or_else(|| (String::from("unknown"), 0));

            let frame = PausedFrame {
                function_name: function_name.to_string(),
                script,
                line,
                column: 0,
                arguments: Vec::new(),
                locals,
            };
            (ids, frame)
        };

        self.trigger_pause(PauseEvent {
            breakpoint_ids: ids,
            frames: vec![frame],
        });
    }

    /// Fires an explicit pause event. The listener runs on the calling
    /// thread, mirroring the synchronous delivery of a real debugger.
    pub fn trigger_pause(&self, event: PauseEvent) {
        // Never hold our lock while the listener runs; the agent will call
        // back in for properties and evaluations.
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener(&event);
        }
    }
}

impl Default for ScriptedInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inspector for ScriptedInspector {
    fn set_breakpoint(
        &self,
        script: &str,
        line: u32,
        column: u32,
        condition: Option<&str>,
    ) -> anyhow::Result<LowLevelId> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;

        let index = inner.installs.len();
        inner.installs.push(InstalledBreakpoint {
            script: script.to_string(),
            line,
            column,
            condition: condition.map(str::to_string),
        });
        inner.active.insert(id, index);
        Ok(id)
    }

    fn remove_breakpoint(&self, id: LowLevelId) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.active.remove(&id) {
            Some(_) => Ok(()),
            None => anyhow::bail!("no breakpoint with low-level id {id}"),
        }
    }

    fn on_pause(&self, listener: PauseListener) {
        *self.listener.lock().unwrap() = Some(Arc::new(listener));
    }

    fn evaluate_on_frame(
        &self,
        _frame_index: usize,
        expression: &str,
        _throw_on_side_effect: bool,
    ) -> Result<Value, EvalError> {
        let inner = self.inner.lock().unwrap();
        match inner.evals.get(expression) {
            Some(result) => result.clone(),
            None => Ok(Value::Undefined),
        }
    }

    fn own_properties(&self, object: &ObjectHandle) -> anyhow::Result<Vec<Property>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.objects.get(&object.id).cloned().unwrap_or_default())
    }

    fn module_wrap_prefix_len(&self) -> u32 {
        self.module_wrap_prefix
    }

    fn disconnect(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnected = true;
        inner.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_remove_tracking() {
        let inspector = ScriptedInspector::new();
        let id = inspector.set_breakpoint("a.js", 1, 0, Some("x > 1")).unwrap();

        assert_eq!(inspector.installed_count(), 1);
        assert_eq!(inspector.active_count(), 1);
        assert_eq!(inspector.installed_condition(0).as_deref(), Some("x > 1"));

        inspector.remove_breakpoint(id).unwrap();
        assert_eq!(inspector.active_count(), 0);
        // The install log keeps history for assertions
        assert_eq!(inspector.installed_count(), 1);

        assert!(inspector.remove_breakpoint(id).is_err());
    }

    #[test]
    fn test_trigger_pause_reaches_listener() {
        let inspector = ScriptedInspector::new();
        let hits = Arc::new(Mutex::new(0));
        let hits_in_listener = hits.clone();

        inspector.on_pause(Box::new(move |event| {
            assert_eq!(event.breakpoint_ids.len(), 1);
            *hits_in_listener.lock().unwrap() += 1;
        }));

        inspector.set_breakpoint("a.js", 1, 0, None).unwrap();
        inspector.trigger_pause_with_locals("main", Vec::new());
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
