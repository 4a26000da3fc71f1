//
// inspector.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

// The capability seam to the host runtime's low-level debugger. The runtime
// may expose different back-ends (a legacy one, an inspector-protocol one);
// the embedding selects one at startup and hands the agent a single
// `Arc<dyn Inspector>`. Everything the agent needs is expressed here:
// breakpoint insertion, pause delivery, property reads, and guarded
// expression evaluation on a paused frame.

use std::fmt;

/// Identifier of an installed low-level breakpoint.
pub type LowLevelId = u64;

/// Identity of a live runtime object. Reference-equal objects share an id;
/// the capture engine relies on this for interning.
pub type ObjectId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Plain,
    Array,
    Function,
    Other,
}

impl ObjectKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjectKind::Function => "function",
            _ => "object",
        }
    }
}

/// A handle to a compound runtime value. `description` is the runtime's
/// short rendering, e.g. `Object` or `Array(3)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHandle {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub description: String,
}

/// A runtime value as surfaced by the debugger.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Object(ObjectHandle),
}

impl Value {
    pub fn object(id: ObjectId, kind: ObjectKind, description: impl Into<String>) -> Self {
        Value::Object(ObjectHandle {
            id,
            kind,
            description: description.into(),
        })
    }

    /// The value's type name as reported on captured variables.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(handle) => handle.kind.type_name(),
        }
    }

    /// The value rendered as a display string, untruncated.
    pub fn render(&self) -> String {
        match self {
            Value::Undefined => String::from("undefined"),
            Value::Null => String::from("null"),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => render_number(*n),
            Value::Str(s) => s.clone(),
            Value::Object(handle) => handle.description.clone(),
        }
    }
}

fn render_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// An own property read off a compound value. Reads that would run an
/// effectful accessor, or whose getter threw, surface as `Error`.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: Result<Value, String>,
}

impl Property {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: Ok(value),
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Err(message.into()),
        }
    }
}

/// A named slot in a paused frame: a formal argument or a local.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    pub name: String,
    pub value: Value,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// One call frame of the paused stack, innermost first.
#[derive(Debug, Clone, PartialEq)]
pub struct PausedFrame {
    pub function_name: String,
    /// The loaded script this frame executes, as known to the runtime.
    pub script: String,
    /// 0-based position within the script.
    pub line: u32,
    pub column: u32,
    pub arguments: Vec<NamedValue>,
    pub locals: Vec<NamedValue>,
}

/// Delivered synchronously by the debugger while the program is paused.
/// The listener must return before execution resumes.
#[derive(Debug, Clone)]
pub struct PauseEvent {
    pub breakpoint_ids: Vec<LowLevelId>,
    pub frames: Vec<PausedFrame>,
}

pub type PauseListener = Box<dyn Fn(&PauseEvent) + Send + Sync>;

/// Why a guarded frame evaluation failed.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The side-effect guard aborted the evaluation.
    SideEffect,
    /// The expression threw; the payload is the thrown value's rendering.
    Thrown(String),
    /// The evaluation could not run at all.
    Failed(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::SideEffect => write!(f, "expression has possible side effects"),
            EvalError::Thrown(message) => write!(f, "{message}"),
            EvalError::Failed(message) => write!(f, "{message}"),
        }
    }
}

pub trait Inspector: Send + Sync {
    /// Installs a breakpoint at a 0-based position of a loaded script,
    /// optionally guarded by a condition evaluated in the runtime.
    fn set_breakpoint(
        &self,
        script: &str,
        line: u32,
        column: u32,
        condition: Option<&str>,
    ) -> anyhow::Result<LowLevelId>;

    fn remove_breakpoint(&self, id: LowLevelId) -> anyhow::Result<()>;

    /// Registers the pause listener. At most one listener is active; the
    /// agent installs exactly one at startup.
    fn on_pause(&self, listener: PauseListener);

    /// Evaluates an expression against a frame of the currently paused
    /// stack. With `throw_on_side_effect`, the runtime aborts any evaluation
    /// that would mutate observable state. Only valid during pause dispatch.
    fn evaluate_on_frame(
        &self,
        frame_index: usize,
        expression: &str,
        throw_on_side_effect: bool,
    ) -> Result<Value, EvalError>;

    /// Reads the own properties of a compound value. Only valid during
    /// pause dispatch.
    fn own_properties(&self, object: &ObjectHandle) -> anyhow::Result<Vec<Property>>;

    /// Number of characters the runtime prepends to every loaded source
    /// before parsing. Shifts column coordinates on line 1 only.
    fn module_wrap_prefix_len(&self) -> u32 {
        0
    }

    /// Tears down the debugger session.
    fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_numbers() {
        assert_eq!(Value::Number(2.0).render(), "2");
        assert_eq!(Value::Number(2.5).render(), "2.5");
        assert_eq!(Value::Number(-0.5).render(), "-0.5");
        assert_eq!(Value::Number(f64::NAN).render(), "NaN");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Null.type_name(), "object");
        assert_eq!(Value::Bool(true).type_name(), "boolean");
        assert_eq!(
            Value::object(1, ObjectKind::Function, "function f()").type_name(),
            "function"
        );
    }
}
