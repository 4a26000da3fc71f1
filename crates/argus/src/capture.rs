//
// capture.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use std::collections::HashMap;

use crate::config::CaptureConfig;
use crate::expr;
use crate::inspector::EvalError;
use crate::inspector::Inspector;
use crate::inspector::NamedValue;
use crate::inspector::ObjectHandle;
use crate::inspector::PausedFrame;
use crate::inspector::Value;
use crate::model::SourceLocation;
use crate::model::StackFrame;
use crate::model::Variable;
use crate::status::Reference;
use crate::status::StatusMessage;

const MAX_DATA_SIZE_MESSAGE: &str = "Max data size reached";

/// Rewrites a watch expression before evaluation, e.g. compiling an original
/// source fragment into the emitted dialect the runtime executes.
pub type ExpressionTransform = dyn Fn(&str) -> Result<String, String> + Send + Sync;

/// Everything produced by one snapshot capture.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    pub stack_frames: Vec<StackFrame>,
    pub variable_table: Vec<Variable>,
    pub evaluated_expressions: Vec<Variable>,
}

/// Builds the bounded capture from a paused stack.
///
/// Watch expressions are evaluated first so user-requested data wins the
/// shared byte budget over mechanically enumerated locals.
pub fn collect(
    inspector: &dyn Inspector,
    config: &CaptureConfig,
    frames: &[PausedFrame],
    expressions: &[String],
    transform: Option<&ExpressionTransform>,
) -> Capture {
    let mut engine = Engine {
        inspector,
        config,
        table: Vec::new(),
        indices: HashMap::new(),
        budget: config.max_data_size as i64,
    };

    let evaluated_expressions = expressions
        .iter()
        .map(|source| engine.evaluate_expression(source, transform))
        .collect();

    let stack_frames = frames
        .iter()
        .take(config.max_frames)
        .enumerate()
        .map(|(index, frame)| engine.resolve_frame(index, frame))
        .collect();

    Capture {
        stack_frames,
        variable_table: engine.table,
        evaluated_expressions,
    }
}

struct Engine<'a> {
    inspector: &'a dyn Inspector,
    config: &'a CaptureConfig,
    table: Vec<Variable>,
    /// Runtime object identity → variable table index. The interning map
    /// that keeps cyclic and shared graphs bounded.
    indices: HashMap<u64, usize>,
    /// Remaining bytes; negative once exhausted.
    budget: i64,
}

impl Engine<'_> {
    fn charge(&mut self, amount: usize) -> bool {
        if self.budget < amount as i64 {
            self.budget = -1;
            return false;
        }
        self.budget -= amount as i64;
        true
    }

    fn max_data_status() -> StatusMessage {
        StatusMessage::error(Reference::VariableValue, MAX_DATA_SIZE_MESSAGE)
    }

    fn resolve_frame(&mut self, index: usize, frame: &PausedFrame) -> StackFrame {
        let function = if frame.function_name.is_empty() {
            String::from("(anonymous function)")
        } else {
            frame.function_name.clone()
        };

        let location = Some(SourceLocation::new(frame.script.clone(), frame.line + 1));

        if index >= self.config.max_expand_frames {
            let status = StatusMessage::info(
                Reference::BreakpointSourceLocation,
                format!(
                    "Locals and arguments are only displayed for the top \
                     `config.capture.maxExpandFrames={}` stack frames.",
                    self.config.max_expand_frames
                ),
            );
            return StackFrame {
                function,
                location,
                arguments: vec![Variable::with_status("arguments", status.clone())],
                locals: vec![Variable::with_status("locals", status)],
            };
        }

        StackFrame {
            function,
            location,
            arguments: self.resolve_slots(&frame.arguments),
            locals: self.resolve_slots(&frame.locals),
        }
    }

    fn resolve_slots(&mut self, slots: &[NamedValue]) -> Vec<Variable> {
        let mut out = Vec::with_capacity(slots.len());

        for slot in slots {
            if self.budget < 0 {
                out.push(Variable::with_status(
                    slot.name.clone(),
                    Self::max_data_status(),
                ));
                break;
            }

            let variable = self.resolve_value(slot.name.clone(), slot.value.clone(), false);
            if self.budget < 0 {
                // A compound reference is only an index into the (already
                // marked) table entry, so it is kept; a primitive that blew
                // the budget is dropped for its stub.
                if variable.var_table_index.is_some() {
                    out.push(variable);
                } else {
                    out.push(Variable::with_status(
                        slot.name.clone(),
                        Self::max_data_status(),
                    ));
                }
                break;
            }
            out.push(variable);
        }

        out
    }

    fn resolve_value(&mut self, name: String, value: Value, watch_root: bool) -> Variable {
        let handle = match value {
            Value::Object(handle) => handle,
            primitive => {
                let (rendered, status) = self.render_primitive(&primitive, watch_root);
                self.charge(name.len() + rendered.len());
                return Variable {
                    name: Some(name),
                    value: Some(rendered),
                    var_type: Some(primitive.type_name().to_string()),
                    status,
                    ..Default::default()
                };
            },
        };

        self.charge(name.len());
        let index = self.intern_object(&handle, watch_root);
        Variable {
            name: Some(name),
            var_table_index: Some(index),
            ..Default::default()
        }
    }

    fn render_primitive(&self, value: &Value, watch_root: bool) -> (String, Option<StatusMessage>) {
        let rendered = value.render();

        // Top-level watch results are exempt from string truncation
        if watch_root {
            return (rendered, None);
        }
        let Value::Str(_) = value else {
            return (rendered, None);
        };

        let max = self.config.max_string_length;
        let length = rendered.chars().count();
        if length <= max {
            return (rendered, None);
        }

        let mut truncated: String = rendered.chars().take(max).collect();
        truncated.push_str("...");

        let status = StatusMessage::error_with_params(
            Reference::VariableValue,
            "Only first `config.capture.maxStringLength=$0` chars were captured for \
             string of length $1",
            vec![max.to_string(), length.to_string()],
        );
        (truncated, Some(status))
    }

    /// Places a compound value in the variable table exactly once, returning
    /// its index. Re-captures of the same runtime object reuse the entry.
    fn intern_object(&mut self, handle: &ObjectHandle, watch_root: bool) -> usize {
        if let Some(index) = self.indices.get(&handle.id) {
            return *index;
        }

        // Reserve the slot before descending so cycles resolve to this index
        let index = self.table.len();
        self.table.push(Variable::default());
        self.indices.insert(handle.id, index);

        let mut entry = Variable {
            value: Some(handle.description.clone()),
            var_type: Some(handle.kind.type_name().to_string()),
            ..Default::default()
        };
        self.charge(entry.value.as_ref().map_or(0, String::len));

        let properties = match self.inspector.own_properties(handle) {
            Ok(properties) => properties,
            Err(err) => {
                entry.status = Some(StatusMessage::error(
                    Reference::VariableValue,
                    format!("Failed to read object properties: {err}"),
                ));
                self.table[index] = entry;
                return index;
            },
        };

        let total = properties.len();
        let limit = if watch_root {
            total
        } else {
            self.config.max_properties.min(total)
        };

        let mut members = Vec::with_capacity(limit.min(total));
        let mut out_of_budget = false;

        for property in properties.into_iter().take(limit) {
            if self.budget < 0 {
                out_of_budget = true;
                break;
            }

            let member = match property.value {
                Ok(value) => self.resolve_value(property.name, value, false),
                Err(message) => Variable::with_status(
                    property.name,
                    StatusMessage::error(Reference::VariableValue, message),
                ),
            };

            if self.budget < 0 {
                out_of_budget = true;
                break;
            }
            members.push(member);
        }

        if out_of_budget {
            entry.status = Some(Self::max_data_status());
        } else if limit < total {
            members.push(Variable::named(format!(
                "Only first {} of {} items (config.capture.maxProperties={})",
                limit, total, self.config.max_properties
            )));
        }

        entry.members = members;
        self.table[index] = entry;
        index
    }

    fn evaluate_expression(
        &mut self,
        source: &str,
        transform: Option<&ExpressionTransform>,
    ) -> Variable {
        let compiled = match transform {
            Some(transform) => match transform(source) {
                Ok(compiled) => compiled,
                Err(err) => {
                    log::debug!("Watch expression `{source}` failed to compile: {err}");
                    return Variable::with_status(
                        source,
                        StatusMessage::error(
                            Reference::BreakpointExpression,
                            "Error Compiling Expression",
                        ),
                    );
                },
            },
            None => source.to_string(),
        };

        if let Err(message) = expr::check(&compiled) {
            return Variable::with_status(
                source,
                StatusMessage::error(Reference::BreakpointExpression, message),
            );
        }

        match self.inspector.evaluate_on_frame(0, &compiled, true) {
            Ok(value) => self.resolve_value(source.to_string(), value, true),
            Err(EvalError::SideEffect) => Variable::with_status(
                source,
                StatusMessage::error(
                    Reference::VariableValue,
                    "Evaluation blocked: expression has possible side effects",
                ),
            ),
            Err(err) => Variable::with_status(
                source,
                StatusMessage::error(Reference::VariableValue, err.to_string()),
            ),
        }
    }
}
