//
// model.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::status::StatusMessage;

/// What the breakpoint does when it fires.
///
/// Anything else coming off the wire collapses to `Unknown` and is rejected
/// during reconciliation rather than failing the whole poll response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Action {
    #[default]
    #[serde(rename = "CAPTURE")]
    Capture,
    #[serde(rename = "LOG")]
    Log,
    #[serde(other, rename = "UNKNOWN")]
    Unknown,
}

/// A user-supplied source position. `path` may be partial; `line` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceLocation {
    pub path: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl SourceLocation {
    pub fn new(path: impl Into<String>, line: u32) -> Self {
        Self {
            path: path.into(),
            line,
            column: None,
        }
    }
}

/// A captured value.
///
/// Values are strings; compound objects are shared through `var_table_index`
/// into the breakpoint's variable table so that cyclic and heavily shared
/// graphs stay bounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Variable {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub var_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Variable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub var_table_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMessage>,
}

impl Variable {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_status(name: impl Into<String>, status: StatusMessage) -> Self {
        Self {
            name: Some(name.into()),
            status: Some(status),
            ..Default::default()
        }
    }
}

/// One frame of the captured stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StackFrame {
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Variable>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locals: Vec<Variable>,
}

/// The unit of work. Created by the Controller, mutated by the agent, and
/// destroyed once the Controller acknowledges its final state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Breakpoint {
    pub id: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_message_format: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_final_state: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_frames: Option<Vec<StackFrame>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluated_expressions: Option<Vec<Variable>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_table: Option<Vec<Variable>>,
}

impl Breakpoint {
    /// Marks the breakpoint final with the given status. Used for both
    /// rejections and normal completion reporting.
    pub fn finalize(&mut self, status: Option<StatusMessage>) {
        self.is_final_state = true;
        if status.is_some() {
            self.status = status;
        }
    }

    pub fn watch_expressions(&self) -> &[String] {
        self.expressions.as_deref().unwrap_or(&[])
    }
}

/// The agent's identity, exchanged for a server-assigned id at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Debuggee {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub project: String,
    pub uniquifier: String,
    pub description: String,
    pub agent_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_contexts: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMessage>,
}

/// `POST /debuggees/register` response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterResponse {
    pub debuggee: RegisteredDebuggee,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_period_sec: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisteredDebuggee {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_disabled: Option<bool>,
}

/// `GET /debuggees/{id}/breakpoints` response payload. A bare `waitExpired`
/// is the normal long-poll timeout; a missing breakpoint list means "none".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ListBreakpointsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<Vec<Breakpoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_expired: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ListBreakpointsResponse {
    pub fn into_breakpoints(self) -> Vec<Breakpoint> {
        self.breakpoints.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_default_is_capture() {
        let bp: Breakpoint = serde_json::from_str(r#"{"id": "bp-1"}"#).unwrap();
        assert_eq!(bp.action, Action::Capture);
    }

    #[test]
    fn test_unknown_action_does_not_fail_deserialization() {
        let bp: Breakpoint =
            serde_json::from_str(r#"{"id": "bp-1", "action": "FOO"}"#).unwrap();
        assert_eq!(bp.action, Action::Unknown);
    }

    #[test]
    fn test_breakpoint_roundtrip_omits_empty_fields() {
        let bp = Breakpoint {
            id: String::from("test"),
            location: Some(SourceLocation::new("fixtures/foo.js", 2)),
            ..Default::default()
        };

        let json = serde_json::to_value(&bp).unwrap();
        assert_eq!(json["id"], "test");
        assert_eq!(json["location"]["line"], 2);
        assert!(json.get("isFinalState").is_none());
        assert!(json.get("condition").is_none());
        assert!(json.get("stackFrames").is_none());
    }

    #[test]
    fn test_zero_id_is_preserved() {
        let bp: Breakpoint = serde_json::from_str(r#"{"id": "0"}"#).unwrap();
        assert_eq!(bp.id, "0");
    }

    #[test]
    fn test_list_response_tolerates_missing_fields() {
        let resp: ListBreakpointsResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.into_breakpoints().is_empty());

        let resp: ListBreakpointsResponse =
            serde_json::from_str(r#"{"waitExpired": true}"#).unwrap();
        assert_eq!(resp.wait_expired, Some(true));
    }

    #[test]
    fn test_variable_type_renames_on_wire() {
        let variable = Variable {
            name: Some(String::from("n")),
            value: Some(String::from("2")),
            var_type: Some(String::from("number")),
            ..Default::default()
        };

        let json = serde_json::to_value(&variable).unwrap();
        assert_eq!(json["type"], "number");
    }
}
