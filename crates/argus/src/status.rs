//
// status.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use serde::Deserialize;
use serde::Serialize;

/// What part of a breakpoint a status message is about.
///
/// Wire values match the Controller API verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Reference {
    #[default]
    #[serde(rename = "UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "BREAKPOINT_SOURCE_LOCATION")]
    BreakpointSourceLocation,
    #[serde(rename = "BREAKPOINT_CONDITION")]
    BreakpointCondition,
    #[serde(rename = "BREAKPOINT_EXPRESSION")]
    BreakpointExpression,
    #[serde(rename = "VARIABLE_NAME")]
    VariableName,
    #[serde(rename = "VARIABLE_VALUE")]
    VariableValue,
}

/// A printf-like message template with `$0..$n` placeholders into `parameters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatMessage {
    pub format: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

/// Structured description of a breakpoint rejection or runtime error,
/// reported back to the Controller on the breakpoint itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusMessage {
    pub is_error: bool,
    pub refers_to: Reference,
    pub description: FormatMessage,
}

impl StatusMessage {
    pub fn error(refers_to: Reference, format: impl Into<String>) -> Self {
        Self {
            is_error: true,
            refers_to,
            description: FormatMessage {
                format: format.into(),
                parameters: Vec::new(),
            },
        }
    }

    pub fn error_with_params(
        refers_to: Reference,
        format: impl Into<String>,
        parameters: Vec<String>,
    ) -> Self {
        Self {
            is_error: true,
            refers_to,
            description: FormatMessage {
                format: format.into(),
                parameters,
            },
        }
    }

    pub fn info(refers_to: Reference, format: impl Into<String>) -> Self {
        Self {
            is_error: false,
            refers_to,
            description: FormatMessage {
                format: format.into(),
                parameters: Vec::new(),
            },
        }
    }

    /// The description with its parameters substituted in.
    pub fn message(&self) -> String {
        format_message(&self.description.format, &self.description.parameters)
    }
}

/// Substitutes `$n` directives in `message` with `parameters[n]`.
///
/// `$$` escapes to a literal `$`. Digit runs are consumed greedily, so `$11`
/// is parameter eleven, never parameter one followed by a literal `1`.
/// Out-of-range directives are kept as literal text.
pub fn format_message(message: &str, parameters: &[String]) -> String {
    let mut out = String::with_capacity(message.len());
    let mut chars = message.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            },
            Some(d) if d.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(*d);
                    chars.next();
                }

                match digits.parse::<usize>().ok().and_then(|n| parameters.get(n)) {
                    Some(param) => out.push_str(param),
                    None => {
                        out.push('$');
                        out.push_str(&digits);
                    },
                }
            },
            _ => out.push('$'),
        }
    }

    out
}
