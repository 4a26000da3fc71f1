//
// api.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::time::Instant;

use regex::Regex;

use crate::capture;
use crate::config::Config;
use crate::inspector::Inspector;
use crate::inspector::LowLevelId;
use crate::inspector::PauseEvent;
use crate::inspector::Value;
use crate::model::Breakpoint;
use crate::scanner::FileScanner;
use crate::sourcemap::SourceMapper;
use crate::status;
use crate::status::Reference;
use crate::status::StatusMessage;
use crate::throttle::LogRateLimiter;

/// Breakpoints are mutated in place on capture and shared between the
/// control loop and the pause dispatch.
pub type SharedBreakpoint = Arc<Mutex<Breakpoint>>;

/// Resolves once the first hit has populated the breakpoint, or with the
/// error that prevented capture.
pub type SnapshotCallback = Box<dyn FnOnce(Option<StatusMessage>) + Send>;

pub type LogEmitter = Arc<dyn Fn(&str) + Send + Sync>;
pub type ShouldStop = Arc<dyn Fn() -> bool + Send + Sync>;

struct BreakpointData {
    low_level_id: LowLevelId,
}

enum Listener {
    Snapshot {
        breakpoint: SharedBreakpoint,
        callback: Option<SnapshotCallback>,
        /// One-shot: disabled after the first dispatched hit.
        enabled: bool,
    },
    Log {
        breakpoint: SharedBreakpoint,
        emit: LogEmitter,
        should_stop: ShouldStop,
        limiter: LogRateLimiter,
    },
}

#[derive(Default)]
struct ApiState {
    /// Breakpoint id → installed low-level data.
    breakpoints: HashMap<String, BreakpointData>,
    /// Low-level id → per-breakpoint listener.
    listeners: HashMap<LowLevelId, Listener>,
}

struct Inner {
    inspector: Arc<dyn Inspector>,
    config: Config,
    scanner: Arc<FileScanner>,
    mapper: Arc<SourceMapper>,
    source_file_re: Regex,
    state: Mutex<ApiState>,
}

/// Validates, installs, and clears breakpoints in the low-level debugger and
/// routes pause events to the matching listener: snapshots drive the capture
/// engine once, logpoints render and emit throttled lines.
#[derive(Clone)]
pub struct DebugApi {
    inner: Arc<Inner>,
}

impl DebugApi {
    pub fn new(
        config: Config,
        inspector: Arc<dyn Inspector>,
        scanner: Arc<FileScanner>,
        mapper: Arc<SourceMapper>,
    ) -> anyhow::Result<Self> {
        let source_file_re = Regex::new(&config.source_file_pattern)?;

        let inner = Arc::new(Inner {
            inspector: inspector.clone(),
            config,
            scanner,
            mapper,
            source_file_re,
            state: Mutex::new(ApiState::default()),
        });

        // The inspector holds only a weak handle so tearing down the agent
        // does not leak through the registered listener.
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inspector.on_pause(Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                dispatch_pause(&inner, event);
            }
        }));

        Ok(Self { inner })
    }

    /// Validates the breakpoint and installs it in the low-level debugger.
    /// The error is the status to report to the Controller.
    pub fn set(&self, breakpoint: &SharedBreakpoint) -> Result<(), StatusMessage> {
        let (id, location, condition) = {
            let bp = breakpoint.lock().unwrap();
            (bp.id.clone(), bp.location.clone(), bp.condition.clone())
        };

        if id.is_empty() {
            return Err(StatusMessage::error(
                Reference::Unspecified,
                "Breakpoint id is missing",
            ));
        }
        let Some(location) = location else {
            return Err(StatusMessage::error(
                Reference::Unspecified,
                "Breakpoint location is missing",
            ));
        };
        if location.line == 0 {
            return Err(StatusMessage::error(
                Reference::Unspecified,
                "Breakpoint line must be 1 or greater",
            ));
        }

        // An empty or trivially-empty condition is unconditional
        let condition = match condition.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(source) => match crate::expr::check(source) {
                Ok(None) => None,
                Ok(Some(_)) => Some(source.to_string()),
                Err(message) => {
                    return Err(StatusMessage::error_with_params(
                        Reference::BreakpointCondition,
                        "Invalid condition: $0",
                        vec![message],
                    ));
                },
            },
        };

        let (script, line, column) = self.resolve_location(&location)?;

        {
            let state = self.inner.state.lock().unwrap();
            if state.breakpoints.contains_key(&id) {
                return Err(StatusMessage::error_with_params(
                    Reference::Unspecified,
                    "Breakpoint $0 is already set",
                    vec![id],
                ));
            }
        }

        let low_level_id = self
            .inner
            .inspector
            .set_breakpoint(&script, line, column, condition.as_deref())
            .map_err(|err| {
                StatusMessage::error_with_params(
                    Reference::BreakpointSourceLocation,
                    "Failed to set breakpoint: $0",
                    vec![err.to_string()],
                )
            })?;

        log::info!(
            "Installed breakpoint {id} at {script}:{line}:{column} (low-level id {low_level_id})"
        );

        let mut state = self.inner.state.lock().unwrap();
        state
            .breakpoints
            .insert(id, BreakpointData { low_level_id });
        Ok(())
    }

    /// Translates the user-supplied location into a loaded script position.
    /// Positions handed to the low-level debugger are 0-based.
    fn resolve_location(
        &self,
        location: &crate::model::SourceLocation,
    ) -> Result<(String, u32, u32), StatusMessage> {
        let path = &location.path;
        let line = location.line - 1;
        let mut column = location.column.unwrap_or(1).saturating_sub(1);

        let hint = if self.inner.mapper.has_mapping_info(path) {
            let mapped = self
                .inner
                .mapper
                .mapping_info(path, line, column)
                .ok_or_else(|| {
                    StatusMessage::error_with_params(
                        Reference::BreakpointSourceLocation,
                        "The source map for $0 could not resolve line $1",
                        vec![path.clone(), location.line.to_string()],
                    )
                })?;
            column = mapped.column;
            ScriptHint {
                path: mapped.file,
                line: mapped.line,
                check_line_count: false,
            }
        } else {
            if !self.inner.source_file_re.is_match(path) {
                return Err(StatusMessage::error_with_params(
                    Reference::BreakpointSourceLocation,
                    "$0 is not a loadable script and no source map covers it",
                    vec![path.clone()],
                ));
            }
            ScriptHint {
                path: path.clone(),
                line,
                check_line_count: true,
            }
        };

        let scripts = self.inner.scanner.find_scripts(
            &hint.path,
            self.inner.config.app_path_relative_to_repository.as_deref(),
        );

        let script = match scripts.len() {
            0 => {
                return Err(StatusMessage::error_with_params(
                    Reference::BreakpointSourceLocation,
                    "A script matching $0 was not found",
                    vec![hint.path],
                ));
            },
            1 => scripts.into_iter().next().unwrap(),
            _ => {
                return Err(StatusMessage::error_with_params(
                    Reference::BreakpointSourceLocation,
                    "Multiple scripts match $0, provide a more specific path",
                    vec![hint.path],
                ));
            },
        };

        if hint.check_line_count {
            if let Some(stats) = self.inner.scanner.stats(&script) {
                if hint.line as usize >= stats.line_count {
                    return Err(StatusMessage::error_with_params(
                        Reference::BreakpointSourceLocation,
                        "Line $0 is past the end of $1 ($2 lines)",
                        vec![
                            (hint.line + 1).to_string(),
                            script,
                            stats.line_count.to_string(),
                        ],
                    ));
                }
            }
        }

        // The runtime's module wrapper shifts columns on line 1 only
        if hint.line == 0 {
            column += self.inner.inspector.module_wrap_prefix_len();
        }

        Ok((script, hint.line, column))
    }

    /// Removes the low-level hook and drops stored data and any listener.
    /// Clearing an unknown id is an error; a listener already fired or
    /// removed is not.
    pub fn clear(&self, breakpoint: &SharedBreakpoint) -> Result<(), StatusMessage> {
        let id = breakpoint.lock().unwrap().id.clone();

        let data = {
            let mut state = self.inner.state.lock().unwrap();
            let Some(data) = state.breakpoints.remove(&id) else {
                return Err(StatusMessage::error_with_params(
                    Reference::Unspecified,
                    "Breakpoint $0 is not set",
                    vec![id],
                ));
            };
            state.listeners.remove(&data.low_level_id);
            data
        };

        if let Err(err) = self.inner.inspector.remove_breakpoint(data.low_level_id) {
            log::warn!("Can't remove low-level breakpoint {}: {err}", data.low_level_id);
        }

        log::info!("Cleared breakpoint {id}");
        Ok(())
    }

    /// Registers the one-shot snapshot listener. `callback` resolves after
    /// the first hit has populated the breakpoint.
    pub fn wait(
        &self,
        breakpoint: &SharedBreakpoint,
        callback: SnapshotCallback,
    ) -> Result<(), StatusMessage> {
        let id = breakpoint.lock().unwrap().id.clone();
        let mut state = self.inner.state.lock().unwrap();

        let Some(data) = state.breakpoints.get(&id) else {
            return Err(StatusMessage::error_with_params(
                Reference::Unspecified,
                "Breakpoint $0 is not set",
                vec![id],
            ));
        };
        let low_level_id = data.low_level_id;

        state.listeners.insert(low_level_id, Listener::Snapshot {
            breakpoint: breakpoint.clone(),
            callback: Some(callback),
            enabled: true,
        });
        Ok(())
    }

    /// Registers the persistent logpoint listener. Each allowed hit renders
    /// the message format against freshly evaluated expressions and calls
    /// `emit`. The listener detaches itself once `should_stop` returns true.
    pub fn log(
        &self,
        breakpoint: &SharedBreakpoint,
        emit: LogEmitter,
        should_stop: ShouldStop,
    ) -> Result<(), StatusMessage> {
        let id = breakpoint.lock().unwrap().id.clone();
        let mut state = self.inner.state.lock().unwrap();

        let Some(data) = state.breakpoints.get(&id) else {
            return Err(StatusMessage::error_with_params(
                Reference::Unspecified,
                "Breakpoint $0 is not set",
                vec![id],
            ));
        };
        let low_level_id = data.low_level_id;

        let limiter = LogRateLimiter::new(
            self.inner.config.log.max_logs_per_second,
            self.inner.config.log.log_delay_seconds,
        );

        state.listeners.insert(low_level_id, Listener::Log {
            breakpoint: breakpoint.clone(),
            emit,
            should_stop,
            limiter,
        });
        Ok(())
    }

    /// Tears down the low-level debugger session and all agent state.
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.breakpoints.clear();
        state.listeners.clear();
        drop(state);

        self.inner.inspector.disconnect();
    }

    pub fn num_breakpoints(&self) -> usize {
        self.inner.state.lock().unwrap().breakpoints.len()
    }

    pub fn num_listeners(&self) -> usize {
        self.inner.state.lock().unwrap().listeners.len()
    }
}

struct ScriptHint {
    path: String,
    line: u32,
    check_line_count: bool,
}

/// Routes one pause event. State mutation finishes before any listener
/// callback runs; callbacks are deferred so an error thrown inside one
/// surfaces in the caller's context instead of vanishing inside the
/// debugger dispatch.
fn dispatch_pause(inner: &Arc<Inner>, event: &PauseEvent) {
    let mut deferred: Vec<Box<dyn FnOnce() + Send>> = Vec::new();

    for low_level_id in &event.breakpoint_ids {
        // Decide under the lock, act outside it
        enum Act {
            Snapshot {
                breakpoint: SharedBreakpoint,
                callback: Option<SnapshotCallback>,
            },
            Log {
                breakpoint: SharedBreakpoint,
                emit: LogEmitter,
            },
            Skip,
        }

        let action = {
            let mut state = inner.state.lock().unwrap();
            let mut detach = false;

            let action = match state.listeners.get_mut(low_level_id) {
                None => Act::Skip,
                Some(Listener::Snapshot { enabled: false, .. }) => Act::Skip,
                Some(Listener::Snapshot {
                    breakpoint,
                    callback,
                    enabled,
                }) => {
                    *enabled = false;
                    Act::Snapshot {
                        breakpoint: breakpoint.clone(),
                        callback: callback.take(),
                    }
                },
                Some(Listener::Log {
                    breakpoint,
                    emit,
                    should_stop,
                    limiter,
                }) => {
                    if should_stop() {
                        log::trace!(
                            "Logpoint {} stopped, detaching listener",
                            breakpoint.lock().unwrap().id
                        );
                        detach = true;
                        Act::Skip
                    } else if limiter.allow(Instant::now()) {
                        Act::Log {
                            breakpoint: breakpoint.clone(),
                            emit: emit.clone(),
                        }
                    } else {
                        Act::Skip
                    }
                },
            };

            if detach {
                state.listeners.remove(low_level_id);
            }
            action
        };

        match action {
            Act::Skip => {},
            Act::Snapshot {
                breakpoint,
                callback,
            } => {
                let expressions = breakpoint.lock().unwrap().watch_expressions().to_vec();
                let capture = capture::collect(
                    inner.inspector.as_ref(),
                    &inner.config.capture,
                    &event.frames,
                    &expressions,
                    None,
                );

                {
                    let mut bp = breakpoint.lock().unwrap();
                    bp.stack_frames = Some(capture.stack_frames);
                    bp.variable_table = Some(capture.variable_table);
                    if !expressions.is_empty() {
                        bp.evaluated_expressions = Some(capture.evaluated_expressions);
                    }
                    log::info!("Captured snapshot for breakpoint {}", bp.id);
                }

                if let Some(callback) = callback {
                    deferred.push(Box::new(move || callback(None)));
                }
            },
            Act::Log { breakpoint, emit } => {
                let message = render_log_message(inner, &breakpoint);
                deferred.push(Box::new(move || emit(&message)));
            },
        }
    }

    for callback in deferred {
        callback();
    }
}

fn render_log_message(inner: &Arc<Inner>, breakpoint: &SharedBreakpoint) -> String {
    let (format, expressions) = {
        let bp = breakpoint.lock().unwrap();
        (
            bp.log_message_format.clone().unwrap_or_default(),
            bp.watch_expressions().to_vec(),
        )
    };

    let values: Vec<String> = expressions
        .iter()
        .map(|source| match crate::expr::check(source) {
            Err(message) => format!("<error: {message}>"),
            Ok(_) => match inner.inspector.evaluate_on_frame(0, source, true) {
                Ok(Value::Object(handle)) => handle.description,
                Ok(value) => value.render(),
                Err(err) => format!("<error: {err}>"),
            },
        })
        .collect();

    status::format_message(&format, &values)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::fixtures::scripted_inspector::ScriptedInspector;
    use crate::inspector::NamedValue;
    use crate::model::SourceLocation;

    fn scanner_with_fixture() -> (tempfile::TempDir, Arc<FileScanner>) {
        let dir = tempfile::tempdir().unwrap();
        let fixtures = dir.path().join("fixtures");
        std::fs::create_dir_all(&fixtures).unwrap();
        std::fs::write(
            fixtures.join("foo.js"),
            "function fib(n) {\n  return n;\n}\n",
        )
        .unwrap();

        let scanner = FileScanner::scan(
            dir.path(),
            &Regex::new(r"\.js$").unwrap(),
            &Regex::new(r"\.map$").unwrap(),
        )
        .unwrap();
        (dir, Arc::new(scanner))
    }

    fn api_fixture() -> (tempfile::TempDir, Arc<ScriptedInspector>, DebugApi) {
        let (dir, scanner) = scanner_with_fixture();
        let inspector = Arc::new(ScriptedInspector::new());
        let api = DebugApi::new(
            Config::default(),
            inspector.clone(),
            scanner,
            Arc::new(SourceMapper::empty()),
        )
        .unwrap();
        (dir, inspector, api)
    }

    fn shared(bp: Breakpoint) -> SharedBreakpoint {
        Arc::new(Mutex::new(bp))
    }

    fn capture_breakpoint(id: &str, line: u32) -> SharedBreakpoint {
        shared(Breakpoint {
            id: id.to_string(),
            location: Some(SourceLocation::new("fixtures/foo.js", line)),
            ..Default::default()
        })
    }

    #[test]
    fn test_set_and_clear_restore_state() {
        let (_dir, _inspector, api) = api_fixture();
        let bp = capture_breakpoint("test", 2);

        api.set(&bp).unwrap();
        assert_eq!(api.num_breakpoints(), 1);

        api.wait(&bp, Box::new(|_| {})).unwrap();
        assert_eq!(api.num_listeners(), 1);

        api.clear(&bp).unwrap();
        assert_eq!(api.num_breakpoints(), 0);
        assert_eq!(api.num_listeners(), 0);
    }

    #[test]
    fn test_clear_unknown_id_is_an_error() {
        let (_dir, _inspector, api) = api_fixture();
        let bp = capture_breakpoint("never-set", 2);
        assert!(api.clear(&bp).is_err());
    }

    #[test]
    fn test_set_rejects_missing_location() {
        let (_dir, _inspector, api) = api_fixture();
        let bp = shared(Breakpoint {
            id: String::from("test"),
            ..Default::default()
        });

        let status = api.set(&bp).unwrap_err();
        assert!(status.is_error);
        assert_eq!(status.refers_to, Reference::Unspecified);
    }

    #[test]
    fn test_set_accepts_zero_id() {
        let (_dir, _inspector, api) = api_fixture();
        let bp = capture_breakpoint("0", 2);
        api.set(&bp).unwrap();
        assert_eq!(api.num_breakpoints(), 1);
    }

    #[test]
    fn test_set_rejects_bad_condition() {
        let (_dir, _inspector, api) = api_fixture();
        let bp = shared(Breakpoint {
            id: String::from("test"),
            location: Some(SourceLocation::new("fixtures/foo.js", 2)),
            condition: Some(String::from("n = 2")),
            ..Default::default()
        });

        let status = api.set(&bp).unwrap_err();
        assert_eq!(status.refers_to, Reference::BreakpointCondition);
    }

    #[test]
    fn test_set_treats_semicolon_condition_as_unconditional() {
        let (_dir, inspector, api) = api_fixture();
        let bp = shared(Breakpoint {
            id: String::from("test"),
            location: Some(SourceLocation::new("fixtures/foo.js", 2)),
            condition: Some(String::from(";")),
            ..Default::default()
        });

        api.set(&bp).unwrap();
        assert_eq!(inspector.installed_condition(0), None);
    }

    #[test]
    fn test_set_rejects_unknown_script() {
        let (_dir, _inspector, api) = api_fixture();
        let bp = shared(Breakpoint {
            id: String::from("test"),
            location: Some(SourceLocation::new("no/such/file.js", 2)),
            ..Default::default()
        });

        let status = api.set(&bp).unwrap_err();
        assert_eq!(status.refers_to, Reference::BreakpointSourceLocation);
    }

    #[test]
    fn test_set_rejects_line_past_end_of_file() {
        let (_dir, _inspector, api) = api_fixture();
        let bp = capture_breakpoint("test", 5000);

        let status = api.set(&bp).unwrap_err();
        assert_eq!(status.refers_to, Reference::BreakpointSourceLocation);
        assert!(status.message().contains("past the end"));
    }

    #[test]
    fn test_set_rejects_non_source_extension_without_map() {
        let (_dir, _inspector, api) = api_fixture();
        let bp = shared(Breakpoint {
            id: String::from("test"),
            location: Some(SourceLocation::new("fixtures/foo.py", 2)),
            ..Default::default()
        });

        let status = api.set(&bp).unwrap_err();
        assert_eq!(status.refers_to, Reference::BreakpointSourceLocation);
    }

    #[test]
    fn test_line_one_column_is_shifted_by_module_wrap() {
        let (_dir, inspector, api) = {
            let (dir, scanner) = scanner_with_fixture();
            let inspector = Arc::new(ScriptedInspector::with_module_wrap_prefix(62));
            let api = DebugApi::new(
                Config::default(),
                inspector.clone(),
                scanner,
                Arc::new(SourceMapper::empty()),
            )
            .unwrap();
            (dir, inspector, api)
        };

        let bp = capture_breakpoint("test", 1);
        api.set(&bp).unwrap();
        assert_eq!(inspector.installed_position(0), (0, 62));

        // Lines past the first are unshifted
        let bp2 = capture_breakpoint("test2", 2);
        api.set(&bp2).unwrap();
        assert_eq!(inspector.installed_position(1), (1, 0));
    }

    #[test]
    fn test_snapshot_fires_once_and_populates() {
        let (_dir, inspector, api) = api_fixture();
        let bp = capture_breakpoint("test", 2);
        api.set(&bp).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_cb = fired.clone();
        api.wait(
            &bp,
            Box::new(move |status| {
                assert!(status.is_none());
                fired_in_cb.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        let locals = vec![NamedValue::new("n", Value::Number(2.0))];
        inspector.trigger_pause_with_locals("fib", locals.clone());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        {
            let bp = bp.lock().unwrap();
            let frames = bp.stack_frames.as_ref().unwrap();
            assert_eq!(frames[0].locals[0].name.as_deref(), Some("n"));
            assert_eq!(frames[0].locals[0].value.as_deref(), Some("2"));
        }

        // A second hit on the same low-level id is a no-op
        inspector.trigger_pause_with_locals("fib", locals);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pause_after_clear_is_a_no_op() {
        let (_dir, inspector, api) = api_fixture();
        let bp = capture_breakpoint("test", 2);
        api.set(&bp).unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_in_cb = fired.clone();
        api.wait(
            &bp,
            Box::new(move |_| fired_in_cb.store(true, Ordering::SeqCst)),
        )
        .unwrap();

        api.clear(&bp).unwrap();

        inspector.trigger_pause_with_locals("fib", Vec::new());
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_logpoint_renders_and_throttles() {
        let (_dir, inspector, api) = {
            let (dir, scanner) = scanner_with_fixture();
            let inspector = Arc::new(ScriptedInspector::new());
            let mut config = Config::default();
            config.log.max_logs_per_second = 1;
            config.log.log_delay_seconds = 1;
            let api = DebugApi::new(
                config,
                inspector.clone(),
                scanner,
                Arc::new(SourceMapper::empty()),
            )
            .unwrap();
            (dir, inspector, api)
        };

        let bp = shared(Breakpoint {
            id: String::from("testLog"),
            action: crate::model::Action::Log,
            location: Some(SourceLocation::new("fixtures/foo.js", 2)),
            log_message_format: Some(String::from("cat")),
            ..Default::default()
        });
        api.set(&bp).unwrap();

        let transcript = Arc::new(Mutex::new(String::new()));
        let transcript_in_emit = transcript.clone();
        api.log(
            &bp,
            Arc::new(move |message: &str| {
                transcript_in_emit.lock().unwrap().push_str(message);
            }),
            Arc::new(|| false),
        )
        .unwrap();

        // Trigger every 100ms for 1.5s; the bucket admits exactly two
        let start = Instant::now();
        let mut hits = 0;
        while start.elapsed() < std::time::Duration::from_millis(1500) {
            inspector.trigger_pause_with_locals("fib", Vec::new());
            hits += 1;
            std::thread::sleep(std::time::Duration::from_millis(100));
        }

        assert!(hits > 12);
        assert_eq!(transcript.lock().unwrap().as_str(), "catcat");
    }

    #[test]
    fn test_logpoint_formats_expression_values() {
        let (_dir, inspector, api) = api_fixture();
        inspector.script_eval("n", Ok(Value::Number(5.0)));

        let bp = shared(Breakpoint {
            id: String::from("testLog"),
            action: crate::model::Action::Log,
            location: Some(SourceLocation::new("fixtures/foo.js", 2)),
            log_message_format: Some(String::from("hi $0 $1 $0")),
            expressions: Some(vec![String::from("n")]),
            ..Default::default()
        });
        api.set(&bp).unwrap();

        let transcript = Arc::new(Mutex::new(Vec::new()));
        let transcript_in_emit = transcript.clone();
        api.log(
            &bp,
            Arc::new(move |message: &str| {
                transcript_in_emit.lock().unwrap().push(message.to_string());
            }),
            Arc::new(|| false),
        )
        .unwrap();

        inspector.trigger_pause_with_locals("fib", Vec::new());
        assert_eq!(transcript.lock().unwrap()[0], "hi 5 $1 5");
    }

    #[test]
    fn test_logpoint_detaches_when_should_stop() {
        let (_dir, inspector, api) = api_fixture();

        let bp = shared(Breakpoint {
            id: String::from("testLog"),
            action: crate::model::Action::Log,
            location: Some(SourceLocation::new("fixtures/foo.js", 2)),
            log_message_format: Some(String::from("x")),
            ..Default::default()
        });
        api.set(&bp).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let stop_in_cb = stop.clone();
        api.log(
            &bp,
            Arc::new(|_: &str| {}),
            Arc::new(move || stop_in_cb.load(Ordering::SeqCst)),
        )
        .unwrap();
        assert_eq!(api.num_listeners(), 1);

        stop.store(true, Ordering::SeqCst);
        inspector.trigger_pause_with_locals("fib", Vec::new());
        assert_eq!(api.num_listeners(), 0);
    }
}
