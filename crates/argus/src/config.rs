//
// config.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// Limits applied while materializing captured stack state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    /// Total number of stack frames captured.
    pub max_frames: usize,
    /// Frames for which arguments and locals are materialized. Deeper frames
    /// get a status stub instead.
    pub max_expand_frames: usize,
    /// Own-property children emitted per compound value.
    pub max_properties: usize,
    /// Cumulative byte budget shared by locals and watch results.
    pub max_data_size: usize,
    /// Strings longer than this are truncated with a status.
    pub max_string_length: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_frames: 20,
            max_expand_frames: 5,
            max_properties: 10,
            max_data_size: 20000,
            max_string_length: 100,
        }
    }
}

/// Throttling applied to logpoint emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// Token bucket size over a one second window, per breakpoint.
    pub max_logs_per_second: u32,
    /// How long an over-budget logpoint disables itself.
    pub log_delay_seconds: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_logs_per_second: 50,
            log_delay_seconds: 1,
        }
    }
}

/// Agent configuration. Defaults are production values; tests override the
/// handful they exercise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub enabled: bool,
    /// Explicit project id. Takes precedence over the environment.
    pub project_id: Option<String>,
    pub service_name: Option<String>,
    pub service_version: Option<String>,
    /// Base URL of the Debug Controller service.
    pub controller_url: String,
    /// Root directory scanned for deployed sources.
    pub working_directory: PathBuf,
    /// Rebases server-supplied paths before scanner lookup.
    pub app_path_relative_to_repository: Option<String>,
    /// Regex selecting source files during the scan.
    pub source_file_pattern: String,
    /// Regex selecting emitted source-map files during the scan.
    pub source_map_pattern: String,
    /// Per-breakpoint TTL, measured from when the agent first sees it.
    pub breakpoint_expiration_sec: u64,
    /// Minimum gap between successive update attempts for the same breakpoint.
    pub breakpoint_update_interval_sec: u64,
    pub capture: CaptureConfig,
    pub log: LogConfig,
    pub log_level: Option<String>,
    /// Allows a second agent in the same process. Test hook.
    pub force_new_agent: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            project_id: None,
            service_name: None,
            service_version: None,
            controller_url: String::from("https://clouddebugger.googleapis.com/v2/controller"),
            working_directory: PathBuf::from("."),
            app_path_relative_to_repository: None,
            source_file_pattern: String::from(r"\.js$"),
            source_map_pattern: String::from(r"\.map$"),
            breakpoint_expiration_sec: 24 * 60 * 60,
            breakpoint_update_interval_sec: 10,
            capture: CaptureConfig::default(),
            log: LogConfig::default(),
            log_level: None,
            force_new_agent: false,
        }
    }
}

impl Config {
    /// Applies the environment overrides, read once at startup.
    ///
    /// `ARGUS_CONFIG` points at a JSON config file that is merged first, so
    /// explicit fields in `self` lose to it only where the file sets them.
    /// The remaining variables override individual fields.
    pub fn apply_env(mut self) -> Self {
        if let Ok(path) = std::env::var("ARGUS_CONFIG") {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str::<Config>(&contents) {
                    Ok(from_file) => self = from_file,
                    Err(err) => log::error!("Can't parse config file {path}: {err}"),
                },
                Err(err) => log::error!("Can't read config file {path}: {err}"),
            }
        }

        if let Ok(project) = std::env::var("ARGUS_PROJECT") {
            if !project.is_empty() {
                self.project_id = Some(project);
            }
        }
        if let Ok(service) = std::env::var("ARGUS_SERVICE") {
            if !service.is_empty() {
                self.service_name = Some(service);
            }
        }
        if let Ok(version) = std::env::var("ARGUS_SERVICE_VERSION") {
            if !version.is_empty() {
                self.service_version = Some(version);
            }
        }
        if let Ok(level) = std::env::var("ARGUS_LOG_LEVEL") {
            if !level.is_empty() {
                self.log_level = Some(level);
            }
        }
        if let Ok(path) = std::env::var("ARGUS_APP_PATH") {
            if !path.is_empty() {
                self.app_path_relative_to_repository = Some(path);
            }
        }
        if std::env::var("ARGUS_DISABLE").is_ok_and(|v| !v.is_empty()) {
            self.enabled = false;
        }

        self
    }
}
