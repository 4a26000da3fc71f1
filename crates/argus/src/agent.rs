//
// agent.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam::channel::Receiver;
use regex::Regex;

use crate::api::DebugApi;
use crate::config::Config;
use crate::controller::Controller;
use crate::controller::HttpController;
use crate::debuglet::Debuglet;
use crate::debuglet::DebugletEvent;
use crate::inspector::Inspector;
use crate::logger;
use crate::scanner::FileScanner;
use crate::sourcemap::SourceMapper;

// One agent per process unless the embedder explicitly forces another
static AGENT_RUNNING: AtomicBool = AtomicBool::new(false);

/// A started agent. Dropping it (or calling `stop`) winds down the control
/// loop and disconnects the low-level debugger.
pub struct Agent {
    api: DebugApi,
    debuglet: Debuglet,
}

impl Agent {
    pub fn events(&self) -> Receiver<DebugletEvent> {
        self.debuglet.events()
    }

    pub fn stop(mut self) {
        self.debuglet.stop();
        self.api.disconnect();
        AGENT_RUNNING.store(false, Ordering::SeqCst);
    }
}

/// Starts the agent against the production Controller endpoint. Reads the
/// environment overrides once, scans the working directory, loads source
/// maps, and spins up the control loop.
pub fn start(config: Config, inspector: Arc<dyn Inspector>) -> anyhow::Result<Agent> {
    let config = config.apply_env();
    logger::initialize(config.log_level.as_deref(), None);

    let controller = Arc::new(HttpController::new(&config.controller_url)?);
    start_with_controller(config, inspector, controller)
}

/// Starts the agent against an arbitrary Controller implementation. Used by
/// embedders with custom transports and by the integration tests.
pub fn start_with_controller(
    config: Config,
    inspector: Arc<dyn Inspector>,
    controller: Arc<dyn Controller>,
) -> anyhow::Result<Agent> {
    if !config.enabled {
        anyhow::bail!("the agent is disabled by configuration");
    }
    if AGENT_RUNNING.swap(true, Ordering::SeqCst) && !config.force_new_agent {
        anyhow::bail!("a debugging agent is already running in this process");
    }

    let file_re = Regex::new(&config.source_file_pattern)?;
    let map_re = Regex::new(&config.source_map_pattern)?;

    let scanner = Arc::new(FileScanner::scan(
        &config.working_directory,
        &file_re,
        &map_re,
    )?);
    let mapper = Arc::new(SourceMapper::load(&scanner.select_files(&map_re)));

    let api = DebugApi::new(config.clone(), inspector, scanner.clone(), mapper)?;
    let debuglet = Debuglet::start(config, api.clone(), controller, scanner);

    Ok(Agent { api, debuglet })
}
