//
// debuglet.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use crossbeam::channel::unbounded;
use crossbeam::channel::Receiver;
use crossbeam::channel::RecvTimeoutError;
use crossbeam::channel::Sender;

use crate::api::DebugApi;
use crate::api::SharedBreakpoint;
use crate::config::Config;
use crate::controller::Controller;
use crate::controller::ControllerError;
use crate::macros::spawn;
use crate::macros::unwrap;
use crate::model::Action;
use crate::model::Breakpoint;
use crate::model::Debuggee;
use crate::scanner::FileScanner;
use crate::status::Reference;
use crate::status::StatusMessage;
use crate::version;

const EXPIRED_MESSAGE: &str = "The snapshot has expired";
const BAD_ACTION_MESSAGE: &str = "The only breakpoint actions are CAPTURE/LOG";

const REGISTER_BACKOFF_MIN: Duration = Duration::from_secs(1);
const REGISTER_BACKOFF_MAX: Duration = Duration::from_secs(600);
/// Re-register cadence while the Controller reports the debuggee disabled.
const DEFAULT_ACTIVE_PERIOD: Duration = Duration::from_secs(600);
const UPDATE_MAX_ATTEMPTS: usize = 4;

/// Lifecycle notifications for embedders and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugletEvent {
    Started,
    Registered { debuggee_id: String },
    RemotelyDisabled,
    InitError { message: String },
    BreakpointInstalled { id: String },
    BreakpointRejected { id: String },
    BreakpointCompleted { id: String },
    Stopped,
}

struct ActiveEntry {
    breakpoint: SharedBreakpoint,
    installed_at: Instant,
}

type ActiveMap = Arc<Mutex<HashMap<String, ActiveEntry>>>;
type CompletedSet = Arc<Mutex<HashSet<String>>>;

struct UpdateJob {
    debuggee_id: String,
    breakpoint: Breakpoint,
}

/// The top-level control loop: registers the debuggee, long-polls the
/// active breakpoint set, reconciles installs and removals, expires stale
/// breakpoints, and reports every final state exactly once.
pub struct Debuglet {
    stop_tx: Sender<()>,
    events_rx: Receiver<DebugletEvent>,
    worker: Option<JoinHandle<()>>,
    updater: Option<JoinHandle<()>>,
}

impl Debuglet {
    pub fn start(
        config: Config,
        api: DebugApi,
        controller: Arc<dyn Controller>,
        scanner: Arc<FileScanner>,
    ) -> Self {
        let (stop_tx, stop_rx) = unbounded::<()>();
        let (events_tx, events_rx) = unbounded::<DebugletEvent>();
        let (updates_tx, updates_rx) = unbounded::<UpdateJob>();

        let update_interval = Duration::from_secs(config.breakpoint_update_interval_sec);
        let updater_controller = controller.clone();
        let updater = spawn!("argus-updater", move || {
            run_updater(updater_controller, updates_rx, update_interval);
        });

        let worker = spawn!("argus-debuglet", move || {
            let worker = Worker {
                config,
                api,
                controller,
                scanner,
                active: Arc::new(Mutex::new(HashMap::new())),
                completed: Arc::new(Mutex::new(HashSet::new())),
                updates_tx,
                events_tx,
                stop_rx,
                stopped: false,
            };
            worker.run();
        });

        Self {
            stop_tx,
            events_rx,
            worker: Some(worker),
            updater: Some(updater),
        }
    }

    /// Lifecycle event stream. Cloned receivers compete for events, so use
    /// a single consumer.
    pub fn events(&self) -> Receiver<DebugletEvent> {
        self.events_rx.clone()
    }

    /// Signals the control loop to stop and waits for it to wind down. The
    /// in-flight long poll is bounded by the client timeout, so this can
    /// block for a moment against a slow controller.
    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(updater) = self.updater.take() {
            let _ = updater.join();
        }
    }
}

impl Drop for Debuglet {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    config: Config,
    api: DebugApi,
    controller: Arc<dyn Controller>,
    scanner: Arc<FileScanner>,
    active: ActiveMap,
    completed: CompletedSet,
    updates_tx: Sender<UpdateJob>,
    events_tx: Sender<DebugletEvent>,
    stop_rx: Receiver<()>,
    stopped: bool,
}

impl Worker {
    fn emit(&self, event: DebugletEvent) {
        let _ = self.events_tx.send(event);
    }

    fn should_stop(&mut self) -> bool {
        if self.stopped {
            return true;
        }
        if self.stop_rx.try_recv().is_ok() {
            self.stopped = true;
        }
        self.stopped
    }

    /// Sleeps for `duration` unless a stop arrives first. Returns false on
    /// stop.
    fn sleep_interruptible(&mut self, duration: Duration) -> bool {
        match self.stop_rx.recv_timeout(duration) {
            Ok(()) => {
                self.stopped = true;
                false
            },
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => {
                self.stopped = true;
                false
            },
        }
    }

    fn run(mut self) {
        self.emit(DebugletEvent::Started);

        let Some(project) = self.resolve_project() else {
            let message = String::from(
                "Unable to determine the project id; set it in the agent \
                 configuration or the ARGUS_PROJECT environment variable",
            );
            log::error!("{message}");
            self.emit(DebugletEvent::InitError { message });
            self.emit(DebugletEvent::Stopped);
            return;
        };

        let debuggee = self.build_debuggee(&project);
        log::info!(
            "Debuglet starting for project {project} (uniquifier {})",
            debuggee.uniquifier
        );

        let mut backoff = Backoff::new(REGISTER_BACKOFF_MIN, REGISTER_BACKOFF_MAX);

        'register: loop {
            if self.should_stop() {
                break;
            }

            let registration = unwrap!(self.controller.register(&debuggee), err {
                log::warn!("Debuggee registration failed: {err}");
                if !self.sleep_interruptible(backoff.next()) {
                    break 'register;
                }
                continue 'register;
            });
            backoff.reset();

            let debuggee_id = registration.debuggee.id.clone();
            log::info!("Registered debuggee {debuggee_id}");
            self.emit(DebugletEvent::Registered {
                debuggee_id: debuggee_id.clone(),
            });

            // A disabled debuggee keeps re-registering so re-enabling is
            // eventually detected, but never fetches breakpoints.
            if registration.debuggee.is_disabled.unwrap_or(false) {
                log::info!("Debuggee is disabled by the Controller");
                self.emit(DebugletEvent::RemotelyDisabled);
                let period = registration
                    .active_period_sec
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_ACTIVE_PERIOD);
                if !self.sleep_interruptible(period) {
                    break 'register;
                }
                continue 'register;
            }

            // Fetch loop; any error transitions back to registration, which
            // covers server-side session expiry.
            loop {
                if self.should_stop() {
                    break 'register;
                }

                match self.controller.list_breakpoints(&debuggee_id) {
                    Ok(response) => {
                        backoff.reset();
                        if response.wait_expired != Some(true) {
                            self.reconcile(&debuggee_id, response.into_breakpoints());
                        }
                        self.sweep_expired(&debuggee_id);
                    },
                    Err(ControllerError::Status(status)) => {
                        log::warn!("Breakpoint fetch returned {status}; re-registering");
                        if !self.sleep_interruptible(backoff.next()) {
                            break 'register;
                        }
                        continue 'register;
                    },
                    Err(err) => {
                        log::warn!("Breakpoint fetch failed: {err}; re-registering");
                        if !self.sleep_interruptible(backoff.next()) {
                            break 'register;
                        }
                        continue 'register;
                    },
                }
            }
        }

        self.clear_all();
        self.emit(DebugletEvent::Stopped);
    }

    /// Explicit config beats the environment. A metadata-service leg can be
    /// layered by the embedder via config before start.
    fn resolve_project(&self) -> Option<String> {
        if let Some(project) = &self.config.project_id {
            return Some(project.clone());
        }
        std::env::var("ARGUS_PROJECT")
            .ok()
            .filter(|project| !project.is_empty())
    }

    fn build_debuggee(&self, project: &str) -> Debuggee {
        let service = self.config.service_name.clone();
        let service_version = self.config.service_version.clone();

        let mut description = project.to_string();
        if let Some(service) = &service {
            description = format!("{description}-{service}");
        }
        if let Some(version) = &service_version {
            description = format!("{description}-{version}");
        }

        // Stable across restarts of the same deployed code, different when
        // the scanned sources change; the Controller uses it to tell
        // versions apart.
        let mut hasher = blake3::Hasher::new();
        hasher.update(description.as_bytes());
        match self.scanner.content_digest() {
            Some(digest) => {
                hasher.update(digest.as_bytes());
            },
            None => {
                hasher.update(uuid::Uuid::new_v4().as_bytes());
            },
        }
        let uniquifier = hasher.finalize().to_hex().to_string();

        let mut labels = std::collections::BTreeMap::new();
        if let Some(service) = &service {
            labels.insert(String::from("module"), service.clone());
        }
        if let Some(version) = &service_version {
            labels.insert(String::from("version"), version.clone());
        }

        Debuggee {
            id: None,
            project: project.to_string(),
            uniquifier,
            description,
            agent_version: version::agent_version(),
            labels: (!labels.is_empty()).then_some(labels),
            source_contexts: None,
            status: None,
        }
    }

    /// Applies one poll result: `server - local` installs, `local - server`
    /// clears. Clears are never reported back.
    fn reconcile(&mut self, debuggee_id: &str, server_breakpoints: Vec<Breakpoint>) {
        let server_ids: HashSet<String> = server_breakpoints
            .iter()
            .map(|bp| bp.id.clone())
            .collect();

        let removed: Vec<(String, SharedBreakpoint)> = {
            let active = self.active.lock().unwrap();
            active
                .iter()
                .filter(|(id, _)| !server_ids.contains(*id))
                .map(|(id, entry)| (id.clone(), entry.breakpoint.clone()))
                .collect()
        };
        for (id, breakpoint) in removed {
            log::info!("Breakpoint {id} removed by the Controller");
            self.active.lock().unwrap().remove(&id);
            if let Err(status) = self.api.clear(&breakpoint) {
                log::warn!("Can't clear breakpoint {id}: {}", status.message());
            }
        }

        // The finalized guard only needs to cover ids the server still lists
        self.completed
            .lock()
            .unwrap()
            .retain(|id| server_ids.contains(id));

        for breakpoint in server_breakpoints {
            let id = breakpoint.id.clone();

            let already_known = {
                self.active.lock().unwrap().contains_key(&id)
                    || self.completed.lock().unwrap().contains(&id)
            };
            if already_known {
                continue;
            }

            match breakpoint.action {
                Action::Capture | Action::Log => self.install(debuggee_id, breakpoint),
                Action::Unknown => {
                    log::warn!("Rejecting breakpoint {id} with unsupported action");
                    self.reject(debuggee_id, breakpoint, StatusMessage::error(
                        Reference::Unspecified,
                        BAD_ACTION_MESSAGE,
                    ));
                },
            }
        }
    }

    fn reject(&mut self, debuggee_id: &str, mut breakpoint: Breakpoint, status: StatusMessage) {
        let id = breakpoint.id.clone();
        breakpoint.finalize(Some(status));
        self.completed.lock().unwrap().insert(id.clone());
        self.enqueue_update(debuggee_id, breakpoint);
        self.emit(DebugletEvent::BreakpointRejected { id });
    }

    fn install(&mut self, debuggee_id: &str, breakpoint: Breakpoint) {
        let id = breakpoint.id.clone();
        let action = breakpoint.action;
        let shared: SharedBreakpoint = Arc::new(Mutex::new(breakpoint));

        if let Err(status) = self.api.set(&shared) {
            log::warn!("Breakpoint {id} rejected: {}", status.message());
            let snapshot = {
                let mut bp = shared.lock().unwrap();
                bp.finalize(Some(status));
                bp.clone()
            };
            self.completed.lock().unwrap().insert(id.clone());
            self.enqueue_update(debuggee_id, snapshot);
            self.emit(DebugletEvent::BreakpointRejected { id });
            return;
        }

        self.active.lock().unwrap().insert(id.clone(), ActiveEntry {
            breakpoint: shared.clone(),
            installed_at: Instant::now(),
        });

        let attached = match action {
            Action::Capture => self.attach_snapshot_listener(debuggee_id, &shared),
            Action::Log => self.attach_log_listener(&shared),
            Action::Unknown => unreachable!("unknown actions are rejected before install"),
        };

        if let Err(status) = attached {
            log::error!("Can't attach listener for {id}: {}", status.message());
            self.active.lock().unwrap().remove(&id);
            let _ = self.api.clear(&shared);
            return;
        }

        self.emit(DebugletEvent::BreakpointInstalled { id });
    }

    /// Wires capture-triggered finalization: populate, mark final, update
    /// once, clear the hook, drop from the active map.
    fn attach_snapshot_listener(
        &self,
        debuggee_id: &str,
        shared: &SharedBreakpoint,
    ) -> Result<(), StatusMessage> {
        let api = self.api.clone();
        let active = self.active.clone();
        let completed = self.completed.clone();
        let updates_tx = self.updates_tx.clone();
        let events_tx = self.events_tx.clone();
        let debuggee_id = debuggee_id.to_string();
        let breakpoint = shared.clone();

        self.api.wait(
            shared,
            Box::new(move |status| {
                let (id, snapshot) = {
                    let mut bp = breakpoint.lock().unwrap();
                    bp.finalize(status);
                    (bp.id.clone(), bp.clone())
                };

                completed.lock().unwrap().insert(id.clone());
                active.lock().unwrap().remove(&id);

                let _ = updates_tx.send(UpdateJob {
                    debuggee_id,
                    breakpoint: snapshot,
                });

                if let Err(status) = api.clear(&breakpoint) {
                    log::warn!("Can't clear captured breakpoint {id}: {}", status.message());
                }

                let _ = events_tx.send(DebugletEvent::BreakpointCompleted { id });
            }),
        )
    }

    /// Logpoints are never finalized by a hit; they emit through the agent
    /// log until the server removes them or they expire.
    fn attach_log_listener(&self, shared: &SharedBreakpoint) -> Result<(), StatusMessage> {
        let id = shared.lock().unwrap().id.clone();
        let active = self.active.clone();

        self.api.log(
            shared,
            Arc::new(|message: &str| {
                log::info!("LOGPOINT: {message}");
            }),
            Arc::new(move || !active.lock().unwrap().contains_key(&id)),
        )
    }

    /// Finalizes breakpoints past their TTL. Reappearance of an expired id
    /// in a later poll is a no-op thanks to the completed guard.
    fn sweep_expired(&mut self, debuggee_id: &str) {
        let expiration = Duration::from_secs(self.config.breakpoint_expiration_sec);

        let expired: Vec<(String, SharedBreakpoint)> = {
            let active = self.active.lock().unwrap();
            active
                .iter()
                .filter(|(_, entry)| entry.installed_at.elapsed() >= expiration)
                .map(|(id, entry)| (id.clone(), entry.breakpoint.clone()))
                .collect()
        };

        for (id, breakpoint) in expired {
            log::info!("Breakpoint {id} expired");

            let snapshot = {
                let mut bp = breakpoint.lock().unwrap();
                bp.finalize(Some(StatusMessage::error(
                    Reference::Unspecified,
                    EXPIRED_MESSAGE,
                )));
                bp.clone()
            };

            self.completed.lock().unwrap().insert(id.clone());
            self.active.lock().unwrap().remove(&id);
            self.enqueue_update(debuggee_id, snapshot);

            if let Err(status) = self.api.clear(&breakpoint) {
                log::warn!("Can't clear expired breakpoint {id}: {}", status.message());
            }

            self.emit(DebugletEvent::BreakpointCompleted { id });
        }
    }

    fn enqueue_update(&self, debuggee_id: &str, breakpoint: Breakpoint) {
        let _ = self.updates_tx.send(UpdateJob {
            debuggee_id: debuggee_id.to_string(),
            breakpoint,
        });
    }

    fn clear_all(&mut self) {
        let entries: Vec<SharedBreakpoint> = {
            let mut active = self.active.lock().unwrap();
            active.drain().map(|(_, entry)| entry.breakpoint).collect()
        };
        for breakpoint in entries {
            let _ = self.api.clear(&breakpoint);
        }
    }
}

/// Sends each final breakpoint state with a bounded retry budget; on
/// exhaustion the update is logged and dropped. It is better to forget a
/// breakpoint than to loop on it.
fn run_updater(
    controller: Arc<dyn Controller>,
    updates_rx: Receiver<UpdateJob>,
    update_interval: Duration,
) {
    while let Ok(job) = updates_rx.recv() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));

        for attempt in 1..=UPDATE_MAX_ATTEMPTS {
            match controller.update_breakpoint(&job.debuggee_id, &job.breakpoint) {
                Ok(()) => {
                    log::debug!("Reported final state for breakpoint {}", job.breakpoint.id);
                    break;
                },
                Err(err) if attempt == UPDATE_MAX_ATTEMPTS => {
                    log::warn!(
                        "Dropping update for breakpoint {} after {attempt} attempts: {err}",
                        job.breakpoint.id
                    );
                },
                Err(err) => {
                    log::debug!(
                        "Update attempt {attempt} for breakpoint {} failed: {err}",
                        job.breakpoint.id
                    );
                    std::thread::sleep(backoff.next().max(update_interval));
                },
            }
        }
    }
}

struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            current: min,
            min,
            max,
        }
    }

    fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}
