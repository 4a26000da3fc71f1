//
// logger.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use std::fs::File;
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::Once;
use std::time::SystemTime;

use chrono::DateTime;
use chrono::Utc;

static ONCE: Once = Once::new();
static LOGGER: Logger = Logger::new();

struct LoggerInner {
    /// The log level. `RUST_LOG` wins, then the explicit level, then `info`.
    level: log::Level,

    /// The file we log to. None means stderr for errors, stdout otherwise.
    file: Option<File>,
}

struct Logger {
    /// Interior mutability so a `&'static` logger can be initialized late and
    /// written from multiple threads.
    inner: Mutex<Option<LoggerInner>>,
}

impl Logger {
    const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    fn initialize(&self, level: log::Level, file: Option<File>) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Some(LoggerInner { level, file });
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        let guard = self.inner.lock().unwrap();
        match guard.as_ref() {
            Some(inner) => metadata.level() <= inner.level,
            None => false,
        }
    }

    fn log(&self, record: &log::Record) {
        let mut guard = self.inner.lock().unwrap();
        let Some(inner) = guard.as_mut() else {
            return;
        };

        if record.level() > inner.level {
            return;
        }

        let now: DateTime<Utc> = SystemTime::now().into();
        let timestamp = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        let message = format!(
            "{} [argus] {} {}:{}: {}",
            timestamp,
            record.level(),
            record.file().unwrap_or("?"),
            record.line().unwrap_or(0),
            record.args(),
        );

        if let Some(file) = inner.file.as_mut() {
            if let Err(error) = writeln!(file, "{message}") {
                eprintln!("Error writing to log file: {error:?}");
            }
        } else if record.level() == log::Level::Error {
            eprintln!("{message}");
        } else {
            println!("{message}");
        }
    }

    fn flush(&self) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(inner) = guard.as_mut() {
            if let Some(file) = inner.file.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

/// Initializes the process-wide logger. Safe to call more than once; only the
/// first call takes effect. `level` is the configured fallback when `RUST_LOG`
/// is unset.
pub fn initialize(level: Option<&str>, file: Option<&str>) {
    ONCE.call_once(|| {
        let level = std::env::var("RUST_LOG")
            .ok()
            .or_else(|| level.map(|level| level.to_string()))
            .unwrap_or_else(|| String::from("info"));

        let level = match log::Level::from_str(level.as_str()) {
            Ok(level) => level,
            Err(err) => {
                eprintln!("Error parsing log level, defaulting to `info`: {err:?}");
                log::Level::Info
            },
        };

        log::set_max_level(level.to_level_filter());

        let file = file.and_then(|path| {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path);

            match file {
                Ok(file) => Some(file),
                Err(error) => {
                    eprintln!("Error initializing log file: {error:?}");
                    None
                },
            }
        });

        LOGGER.initialize(level, file);

        // A different logger may already be installed by the host process.
        // That is fine, we just keep using it.
        let _ = log::set_logger(&LOGGER);
    });
}
