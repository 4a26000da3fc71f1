//
// macros.rs
//
// Copyright (C) 2023 Posit Software, PBC. All rights reserved.
//
//

/// Unwraps a `Result`, running the error block when it fails. The block must
/// diverge (return, continue, or produce a fallback value).
macro_rules! unwrap {

    ($value: expr, $id: ident $error: block) => {
        match $value {
            Ok(value) => value,
            Err($id) => $error,
        }
    };

    ($value: expr, $error: block) => {
        match $value {
            Ok(value) => value,
            Err(_error) => $error,
        }
    }

}
pub(crate) use unwrap;

/// Spawns a named thread. Panics only if the OS refuses to spawn, which is
/// not a recoverable situation for the agent.
macro_rules! spawn {

    ($name:expr, $body:expr) => {
        std::thread::Builder::new()
            .name($name.into())
            .spawn($body)
            .expect("failed to spawn thread")
    };

}
pub(crate) use spawn;
