//
// mod.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

// Test doubles for the agent's two external collaborators: the low-level
// debugger and the Debug Controller. Compiled into unit tests and, through
// the `testing` feature, into integration tests.

pub mod dummy_controller;
pub mod scripted_inspector;
