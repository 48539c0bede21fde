// Copyright 2026 Landcomp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Landcomp runtime library: browser-driven acquisition of sold-listing
//! exports.
//!
//! The binary is a thin shell over these modules; integration tests drive
//! them directly with the scripted browser in [`testing`].

pub mod capture;
pub mod cli;
pub mod config;
pub mod http_client;
pub mod pipeline;
pub mod progress;
pub mod renderer;
pub mod session;
pub mod testing;
pub mod throttle;
