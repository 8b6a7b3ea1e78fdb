// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for testwire.
//!
//! Test processes report progress in one of several line-oriented wire formats. testwire frames
//! their output into lines, decodes each line into events, maps runner-local names onto the
//! caller's [`TestIdentity`](testwire_metadata::TestIdentity) values and folds the events into
//! one result per identity, published to a shared [`ResultStore`](store::ResultStore).
//!
//! The entry point is [`RunCoordinator`](coordinator::RunCoordinator).

pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod errors;
pub mod framer;
pub mod launcher;
pub mod partition;
pub mod pipeline;
pub mod resolver;
pub mod signal;
pub mod state;
pub mod store;
mod time;
