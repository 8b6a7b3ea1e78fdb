// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The testwire command-line interface.
//!
//! This crate exposes the app so that it can be driven from tests. For the engine, see
//! [`testwire_runner`].

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;
mod reporter;

pub use dispatch::TestwireApp;
pub use errors::ExpectedError;
pub use output::OutputContext;
