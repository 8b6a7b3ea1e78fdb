// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured data shared between [testwire](https://crates.io/crates/testwire) and its
//! collaborators.
//!
//! Discovery services produce a [`TestTree`] describing what a run should execute. The runner
//! produces a [`TestResult`] per [`TestIdentity`]. Both are serializable so they can cross process
//! boundaries as JSON.

mod errors;
mod exit_codes;
mod identity;
mod kind;
mod result;
mod tree;

pub use errors::*;
pub use exit_codes::*;
pub use identity::*;
pub use kind::*;
pub use result::*;
pub use tree::*;
