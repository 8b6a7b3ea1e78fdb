// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod coordinator;
mod fixtures;
mod process;
