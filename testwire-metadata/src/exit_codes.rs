// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `testwire` failures.
///
/// `testwire` runs may fail for a variety of reasons. This structure documents the exit codes
/// that may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum TestwireExitCode {}

impl TestwireExitCode {
    /// No errors occurred and testwire exited normally.
    pub const OK: i32 = 0;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// A user issue happened while setting up a testwire invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// Another run was already in flight.
    pub const RUN_ALREADY_IN_FLIGHT: i32 = 97;

    /// One or more tests failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// The run was cancelled before it completed.
    pub const RUN_CANCELLED: i32 = 107;

    /// One or more partitions could not be launched or exited abnormally.
    ///
    /// Results for the partitions that did run are still reported.
    pub const PARTITIONS_FAILED: i32 = 108;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
