// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decoder for the `%`-prefixed remote test runner protocol.
//!
//! Every protocol line starts with a message code such as `%TESTS` followed by a payload, usually
//! `id,method(pkg.Class)`. Traces and assertion values are sent as blocks of raw lines between a
//! begin and an end marker, and belong to the most recently failed test.

use super::{DetailField, Event, EventKind, FailureDetail, InvocationRef, RunnerKey};
use regex::Regex;
use std::{collections::HashMap, sync::LazyLock};
use tracing::{debug, trace, warn};

const TEST_RUN_START: &str = "%TESTC";
const TEST_TREE: &str = "%TSTTREE";
const TEST_START: &str = "%TESTS";
const TEST_END: &str = "%TESTE";
const TEST_FAILED: &str = "%FAILED";
const TEST_ERROR: &str = "%ERROR";
const TRACE_START: &str = "%TRACES";
const TRACE_END: &str = "%TRACEE";
const EXPECTED_START: &str = "%EXPECTS";
const EXPECTED_END: &str = "%EXPECTE";
const ACTUAL_START: &str = "%ACTUALS";
const ACTUAL_END: &str = "%ACTUALE";
const TEST_RUN_END: &str = "%RUNTIME";

const IGNORED_PREFIX: &str = "@Ignore: ";
const ASSUMPTION_FAILED_PREFIX: &str = "@AssumptionFailure: ";

// `method(pkg.Class)`, where either part may contain backslash-escaped separators.
static TEST_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?s)(?P<method>(?:\\.|[^\\(])*)\((?P<class>(?:\\.|[^\\)])*)\)$")
        .expect("test name regex is valid")
});

/// Decoder for the remote protocol.
#[derive(Debug, Default)]
pub struct RemoteDecoder {
    tree: HashMap<String, TreeEntry>,
    // Number of dynamic children declared so far, per parent id.
    dynamic_counts: HashMap<String, usize>,
    current: Option<RunnerKey>,
    block: Option<OpenBlock>,
}

#[derive(Clone, Debug)]
struct TreeEntry {
    name: TestName,
    parent: Option<String>,
    ordinal_path: Option<Vec<usize>>,
    display_name: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct TestName {
    class_name: String,
    method_name: Option<String>,
    skip: bool,
}

#[derive(Debug)]
struct OpenBlock {
    field: DetailField,
    end_marker: &'static str,
    key: Option<RunnerKey>,
    text: String,
    lines: usize,
}

impl RemoteDecoder {
    /// Creates a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyzes a single framed line.
    pub fn analyze(&mut self, line: &str) -> Vec<Event> {
        if let Some(block) = &mut self.block {
            if line.starts_with(block.end_marker) {
                return self.close_block().into_iter().collect();
            }
            if block.lines > 0 {
                block.text.push('\n');
            }
            block.text.push_str(line);
            block.lines += 1;
            return Vec::new();
        }

        let Some((code, payload)) = split_code(line) else {
            trace!(line, "ignoring non-protocol output");
            return Vec::new();
        };

        match code {
            TEST_START => self.test_event(payload, EventKind::Started),
            TEST_END => self.test_event(payload, EventKind::Finished { duration: None }),
            TEST_FAILED => self.failure_event(payload, EventKind::Failed(FailureDetail::default())),
            TEST_ERROR => self.failure_event(payload, EventKind::Errored(FailureDetail::default())),
            TRACE_START => self.open_block(DetailField::Trace, TRACE_END),
            EXPECTED_START => self.open_block(DetailField::Expected, EXPECTED_END),
            ACTUAL_START => self.open_block(DetailField::Actual, ACTUAL_END),
            TEST_TREE => {
                self.declare(payload);
                Vec::new()
            }
            TEST_RUN_START => {
                debug!(payload, "test run started");
                self.current = None;
                Vec::new()
            }
            TEST_RUN_END => {
                debug!(elapsed_ms = payload, "test run ended");
                self.current = None;
                Vec::new()
            }
            _ => {
                trace!(code, "ignoring unhandled message");
                Vec::new()
            }
        }
    }

    /// Signals the end of the stream. A block left open is delivered as-is.
    pub fn finish(&mut self) -> Vec<Event> {
        if self.block.is_some() {
            debug!("stream closed inside a detail block");
        }
        self.close_block().into_iter().collect()
    }

    fn test_event(&mut self, payload: &str, kind: EventKind) -> Vec<Event> {
        self.keyed_event(payload, kind, false)
    }

    // Detail blocks that follow belong to this test, even if other tests start or end first.
    fn failure_event(&mut self, payload: &str, kind: EventKind) -> Vec<Event> {
        self.keyed_event(payload, kind, true)
    }

    fn keyed_event(&mut self, payload: &str, kind: EventKind, failure: bool) -> Vec<Event> {
        let Some((key, skip)) = self.key_for(payload) else {
            return Vec::new();
        };
        if failure {
            self.current = Some(key.clone());
        }
        let kind = if skip {
            EventKind::Skipped { message: None }
        } else {
            kind
        };
        vec![Event::new(key, kind)]
    }

    fn open_block(&mut self, field: DetailField, end_marker: &'static str) -> Vec<Event> {
        self.block = Some(OpenBlock {
            field,
            end_marker,
            key: self.current.clone(),
            text: String::new(),
            lines: 0,
        });
        Vec::new()
    }

    fn close_block(&mut self) -> Option<Event> {
        let block = self.block.take()?;
        match block.key {
            Some(key) => Some(Event::new(
                key,
                EventKind::Detail {
                    field: block.field,
                    text: block.text,
                },
            )),
            None => {
                debug!(field = ?block.field, "dropping detail block with no current test");
                None
            }
        }
    }

    fn declare(&mut self, payload: &str) {
        let fields = split_escaped(payload, ',');
        let [id, name, ..] = fields.as_slice() else {
            warn!(payload, "malformed test tree entry");
            return;
        };
        let dynamic = fields.get(4).is_some_and(|field| *field == "true");
        let parent = fields
            .get(5)
            .filter(|parent| !parent.is_empty() && **parent != "-1")
            .map(|parent| parent.to_string());
        let display_name = fields.get(6).map(|name| unescape_backslashes(name));

        let ordinal_path = dynamic.then(|| {
            let parent_key = parent.clone().unwrap_or_default();
            let count = self.dynamic_counts.entry(parent_key).or_default();
            *count += 1;
            let mut path = parent
                .as_ref()
                .and_then(|parent| self.tree.get(parent))
                .and_then(|entry| entry.ordinal_path.clone())
                .unwrap_or_default();
            path.push(*count);
            path
        });

        self.tree.insert(
            id.to_string(),
            TreeEntry {
                name: parse_test_name(name),
                parent,
                ordinal_path,
                display_name,
            },
        );
    }

    fn key_for(&self, payload: &str) -> Option<(RunnerKey, bool)> {
        let Some((id, name)) = split_first_unescaped(payload, ',') else {
            warn!(payload, "malformed test payload");
            return None;
        };
        let parsed = parse_test_name(name);

        let Some(entry) = self.tree.get(id) else {
            let key = RunnerKey::new(id, parsed.class_name, parsed.method_name);
            return Some((key, parsed.skip));
        };

        let Some(path) = &entry.ordinal_path else {
            let key = RunnerKey::new(id, entry.name.class_name.clone(), entry.name.method_name.clone());
            return Some((key, parsed.skip || entry.name.skip));
        };

        // A dynamic entry: its identity comes from the nearest non-dynamic ancestor.
        let mut template = entry;
        while template.ordinal_path.is_some() {
            match template.parent.as_ref().and_then(|parent| self.tree.get(parent)) {
                Some(parent) => template = parent,
                None => {
                    warn!(id, "dynamic test has no declared template");
                    return None;
                }
            }
        }
        let mut key = RunnerKey::new(
            id,
            template.name.class_name.clone(),
            template.name.method_name.clone(),
        )
        .with_invocation(InvocationRef::Ordinal(path.clone()));
        key.display_name = entry.display_name.clone();
        Some((key, parsed.skip))
    }
}

// Codes are matched by prefix: payloads may follow a code without any separator.
const CODES: &[&str] = &[
    TEST_RUN_START,
    TEST_TREE,
    TEST_START,
    TEST_END,
    TEST_FAILED,
    TEST_ERROR,
    TRACE_START,
    TRACE_END,
    EXPECTED_START,
    EXPECTED_END,
    ACTUAL_START,
    ACTUAL_END,
    TEST_RUN_END,
];

fn split_code(line: &str) -> Option<(&'static str, &str)> {
    CODES
        .iter()
        .find(|code| line.starts_with(**code))
        .map(|code| (*code, line[code.len()..].trim()))
}

fn parse_test_name(name: &str) -> TestName {
    let (skip, name) = match name
        .strip_prefix(IGNORED_PREFIX)
        .or_else(|| name.strip_prefix(ASSUMPTION_FAILED_PREFIX))
    {
        Some(rest) => (true, rest),
        None => (false, name),
    };

    match TEST_NAME_RE.captures(name) {
        Some(captures) => TestName {
            class_name: unescape_backslashes(&captures["class"]),
            method_name: Some(unescape_backslashes(&captures["method"])),
            skip,
        },
        None => TestName {
            class_name: unescape_backslashes(name),
            method_name: None,
            skip,
        },
    }
}

fn split_first_unescaped(input: &str, separator: char) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (index, c) in input.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            c if c == separator => {
                return Some((&input[..index], &input[index + c.len_utf8()..]));
            }
            _ => {}
        }
    }
    None
}

fn split_escaped(input: &str, separator: char) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut rest = input;
    while let Some((field, tail)) = split_first_unescaped(rest, separator) {
        fields.push(field);
        rest = tail;
    }
    fields.push(rest);
    fields
}

fn unescape_backslashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}
