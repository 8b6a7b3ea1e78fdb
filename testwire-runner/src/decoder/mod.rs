// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol decoders for test runner output.
//!
//! Each [`FrameworkKind`] speaks one line-oriented wire format. A [`Decoder`] turns framed lines
//! into [`Event`]s keyed by a [`RunnerKey`], which the
//! [`IdentityResolver`](crate::resolver::IdentityResolver) maps onto caller-assigned identities.
//!
//! Decoders never fail: malformed input is logged and dropped.

mod record;
mod remote;

pub use record::{IdScheme, RecordDecoder};
pub use remote::RemoteDecoder;

use std::{borrow::Cow, fmt, time::Duration};
use testwire_metadata::FrameworkKind;

/// A runner-local reference to a test, scoped to a single wire format.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RunnerKey {
    /// The raw id or name the runner used, for diagnostics.
    pub raw: String,

    /// The qualified class name.
    pub class_name: String,

    /// The method name, without a parameter list.
    pub method_name: Option<String>,

    /// The invocation this key refers to, for dynamically generated sub-tests.
    pub invocation: Option<InvocationRef>,

    /// The display name reported by the runner. Informational only.
    pub display_name: Option<String>,
}

impl RunnerKey {
    /// Creates a key for a class or method, without an invocation.
    pub fn new(
        raw: impl Into<String>,
        class_name: impl Into<String>,
        method_name: Option<String>,
    ) -> Self {
        Self {
            raw: raw.into(),
            class_name: class_name.into(),
            method_name,
            invocation: None,
            display_name: None,
        }
    }

    /// Sets the invocation reference, returning `self`.
    pub fn with_invocation(mut self, invocation: InvocationRef) -> Self {
        self.invocation = Some(invocation);
        self
    }
}

impl fmt::Display for RunnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A reference to a dynamically generated invocation of a method.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum InvocationRef {
    /// 1-based positions among dynamic children, outermost first.
    Ordinal(Vec<usize>),

    /// The n-th (1-based) execution of a method reported under the same flat name.
    Repeat(usize),
}

/// An event decoded from runner output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Event {
    /// The test this event refers to.
    pub key: RunnerKey,

    /// What happened.
    pub kind: EventKind,
}

impl Event {
    pub(crate) fn new(key: RunnerKey, kind: EventKind) -> Self {
        Self { key, kind }
    }
}

/// The kind of a decoded [`Event`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EventKind {
    /// The test started executing.
    Started,

    /// The test finished. A failure reported earlier still stands.
    Finished {
        /// The duration reported by the runner, if it reports one.
        duration: Option<Duration>,
    },

    /// The test failed an assertion.
    Failed(FailureDetail),

    /// The test raised an unexpected error.
    Errored(FailureDetail),

    /// The test was skipped.
    Skipped {
        /// The reason, if one was reported.
        message: Option<String>,
    },

    /// A block of detail text for a failing test.
    Detail {
        /// Which field the text belongs to.
        field: DetailField,

        /// The text, with embedded newlines preserved.
        text: String,
    },
}

/// Detail attached to a failure.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FailureDetail {
    /// The failure message.
    pub message: Option<String>,

    /// The stack trace.
    pub trace: Option<String>,

    /// The expected value of a failed assertion.
    pub expected: Option<String>,

    /// The actual value of a failed assertion.
    pub actual: Option<String>,

    /// The duration reported by the runner.
    pub duration: Option<Duration>,
}

/// A detail field that can be filled in by a separate block of text.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DetailField {
    /// The stack trace.
    Trace,

    /// The expected value.
    Expected,

    /// The actual value.
    Actual,
}

/// A protocol decoder. One instance decodes exactly one stream in one wire format.
#[derive(Debug)]
pub enum Decoder {
    /// The `%`-prefixed remote protocol.
    Remote(RemoteDecoder),

    /// Sentinel-wrapped JSON records.
    Record(RecordDecoder),
}

impl Decoder {
    /// Creates the decoder for the wire format spoken by the given framework.
    pub fn for_kind(kind: FrameworkKind) -> Self {
        match kind {
            FrameworkKind::JUnit => Self::Remote(RemoteDecoder::new()),
            FrameworkKind::JUnitPlatform => Self::Record(RecordDecoder::new(IdScheme::UniqueId)),
            FrameworkKind::TestNg => Self::Record(RecordDecoder::new(IdScheme::FlatName)),
        }
    }

    /// Analyzes a single framed line.
    pub fn analyze(&mut self, line: &str) -> Vec<Event> {
        match self {
            Self::Remote(decoder) => decoder.analyze(line),
            Self::Record(decoder) => decoder.analyze(line),
        }
    }

    /// Signals the end of the stream, returning events for any block still open.
    pub fn finish(&mut self) -> Vec<Event> {
        match self {
            Self::Remote(decoder) => decoder.finish(),
            Self::Record(_) => Vec::new(),
        }
    }
}

/// Splits a qualified `pkg.Class#method` (or dotted `pkg.Class.method`) name.
pub(crate) fn split_flat_name(name: &str) -> (&str, Option<&str>) {
    if let Some((class_name, method)) = name.split_once('#') {
        return (class_name, Some(method));
    }
    match name.rsplit_once('.') {
        Some((class_name, method)) if !class_name.is_empty() && !method.is_empty() => {
            (class_name, Some(method))
        }
        _ => (name, None),
    }
}

/// Strips a trailing parameter list from a method name: `z(int, java.lang.String)` → `z`.
pub(crate) fn strip_parameters(method: &str) -> &str {
    match method.find('(') {
        Some(index) => &method[..index],
        None => method,
    }
}

/// Undoes the HTML-entity-style escaping runners apply to payload text.
///
/// `&#x40;` (the sentinel's `@`) is the escape every runner uses; named entities and numeric
/// references are decoded too. Decoding is a single pass, so `&amp;#x40;` becomes `&#x40;`.
pub fn unescape_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(index) = rest.find('&') {
        out.push_str(&rest[..index]);
        rest = &rest[index..];
        match decode_entity(rest) {
            Some((decoded, len)) => {
                out.push(decoded);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(input: &str) -> Option<(char, usize)> {
    let end = input.bytes().take(12).position(|b| b == b';')?;
    let entity = &input[1..end];
    let decoded = match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        _ => {
            let number = entity.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)?
        }
    };
    Some((decoded, end + 1))
}
