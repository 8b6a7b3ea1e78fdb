// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decoder for sentinel-wrapped JSON records.
//!
//! Runners emit records such as
//! `@@<TestRunner-{"name":"testStarted","attributes":{...}}-TestRunner>`, possibly surrounded by
//! unrelated output. Two schemes identify tests: hierarchical unique ids made of bracketed
//! segments, and flat `pkg.Class#method` names.

use super::{
    Event, EventKind, FailureDetail, InvocationRef, RunnerKey, split_flat_name, strip_parameters,
    unescape_entities,
};
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};
use tracing::{debug, warn};

const SENTINEL_START: &str = "@@<TestRunner-";
const SENTINEL_END: &str = "-TestRunner>";

/// How records identify the test they refer to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IdScheme {
    /// `[engine:...]/[class:...]/[method:...]` unique ids. Only records with `type: "TEST"` are
    /// kept.
    UniqueId,

    /// Flat `pkg.Class#method` or `pkg.Class.method` names. A missing `type` means a test.
    FlatName,
}

/// Decoder for sentinel-wrapped JSON records.
#[derive(Debug)]
pub struct RecordDecoder {
    scheme: IdScheme,
    // Flat names only: executions seen so far per name.
    executions: HashMap<String, Execution>,
}

#[derive(Debug, Default)]
struct Execution {
    count: usize,
    open: bool,
}

impl RecordDecoder {
    /// Creates a new decoder for the given id scheme.
    pub fn new(scheme: IdScheme) -> Self {
        Self {
            scheme,
            executions: HashMap::new(),
        }
    }

    /// Returns the id scheme this decoder uses.
    pub fn scheme(&self) -> IdScheme {
        self.scheme
    }

    /// Analyzes a single framed line. A line may carry any number of records.
    pub fn analyze(&mut self, line: &str) -> Vec<Event> {
        let mut events = Vec::new();
        let mut rest = line;
        while let Some(start) = rest.find(SENTINEL_START) {
            let payload_start = &rest[start + SENTINEL_START.len()..];
            let Some(end) = payload_start.find(SENTINEL_END) else {
                warn!(line, "unterminated test runner record");
                break;
            };
            let payload = &payload_start[..end];
            rest = &payload_start[end + SENTINEL_END.len()..];

            match serde_json::from_str::<Record>(payload) {
                Ok(record) => events.extend(self.decode(record)),
                Err(err) => warn!(payload, %err, "malformed test runner record"),
            }
        }
        events
    }

    fn decode(&mut self, record: Record) -> Option<Event> {
        let attributes = record.attributes;
        if !self.is_test(attributes.kind.as_deref()) {
            debug!(record = %record.name, id = ?attributes.id, "ignoring container record");
            return None;
        }

        let kind = match record.name.as_str() {
            "testStarted" => EventKind::Started,
            "testFinished" => match attributes.status.as_deref() {
                Some("FAILED") => EventKind::Failed(attributes.failure_detail()),
                Some("ABORTED" | "SKIPPED") => EventKind::Skipped {
                    message: attributes.failure_detail().message,
                },
                _ => EventKind::Finished {
                    duration: attributes.duration(),
                },
            },
            "testFailed" => EventKind::Failed(attributes.failure_detail()),
            "testErrored" => EventKind::Errored(attributes.failure_detail()),
            "testSkipped" | "testIgnored" => EventKind::Skipped {
                message: attributes.failure_detail().message,
            },
            other => {
                debug!(record = other, "ignoring unknown record");
                return None;
            }
        };

        let key = match self.scheme {
            IdScheme::UniqueId => {
                let Some(id) = attributes.id.as_deref().map(unescape_entities) else {
                    warn!(record = %record.name, "record has no id");
                    return None;
                };
                let mut key = parse_unique_id(&id)?;
                key.display_name = attributes.name.as_deref().map(|n| unescape_entities(n).into());
                key
            }
            IdScheme::FlatName => {
                let raw = attributes.id.as_deref().or(attributes.name.as_deref())?;
                let raw = unescape_entities(raw).into_owned();
                self.flat_key(raw, &kind)?
            }
        };
        Some(Event::new(key, kind))
    }

    fn is_test(&self, kind: Option<&str>) -> bool {
        match (self.scheme, kind) {
            (_, Some(kind)) => kind.eq_ignore_ascii_case("test"),
            (IdScheme::UniqueId, None) => false,
            (IdScheme::FlatName, None) => true,
        }
    }

    fn flat_key(&mut self, raw: String, kind: &EventKind) -> Option<RunnerKey> {
        let (class_name, method) = split_flat_name(&raw);
        if class_name.is_empty() {
            warn!(%raw, "record has an empty test name");
            return None;
        }
        let class_name = class_name.to_owned();
        let Some(method) = method.map(|method| strip_parameters(method).to_owned()) else {
            return Some(RunnerKey::new(raw, class_name, None));
        };

        let execution = self.executions.entry(raw.clone()).or_default();
        match kind {
            EventKind::Started => {
                if !execution.open {
                    execution.count += 1;
                    execution.open = true;
                }
            }
            EventKind::Detail { .. } => {}
            _ => execution.open = false,
        }
        let repeat = execution.count.max(1);
        let key = RunnerKey::new(raw, class_name, Some(method));
        Some(key.with_invocation(InvocationRef::Repeat(repeat)))
    }
}

/// Parses a `/`-joined sequence of bracketed `[type:value]` segments.
fn parse_unique_id(id: &str) -> Option<RunnerKey> {
    let Some(inner) = id.strip_prefix('[').and_then(|id| id.strip_suffix(']')) else {
        warn!(id, "malformed unique id");
        return None;
    };

    let mut class_name: Option<String> = None;
    let mut method = None;
    let mut ordinals = Vec::new();
    for segment in inner.split("]/[") {
        let Some((kind, value)) = segment.split_once(':') else {
            warn!(id, segment, "malformed unique id segment");
            return None;
        };
        match kind {
            "class" => class_name = Some(value.to_owned()),
            "nested-class" => match &mut class_name {
                Some(class_name) => {
                    class_name.push('.');
                    class_name.push_str(value);
                }
                None => class_name = Some(value.to_owned()),
            },
            "method" | "test-template" | "test-factory" => {
                method = Some(strip_parameters(value).to_owned())
            }
            "test-template-invocation" | "dynamic-container" | "dynamic-test" => {
                match value.strip_prefix('#').and_then(|n| n.parse::<usize>().ok()) {
                    Some(ordinal) => ordinals.push(ordinal),
                    None => {
                        warn!(id, segment, "malformed invocation ordinal");
                        return None;
                    }
                }
            }
            _ => debug!(id, kind, "ignoring unique id segment"),
        }
    }

    let Some(class_name) = class_name else {
        warn!(id, "unique id names no class");
        return None;
    };
    let key = RunnerKey::new(id, class_name, method);
    if ordinals.is_empty() {
        Some(key)
    } else {
        Some(key.with_invocation(InvocationRef::Ordinal(ordinals)))
    }
}

#[derive(Debug, Deserialize)]
struct Record {
    name: String,
    #[serde(default)]
    attributes: Attributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Attributes {
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
    duration: Option<NumberOrString>,
    message: Option<String>,
    #[serde(alias = "stackTrace")]
    trace: Option<String>,
    expected: Option<String>,
    actual: Option<String>,
    details: Option<Details>,
}

impl Attributes {
    fn duration(&self) -> Option<Duration> {
        let millis = match self.duration.as_ref()? {
            NumberOrString::Number(millis) => *millis,
            NumberOrString::String(millis) => millis.trim().parse().ok()?,
        };
        // Negative, non-finite and out-of-range values are dropped.
        Duration::try_from_secs_f64(millis / 1000.0).ok()
    }

    // Top-level attributes take precedence over `details`.
    fn failure_detail(&self) -> FailureDetail {
        let details = match &self.details {
            Some(Details::Fields(fields)) => fields.clone(),
            Some(Details::Text(text)) => serde_json::from_str(text).unwrap_or_else(|_| DetailFields {
                message: Some(text.clone()),
                ..DetailFields::default()
            }),
            None => DetailFields::default(),
        };
        let pick = |top: &Option<String>, detail: Option<String>| {
            top.clone()
                .or(detail)
                .map(|text| unescape_entities(&text).into_owned())
        };
        FailureDetail {
            message: pick(&self.message, details.message),
            trace: pick(&self.trace, details.trace),
            expected: pick(&self.expected, details.expected),
            actual: pick(&self.actual, details.actual),
            duration: self.duration(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Details {
    Fields(DetailFields),
    Text(String),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct DetailFields {
    message: Option<String>,
    #[serde(alias = "stackTrace")]
    trace: Option<String>,
    expected: Option<String>,
    actual: Option<String>,
}
