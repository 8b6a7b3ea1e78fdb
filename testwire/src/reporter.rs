// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints results to the terminal as they're published.

use crate::output::StderrStyles;
use owo_colors::{OwoColorize, Style};
use std::{collections::HashSet, io, time::Duration};
use swrite::{SWrite, swrite};
use testwire_metadata::{TestIdentity, TestNode, TestResult, TestStatus};
use testwire_runner::{coordinator::RunSummary, store::ResultChanged};

/// Writes one line per finished test, then a summary.
pub(crate) struct LineReporter<W> {
    writer: W,
    styles: StderrStyles,
    verbose: bool,
    /// Containers declared in the tree. Their rolled-up results aren't printed.
    containers: HashSet<TestIdentity>,
}

impl<W: io::Write> LineReporter<W> {
    pub(crate) fn new(writer: W, styles: StderrStyles, verbose: bool, nodes: &[TestNode]) -> Self {
        let containers = nodes
            .iter()
            .flat_map(TestNode::walk)
            .filter(|node| !node.is_leaf())
            .map(|node| node.identity.clone())
            .collect();
        Self {
            writer,
            styles,
            verbose,
            containers,
        }
    }

    pub(crate) fn write_change(&mut self, change: &ResultChanged) -> io::Result<()> {
        let ResultChanged::Updated { identity, result } = change else {
            return Ok(());
        };
        if !result.status.is_terminal() || self.containers.contains(identity) {
            return Ok(());
        }

        let mut line = String::new();
        swrite!(
            line,
            "{:>12} ",
            result.status.label().style(self.status_style(result.status)),
        );
        swrite!(line, "[{}] ", DisplayDuration(result.duration));
        swrite!(
            line,
            "{}{}",
            identity.project.style(self.styles.bold),
            ":".style(self.styles.bold)
        );
        swrite!(line, "{}", identity.qualified_name);
        if let Some(invocation) = &identity.invocation {
            swrite!(line, "[{invocation}]");
        }
        writeln!(self.writer, "{line}")?;

        if result.status.is_failure() {
            self.write_failure_details(result)?;
        }
        Ok(())
    }

    fn write_failure_details(&mut self, result: &TestResult) -> io::Result<()> {
        if let Some(message) = &result.message {
            for line in message.lines() {
                writeln!(self.writer, "    {line}")?;
            }
        }
        if let (Some(expected), Some(actual)) = (&result.expected, &result.actual) {
            writeln!(self.writer, "    {} {expected}", "expected:".style(self.styles.bold))?;
            writeln!(self.writer, "    {}   {actual}", "actual:".style(self.styles.bold))?;
        }
        if self.verbose {
            if let Some(trace) = &result.trace {
                for line in trace.lines() {
                    writeln!(self.writer, "      {line}")?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn write_summary(&mut self, summary: &RunSummary) -> io::Result<()> {
        let stats = &summary.stats;
        let run = stats.passed + stats.failed + stats.errored;

        let mut line = String::new();
        swrite!(line, "{:>12} ", "Summary".style(self.styles.bold));
        swrite!(line, "[{}] ", DisplayDuration(Some(summary.duration)));
        swrite!(
            line,
            "{} {} run: {} passed",
            run.style(self.styles.count),
            if run == 1 { "test" } else { "tests" },
            stats.passed.style(self.styles.pass),
        );
        if stats.failed > 0 {
            swrite!(line, ", {} failed", stats.failed.style(self.styles.fail));
        }
        if stats.errored > 0 {
            swrite!(line, ", {} errored", stats.errored.style(self.styles.fail));
        }
        if stats.skipped > 0 {
            swrite!(line, ", {} skipped", stats.skipped.style(self.styles.skip));
        }
        if stats.not_run > 0 {
            swrite!(line, ", {} not run", stats.not_run.style(self.styles.skip));
        }
        if summary.cancelled {
            swrite!(line, " ({})", "cancelled".style(self.styles.warning_text));
        }
        writeln!(self.writer, "{line}")?;
        self.writer.flush()
    }

    fn status_style(&self, status: TestStatus) -> Style {
        match status {
            TestStatus::Pass => self.styles.pass,
            TestStatus::Fail | TestStatus::Error => self.styles.fail,
            TestStatus::Skip => self.styles.skip,
            TestStatus::Pending | TestStatus::Running => Style::new(),
        }
    }
}

struct DisplayDuration(Option<Duration>);

impl std::fmt::Display for DisplayDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(duration) => write!(f, "{:>8.3}s", duration.as_secs_f64()),
            None => write!(f, "{:>9}", "-"),
        }
    }
}
