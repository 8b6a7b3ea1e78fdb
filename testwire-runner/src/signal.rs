// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shutdown signals that cancel a test run.
//!
//! The CLI forwards each [`ShutdownEvent`] to a [`CancelHandle`](crate::coordinator::CancelHandle).

use crate::errors::SignalHandlerSetupError;

/// Which signals a run listens for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SignalHandlerKind {
    /// Interrupt, hangup and terminate on Unix; Ctrl-C on Windows.
    Standard,

    /// No signals at all.
    Noop,
}

impl SignalHandlerKind {
    /// Installs the handler.
    pub fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        let streams = match self {
            Self::Standard => imp::install()?,
            Self::Noop => Vec::new(),
        };
        Ok(SignalHandler { streams })
    }
}

/// Receives shutdown signals.
#[derive(Debug)]
pub struct SignalHandler {
    // Streams that haven't been closed yet.
    streams: Vec<(ShutdownEvent, imp::Stream)>,
}

impl SignalHandler {
    /// Waits for the next shutdown signal, or returns `None` once every stream has closed.
    pub async fn recv(&mut self) -> Option<ShutdownEvent> {
        use futures::future::{FutureExt, select_all};

        while !self.streams.is_empty() {
            let (received, index, pending) = select_all(
                self.streams
                    .iter_mut()
                    .map(|(_, stream)| stream.recv().boxed()),
            )
            .await;
            drop(pending);
            match received {
                Some(()) => return Some(self.streams[index].0),
                None => {
                    self.streams.swap_remove(index);
                }
            }
        }
        None
    }
}

#[cfg(unix)]
mod imp {
    use super::ShutdownEvent;
    use tokio::signal::unix::{SignalKind, signal};

    pub(super) type Stream = tokio::signal::unix::Signal;

    pub(super) fn install() -> std::io::Result<Vec<(ShutdownEvent, Stream)>> {
        [
            (ShutdownEvent::Interrupt, SignalKind::interrupt()),
            (ShutdownEvent::Hangup, SignalKind::hangup()),
            (ShutdownEvent::Term, SignalKind::terminate()),
        ]
        .into_iter()
        .map(|(event, kind)| Ok((event, signal(kind)?)))
        .collect()
    }
}

#[cfg(windows)]
mod imp {
    use super::ShutdownEvent;

    pub(super) type Stream = tokio::signal::windows::CtrlC;

    pub(super) fn install() -> std::io::Result<Vec<(ShutdownEvent, Stream)>> {
        Ok(vec![(ShutdownEvent::Interrupt, tokio::signal::windows::ctrl_c()?)])
    }
}

/// A signal asking testwire to stop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShutdownEvent {
    /// SIGHUP.
    #[cfg(unix)]
    Hangup,

    /// SIGTERM.
    #[cfg(unix)]
    Term,

    /// SIGINT or Ctrl-C.
    Interrupt,
}

impl ShutdownEvent {
    /// The signal's name, for log messages.
    pub fn as_str(self) -> &'static str {
        match self {
            #[cfg(unix)]
            Self::Hangup => "SIGHUP",
            #[cfg(unix)]
            Self::Term => "SIGTERM",
            Self::Interrupt => "interrupt",
        }
    }
}
