// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Obtaining test sessions for partitions.
//!
//! A [`Launcher`] turns a [`LaunchRequest`] into a [`TestSession`]: a stream of protocol bytes
//! plus a handle to wait for, or terminate, whatever produces them.

use crate::{
    config::{FrameworkConfig, TestwireConfig},
    coordinator::CancelToken,
    errors::LaunchError,
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::NamedUtf8TempFile;
use futures::future::BoxFuture;
use indexmap::IndexSet;
use smol_str::SmolStr;
use std::{
    collections::HashMap,
    fmt,
    io::{self, Write},
    process::{ExitStatus, Stdio},
};
use testwire_metadata::{FrameworkKind, RunMode, TestIdentity};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    net::TcpListener,
    process::{Child, Command},
};
use tracing::{debug, info};

/// What a session has to run.
#[derive(Clone, Debug)]
pub struct LaunchRequest {
    /// The project.
    pub project: SmolStr,

    /// The framework kind, which determines the wire format.
    pub kind: FrameworkKind,

    /// Whether to run normally or under a debugger.
    pub mode: RunMode,

    /// The requested leaves, in request order.
    pub tests: Vec<TestIdentity>,
}

impl LaunchRequest {
    /// Returns the distinct qualified names of the requested leaves, in request order.
    pub fn qualified_names(&self) -> IndexSet<&str> {
        self.tests
            .iter()
            .map(|identity| identity.qualified_name.as_str())
            .collect()
    }
}

/// How a session ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExitIndicator {
    /// The session ended normally.
    Success,

    /// The session ended abnormally, with an exit code if one is available.
    Failure(Option<i32>),
}

impl ExitIndicator {
    /// Returns true if the session ended normally.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<ExitStatus> for ExitIndicator {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            Self::Success
        } else {
            Self::Failure(status.code())
        }
    }
}

impl fmt::Display for ExitIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "exited successfully"),
            Self::Failure(Some(code)) => write!(f, "exited with code {code}"),
            Self::Failure(None) => write!(f, "was terminated by a signal"),
        }
    }
}

/// Control over whatever produces a session's output.
pub trait SessionControl: Send {
    /// Waits for the producer to exit.
    fn wait(&mut self) -> BoxFuture<'_, io::Result<ExitIndicator>>;

    /// Asks the producer to stop. Terminating an already exited producer is not an error.
    fn terminate(&mut self) -> BoxFuture<'_, io::Result<()>>;
}

/// A running session for one partition.
pub struct TestSession {
    output: Box<dyn AsyncRead + Unpin + Send>,
    control: Box<dyn SessionControl>,
}

impl fmt::Debug for TestSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSession").finish_non_exhaustive()
    }
}

impl TestSession {
    /// Creates a new session.
    pub fn new(
        output: impl AsyncRead + Unpin + Send + 'static,
        control: impl SessionControl + 'static,
    ) -> Self {
        Self {
            output: Box::new(output),
            control: Box::new(control),
        }
    }

    /// Creates a session over output that has already been produced. It always exits
    /// successfully.
    pub fn from_output(output: impl AsyncRead + Unpin + Send + 'static) -> Self {
        Self::new(output, Finished)
    }

    /// Splits the session into its output and its control.
    pub fn into_parts(
        self,
    ) -> (
        Box<dyn AsyncRead + Unpin + Send>,
        Box<dyn SessionControl>,
    ) {
        (self.output, self.control)
    }
}

#[derive(Debug)]
struct Finished;

impl SessionControl for Finished {
    fn wait(&mut self) -> BoxFuture<'_, io::Result<ExitIndicator>> {
        Box::pin(async { Ok(ExitIndicator::Success) })
    }

    fn terminate(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Obtains a session for each partition of a run.
pub trait Launcher: Send + Sync {
    /// Launches the tests of a request.
    ///
    /// The launcher should give up with [`LaunchError::Cancelled`] if `cancel` fires while it
    /// waits on the test process.
    fn launch<'a>(
        &'a self,
        request: &'a LaunchRequest,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<TestSession, LaunchError>>;
}

/// Launches each partition as a child process, using the command configured for its kind.
///
/// Arguments may contain the placeholders `{project}`, `{tests-file}` and `{port}`.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    config: TestwireConfig,
    cwd: Utf8PathBuf,
}

impl ProcessLauncher {
    /// Creates a launcher that spawns processes in `cwd`.
    pub fn new(config: TestwireConfig, cwd: impl Into<Utf8PathBuf>) -> Self {
        Self {
            config,
            cwd: cwd.into(),
        }
    }

    async fn launch_impl(
        &self,
        request: &LaunchRequest,
        cancel: &CancelToken,
    ) -> Result<TestSession, LaunchError> {
        let framework = self
            .config
            .framework(request.kind)
            .filter(|framework| !framework.command.is_empty())
            .ok_or(LaunchError::NoCommand { kind: request.kind })?;

        let tests_file = write_tests_file(request).map_err(LaunchError::TestsFile)?;
        let listener = if request.mode.is_debug() {
            Some(
                TcpListener::bind(("127.0.0.1", 0))
                    .await
                    .map_err(LaunchError::Bind)?,
            )
        } else {
            None
        };
        let port = match &listener {
            Some(listener) => Some(listener.local_addr().map_err(LaunchError::Bind)?.port()),
            None => None,
        };

        let argv = command_line(framework, request, tests_file.path(), port);
        let command_str = display_command(&argv);
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .envs(&framework.env)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| LaunchError::Spawn {
            command: command_str.clone(),
            err,
        })?;
        info!(
            project = %request.project,
            kind = %request.kind,
            command = %command_str,
            "launched test process"
        );

        if let Some(stderr) = child.stderr.take() {
            forward_to_log(stderr, request.project.clone(), "stderr");
        }
        let stdout = child.stdout.take().ok_or_else(|| LaunchError::Spawn {
            command: command_str.clone(),
            err: io::Error::other("stdout was not captured"),
        })?;

        let Some(listener) = listener else {
            let control = ProcessControl {
                child,
                _tests_file: tests_file,
                _listener: None,
            };
            return Ok(TestSession::new(stdout, control));
        };

        // In debug mode the protocol arrives over the socket instead.
        forward_to_log(stdout, request.project.clone(), "stdout");
        let timeout = self.config.run().accept_timeout();
        // A process that connects and exits right away still leaves its connection queued:
        // check for it before the exit.
        let stream = tokio::select! {
            biased;

            accepted = tokio::time::timeout(timeout, listener.accept()) => match accepted {
                Ok(Ok((stream, peer))) => {
                    debug!(%peer, "accepted debug connection");
                    stream
                }
                Ok(Err(error)) => return Err(LaunchError::Accept(error)),
                Err(_) => return Err(LaunchError::AcceptTimeout { timeout }),
            },
            status = child.wait() => {
                let exit = status.map_err(LaunchError::Accept)?.into();
                return Err(LaunchError::ExitedBeforeConnect { exit });
            }
            () = cancel.cancelled() => {
                // kill_on_drop takes care of the process.
                return Err(LaunchError::Cancelled);
            }
        };

        let control = ProcessControl {
            child,
            _tests_file: tests_file,
            _listener: Some(listener),
        };
        Ok(TestSession::new(stream, control))
    }
}

impl Launcher for ProcessLauncher {
    fn launch<'a>(
        &'a self,
        request: &'a LaunchRequest,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<TestSession, LaunchError>> {
        Box::pin(self.launch_impl(request, cancel))
    }
}

/// Owns a child process and the per-run resources created for it. Dropping it kills the
/// process, deletes the tests file and closes the listener.
#[derive(Debug)]
struct ProcessControl {
    child: Child,
    _tests_file: NamedUtf8TempFile,
    _listener: Option<TcpListener>,
}

impl SessionControl for ProcessControl {
    fn wait(&mut self) -> BoxFuture<'_, io::Result<ExitIndicator>> {
        Box::pin(async move { self.child.wait().await.map(ExitIndicator::from) })
    }

    fn terminate(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            match self.child.start_kill() {
                Ok(()) => Ok(()),
                // The process already exited.
                Err(error) if error.kind() == io::ErrorKind::InvalidInput => Ok(()),
                Err(error) => Err(error),
            }
        })
    }
}

fn write_tests_file(request: &LaunchRequest) -> io::Result<NamedUtf8TempFile> {
    let mut file = camino_tempfile::Builder::new()
        .prefix("testwire-tests-")
        .suffix(".txt")
        .tempfile()?;
    for name in request.qualified_names() {
        writeln!(file, "{name}")?;
    }
    file.flush()?;
    Ok(file)
}

fn command_line(
    framework: &FrameworkConfig,
    request: &LaunchRequest,
    tests_file: &Utf8Path,
    port: Option<u16>,
) -> Vec<String> {
    let port = port.map(|port| port.to_string());
    let debug_args: &[String] = if port.is_some() {
        &framework.debug_args
    } else {
        &[]
    };
    framework
        .command
        .iter()
        .chain(debug_args)
        .map(|arg| {
            let arg = arg
                .replace("{project}", &request.project)
                .replace("{tests-file}", tests_file.as_str());
            match &port {
                Some(port) => arg.replace("{port}", port),
                None => arg,
            }
        })
        .collect()
}

fn display_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{arg}'")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn forward_to_log(
    stream: impl AsyncRead + Unpin + Send + 'static,
    project: SmolStr,
    stream_name: &'static str,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(%project, stream = stream_name, "{line}"),
                Ok(None) => break,
                Err(error) => {
                    debug!(%project, stream = stream_name, %error, "stopped forwarding output");
                    break;
                }
            }
        }
    });
}

/// Serves previously captured output for each `(project, kind)`.
#[derive(Clone, Debug, Default)]
pub struct ReplayLauncher {
    captures: HashMap<(SmolStr, FrameworkKind), Utf8PathBuf>,
}

impl ReplayLauncher {
    /// Creates a launcher with no captures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a capture for a partition, replacing any previous one.
    pub fn add_capture(
        &mut self,
        project: impl Into<SmolStr>,
        kind: FrameworkKind,
        path: impl Into<Utf8PathBuf>,
    ) -> &mut Self {
        self.captures.insert((project.into(), kind), path.into());
        self
    }

    async fn launch_impl(&self, request: &LaunchRequest) -> Result<TestSession, LaunchError> {
        let path = self
            .captures
            .get(&(request.project.clone(), request.kind))
            .ok_or_else(|| LaunchError::NoCapture {
                project: request.project.clone(),
                kind: request.kind,
            })?;
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|err| LaunchError::CaptureOpen {
                path: path.clone(),
                err,
            })?;
        debug!(%path, project = %request.project, kind = %request.kind, "replaying capture");
        Ok(TestSession::from_output(file))
    }
}

impl Launcher for ReplayLauncher {
    fn launch<'a>(
        &'a self,
        request: &'a LaunchRequest,
        _cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<TestSession, LaunchError>> {
        Box::pin(self.launch_impl(request))
    }
}
