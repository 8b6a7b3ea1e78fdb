// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use futures::future::BoxFuture;
use std::{
    collections::HashMap,
    io,
    pin::Pin,
    sync::{
        Arc, Mutex, Once,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};
use testwire_metadata::{
    FrameworkKind, NodeLevel, TestIdentity, TestNode, TestResult, TestStatus,
};
use testwire_runner::{
    config::RunConfig,
    coordinator::{CancelToken, RunCoordinator},
    errors::LaunchError,
    launcher::{ExitIndicator, LaunchRequest, Launcher, SessionControl, TestSession},
    store::ResultStore,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf},
    sync::oneshot,
};

pub(crate) const PROJECT: &str = "app";

/// Output is written in small pieces so lines straddle reads.
const WRITE_CHUNK: usize = 7;

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        color_eyre::install().expect("color-eyre installed once");
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

pub(crate) fn method(class_name: &str, method: &str) -> TestIdentity {
    TestIdentity::method(PROJECT, class_name, method)
}

pub(crate) fn class_node(
    project: &str,
    class_name: &str,
    kind: FrameworkKind,
    methods: &[&str],
) -> TestNode {
    TestNode::new(TestIdentity::new(project, class_name), NodeLevel::Class)
        .with_kind(kind)
        .with_source_path(format!("src/test/java/{}.java", class_name.replace('.', "/")))
        .with_children(methods.iter().map(|method| {
            TestNode::new(
                TestIdentity::method(project, class_name, method),
                NodeLevel::Method,
            )
        }))
}

pub(crate) fn status(store: &ResultStore, identity: &TestIdentity) -> Option<TestStatus> {
    store.get_result(identity).map(|result| result.status)
}

pub(crate) fn result(store: &ResultStore, identity: &TestIdentity) -> TestResult {
    store
        .get_result(identity)
        .unwrap_or_else(|| panic!("no result for {identity}"))
}

/// Wraps a structured record in its sentinels.
pub(crate) fn record(name: &str, attributes: serde_json::Value) -> String {
    let record = serde_json::json!({ "name": name, "attributes": attributes });
    format!("@@<TestRunner-{record}-TestRunner>\n")
}

pub(crate) fn coordinator(launcher: ScriptedLauncher) -> RunCoordinator<ScriptedLauncher> {
    RunCoordinator::new(
        launcher,
        Arc::new(ResultStore::new()),
        RunConfig::default().with_drain_timeout(Duration::from_secs(1)),
    )
}

/// Waits until the store holds a result for `identity`.
pub(crate) async fn wait_for_result(store: &ResultStore, identity: &TestIdentity) {
    let mut changes = store.subscribe();
    while store.get_result(identity).is_none() {
        if changes.recv().await.is_err() {
            return;
        }
    }
}

#[derive(Clone, Debug)]
enum Script {
    Output { output: String, exit: ExitIndicator },
    Hang { output: String },
    ReadError { output: String },
    Fail,
}

/// A launcher that plays back scripted output over in-memory pipes.
#[derive(Debug, Default)]
pub(crate) struct ScriptedLauncher {
    scripts: HashMap<(String, FrameworkKind), Script>,
    launched: Mutex<Vec<LaunchRequest>>,
    terminated: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Plays `output`, then exits successfully.
    pub(crate) fn output(self, project: &str, kind: FrameworkKind, output: &str) -> Self {
        self.exit(project, kind, output, ExitIndicator::Success)
    }

    /// Plays `output`, then exits with `exit`.
    pub(crate) fn exit(
        mut self,
        project: &str,
        kind: FrameworkKind,
        output: &str,
        exit: ExitIndicator,
    ) -> Self {
        let script = Script::Output {
            output: output.to_owned(),
            exit,
        };
        self.scripts.insert((project.to_owned(), kind), script);
        self
    }

    /// Plays `output`, then keeps the stream open until terminated.
    pub(crate) fn hang(mut self, project: &str, kind: FrameworkKind, output: &str) -> Self {
        let script = Script::Hang {
            output: output.to_owned(),
        };
        self.scripts.insert((project.to_owned(), kind), script);
        self
    }

    /// Plays `output`, then fails the next read. The process keeps running until terminated.
    pub(crate) fn read_error(mut self, project: &str, kind: FrameworkKind, output: &str) -> Self {
        let script = Script::ReadError {
            output: output.to_owned(),
        };
        self.scripts.insert((project.to_owned(), kind), script);
        self
    }

    /// Returns the number of sessions terminated so far.
    pub(crate) fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Fails to launch.
    pub(crate) fn fail(mut self, project: &str, kind: FrameworkKind) -> Self {
        self.scripts.insert((project.to_owned(), kind), Script::Fail);
        self
    }

    /// Returns the requests seen so far.
    pub(crate) fn launched(&self) -> Vec<LaunchRequest> {
        self.launched.lock().expect("lock not poisoned").clone()
    }
}

impl Launcher for ScriptedLauncher {
    fn launch<'a>(
        &'a self,
        request: &'a LaunchRequest,
        _cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<TestSession, LaunchError>> {
        Box::pin(async move {
            self.launched
                .lock()
                .expect("lock not poisoned")
                .push(request.clone());
            let script = self
                .scripts
                .get(&(request.project.to_string(), request.kind))
                .cloned()
                .unwrap_or(Script::Fail);

            let (output, exit, hang, fail_read) = match script {
                Script::Output { output, exit } => (output, exit, false, false),
                Script::Hang { output } => (output, ExitIndicator::Success, true, false),
                Script::ReadError { output } => (output, ExitIndicator::Success, true, true),
                Script::Fail => return Err(LaunchError::NoCommand { kind: request.kind }),
            };

            let (mut writer, reader) = tokio::io::duplex(64);
            let (stop_tx, stop_rx) = oneshot::channel::<()>();
            tokio::spawn(async move {
                for chunk in output.as_bytes().chunks(WRITE_CHUNK) {
                    if writer.write_all(chunk).await.is_err() {
                        return;
                    }
                }
                if hang && !fail_read {
                    // Either a stop or a dropped control ends the session.
                    let _ = stop_rx.await;
                }
            });

            let control = ScriptedControl {
                exit,
                hang,
                stop: Some(stop_tx),
                terminated: self.terminated.clone(),
            };
            if fail_read {
                Ok(TestSession::new(reader.chain(ResetReader), control))
            } else {
                Ok(TestSession::new(reader, control))
            }
        })
    }
}

#[derive(Debug)]
struct ScriptedControl {
    exit: ExitIndicator,
    hang: bool,
    stop: Option<oneshot::Sender<()>>,
    terminated: Arc<AtomicUsize>,
}

impl SessionControl for ScriptedControl {
    fn wait(&mut self) -> BoxFuture<'_, io::Result<ExitIndicator>> {
        Box::pin(async move {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(self.exit)
        })
    }

    fn terminate(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            if self.hang {
                self.hang = false;
                self.exit = ExitIndicator::Failure(None);
            }
            Ok(())
        })
    }
}

/// A stream whose every read fails, like a socket reset by its peer.
#[derive(Debug)]
struct ResetReader;

impl AsyncRead for ResetReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
    }
}
