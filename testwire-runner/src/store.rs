// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The result store shared between a run and its readers.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use testwire_metadata::{TestIdentity, TestResult};
use tokio::sync::broadcast;
use tracing::debug;

/// The capacity of the change notification channel. Slow receivers observe a lag error.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// A notification that results in the store changed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResultChanged {
    /// A result was added or replaced.
    Updated {
        /// The identity whose result changed.
        identity: TestIdentity,

        /// The new result.
        result: TestResult,
    },

    /// A result was removed.
    Removed {
        /// The identity whose result was removed.
        identity: TestIdentity,
    },

    /// All results for a file were invalidated.
    FileInvalidated {
        /// The file.
        path: Utf8PathBuf,
    },

    /// All results were invalidated.
    AllInvalidated,
}

/// Maps test identities to their most recent result.
///
/// Readers may query the store concurrently while a run publishes into it. The store holds at
/// most one result per identity: publishing replaces.
#[derive(Debug)]
pub struct ResultStore {
    inner: RwLock<StoreInner>,
    sender: broadcast::Sender<ResultChanged>,
}

#[derive(Debug, Default)]
struct StoreInner {
    results: HashMap<TestIdentity, TestResult>,
    sources: HashMap<TestIdentity, Utf8PathBuf>,
    by_file: HashMap<Utf8PathBuf, IndexSet<TestIdentity>>,
}

impl StoreInner {
    fn remove(&mut self, identity: &TestIdentity) -> Option<TestResult> {
        if let Some(path) = self.sources.remove(identity) {
            self.unindex(&path, identity);
        }
        self.results.remove(identity)
    }

    fn unindex(&mut self, path: &Utf8Path, identity: &TestIdentity) {
        if let Some(identities) = self.by_file.get_mut(path) {
            identities.shift_remove(identity);
            if identities.is_empty() {
                self.by_file.remove(path);
            }
        }
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(StoreInner::default()),
            sender,
        }
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ResultChanged> {
        self.sender.subscribe()
    }

    /// Returns the result for an identity.
    pub fn get_result(&self, identity: &TestIdentity) -> Option<TestResult> {
        self.read().results.get(identity).cloned()
    }

    /// Returns all results for tests declared in the given file, or `None` if it has none.
    pub fn get_results_for_file(
        &self,
        path: &Utf8Path,
    ) -> Option<HashMap<TestIdentity, TestResult>> {
        let inner = self.read();
        let identities = inner.by_file.get(path)?;
        let results: HashMap<_, _> = identities
            .iter()
            .filter_map(|identity| {
                let result = inner.results.get(identity)?;
                Some((identity.clone(), result.clone()))
            })
            .collect();
        (!results.is_empty()).then_some(results)
    }

    /// Returns true if any result is stored for tests declared in the given file.
    pub fn has_results_for_file(&self, path: &Utf8Path) -> bool {
        self.read().by_file.contains_key(path)
    }

    /// Returns the number of stored results.
    pub fn len(&self) -> usize {
        self.read().results.len()
    }

    /// Returns true if no results are stored.
    pub fn is_empty(&self) -> bool {
        self.read().results.is_empty()
    }

    /// Returns a snapshot of all stored results, sorted by identity.
    pub fn snapshot(&self) -> Vec<(TestIdentity, TestResult)> {
        let mut results: Vec<_> = self
            .read()
            .results
            .iter()
            .map(|(identity, result)| (identity.clone(), result.clone()))
            .collect();
        results.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
        results
    }

    /// Publishes a result, replacing any previous one. `None` removes the stored result.
    pub fn publish(
        &self,
        identity: &TestIdentity,
        result: Option<TestResult>,
        source: Option<&Utf8Path>,
    ) {
        let change = {
            let mut inner = self.write();
            match result {
                Some(result) => {
                    if inner.results.get(identity) == Some(&result) {
                        return;
                    }
                    if let Some(source) = source {
                        let previous = inner.sources.insert(identity.clone(), source.to_owned());
                        if let Some(previous) =
                            previous.filter(|previous| previous.as_path() != source)
                        {
                            inner.unindex(&previous, identity);
                        }
                        inner
                            .by_file
                            .entry(source.to_owned())
                            .or_default()
                            .insert(identity.clone());
                    }
                    inner.results.insert(identity.clone(), result.clone());
                    ResultChanged::Updated {
                        identity: identity.clone(),
                        result,
                    }
                }
                None => {
                    if inner.remove(identity).is_none() {
                        return;
                    }
                    ResultChanged::Removed {
                        identity: identity.clone(),
                    }
                }
            }
        };
        self.notify(change);
    }

    /// Removes all results for tests declared in the given file.
    pub fn invalidate_file(&self, path: &Utf8Path) {
        {
            let mut inner = self.write();
            let Some(identities) = inner.by_file.remove(path) else {
                return;
            };
            for identity in &identities {
                inner.sources.remove(identity);
                inner.results.remove(identity);
            }
            debug!(%path, count = identities.len(), "invalidated results for file");
        }
        self.notify(ResultChanged::FileInvalidated {
            path: path.to_owned(),
        });
    }

    /// Removes all results.
    pub fn invalidate_all(&self) {
        {
            let mut inner = self.write();
            *inner = StoreInner::default();
        }
        self.notify(ResultChanged::AllInvalidated);
    }

    fn notify(&self, change: ResultChanged) {
        // An error only means nobody is subscribed.
        let _ = self.sender.send(change);
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
