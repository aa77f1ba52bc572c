//! Scriptable remote source for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::fixtures::topic_record;
use crate::cancellation::CancellationToken;
use crate::core::{Identifier, RawRecord};
use crate::errors::StageError;
use crate::source::RemoteSource;

type Scripted<T> = VecDeque<Result<T, StageError>>;

/// An in-memory [`RemoteSource`] that records every call.
///
/// Listing calls pop from the listing script and fall back to the configured
/// identifiers once it is empty. Record calls pop from the per-identifier
/// script, then to a permanent failure if one is set, then to a
/// [`topic_record`] fixture.
#[derive(Debug, Default)]
pub struct StubSource {
    identifiers: Vec<Identifier>,
    listing_script: Mutex<Scripted<Vec<Identifier>>>,
    record_scripts: Mutex<HashMap<Identifier, Scripted<RawRecord>>>,
    permanent_failures: HashMap<Identifier, StageError>,
    delays: HashMap<Identifier, Duration>,
    cancel_after: Option<(usize, Arc<CancellationToken>)>,
    list_calls: Mutex<usize>,
    fetch_calls: Mutex<Vec<Identifier>>,
}

impl StubSource {
    /// Creates a source listing these identifiers.
    #[must_use]
    pub fn new(identifiers: Vec<Identifier>) -> Self {
        Self {
            identifiers,
            ..Self::default()
        }
    }

    /// Queues a listing response ahead of the fallback.
    #[must_use]
    pub fn with_listing(self, response: Result<Vec<Identifier>, StageError>) -> Self {
        self.listing_script.lock().push_back(response);
        self
    }

    /// Queues `count` listing failures.
    #[must_use]
    pub fn with_listing_failures(self, error: &StageError, count: usize) -> Self {
        {
            let mut script = self.listing_script.lock();
            for _ in 0..count {
                script.push_back(Err(error.clone()));
            }
        }
        self
    }

    /// Queues a record response for one identifier.
    #[must_use]
    pub fn with_record(self, identifier: Identifier, response: Result<RawRecord, StageError>) -> Self {
        self.record_scripts
            .lock()
            .entry(identifier)
            .or_default()
            .push_back(response);
        self
    }

    /// Makes every fetch of `identifier` fail with `error`.
    #[must_use]
    pub fn with_permanent_failure(mut self, identifier: Identifier, error: StageError) -> Self {
        self.permanent_failures.insert(identifier, error);
        self
    }

    /// Delays every fetch of `identifier`.
    #[must_use]
    pub fn with_delay(mut self, identifier: Identifier, delay: Duration) -> Self {
        self.delays.insert(identifier, delay);
        self
    }

    /// Cancels `token` once `count` record fetches have started.
    #[must_use]
    pub fn with_cancel_after(mut self, count: usize, token: Arc<CancellationToken>) -> Self {
        self.cancel_after = Some((count, token));
        self
    }

    /// Number of listing calls so far.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock()
    }

    /// Identifiers fetched so far, in call order.
    #[must_use]
    pub fn fetch_calls(&self) -> Vec<Identifier> {
        self.fetch_calls.lock().clone()
    }

    /// Number of fetches of one identifier.
    #[must_use]
    pub fn fetches_of(&self, identifier: &Identifier) -> usize {
        self.fetch_calls
            .lock()
            .iter()
            .filter(|id| *id == identifier)
            .count()
    }
}

#[async_trait]
impl RemoteSource for StubSource {
    async fn list_identifiers(&self) -> Result<Vec<Identifier>, StageError> {
        *self.list_calls.lock() += 1;
        let scripted = self.listing_script.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(self.identifiers.clone()))
    }

    async fn fetch_record(&self, identifier: &Identifier) -> Result<RawRecord, StageError> {
        let started = {
            let mut calls = self.fetch_calls.lock();
            calls.push(identifier.clone());
            calls.len()
        };
        if let Some((count, token)) = &self.cancel_after {
            if started >= *count {
                token.cancel("stub cancel");
            }
        }
        if let Some(delay) = self.delays.get(identifier) {
            tokio::time::sleep(*delay).await;
        }

        let scripted = self
            .record_scripts
            .lock()
            .get_mut(identifier)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| match self.permanent_failures.get(identifier) {
            Some(error) => Err(error.clone()),
            None => Ok(topic_record(identifier, 0)),
        })
    }
}
