//! Top-level entry point that composes the repository, per-lead actors,
//! intent publishing, and projections into a single [`LeadStore`].
//!
//! The store is configured through [`LeadStoreBuilder`].

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::actor::{ActorConfig, LeadHandle, spawn_actor};
use crate::dispatch::Applied;
use crate::error::{StoreError, SubmitError};
use crate::event::LeadEvent;
use crate::intent::{Intent, IntentPublisher};
use crate::lead::Lead;
use crate::projection::Projection;
use crate::repository::{FileRepository, InMemoryRepository, LeadRepository};

/// Default idle timeout for lead actors: 5 minutes.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default capacity of each actor's message channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Async front door to the lead lifecycle.
///
/// Routes every event through the actor that owns its lead, so events for
/// one lead are validated and applied strictly one after another while
/// different leads proceed in parallel. Accepted events are persisted
/// before their intents are published.
///
/// `Clone` is cheap: all internal state is `Arc`-wrapped.
#[derive(Clone)]
pub struct LeadStore {
    repo: Arc<dyn LeadRepository>,
    publisher: Option<Arc<dyn IntentPublisher>>,
    cache: Arc<RwLock<HashMap<Uuid, LeadHandle>>>,
    idle_timeout: Duration,
    channel_capacity: usize,
}

impl std::fmt::Debug for LeadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeadStore")
            .field("idle_timeout", &self.idle_timeout)
            .field("channel_capacity", &self.channel_capacity)
            .field("has_publisher", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

impl LeadStore {
    pub fn builder() -> LeadStoreBuilder {
        LeadStoreBuilder::new()
    }

    /// A store over a fresh [`InMemoryRepository`] with default settings.
    pub fn in_memory() -> Self {
        LeadStoreBuilder::new().build()
    }

    /// Get a handle to a lead's actor, spawning it if needed.
    ///
    /// A cached handle is reused while its actor is alive. Handles whose
    /// actor idled out are evicted and replaced.
    pub async fn get(&self, lead_id: Uuid) -> LeadHandle {
        {
            let cache = self.cache.read().await;
            if let Some(handle) = cache.get(&lead_id)
                && handle.is_alive()
            {
                return handle.clone();
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have spawned it while we waited for the lock.
        if let Some(handle) = cache.get(&lead_id)
            && handle.is_alive()
        {
            return handle.clone();
        }

        tracing::debug!(lead_id = %lead_id, "spawning actor");
        let handle = spawn_actor(
            lead_id,
            Arc::clone(&self.repo),
            ActorConfig {
                idle_timeout: self.idle_timeout,
                channel_capacity: self.channel_capacity,
            },
        );
        cache.insert(lead_id, handle.clone());
        handle
    }

    /// Validate, apply, and persist one event, then publish its intents.
    ///
    /// # Arguments
    ///
    /// * `event` - The event to submit. It is routed by its `leadId`.
    ///
    /// # Returns
    ///
    /// The new aggregate and the intents it produced.
    ///
    /// # Errors
    ///
    /// * [`SubmitError::Rejected`] - validation or the state machine refused the event.
    /// * [`SubmitError::Store`] - loading or persisting the aggregate failed.
    /// * [`SubmitError::ActorGone`] - the actor exited twice in a row.
    pub async fn submit(&self, event: LeadEvent) -> Result<Applied, SubmitError> {
        let lead_id = event.lead_id();
        let retry = event.clone();

        let result = match self.get(lead_id).await.submit(event).await {
            // The actor idled out between lookup and send. The event was
            // never processed, so it is safe to resend to a fresh actor.
            Err(SubmitError::ActorGone) => {
                tracing::debug!(lead_id = %lead_id, "actor gone, respawning");
                self.get(lead_id).await.submit(retry).await
            }
            other => other,
        }?;

        self.publish(&result.intents);
        Ok(result)
    }

    /// Current aggregate of a lead, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// See [`LeadHandle::state`].
    pub async fn lead(&self, lead_id: Uuid) -> Result<Option<Lead>, SubmitError> {
        self.get(lead_id).await.state().await
    }

    /// Every accepted event for one lead, in application order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the repository cannot be read.
    pub async fn history(&self, lead_id: Uuid) -> Result<Vec<LeadEvent>, StoreError> {
        let repo = Arc::clone(&self.repo);
        blocking(move || repo.history(lead_id)).await
    }

    /// Ids of every stored lead, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the repository cannot be listed.
    pub async fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        let repo = Arc::clone(&self.repo);
        blocking(move || repo.list()).await
    }

    /// Build a projection by folding every lead's history.
    ///
    /// # Type Parameters
    ///
    /// * `P` - The [`Projection`] to build.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any history cannot be read.
    pub async fn projection<P: Projection>(&self) -> Result<P, StoreError> {
        let repo = Arc::clone(&self.repo);
        blocking(move || {
            let mut state = P::default();
            let mut events = 0usize;
            for lead_id in repo.list()? {
                for event in repo.history(lead_id)? {
                    state.apply(&event);
                    events += 1;
                }
            }
            tracing::debug!(projection = P::NAME, events, "projection rebuilt");
            Ok(state)
        })
        .await
    }

    fn publish(&self, intents: &[Intent]) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        for intent in intents {
            if let Err(e) = publisher.publish(intent) {
                tracing::warn!(
                    lead_id = %intent.lead_id,
                    event_id = %intent.event_id,
                    topic = %intent.topic(),
                    error = %e,
                    "failed to publish intent"
                );
            }
        }
    }
}

/// Run repository I/O off the async worker threads.
async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))?
}

/// Builder for configuring and creating a [`LeadStore`].
///
/// # Examples
///
/// ```no_run
/// use leadfold::LeadStoreBuilder;
/// use std::time::Duration;
///
/// let store = LeadStoreBuilder::new()
///     .base_dir("/var/lib/leads")
///     .idle_timeout(Duration::from_secs(60))
///     .build();
/// ```
pub struct LeadStoreBuilder {
    repo: Option<Arc<dyn LeadRepository>>,
    publisher: Option<Arc<dyn IntentPublisher>>,
    idle_timeout: Duration,
    channel_capacity: usize,
}

impl LeadStoreBuilder {
    /// A builder with the in-memory backend and default settings.
    pub fn new() -> Self {
        Self {
            repo: None,
            publisher: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Persist leads under `path` using a [`FileRepository`].
    pub fn base_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.repo = Some(Arc::new(FileRepository::new(path.as_ref())));
        self
    }

    /// Keep leads in memory only. This is the default.
    pub fn in_memory(mut self) -> Self {
        self.repo = Some(Arc::new(InMemoryRepository::new()));
        self
    }

    /// Use a caller-supplied repository.
    pub fn repository(mut self, repo: impl LeadRepository) -> Self {
        self.repo = Some(Arc::new(repo));
        self
    }

    /// Forward intents of accepted events to `publisher`.
    pub fn publisher(mut self, publisher: impl IntentPublisher) -> Self {
        self.publisher = Some(Arc::new(publisher));
        self
    }

    /// Set the idle timeout for actor eviction.
    ///
    /// Actors that receive no messages for this long shut down. The next
    /// submission for that lead transparently spawns a new one, which
    /// reloads the aggregate from the repository.
    ///
    /// Defaults to 5 minutes.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Capacity of each actor's message channel. Defaults to 32.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn build(self) -> LeadStore {
        LeadStore {
            repo: self
                .repo
                .unwrap_or_else(|| Arc::new(InMemoryRepository::new())),
            publisher: self.publisher,
            cache: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout: self.idle_timeout,
            channel_capacity: self.channel_capacity,
        }
    }
}

impl Default for LeadStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
