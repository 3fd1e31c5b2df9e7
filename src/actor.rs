//! Actor loop that owns one lead and applies its events in order.
//!
//! The actor runs on a dedicated thread and processes messages from an
//! `mpsc` channel one at a time. That sequencing is what makes `validate`
//! followed by `apply` safe: no two events for the same lead are ever
//! folded concurrently.
//!
//! Public API: [`LeadHandle`] (cloneable async handle). Actors are spawned
//! by [`LeadStore`](crate::LeadStore).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::dispatch::{Applied, apply};
use crate::error::{StoreError, SubmitError};
use crate::event::LeadEvent;
use crate::lead::Lead;
use crate::repository::LeadRepository;
use crate::validate::validate;

/// Configuration for the actor loop.
pub(crate) struct ActorConfig {
    /// How long the actor waits for a message before shutting down.
    pub idle_timeout: Duration,
    /// Capacity of the bounded message channel.
    pub channel_capacity: usize,
}

/// Messages sent from [`LeadHandle`] to the actor loop.
pub(crate) enum ActorMessage {
    /// Validate, apply, and persist one event.
    Submit {
        event: LeadEvent,
        reply: oneshot::Sender<Result<Applied, SubmitError>>,
    },

    /// Read the current aggregate.
    GetState {
        reply: oneshot::Sender<Result<Option<Lead>, StoreError>>,
    },

    /// Stop the loop without waiting for the idle timeout.
    #[cfg(test)]
    Shutdown,
}

/// State owned by a running actor.
struct LeadActor {
    lead_id: Uuid,
    repo: Arc<dyn LeadRepository>,
    /// `None` until first loaded from the repository.
    cached: Option<Option<Lead>>,
}

impl LeadActor {
    fn current(&mut self) -> Result<Option<Lead>, StoreError> {
        if let Some(lead) = &self.cached {
            return Ok(lead.clone());
        }
        let lead = self.repo.get(self.lead_id)?;
        self.cached = Some(lead.clone());
        Ok(lead)
    }

    /// Validate and apply `event`, then persist the result.
    ///
    /// The cache is only updated after `put` succeeds, so a failed write
    /// leaves the actor's view consistent with storage.
    fn submit(&mut self, event: LeadEvent) -> Result<Applied, SubmitError> {
        let current = self.current()?;
        let valid = validate(event, current.as_ref())?;
        let applied = apply(current.as_ref(), &valid)?;

        if let Err(e) = self.repo.put(&applied.lead, valid.event()) {
            // The write may have partially landed; reload on next use.
            self.cached = None;
            return Err(e.into());
        }
        self.cached = Some(Some(applied.lead.clone()));

        tracing::info!(
            event_type = %valid.event().kind(),
            status = %applied.lead.status,
            version = applied.lead.version,
            intents = applied.intents.len(),
            "event applied"
        );
        Ok(applied)
    }
}

/// Runs the actor loop on a dedicated thread.
///
/// The loop exits when the channel closes (all senders dropped), a
/// `Shutdown` message arrives, or the idle timeout elapses.
pub(crate) fn run_actor(
    lead_id: Uuid,
    repo: Arc<dyn LeadRepository>,
    mut rx: mpsc::Receiver<ActorMessage>,
    idle_timeout: Duration,
) {
    // The parent runtime may be current-thread (common in tests) and would
    // not drive timers from this thread, so the actor gets its own.
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(lead_id = %lead_id, error = %e, "failed to build actor runtime");
            return;
        }
    };

    let mut actor = LeadActor {
        lead_id,
        repo,
        cached: None,
    };

    loop {
        // The timeout future must be created inside `block_on` so its timer
        // registers with the local runtime.
        let msg = rt.block_on(async { tokio::time::timeout(idle_timeout, rx.recv()).await });

        match msg {
            Ok(Some(ActorMessage::Submit { event, reply })) => {
                let _span = tracing::info_span!(
                    "submit",
                    lead_id = %lead_id,
                    event_id = %event.id(),
                    event_type = %event.kind(),
                )
                .entered();
                let result = actor.submit(event);
                if let Err(e) = &result {
                    tracing::debug!(error = %e, "event rejected");
                }
                // The caller may have given up waiting; nothing to do then.
                let _ = reply.send(result);
            }
            Ok(Some(ActorMessage::GetState { reply })) => {
                let _ = reply.send(actor.current());
            }
            #[cfg(test)]
            Ok(Some(ActorMessage::Shutdown)) => break,
            Ok(None) => break,
            Err(_elapsed) => {
                tracing::info!(lead_id = %lead_id, "actor idle, shutting down");
                break;
            }
        }
    }
}

/// Async handle to a running lead actor.
///
/// Lightweight, cloneable, and `Send + Sync`.
#[derive(Debug, Clone)]
pub struct LeadHandle {
    lead_id: Uuid,
    sender: mpsc::Sender<ActorMessage>,
}

impl std::fmt::Debug for ActorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submit { event, .. } => f
                .debug_struct("Submit")
                .field("event_id", &event.id())
                .finish_non_exhaustive(),
            Self::GetState { .. } => f.write_str("GetState"),
            #[cfg(test)]
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl LeadHandle {
    pub fn lead_id(&self) -> Uuid {
        self.lead_id
    }

    /// Send an event to the actor and wait for the outcome.
    ///
    /// # Returns
    ///
    /// The new aggregate and the intents it produced.
    ///
    /// # Errors
    ///
    /// * [`SubmitError::Rejected`] - validation or the state machine refused the event.
    /// * [`SubmitError::Store`] - loading or persisting the aggregate failed.
    /// * [`SubmitError::ActorGone`] - the actor thread has exited.
    pub async fn submit(&self, event: LeadEvent) -> Result<Applied, SubmitError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::Submit { event, reply: tx })
            .await
            .map_err(|_| SubmitError::ActorGone)?;
        rx.await.map_err(|_| SubmitError::ActorGone)?
    }

    /// Read the current aggregate, or `None` if the lead does not exist.
    ///
    /// # Errors
    ///
    /// * [`SubmitError::Store`] - the repository could not be read.
    /// * [`SubmitError::ActorGone`] - the actor thread has exited.
    pub async fn state(&self) -> Result<Option<Lead>, SubmitError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::GetState { reply: tx })
            .await
            .map_err(|_| SubmitError::ActorGone)?;
        Ok(rx.await.map_err(|_| SubmitError::ActorGone)??)
    }

    /// Whether the actor behind this handle is still running.
    ///
    /// The store uses this to evict handles whose actor idled out.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Spawn an actor for `lead_id` on its own thread.
pub(crate) fn spawn_actor(
    lead_id: Uuid,
    repo: Arc<dyn LeadRepository>,
    config: ActorConfig,
) -> LeadHandle {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let idle_timeout = config.idle_timeout;
    std::thread::spawn(move || run_actor(lead_id, repo, rx, idle_timeout));
    LeadHandle { lead_id, sender: tx }
}
