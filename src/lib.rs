//! Event-sourced sales lead lifecycle.
//!
//! The pure core is three functions over plain data: build an event with
//! [`LeadEvent::new`], check it with [`validate`], and fold it onto the
//! current [`Lead`] with [`apply`], which also returns the [`Intent`]s the
//! change calls for. [`LeadStore`] wraps the core in per-lead actors over a
//! [`LeadRepository`] so callers get serialized, persisted submissions.

mod actor;
mod context;
mod dispatch;
mod error;
mod event;
mod intent;
mod lead;
mod projection;
mod repository;
mod snapshot;
mod storage;
mod store;
mod validate;

pub use actor::LeadHandle;
pub use context::EventContext;
pub use dispatch::{Applied, apply, replay};
pub use error::{
    ConflictError, IllegalTransitionError, LeadError, NotFoundError, StoreError, SubmitError,
    ValidationError,
};
pub use event::{
    DealClosed, DealOutcome, EVENT_VERSION, EventKind, EventPayload, FollowUpTriggered,
    FollowUpType, LeadCreated, LeadDisqualified, LeadEngaged, LeadEvent, LeadQualified,
    LeadStatusChanged,
};
pub use intent::{Intent, IntentKind, IntentPublisher, NotifyReason, PublishError, Topic};
pub use lead::{
    Cadence, Contact, DeliveryStatus, Engagement, EngagementChannel, FollowUpSchedule, Lead,
    LeadPriority, LeadSource, LeadStatus, Location, PriceRange, PropertyInterest, PropertyType,
    Qualification, QualificationFactors,
};
pub use projection::{PipelineSummary, Projection};
pub use repository::{FileRepository, InMemoryRepository, LeadRepository};
pub use snapshot::Snapshot;
pub use storage::{EventLog, StorageLayout};
pub use store::{LeadStore, LeadStoreBuilder};
pub use validate::{ValidEvent, check_structure, validate};
