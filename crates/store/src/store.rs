//! Storage contracts consumed by the analyzers and the REST layer.

use chrono::{DateTime, Utc};
use pulse_core::types::{
    Assignment, Event, EventFilter, EventNameCount, Experiment, NewEvent, NewExperiment,
    TimeWindow, User, UserUpsert, VariantConversions,
};
use pulse_core::PulseResult;
use uuid::Uuid;

/// Append-only log of user actions.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Persist one event and bump the owning user's `last_seen`.
    async fn record_event(&self, event: NewEvent) -> PulseResult<Event>;

    /// Persist a batch atomically: either every event is stored or none is.
    async fn record_events(&self, events: Vec<NewEvent>) -> PulseResult<Vec<Event>>;

    /// Events ordered by user, then time, then arrival.
    async fn query_events(&self, filter: &EventFilter, window: &TimeWindow)
        -> PulseResult<Vec<Event>>;

    async fn distinct_users(&self, event_name: &str, window: &TimeWindow) -> PulseResult<u64>;

    async fn event_names(&self) -> PulseResult<Vec<EventNameCount>>;

    /// Cheap round trip used by the readiness probe.
    async fn ping(&self) -> PulseResult<()>;
}

#[async_trait::async_trait]
pub trait UserStore: Send + Sync + 'static {
    async fn upsert_user(&self, user: UserUpsert) -> PulseResult<User>;

    async fn get_user(&self, user_id: &str) -> PulseResult<Option<User>>;

    async fn first_event_timestamp(&self, user_id: &str) -> PulseResult<Option<DateTime<Utc>>>;

    /// `created_at` of every known user.
    async fn user_signups(&self) -> PulseResult<Vec<DateTime<Utc>>>;

    /// Delete the user together with their events and assignments.
    /// Returns false when the user was unknown.
    async fn erase_user(&self, user_id: &str) -> PulseResult<bool>;
}

#[async_trait::async_trait]
pub trait ExperimentStore: Send + Sync + 'static {
    async fn create_experiment(&self, experiment: NewExperiment) -> PulseResult<Experiment>;

    async fn get_experiment(&self, id: &Uuid) -> PulseResult<Option<Experiment>>;

    async fn list_experiments(&self) -> PulseResult<Vec<Experiment>>;

    /// Bucket a user into a variant. Repeated calls return the first assignment.
    async fn assign_variant(&self, experiment_id: &Uuid, user_id: &str)
        -> PulseResult<Assignment>;

    /// Per-variant exposure and goal conversions, in the experiment's variant order.
    async fn variant_conversions(&self, experiment_id: &Uuid)
        -> PulseResult<Vec<VariantConversions>>;
}

/// Everything the API needs behind one trait object.
pub trait AnalyticsStore: EventStore + UserStore + ExperimentStore {}

impl<T> AnalyticsStore for T where T: EventStore + UserStore + ExperimentStore {}
