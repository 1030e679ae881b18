//! Product analytics — funnels, cohort retention, journeys, feature adoption,
//! and experiment evaluation. Every analyzer is a pure function of the events
//! handed to it.

pub mod adoption;
pub mod cohort;
pub mod experiment;
pub mod funnel;
pub mod journey;
pub mod stats;

pub use adoption::{analyze_adoption, AdoptionQuery, AdoptionReport};
pub use cohort::{analyze_retention, RetentionQuery, RetentionReport};
pub use experiment::{ExperimentAnalyzer, ExperimentReport};
pub use funnel::{analyze_funnel, FunnelDefinition, FunnelReport};
pub use journey::{JourneyMapper, JourneyQuery, JourneyReport};
