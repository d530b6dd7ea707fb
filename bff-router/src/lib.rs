//! Backend-for-frontend aggregation: resolves a graph of dependent backend calls into a
//! single response.

#![warn(unreachable_pub)]

pub mod circuit_breaker;
pub mod configuration;
pub mod error;
pub mod graph;
pub mod services;
pub mod stats;

pub use circuit_breaker::CircuitBreaker;
pub use circuit_breaker::HealthTracker;
pub use configuration::Configuration;
pub use error::ConfigurationError;
pub use error::FetchError;
pub use error::HookError;
pub use error::ResolveError;
pub use graph::Context;
pub use graph::FieldDefinition;
pub use graph::GraphResolver;
pub use graph::GraphSpec;
pub use graph::ResolveOptions;
pub use services::Datatype;
pub use services::FetchOptions;
pub use services::FetchPlan;
pub use services::ServiceDispatcher;
pub use stats::FetchStat;
