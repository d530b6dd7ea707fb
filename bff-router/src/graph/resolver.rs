use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Map;
use serde_json::Value;
use tracing::Instrument;

use super::GraphSpec;
use super::context::ResolutionContext;
use super::pipeline::Attempt;
use super::pipeline::FieldPipeline;
use crate::circuit_breaker::HealthTracker;
use crate::configuration;
use crate::configuration::Configuration;
use crate::error::ConfigurationError;
use crate::error::ResolveError;
use crate::services::ServiceDispatcher;
use crate::stats::FetchStat;
use crate::stats::FetchStats;

/// Receives every backend call made by one resolution, once it is over.
pub type OnStat = Arc<dyn Fn(&[FetchStat]) + Send + Sync>;

/// Options of one [`GraphResolver::resolve`] call.
#[derive(Clone)]
pub struct ResolveOptions {
    /// Leave null public fields out of the output.
    pub skip_null: bool,

    /// Consult the circuit breaker before every fetch.
    pub circuit_breaker: bool,

    /// Maximum number of dependency rounds after the first one, unbounded when `None`.
    pub max_depends: Option<usize>,

    /// Readable by every field under the `request` key.
    pub request: Value,

    pub on_stat: Option<OnStat>,
}

impl ResolveOptions {
    pub fn with_request(mut self, request: Value) -> Self {
        self.request = request;
        self
    }

    pub fn with_on_stat(mut self, on_stat: impl Fn(&[FetchStat]) + Send + Sync + 'static) -> Self {
        self.on_stat = Some(Arc::new(on_stat));
        self
    }
}

impl Default for ResolveOptions {
    fn default() -> Self {
        (&configuration::Resolver::default()).into()
    }
}

impl From<&configuration::Resolver> for ResolveOptions {
    fn from(resolver: &configuration::Resolver) -> Self {
        Self {
            skip_null: resolver.skip_null,
            circuit_breaker: resolver.circuit_breaker,
            max_depends: resolver.max_depends,
            request: Value::Null,
            on_stat: None,
        }
    }
}

impl fmt::Debug for ResolveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveOptions")
            .field("skip_null", &self.skip_null)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("max_depends", &self.max_depends)
            .field("request", &self.request)
            .field("on_stat", &self.on_stat.is_some())
            .finish()
    }
}

/// Resolves [`GraphSpec`]s against a set of backend services.
///
/// Fields are resolved in rounds: every unresolved field is attempted concurrently against
/// the values known when the round started, until every field has a value. A round that
/// resolves nothing means the remaining fields wait on each other.
#[derive(Clone)]
pub struct GraphResolver {
    dispatcher: Arc<ServiceDispatcher>,
    defaults: configuration::Resolver,
}

#[buildstructor::buildstructor]
impl GraphResolver {
    #[builder]
    pub fn new(
        dispatcher: Arc<ServiceDispatcher>,
        defaults: Option<configuration::Resolver>,
    ) -> Self {
        Self {
            dispatcher,
            defaults: defaults.unwrap_or_default(),
        }
    }

    /// A resolver using the services, circuit breaker and http settings of `configuration`.
    pub fn from_configuration(configuration: &Configuration) -> Result<Self, ConfigurationError> {
        let circuit_breaker = Arc::new(HealthTracker::new(&configuration.circuit_breaker));
        let dispatcher = ServiceDispatcher::new(configuration, circuit_breaker)?;
        Ok(Self::new(
            Arc::new(dispatcher),
            Some(configuration.resolver.clone()),
        ))
    }

    /// Options seeded with the configured defaults.
    pub fn options(&self) -> ResolveOptions {
        (&self.defaults).into()
    }

    /// Resolves every field of `graph` and returns the public ones.
    ///
    /// `on_stat` is called exactly once, also when the resolution fails.
    pub async fn resolve(
        &self,
        graph: &GraphSpec,
        options: ResolveOptions,
    ) -> Result<Map<String, Value>, ResolveError> {
        let stats = FetchStats::default();
        let result = self
            .resolve_rounds(graph, &options, &stats)
            .instrument(tracing::info_span!("resolve_graph", fields = graph.len()))
            .await;

        let stats = stats.into_inner();
        tracing::debug!(fetches = stats.len(), "graph resolution finished");
        if let Some(on_stat) = &options.on_stat {
            on_stat(&stats);
        }
        if let Err(err) = &result {
            tracing::error!(error = %err, "graph resolution failed");
        }
        result
    }

    async fn resolve_rounds(
        &self,
        graph: &GraphSpec,
        options: &ResolveOptions,
        stats: &FetchStats,
    ) -> Result<Map<String, Value>, ResolveError> {
        let mut context = ResolutionContext::new(graph, options.request.clone())?;
        let mut rounds = 0;

        loop {
            let unresolved = context.unresolved();
            if unresolved.is_empty() {
                break;
            }
            if let Some(max_depends) = options.max_depends {
                if rounds > max_depends {
                    return Err(ResolveError::DependencyDepthExceeded {
                        max_depends,
                        fields: unresolved.into_iter().map(|(key, _)| key).collect(),
                    });
                }
            }
            rounds += 1;
            tracing::debug!(
                round = rounds,
                unresolved = unresolved.len(),
                "starting resolution round"
            );

            let snapshot = context.snapshot();
            let mut attempts: FuturesUnordered<_> = unresolved
                .iter()
                .map(|(key, definition)| {
                    let pipeline = FieldPipeline {
                        key,
                        definition,
                        context: snapshot.clone(),
                        dispatcher: &self.dispatcher,
                        stats,
                        circuit_breaker: options.circuit_breaker,
                    };
                    async move { (key, pipeline.attempt().await) }
                        .instrument(tracing::info_span!("resolve_field", field = %key))
                })
                .collect();

            let mut progress = false;
            while let Some((key, attempt)) = attempts.next().await {
                match attempt? {
                    Attempt::Resolved(value) => {
                        context.resolve(key, value);
                        progress = true;
                    }
                    Attempt::Blocked(dependency) => context.block(key, dependency),
                }
            }

            if !progress {
                return Err(ResolveError::CircularDependency {
                    blocked: context.blocked(),
                });
            }
        }

        Ok(context.into_output(options.skip_null))
    }
}
