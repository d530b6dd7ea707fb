//! One attempt at resolving one field.

use std::future::Future;

use futures::future::try_join_all;
use serde_json::Value;

use super::Context;
use super::FieldDefinition;
use crate::error::ConfigurationError;
use crate::error::FetchError;
use crate::error::HookError;
use crate::error::ResolveError;
use crate::services::FetchOptions;
use crate::services::FetchPlan;
use crate::services::ServiceDispatcher;
use crate::stats::FetchStats;

/// How an attempt ended, when it did not fail the resolution.
#[derive(Debug)]
pub(crate) enum Attempt {
    Resolved(Value),
    /// A hook read this field before it was resolved.
    Blocked(String),
}

/// Why an attempt stopped early.
enum Interrupt {
    Blocked(String),
    Failed(ResolveError),
}

impl From<ResolveError> for Interrupt {
    fn from(err: ResolveError) -> Self {
        Interrupt::Failed(err)
    }
}

impl From<ConfigurationError> for Interrupt {
    fn from(err: ConfigurationError) -> Self {
        Interrupt::Failed(err.into())
    }
}

pub(crate) struct FieldPipeline<'a> {
    pub(crate) key: &'a str,
    pub(crate) definition: &'a FieldDefinition,
    pub(crate) context: Context,
    pub(crate) dispatcher: &'a ServiceDispatcher,
    pub(crate) stats: &'a FetchStats,
    pub(crate) circuit_breaker: bool,
}

impl FieldPipeline<'_> {
    pub(crate) async fn attempt(self) -> Result<Attempt, ResolveError> {
        match self.run().await {
            Ok(value) => Ok(Attempt::Resolved(value)),
            Err(Interrupt::Blocked(dependency)) => {
                tracing::debug!(field = self.key, %dependency, "waiting on dependency");
                Ok(Attempt::Blocked(dependency))
            }
            Err(Interrupt::Failed(err)) => Err(err),
        }
    }

    async fn run(&self) -> Result<Value, Interrupt> {
        let definition = self.definition;

        if let Some(when) = &definition.when {
            let enabled = when(self.context.clone())
                .await
                .map_err(|err| self.hook_error("when", err))?;
            if !enabled {
                return Ok(Value::Null);
            }
        }

        if let Some(fake) = &definition.fake {
            return fake(self.context.clone())
                .await
                .map_err(|err| self.hook_error("fake", err));
        }

        let prefilter = definition
            .prefilter
            .as_ref()
            .ok_or_else(|| ConfigurationError::MissingPrefilter(self.key.to_string()))?;
        let plan = prefilter(self.context.clone())
            .await
            .map_err(|err| self.hook_error("prefilter", err))?;
        let plan = self.rewrite(plan).await?;

        let raw = match self.fetch(plan).await {
            Ok(raw) => raw,
            Err(Interrupt::Failed(ResolveError::Fetch(err))) => {
                let Some(fallback) = &definition.fallback else {
                    return Err(Interrupt::Failed(err.into()));
                };
                tracing::warn!(
                    field = self.key,
                    code = err.extension_code(),
                    error = %err,
                    "fetch failed, using fallback"
                );
                return fallback(self.context.clone(), err)
                    .await
                    .map_err(|err| self.hook_error("fallback", err));
            }
            Err(interrupt) => return Err(interrupt),
        };

        match &definition.convert {
            Some(convert) => convert(self.context.rebind(self.key, raw))
                .await
                .map_err(|err| self.hook_error("convert", err)),
            None => Ok(raw),
        }
    }

    /// Applies `before` to every options of the plan.
    async fn rewrite(&self, plan: FetchPlan) -> Result<FetchPlan, Interrupt> {
        let Some(before) = &self.definition.before else {
            return Ok(plan);
        };
        let rewrite_one = |options: FetchOptions| async move {
            before(self.context.clone(), options)
                .await
                .map_err(|err| self.hook_error("before", err))
        };

        Ok(match plan {
            FetchPlan::Single(options) => rewrite_one(options).await?,
            FetchPlan::All(options) => FetchPlan::All(splice(options, rewrite_one).await?),
            FetchPlan::Chain(options) => FetchPlan::Chain(splice(options, rewrite_one).await?),
        })
    }

    async fn fetch(&self, plan: FetchPlan) -> Result<Value, Interrupt> {
        tracing::debug!(field = self.key, calls = plan.len(), "fetching");
        match plan {
            FetchPlan::Single(options) => self.dispatch(options).await,
            FetchPlan::All(options) => {
                // first failure in completion order wins, results stay in plan order
                let results =
                    try_join_all(options.into_iter().map(|options| self.dispatch(options)))
                        .await?;
                Ok(Value::Array(results))
            }
            FetchPlan::Chain(rules) => {
                if rules.is_empty() {
                    return Err(ConfigurationError::EmptyRuleChain(self.key.to_string()).into());
                }
                let mut last_error: Option<FetchError> = None;
                for options in rules {
                    match self.dispatch(options).await {
                        Ok(raw) => return Ok(raw),
                        Err(Interrupt::Failed(ResolveError::Fetch(err))) => {
                            tracing::debug!(
                                field = self.key,
                                error = %err,
                                "rule failed, trying the next one"
                            );
                            last_error = Some(err);
                        }
                        Err(interrupt) => return Err(interrupt),
                    }
                }
                match last_error {
                    Some(err) => Err(Interrupt::Failed(err.into())),
                    None => Err(ConfigurationError::EmptyRuleChain(self.key.to_string()).into()),
                }
            }
        }
    }

    async fn dispatch(&self, options: FetchOptions) -> Result<Value, Interrupt> {
        let raw = self
            .dispatcher
            .fetch(options, self.circuit_breaker, self.stats)
            .await?;
        match &self.definition.after {
            Some(after) => after(self.context.clone(), raw)
                .await
                .map_err(|err| self.hook_error("after", err)),
            None => Ok(raw),
        }
    }

    fn hook_error(&self, hook: &'static str, err: HookError) -> Interrupt {
        match err {
            HookError::Unresolved(dependency) => Interrupt::Blocked(dependency),
            HookError::Undefined(dependency) => {
                Interrupt::Failed(ResolveError::UndefinedDependency {
                    field: self.key.to_string(),
                    dependency,
                })
            }
            HookError::Failed(source) => Interrupt::Failed(ResolveError::Hook {
                field: self.key.to_string(),
                hook,
                source,
            }),
        }
    }
}

/// Rewrites each options in turn and concatenates the results.
async fn splice<F, Fut>(
    options: Vec<FetchOptions>,
    rewrite: F,
) -> Result<Vec<FetchOptions>, Interrupt>
where
    F: Fn(FetchOptions) -> Fut,
    Fut: Future<Output = Result<FetchPlan, Interrupt>>,
{
    let mut spliced = Vec::with_capacity(options.len());
    for options in options {
        spliced.extend(rewrite(options).await?.into_options());
    }
    Ok(spliced)
}
