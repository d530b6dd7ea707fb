//! Declarative graphs of dependent backend calls.
//!
//! A [`GraphSpec`] maps field keys to [`FieldDefinition`]s. Keys starting with `#` are
//! private: other fields can read them (without the `#`), but they are left out of the
//! resolved output.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::FetchError;
use crate::error::HookError;
use crate::services::FetchOptions;
use crate::services::FetchPlan;

mod context;
mod pipeline;
mod resolver;

pub use self::context::Context;
pub use self::context::Lookup;
pub use self::resolver::GraphResolver;
pub use self::resolver::OnStat;
pub use self::resolver::ResolveOptions;

/// Prefix marking a field as private.
pub(crate) const PRIVATE_PREFIX: char = '#';

/// Future returned by every hook.
pub type HookFuture<T> = BoxFuture<'static, Result<T, HookError>>;

type Hook<T> = Arc<dyn Fn(Context) -> HookFuture<T> + Send + Sync>;
type TransformHook<I, T> = Arc<dyn Fn(Context, I) -> HookFuture<T> + Send + Sync>;

/// Ordered set of fields to resolve together.
#[derive(Clone, Default)]
pub struct GraphSpec {
    fields: IndexMap<String, FieldDefinition>,
}

impl GraphSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, `#`-prefixed keys are private.
    pub fn field(mut self, key: impl Into<String>, definition: FieldDefinition) -> Self {
        self.insert(key, definition);
        self
    }

    /// Adds or replaces a field, returning the previous definition for that exact key.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        definition: FieldDefinition,
    ) -> Option<FieldDefinition> {
        self.fields.insert(key.into(), definition)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.fields
            .iter()
            .map(|(key, definition)| (key.as_str(), definition))
    }
}

impl fmt::Debug for GraphSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.fields.iter()).finish()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldDefinition)> for GraphSpec {
    fn from_iter<T: IntoIterator<Item = (K, FieldDefinition)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(key, definition)| (key.into(), definition))
                .collect(),
        }
    }
}

/// The hooks of one field.
///
/// Every hook is asynchronous and receives a [`Context`] of the fields resolved so far.
/// Reading a field that is not resolved yet with [`Context::get`] and `?` abandons the
/// attempt; the field is tried again in the next round.
///
/// Lifecycle of one attempt:
/// 1. `when`: `false` resolves the field to null.
/// 2. `fake`: its value is the field value, no backend is called.
/// 3. `prefilter` builds the [`FetchPlan`], `before` rewrites each of its options.
/// 4. Each backend result goes through `after`.
/// 5. On success `convert` computes the value, reading the raw result under the field's own
///    key. On a fetch failure `fallback` supplies the value, without it the failure aborts
///    the whole resolution.
#[derive(Clone, Default)]
pub struct FieldDefinition {
    pub(crate) when: Option<Hook<bool>>,
    pub(crate) fake: Option<Hook<Value>>,
    pub(crate) prefilter: Option<Hook<FetchPlan>>,
    pub(crate) before: Option<TransformHook<FetchOptions, FetchPlan>>,
    pub(crate) after: Option<TransformHook<Value, Value>>,
    pub(crate) convert: Option<Hook<Value>>,
    pub(crate) fallback: Option<TransformHook<FetchError, Value>>,
}

impl FieldDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// A field always fetching `options`.
    pub fn fetch(options: FetchOptions) -> Self {
        Self::new().prefilter(move |_| {
            let options = options.clone();
            async move { Ok::<_, HookError>(options) }
        })
    }

    pub fn when<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, HookError>> + Send + 'static,
    {
        self.when = Some(Arc::new(move |context: Context| hook(context).boxed()));
        self
    }

    pub fn fake<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HookError>> + Send + 'static,
    {
        self.fake = Some(Arc::new(move |context: Context| hook(context).boxed()));
        self
    }

    /// Builds the backend calls of the field: a [`FetchOptions`], a `Vec` of them issued
    /// concurrently, or any [`FetchPlan`].
    pub fn prefilter<F, Fut, P>(mut self, hook: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, HookError>> + Send + 'static,
        P: Into<FetchPlan>,
    {
        self.prefilter = Some(Arc::new(move |context: Context| {
            hook(context)
                .map(|plan| plan.map(Into::<FetchPlan>::into))
                .boxed()
        }));
        self
    }

    /// Rewrites each options of the plan before it is dispatched.
    ///
    /// For a single call plan the returned plan replaces it, so returning a `Vec` turns one
    /// call into several concurrent ones. In `All` and `Chain` plans the returned options are
    /// spliced in place of the rewritten one.
    pub fn before<F, Fut, P>(mut self, hook: F) -> Self
    where
        F: Fn(Context, FetchOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, HookError>> + Send + 'static,
        P: Into<FetchPlan>,
    {
        self.before = Some(Arc::new(move |context: Context, options: FetchOptions| {
            hook(context, options)
                .map(|plan| plan.map(Into::<FetchPlan>::into))
                .boxed()
        }));
        self
    }

    /// Post-processes every successful backend result.
    pub fn after<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HookError>> + Send + 'static,
    {
        self.after = Some(Arc::new(move |context: Context, raw: Value| {
            hook(context, raw).boxed()
        }));
        self
    }

    pub fn convert<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HookError>> + Send + 'static,
    {
        self.convert = Some(Arc::new(move |context: Context| hook(context).boxed()));
        self
    }

    /// Supplies the field value when fetching failed.
    pub fn fallback<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Context, FetchError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HookError>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |context: Context, err: FetchError| {
            hook(context, err).boxed()
        }));
        self
    }
}

impl fmt::Debug for FieldDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDefinition")
            .field("when", &self.when.is_some())
            .field("fake", &self.fake.is_some())
            .field("prefilter", &self.prefilter.is_some())
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("convert", &self.convert.is_some())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
