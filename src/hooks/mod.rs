//! Document lifecycle hooks
//!
//! Two interception points exist:
//! - `WriteHook::before_write` runs on a document (or patch) before it is
//!   persisted by a create or update
//! - `QueryHook::around_query` wraps a read-style query; it may rewrite the
//!   query, then calls `Next::run` to continue the chain
//!
//! Hooks are registered once at startup for an explicit set of operations and
//! run in registration order. The registry is read-only afterwards.

mod builtins;

pub use builtins::{slugify, PopulateGuides, QueryTimer, SecretTourFilter, SlugHook};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::TourConfig;
use crate::db::{FindQuery, Pipeline};

/// Write operations a `WriteHook` can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
}

/// Query operations a `QueryHook` can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Find,
    FindOne,
    FindOneAndUpdate,
    FindOneAndDelete,
    Aggregate,
}

impl QueryOp {
    /// The find-style operations
    pub const FIND: &'static [QueryOp] = &[
        QueryOp::Find,
        QueryOp::FindOne,
        QueryOp::FindOneAndUpdate,
        QueryOp::FindOneAndDelete,
    ];

    /// Every query operation
    pub const ALL: &'static [QueryOp] = &[
        QueryOp::Find,
        QueryOp::FindOne,
        QueryOp::FindOneAndUpdate,
        QueryOp::FindOneAndDelete,
        QueryOp::Aggregate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOp::Find => "find",
            QueryOp::FindOne => "findOne",
            QueryOp::FindOneAndUpdate => "findOneAndUpdate",
            QueryOp::FindOneAndDelete => "findOneAndDelete",
            QueryOp::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for QueryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a query will execute
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTarget {
    Find(FindQuery),
    Aggregate(Pipeline),
}

/// A query on its way to the store
#[derive(Debug, Clone, PartialEq)]
pub struct QueryContext {
    pub op: QueryOp,
    pub target: QueryTarget,
    /// Caller opted out of the secret-tour filter
    pub include_secret: bool,
}

impl QueryContext {
    pub fn find(op: QueryOp, query: FindQuery) -> Self {
        Self {
            op,
            target: QueryTarget::Find(query),
            include_secret: false,
        }
    }

    pub fn aggregate(pipeline: Pipeline) -> Self {
        Self {
            op: QueryOp::Aggregate,
            target: QueryTarget::Aggregate(pipeline),
            include_secret: false,
        }
    }

    pub fn including_secret(mut self, include: bool) -> Self {
        self.include_secret = include;
        self
    }
}

/// Future returned by the end of a query chain
pub type QueryFuture = BoxFuture<'static, Result<Vec<Value>>>;

/// Executes the (possibly rewritten) query against the store
pub type Terminal = dyn Fn(QueryContext) -> QueryFuture + Send + Sync;

/// Hook run before a document is written
pub trait WriteHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mutate the document or patch in place; an error aborts the write
    fn before_write(&self, op: WriteOp, doc: &mut Map<String, Value>) -> Result<()>;
}

/// Hook wrapped around a query
#[async_trait]
pub trait QueryHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Wrap the rest of the chain. Implementations must call `next.run`
    /// and must return its error unchanged.
    async fn around_query(&self, ctx: QueryContext, next: Next<'_>) -> Result<Vec<Value>> {
        next.run(ctx).await
    }
}

/// The remainder of a query hook chain
pub struct Next<'a> {
    hooks: &'a [Arc<dyn QueryHook>],
    terminal: &'a Terminal,
}

impl<'a> Next<'a> {
    /// Run the next hook, or the query itself at the end of the chain
    pub async fn run(self, ctx: QueryContext) -> Result<Vec<Value>> {
        match self.hooks.split_first() {
            Some((hook, rest)) => {
                let next = Next {
                    hooks: rest,
                    terminal: self.terminal,
                };
                hook.around_query(ctx, next).await
            }
            None => (self.terminal)(ctx).await,
        }
    }
}

struct Registered<H: ?Sized, O> {
    hook: Arc<H>,
    ops: Vec<O>,
}

/// Process-wide hook registry
#[derive(Default)]
pub struct HookRegistry {
    write_hooks: Vec<Registered<dyn WriteHook, WriteOp>>,
    query_hooks: Vec<Registered<dyn QueryHook, QueryOp>>,
}

impl HookRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the standard tour hooks:
    /// slug derivation on writes, secret-tour filtering and guide population
    /// on find-style queries, timing on every query.
    pub fn with_defaults(config: &TourConfig) -> Self {
        let mut registry = Self::new();
        registry.on_write(Arc::new(SlugHook), &[WriteOp::Create, WriteOp::Update]);
        registry.on_query(Arc::new(SecretTourFilter), QueryOp::FIND);
        registry.on_query(Arc::new(PopulateGuides), QueryOp::FIND);
        registry.on_query(Arc::new(QueryTimer::new(config.slow_query_ms)), QueryOp::ALL);
        registry
    }

    pub fn on_write(&mut self, hook: Arc<dyn WriteHook>, ops: &[WriteOp]) {
        debug!("Registered write hook '{}' for {:?}", hook.name(), ops);
        self.write_hooks.push(Registered {
            hook,
            ops: ops.to_vec(),
        });
    }

    pub fn on_query(&mut self, hook: Arc<dyn QueryHook>, ops: &[QueryOp]) {
        debug!("Registered query hook '{}' for {:?}", hook.name(), ops);
        self.query_hooks.push(Registered {
            hook,
            ops: ops.to_vec(),
        });
    }

    /// Run the write hooks registered for `op`, stopping at the first error
    pub fn run_before_write(&self, op: WriteOp, doc: &mut Map<String, Value>) -> Result<()> {
        for registered in self.write_hooks.iter().filter(|r| r.ops.contains(&op)) {
            registered.hook.before_write(op, doc)?;
        }
        Ok(())
    }

    /// Run a query through the hooks registered for its operation
    pub async fn run_query(&self, ctx: QueryContext, terminal: &Terminal) -> Result<Vec<Value>> {
        let hooks = self.query_hooks_for(ctx.op);
        Next {
            hooks: &hooks,
            terminal,
        }
        .run(ctx)
        .await
    }

    fn query_hooks_for(&self, op: QueryOp) -> Vec<Arc<dyn QueryHook>> {
        self.query_hooks
            .iter()
            .filter(|r| r.ops.contains(&op))
            .map(|r| r.hook.clone())
            .collect()
    }

    /// Names of the query hooks applied to `op`, in execution order
    pub fn query_hook_names(&self, op: QueryOp) -> Vec<&'static str> {
        self.query_hooks_for(op).iter().map(|h| h.name()).collect()
    }

    /// Names of the write hooks applied to `op`, in execution order
    pub fn write_hook_names(&self, op: WriteOp) -> Vec<&'static str> {
        self.write_hooks
            .iter()
            .filter(|r| r.ops.contains(&op))
            .map(|r| r.hook.name())
            .collect()
    }
}
