//! Built-in tour hooks

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{Next, QueryContext, QueryHook, QueryTarget, WriteHook, WriteOp};
use crate::db::{Collection, Condition, Filter, Populate};

/// Fields never exposed on populated guides
const HIDDEN_GUIDE_FIELDS: &[&str] = &["passwordChangedAt"];

/// Generate a URL-friendly slug from a name
///
/// Lowercases, maps every run of non-alphanumeric ASCII to a single hyphen and
/// trims hyphens from both ends. Non-ASCII letters are kept.
pub fn slugify(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || (!c.is_ascii() && c.is_alphanumeric()) {
            if pending_hyphen && !result.is_empty() {
                result.push('-');
            }
            pending_hyphen = false;
            result.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    result
}

/// Derives `slug` from `name` whenever a write carries a name
pub struct SlugHook;

impl WriteHook for SlugHook {
    fn name(&self) -> &'static str {
        "slug"
    }

    fn before_write(&self, _op: WriteOp, doc: &mut Map<String, Value>) -> Result<()> {
        if let Some(Value::String(name)) = doc.get("name") {
            let slug = slugify(name);
            doc.insert("slug".to_string(), Value::String(slug));
        }
        Ok(())
    }
}

/// Hides secret tours unless the caller opted out
///
/// On aggregations the `$match` goes right after a leading `$geoNear`.
pub struct SecretTourFilter;

#[async_trait]
impl QueryHook for SecretTourFilter {
    fn name(&self) -> &'static str {
        "secret_tour_filter"
    }

    async fn around_query(&self, mut ctx: QueryContext, next: Next<'_>) -> Result<Vec<Value>> {
        if !ctx.include_secret {
            match &mut ctx.target {
                QueryTarget::Find(query) => query.filter.push("secretTour", secret_condition()),
                QueryTarget::Aggregate(pipeline) => {
                    pipeline.insert_leading_match(Filter::new().with("secretTour", secret_condition()))
                }
            }
        }
        next.run(ctx).await
    }
}

fn secret_condition() -> Condition {
    Condition::Ne(Value::Bool(true))
}

/// Resolves `guides` to user documents, without private fields
pub struct PopulateGuides;

#[async_trait]
impl QueryHook for PopulateGuides {
    fn name(&self) -> &'static str {
        "populate_guides"
    }

    async fn around_query(&self, mut ctx: QueryContext, next: Next<'_>) -> Result<Vec<Value>> {
        if let QueryTarget::Find(query) = &mut ctx.target {
            query.add_populate(
                Populate::reference("guides", Collection::Users).excluding(HIDDEN_GUIDE_FIELDS.iter().copied()),
            );
        }
        next.run(ctx).await
    }
}

/// Logs how long each query took
pub struct QueryTimer {
    slow_threshold: Duration,
}

impl QueryTimer {
    pub fn new(slow_query_ms: u64) -> Self {
        Self {
            slow_threshold: Duration::from_millis(slow_query_ms),
        }
    }
}

#[async_trait]
impl QueryHook for QueryTimer {
    fn name(&self) -> &'static str {
        "query_timer"
    }

    async fn around_query(&self, ctx: QueryContext, next: Next<'_>) -> Result<Vec<Value>> {
        let op = ctx.op;
        let start = Instant::now();
        let result = next.run(ctx).await;
        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        if elapsed >= self.slow_threshold {
            warn!(op = %op, elapsed_ms, ok = result.is_ok(), "Query took {} millisecs", elapsed_ms);
        } else {
            info!(op = %op, elapsed_ms, ok = result.is_ok(), "Query took {} millisecs", elapsed_ms);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{FindQuery, Pipeline, PopulateSource, Stage};
    use crate::hooks::{HookRegistry, QueryFuture, QueryOp};
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("The Forest Hiker"), "the-forest-hiker");
        assert_eq!(slugify("  The Sea -- Explorer! "), "the-sea-explorer");
        assert_eq!(slugify("Café Tour"), "café-tour");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_slug_hook_only_when_name_present() {
        let mut doc = Map::new();
        doc.insert("price".into(), json!(10));
        SlugHook.before_write(WriteOp::Update, &mut doc).unwrap();
        assert!(doc.get("slug").is_none());

        doc.insert("name".into(), json!("The Park Camper"));
        SlugHook.before_write(WriteOp::Update, &mut doc).unwrap();
        assert_eq!(doc["slug"], "the-park-camper");
    }

    proptest! {
        #[test]
        fn prop_slug_hook_is_idempotent(name in "[A-Za-z0-9 _!-]{0,40}") {
            let mut doc = Map::new();
            doc.insert("name".into(), json!(name));

            SlugHook.before_write(WriteOp::Create, &mut doc).unwrap();
            let first = doc["slug"].clone();
            SlugHook.before_write(WriteOp::Create, &mut doc).unwrap();

            prop_assert_eq!(&doc["slug"], &first);
            prop_assert_eq!(slugify(first.as_str().unwrap()), first.as_str().unwrap());
        }
    }

    /// Runs a single hook and captures the context that reached the store
    async fn capture(hook: Arc<dyn QueryHook>, ctx: QueryContext) -> QueryContext {
        let seen: Arc<Mutex<Option<QueryContext>>> = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let terminal = move |ctx: QueryContext| -> QueryFuture {
            *sink.lock().unwrap() = Some(ctx);
            Box::pin(async { Ok(Vec::new()) })
        };

        let mut registry = HookRegistry::new();
        registry.on_query(hook, QueryOp::ALL);
        registry.run_query(ctx, &terminal).await.unwrap();

        let captured = seen.lock().unwrap().take();
        captured.expect("terminal should be reached")
    }

    #[tokio::test]
    async fn test_secret_filter_added_to_find() {
        let ctx = capture(
            Arc::new(SecretTourFilter),
            QueryContext::find(QueryOp::Find, FindQuery::default()),
        )
        .await;

        let QueryTarget::Find(query) = ctx.target else {
            panic!("expected a find");
        };
        assert!(query.filter.constrains("secretTour"));
        assert!(query.filter.matches(&json!({ "name": "visible" })));
        assert!(!query.filter.matches(&json!({ "secretTour": true })));
    }

    #[tokio::test]
    async fn test_secret_filter_respects_opt_out() {
        let ctx = capture(
            Arc::new(SecretTourFilter),
            QueryContext::find(QueryOp::Find, FindQuery::default()).including_secret(true),
        )
        .await;

        let QueryTarget::Find(query) = ctx.target else {
            panic!("expected a find");
        };
        assert!(query.filter.is_empty());
    }

    #[tokio::test]
    async fn test_secret_filter_after_geo_near() {
        let pipeline = Pipeline::new().geo_near("startLocation", [0.0, 0.0], "distance", 1.0);
        let ctx = capture(Arc::new(SecretTourFilter), QueryContext::aggregate(pipeline)).await;

        let QueryTarget::Aggregate(pipeline) = ctx.target else {
            panic!("expected an aggregate");
        };
        assert!(matches!(pipeline.stages()[0], Stage::GeoNear { .. }));
        assert!(matches!(pipeline.stages()[1], Stage::Match(_)));
    }

    #[tokio::test]
    async fn test_populate_guides_hides_private_fields() {
        let ctx = capture(
            Arc::new(PopulateGuides),
            QueryContext::find(QueryOp::FindOne, FindQuery::default()),
        )
        .await;

        let QueryTarget::Find(query) = ctx.target else {
            panic!("expected a find");
        };
        assert_eq!(query.populate.len(), 1);
        assert_eq!(query.populate[0].source, PopulateSource::Reference(Collection::Users));
        assert_eq!(query.populate[0].exclude, vec!["passwordChangedAt".to_string()]);
    }

    #[tokio::test]
    async fn test_query_timer_passes_results_and_errors() {
        let mut registry = HookRegistry::new();
        registry.on_query(Arc::new(QueryTimer::new(0)), QueryOp::ALL);

        let ok = |_ctx: QueryContext| -> QueryFuture { Box::pin(async { Ok(vec![json!(1)]) }) };
        let out = registry
            .run_query(QueryContext::aggregate(Pipeline::new()), &ok)
            .await
            .unwrap();
        assert_eq!(out, vec![json!(1)]);

        let failing = |_ctx: QueryContext| -> QueryFuture { Box::pin(async { Err(anyhow::anyhow!("boom")) }) };
        let err = registry
            .run_query(QueryContext::find(QueryOp::Find, FindQuery::default()), &failing)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    type Captured = Arc<Mutex<Vec<(tracing::Level, String)>>>;

    /// Layer recording the level and message of every event
    struct CaptureLayer(Captured);

    struct MessageVisitor(String);

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CaptureLayer {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.0.lock().unwrap().push((*event.metadata().level(), visitor.0));
        }
    }

    /// Run one query through a timer and return the timing events it logged
    fn timed_query_events(slow_query_ms: u64) -> Vec<(tracing::Level, String)> {
        use tracing_subscriber::layer::SubscriberExt;

        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(CaptureLayer(captured.clone()));

        let mut registry = HookRegistry::new();
        registry.on_query(Arc::new(QueryTimer::new(slow_query_ms)), QueryOp::ALL);
        let terminal = |_ctx: QueryContext| -> QueryFuture { Box::pin(async { Ok(Vec::new()) }) };

        tracing::subscriber::with_default(subscriber, || {
            tokio_test::block_on(registry.run_query(
                QueryContext::find(QueryOp::Find, FindQuery::default()),
                &terminal,
            ))
            .unwrap();
        });

        let events = captured.lock().unwrap().clone();
        events.into_iter().filter(|(_, msg)| msg.starts_with("Query took ")).collect()
    }

    #[test]
    fn test_query_timer_logs_elapsed_at_info() {
        let events = timed_query_events(u64::MAX);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, tracing::Level::INFO);
        assert!(events[0].1.ends_with(" millisecs"), "{}", events[0].1);
    }

    #[test]
    fn test_slow_query_logged_at_warn() {
        let events = timed_query_events(0);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, tracing::Level::WARN);
    }
}
