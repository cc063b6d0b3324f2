//! Tour service
//!
//! Implements the tour operations on top of the repository and hook chain:
//! - CRUD with validation and slug derivation
//! - List features and the top-tours alias
//! - Statistics and monthly-plan aggregations
//! - Radius and distance geo queries
//!
//! Every read goes through `HookRegistry::run_query`, so secret-tour
//! filtering, guide population and timing apply without callers asking.

use anyhow::Context;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::api_features::{default_projection, ListParams};
use super::validation::{validate_new_tour, validate_tour_patch, ValidationErrors};
use crate::config::TourConfig;
use crate::db::repositories::TourRepository;
use crate::db::{
    Accumulator, Collection, DuplicateKeyError, Expr, Filter, FindQuery, Pipeline, Populate,
    Projection, SortSpec,
};
use crate::hooks::{HookRegistry, QueryContext, QueryFuture, QueryOp, QueryTarget, WriteOp};
use crate::models::{
    apply_virtuals, update_to_patch, CreateTourInput, DistanceUnit, GeoParamError, LatLng,
    MonthlyPlan, Tour, TourDistance, TourStats, UpdateTourInput,
};

/// Tours rated at least this well enter the statistics report
pub const STATS_MIN_RATING: f64 = 4.5;

const NOT_FOUND_MESSAGE: &str = "No tour found with that ID";

/// Machine-readable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Constraint,
    NotFound,
    Store,
}

/// Error types for tour service operations
#[derive(Debug, thiserror::Error)]
pub enum TourServiceError {
    /// Malformed input or failed field constraints
    #[error("{0}")]
    Validation(ValidationErrors),

    /// Uniqueness or cross-field rule violated at write time
    #[error("{0}")]
    Constraint(String),

    /// No visible tour matched
    #[error("{0}")]
    NotFound(String),

    /// The store failed
    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl TourServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TourServiceError::Validation(_) => ErrorKind::Validation,
            TourServiceError::Constraint(_) => ErrorKind::Constraint,
            TourServiceError::NotFound(_) => ErrorKind::NotFound,
            TourServiceError::Store(_) => ErrorKind::Store,
        }
    }

    /// HTTP-style status class
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Constraint => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Store => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    fn not_found() -> Self {
        TourServiceError::NotFound(NOT_FOUND_MESSAGE.to_string())
    }
}

impl From<ValidationErrors> for TourServiceError {
    fn from(errors: ValidationErrors) -> Self {
        if errors.only_cross_field() {
            let message = errors
                .errors()
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            TourServiceError::Constraint(message)
        } else {
            TourServiceError::Validation(errors)
        }
    }
}

impl From<anyhow::Error> for TourServiceError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<DuplicateKeyError>() {
            Some(dup) => TourServiceError::Constraint(format!(
                "Duplicate field value: {}. Please use another value!",
                dup.value
            )),
            None => TourServiceError::Store(err),
        }
    }
}

impl From<GeoParamError> for TourServiceError {
    fn from(err: GeoParamError) -> Self {
        let field = match err {
            GeoParamError::MalformedLatLng => "latlng",
            GeoParamError::UnknownUnit(_) => "unit",
        };
        TourServiceError::Validation(ValidationErrors::single(field, err.to_string()))
    }
}

/// Tour service
pub struct TourService {
    repo: Arc<dyn TourRepository>,
    hooks: Arc<HookRegistry>,
    config: TourConfig,
}

impl TourService {
    /// Create a new tour service
    ///
    /// # Arguments
    /// * `repo` - Tour repository for document access
    /// * `hooks` - Lifecycle hooks applied to every write and query
    /// * `config` - Paging and validation settings
    pub fn new(repo: Arc<dyn TourRepository>, hooks: Arc<HookRegistry>, config: TourConfig) -> Self {
        Self { repo, hooks, config }
    }

    /// Run a query through the hook chain
    async fn run_query(
        &self,
        ctx: QueryContext,
        patch: Option<Map<String, Value>>,
    ) -> Result<Vec<Value>, TourServiceError> {
        let repo = self.repo.clone();
        let patch = Arc::new(patch);
        let terminal = move |ctx: QueryContext| -> QueryFuture {
            let repo = repo.clone();
            let patch = patch.clone();
            Box::pin(async move { execute(repo.as_ref(), ctx, (*patch).as_ref()).await })
        };

        Ok(self.hooks.run_query(ctx, &terminal).await?)
    }

    async fn find_one(&self, query: FindQuery) -> Result<Option<Value>, TourServiceError> {
        let ctx = QueryContext::find(QueryOp::FindOne, query);
        Ok(self.run_query(ctx, None).await?.into_iter().next())
    }

    /// Validate and insert a new tour
    ///
    /// # Errors
    /// - `Validation` listing every violated field rule
    /// - `Constraint` for a duplicate name or a discount not below the price
    pub async fn create(&self, input: &CreateTourInput) -> Result<Tour, TourServiceError> {
        let tour = validate_new_tour(input, uuid::Uuid::new_v4().to_string(), Utc::now())?;

        let mut doc = tour.to_document().context("Failed to serialize tour")?;
        if let Value::Object(map) = &mut doc {
            self.hooks.run_before_write(WriteOp::Create, map)?;
        }

        let created = self.repo.insert(&doc).await?;
        let tour = Tour::from_document(created).context("Failed to read created tour")?;

        info!(id = %tour.id, slug = %tour.slug, "Tour created");
        Ok(tour)
    }

    /// List tours with filtering, sorting, field limiting and paging
    pub async fn get_all(&self, params: &ListParams) -> Result<Vec<Value>, TourServiceError> {
        let query = params.to_find_query(self.config.default_page_size as usize)?;
        let ctx = QueryContext::find(QueryOp::Find, query).including_secret(params.include_secret);

        let mut docs = self.run_query(ctx, None).await?;
        docs.iter_mut().for_each(apply_virtuals);
        Ok(docs)
    }

    /// The five best rated tours, cheapest first on ties
    pub async fn top_tours(&self) -> Result<Vec<Value>, TourServiceError> {
        self.get_all(&ListParams::top_tours()).await
    }

    /// Fetch one tour with its guides and reviews
    pub async fn get_one(&self, id: &str) -> Result<Value, TourServiceError> {
        let query = FindQuery::by_id(id)
            .project(default_projection())
            .populate(Populate::virtual_field("reviews", Collection::Reviews, "tour"));

        let mut doc = self.find_one(query).await?.ok_or_else(TourServiceError::not_found)?;
        apply_virtuals(&mut doc);
        Ok(doc)
    }

    /// Apply a partial update and return the updated tour
    ///
    /// Only the rules of supplied fields are re-run. The discount rule is
    /// checked only when `enforce_discount_on_update` is set.
    pub async fn update(&self, id: &str, input: &UpdateTourInput) -> Result<Value, TourServiceError> {
        let current = if self.config.enforce_discount_on_update {
            let query = FindQuery::by_id(id).project(Projection::include(["price", "priceDiscount"]));
            Some(self.find_one(query).await?.ok_or_else(TourServiceError::not_found)?)
        } else {
            None
        };

        let patch = validate_tour_patch(input, current.as_ref())?;
        let mut patch = update_to_patch(&patch).context("Failed to serialize tour update")?;
        self.hooks.run_before_write(WriteOp::Update, &mut patch)?;

        let query = FindQuery::by_id(id).project(default_projection());
        let ctx = QueryContext::find(QueryOp::FindOneAndUpdate, query);
        let mut doc = self
            .run_query(ctx, Some(patch))
            .await?
            .into_iter()
            .next()
            .ok_or_else(TourServiceError::not_found)?;

        apply_virtuals(&mut doc);
        info!(id, "Tour updated");
        Ok(doc)
    }

    /// Delete a tour; its reviews go with it
    pub async fn delete(&self, id: &str) -> Result<(), TourServiceError> {
        let ctx = QueryContext::find(QueryOp::FindOneAndDelete, FindQuery::by_id(id));
        let deleted = self.run_query(ctx, None).await?;
        if deleted.is_empty() {
            return Err(TourServiceError::not_found());
        }

        info!(id, "Tour deleted");
        Ok(())
    }

    /// Per-difficulty statistics over well rated tours, cheapest tier first
    pub async fn get_stats(&self) -> Result<Vec<TourStats>, TourServiceError> {
        let pipeline = stats_pipeline();
        debug!(stages = pipeline.stages().len(), "Built statistics pipeline");

        let docs = self.run_query(QueryContext::aggregate(pipeline), None).await?;
        decode_all(docs)
    }

    /// Tour starts per month of `year`, busiest month first
    ///
    /// # Errors
    /// - `Validation` if `year` is not a whole number between 1 and 9999
    pub async fn get_monthly_plan(&self, year: &str) -> Result<Vec<MonthlyPlan>, TourServiceError> {
        let year = parse_year(year)?;
        let pipeline = monthly_plan_pipeline(year);
        debug!(year, stages = pipeline.stages().len(), "Built monthly plan pipeline");

        let docs = self.run_query(QueryContext::aggregate(pipeline), None).await?;
        decode_all(docs)
    }

    /// Tours starting within `distance` of `latlng`
    ///
    /// # Errors
    /// - `Validation` for a malformed `"lat,lng"`, an unknown unit or a
    ///   negative distance
    pub async fn get_tours_within(
        &self,
        distance: f64,
        latlng: &str,
        unit: &str,
    ) -> Result<Vec<Value>, TourServiceError> {
        let center: LatLng = latlng.parse()?;
        let unit: DistanceUnit = unit.parse()?;
        if !distance.is_finite() || distance < 0.0 {
            return Err(TourServiceError::Validation(ValidationErrors::single(
                "distance",
                format!("Distance must be a non-negative number, got {}", distance),
            )));
        }

        let radius = unit.to_radians(distance);
        debug!(radius, unit = %unit, "Searching tours within radius");

        let filter = Filter::new().geo_within_sphere("startLocation", center.coordinates(), radius);
        let query = FindQuery::new(filter).project(default_projection());
        let mut docs = self.run_query(QueryContext::find(QueryOp::Find, query), None).await?;
        docs.iter_mut().for_each(apply_virtuals);
        Ok(docs)
    }

    /// Distance from `latlng` to every tour's start, nearest first
    pub async fn get_distances(&self, latlng: &str, unit: &str) -> Result<Vec<TourDistance>, TourServiceError> {
        let center: LatLng = latlng.parse()?;
        let unit: DistanceUnit = unit.parse()?;

        let pipeline = Pipeline::new()
            .geo_near("startLocation", center.coordinates(), "distance", unit.meters_multiplier())
            .project(Projection::include(["distance", "name"]));

        let docs = self.run_query(QueryContext::aggregate(pipeline), None).await?;
        decode_all(docs)
    }
}

async fn execute(
    repo: &dyn TourRepository,
    ctx: QueryContext,
    patch: Option<&Map<String, Value>>,
) -> anyhow::Result<Vec<Value>> {
    match (ctx.op, ctx.target) {
        (QueryOp::Aggregate, QueryTarget::Aggregate(pipeline)) => repo.aggregate(&pipeline).await,
        (QueryOp::Find, QueryTarget::Find(query)) => repo.find(&query).await,
        (QueryOp::FindOne, QueryTarget::Find(query)) => repo.find(&query.limit(1)).await,
        (QueryOp::FindOneAndUpdate, QueryTarget::Find(query)) => {
            let patch = patch.context("Update query carries no patch")?;
            Ok(repo.update_one(&query, patch).await?.into_iter().collect())
        }
        (QueryOp::FindOneAndDelete, QueryTarget::Find(query)) => {
            Ok(repo.delete_one(&query).await?.into_iter().collect())
        }
        (op, _) => anyhow::bail!("Query target does not match operation '{}'", op),
    }
}

fn decode_all<T: DeserializeOwned>(docs: Vec<Value>) -> Result<Vec<T>, TourServiceError> {
    let decoded = docs
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .context("Unexpected aggregation result shape")?;
    Ok(decoded)
}

fn parse_year(raw: &str) -> Result<i32, ValidationErrors> {
    match raw.trim().parse::<i32>() {
        Ok(year) if (1..=9999).contains(&year) => Ok(year),
        _ => Err(ValidationErrors::single(
            "year",
            format!("Year must be a whole number between 1 and 9999, got '{}'", raw),
        )),
    }
}

/// `ratingsAverage >= 4.5`, grouped by uppercased difficulty, by average price
pub fn stats_pipeline() -> Pipeline {
    Pipeline::new()
        .matching(Filter::new().gte("ratingsAverage", STATS_MIN_RATING))
        .group(
            Expr::to_upper(Expr::field("difficulty")),
            [
                ("numTours", Accumulator::Sum(Expr::literal(1))),
                ("numRatings", Accumulator::Sum(Expr::field("ratingsQuantity"))),
                ("avgRating", Accumulator::Avg(Expr::field("ratingsAverage"))),
                ("avgPrice", Accumulator::Avg(Expr::field("price"))),
                ("minPrice", Accumulator::Min(Expr::field("price"))),
                ("maxPrice", Accumulator::Max(Expr::field("price"))),
            ],
        )
        .sort(SortSpec::new().asc("avgPrice"))
}

/// Start dates within `year`, grouped by month, busiest first, ties by month
pub fn monthly_plan_pipeline(year: i32) -> Pipeline {
    let start = format!("{:04}-01-01T00:00:00Z", year);
    let end = format!("{:04}-12-31T23:59:59.999Z", year);

    Pipeline::new()
        .unwind("startDates")
        .matching(Filter::new().gte("startDates", start).lte("startDates", end))
        .group(
            Expr::month(Expr::field("startDates")),
            [
                ("numTourStarts", Accumulator::Sum(Expr::literal(1))),
                ("tours", Accumulator::Push(Expr::field("name"))),
            ],
        )
        .add_fields([("month", Expr::field("_id"))])
        .project(Projection::exclude(["_id"]))
        .sort(SortSpec::new().desc("numTourStarts").asc("month"))
        .limit(12)
}
