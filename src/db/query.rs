//! Declarative find queries over JSON documents
//!
//! Documents are kept as JSON with camelCase keys. A `FindQuery` describes
//! what to select (`Filter`), in which order (`SortSpec`), which window
//! (`skip`/`limit`), which references to resolve (`Populate`) and which
//! fields to return (`Projection`). Repositories evaluate it; hooks rewrite it
//! before it reaches the store.
//!
//! Field paths are dotted (`startLocation.coordinates`). When a path hits an
//! array, equality and range conditions match if any element matches.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::geo;

/// Stored collections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Tours,
    Users,
    Reviews,
}

impl Collection {
    /// Backing table name
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Tours => "tours",
            Collection::Users => "users",
            Collection::Reviews => "reviews",
        }
    }

    /// Indexed column mirroring a reference field, if any
    pub fn foreign_key_column(&self, field: &str) -> Option<&'static str> {
        match (self, field) {
            (Collection::Reviews, "tour") => Some("tour_id"),
            (Collection::Reviews, "user") => Some("user_id"),
            _ => None,
        }
    }
}

/// A condition on a single field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    /// Also matches when the field is absent
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    /// Point lies inside the spherical cap around `center`; `radius` in radians
    GeoWithinSphere { center: [f64; 2], radius: f64 },
}

impl Condition {
    fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => field.map_or(expected.is_null(), |v| contains_eq(v, expected)),
            Condition::Ne(expected) => !field.map_or(expected.is_null(), |v| contains_eq(v, expected)),
            Condition::Gt(bound) => any_cmp(field, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => any_cmp(field, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => any_cmp(field, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => any_cmp(field, bound, |o| o != Ordering::Greater),
            Condition::In(options) => field.map_or(false, |v| options.iter().any(|o| contains_eq(v, o))),
            Condition::GeoWithinSphere { center, radius } => field
                .and_then(geo::point_coordinates)
                .map_or(false, |point| geo::angular_distance(*center, point) <= *radius),
        }
    }
}

/// One `path: condition` pair of a filter
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub path: String,
    pub condition: Condition,
}

/// Conjunction of field conditions; the empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an arbitrary clause
    pub fn with(mut self, path: impl Into<String>, condition: Condition) -> Self {
        self.push(path, condition);
        self
    }

    pub fn push(&mut self, path: impl Into<String>, condition: Condition) {
        self.clauses.push(Clause {
            path: path.into(),
            condition,
        });
    }

    pub fn eq(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Eq(value.into()))
    }

    pub fn ne(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Ne(value.into()))
    }

    pub fn gt(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Gt(value.into()))
    }

    pub fn gte(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Gte(value.into()))
    }

    pub fn lt(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Lt(value.into()))
    }

    pub fn lte(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Lte(value.into()))
    }

    pub fn is_in(self, path: impl Into<String>, values: Vec<Value>) -> Self {
        self.with(path, Condition::In(values))
    }

    pub fn geo_within_sphere(self, path: impl Into<String>, center: [f64; 2], radius: f64) -> Self {
        self.with(path, Condition::GeoWithinSphere { center, radius })
    }

    /// Filter on the document id
    pub fn by_id(id: impl Into<String>) -> Self {
        let id: String = id.into();
        Self::new().eq("id", id)
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The id an equality clause pins this filter to, if any
    pub fn pinned_id(&self) -> Option<&str> {
        self.clauses.iter().find_map(|c| match (&c.condition, c.path.as_str()) {
            (Condition::Eq(Value::String(id)), "id") => Some(id.as_str()),
            _ => None,
        })
    }

    /// Whether any clause constrains `path`
    pub fn constrains(&self, path: &str) -> bool {
        self.clauses.iter().any(|c| c.path == path)
    }

    /// Evaluate every clause against a document
    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses
            .iter()
            .all(|clause| clause.condition.matches(get_path(doc, &clause.path)))
    }
}

/// Field selection applied to result documents
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Projection {
    #[default]
    All,
    /// Keep only these top-level fields; identifiers are always kept
    Include(Vec<String>),
    /// Drop these top-level fields
    Exclude(Vec<String>),
}

impl Projection {
    pub fn include<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Projection::Include(fields.into_iter().map(Into::into).collect())
    }

    pub fn exclude<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Projection::Exclude(fields.into_iter().map(Into::into).collect())
    }

    /// Whether `field` survives this projection
    pub fn keeps(&self, field: &str) -> bool {
        match self {
            Projection::All => true,
            Projection::Include(fields) => {
                field == "id" || field == "_id" || fields.iter().any(|f| f == field)
            }
            Projection::Exclude(fields) => !fields.iter().any(|f| f == field),
        }
    }

    pub fn apply(&self, doc: Value) -> Value {
        match (self, doc) {
            (Projection::All, doc) => doc,
            (_, Value::Object(map)) => {
                let kept: Map<String, Value> = map.into_iter().filter(|(k, _)| self.keeps(k)).collect();
                Value::Object(kept)
            }
            (_, other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Ordered sort keys; ties keep their prior order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    keys: Vec<(String, SortOrder)>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `"-ratingsAverage,price"` style keys; `-` means descending
    pub fn parse(spec: &str) -> Self {
        let keys = spec
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty() && *k != "-")
            .map(|k| match k.strip_prefix('-') {
                Some(path) => (path.to_string(), SortOrder::Desc),
                None => (k.to_string(), SortOrder::Asc),
            })
            .collect();
        Self { keys }
    }

    pub fn asc(mut self, path: impl Into<String>) -> Self {
        self.keys.push((path.into(), SortOrder::Asc));
        self
    }

    pub fn desc(mut self, path: impl Into<String>) -> Self {
        self.keys.push((path.into(), SortOrder::Desc));
        self
    }

    pub fn keys(&self) -> &[(String, SortOrder)] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for (path, order) in &self.keys {
            let ordering = total_cmp(get_path(a, path), get_path(b, path));
            let ordering = match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    pub fn apply(&self, docs: &mut [Value]) {
        if !self.keys.is_empty() {
            docs.sort_by(|a, b| self.compare(a, b));
        }
    }
}

/// Where a populated field is resolved from
#[derive(Debug, Clone, PartialEq)]
pub enum PopulateSource {
    /// The field holds ids of documents in `collection`
    Reference(Collection),
    /// Documents in `collection` whose `foreign_field` equals this document's id
    Virtual {
        collection: Collection,
        foreign_field: String,
    },
}

/// Instruction to replace or attach related documents at read time
#[derive(Debug, Clone, PartialEq)]
pub struct Populate {
    pub path: String,
    pub source: PopulateSource,
    /// Fields dropped from the populated documents
    pub exclude: Vec<String>,
}

impl Populate {
    pub fn reference(path: impl Into<String>, collection: Collection) -> Self {
        Self {
            path: path.into(),
            source: PopulateSource::Reference(collection),
            exclude: Vec::new(),
        }
    }

    pub fn virtual_field(
        path: impl Into<String>,
        collection: Collection,
        foreign_field: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            source: PopulateSource::Virtual {
                collection,
                foreign_field: foreign_field.into(),
            },
            exclude: Vec::new(),
        }
    }

    pub fn excluding<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.exclude.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Projection applied to each populated document
    pub fn projection(&self) -> Projection {
        if self.exclude.is_empty() {
            Projection::All
        } else {
            Projection::Exclude(self.exclude.clone())
        }
    }
}

/// A complete find request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    pub projection: Projection,
    pub sort: SortSpec,
    pub skip: usize,
    pub limit: Option<usize>,
    pub populate: Vec<Populate>,
}

impl FindQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new(Filter::by_id(id)).limit(1)
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add a populate instruction unless one exists for the same path
    pub fn populate(mut self, populate: Populate) -> Self {
        self.add_populate(populate);
        self
    }

    pub fn add_populate(&mut self, populate: Populate) {
        if !self.populates(&populate.path) {
            self.populate.push(populate);
        }
    }

    pub fn populates(&self, path: &str) -> bool {
        self.populate.iter().any(|p| p.path == path)
    }

    /// Filter, sort and window a set of documents
    pub fn select(&self, docs: Vec<Value>) -> Vec<Value> {
        let mut matched: Vec<Value> = docs.into_iter().filter(|d| self.filter.matches(d)).collect();
        self.sort.apply(&mut matched);

        let window = matched.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => window.take(limit).collect(),
            None => window.collect(),
        }
    }
}

/// Resolve a dotted path inside a document
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Equality with numeric normalisation (`5 == 5.0`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn contains_eq(field: &Value, expected: &Value) -> bool {
    match field {
        Value::Array(items) if !expected.is_array() => items.iter().any(|v| values_equal(v, expected)),
        _ => values_equal(field, expected),
    }
}

fn any_cmp(field: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match field {
        Some(Value::Array(items)) => items
            .iter()
            .any(|v| compare_values(v, bound).map_or(false, &accept)),
        Some(v) => compare_values(v, bound).map_or(false, accept),
        None => false,
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

/// Compare two scalar values of the same kind
///
/// Strings that both parse as RFC 3339 timestamps compare chronologically.
/// Values of different kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_datetime(x), parse_datetime(y)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used for sorting; missing values sort first
pub fn total_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b))),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tours() -> Vec<Value> {
        vec![
            json!({ "id": "1", "name": "Forest Hiker", "price": 397, "difficulty": "easy", "secretTour": false }),
            json!({ "id": "2", "name": "Sea Explorer", "price": 497, "difficulty": "medium" }),
            json!({ "id": "3", "name": "Snow Adventurer", "price": 997, "difficulty": "difficult", "secretTour": true }),
        ]
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(tours().iter().all(|t| Filter::new().matches(t)));
    }

    #[test]
    fn test_ne_matches_missing_field() {
        let filter = Filter::new().ne("secretTour", true);
        let ids: Vec<_> = tours()
            .into_iter()
            .filter(|t| filter.matches(t))
            .map(|t| t["id"].clone())
            .collect();

        assert_eq!(ids, vec![json!("1"), json!("2")]);
    }

    #[test]
    fn test_range_conditions() {
        let filter = Filter::new().gte("price", 400).lt("price", 1000);
        let matched = FindQuery::new(filter).select(tours());

        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0]["id"], "2");
    }

    #[test]
    fn test_range_fails_on_missing_field() {
        assert!(!Filter::new().gt("ratingsAverage", 1).matches(&json!({ "price": 5 })));
    }

    #[test]
    fn test_eq_normalises_numbers() {
        assert!(Filter::new().eq("price", 397.0).matches(&tours()[0]));
    }

    #[test]
    fn test_eq_on_array_means_contains() {
        let doc = json!({ "guides": ["a", "b"] });
        assert!(Filter::new().eq("guides", "b").matches(&doc));
        assert!(!Filter::new().eq("guides", "c").matches(&doc));
    }

    #[test]
    fn test_in_condition() {
        let filter = Filter::new().is_in("difficulty", vec![json!("easy"), json!("difficult")]);
        assert_eq!(FindQuery::new(filter).select(tours()).len(), 2);
    }

    #[test]
    fn test_date_strings_compare_chronologically() {
        let doc = json!({ "startDates": "2023-03-01T09:00:00Z" });
        assert!(Filter::new().gte("startDates", "2023-01-01T00:00:00+00:00").matches(&doc));
        assert!(!Filter::new().gte("startDates", "2023-03-02T00:00:00Z").matches(&doc));
    }

    #[test]
    fn test_geo_within_sphere() {
        let doc = json!({ "startLocation": { "type": "Point", "coordinates": [-118.2, 34.0] } });
        let center = [-118.5, 34.1];

        assert!(Filter::new().geo_within_sphere("startLocation", center, 200.0 / 3963.2).matches(&doc));
        assert!(!Filter::new().geo_within_sphere("startLocation", center, 1.0 / 3963.2).matches(&doc));
        assert!(!Filter::new().geo_within_sphere("startLocation", center, 1.0).matches(&json!({})));
    }

    #[test]
    fn test_dotted_path() {
        let doc = json!({ "startLocation": { "coordinates": [1.0, 2.0] } });
        assert_eq!(get_path(&doc, "startLocation.coordinates.1"), Some(&json!(2.0)));
        assert_eq!(get_path(&doc, "startLocation.address"), None);
    }

    #[test]
    fn test_sort_parse_and_apply() {
        let spec = SortSpec::parse("-price, name");
        assert_eq!(
            spec.keys(),
            &[("price".to_string(), SortOrder::Desc), ("name".to_string(), SortOrder::Asc)]
        );

        let sorted = FindQuery::new(Filter::new()).sort(spec).select(tours());
        assert_eq!(sorted[0]["id"], "3");
        assert_eq!(sorted[2]["id"], "1");
    }

    #[test]
    fn test_sort_is_stable_and_missing_first() {
        let mut docs = vec![
            json!({ "id": "a", "rank": 2 }),
            json!({ "id": "b" }),
            json!({ "id": "c", "rank": 2 }),
        ];
        SortSpec::new().asc("rank").apply(&mut docs);

        let ids: Vec<_> = docs.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_skip_and_limit() {
        let query = FindQuery::new(Filter::new()).sort(SortSpec::new().asc("price")).skip(1).limit(1);
        let page = query.select(tours());

        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["id"], "2");
    }

    #[test]
    fn test_projection_include_keeps_id() {
        let doc = Projection::include(["name"]).apply(tours()[0].clone());
        assert_eq!(doc, json!({ "id": "1", "name": "Forest Hiker" }));
    }

    #[test]
    fn test_projection_exclude() {
        let doc = Projection::exclude(["price", "secretTour"]).apply(tours()[0].clone());
        assert!(doc.get("price").is_none());
        assert_eq!(doc["difficulty"], "easy");
    }

    #[test]
    fn test_populate_is_not_duplicated() {
        let query = FindQuery::new(Filter::new())
            .populate(Populate::reference("guides", Collection::Users))
            .populate(Populate::reference("guides", Collection::Users).excluding(["email"]));

        assert_eq!(query.populate.len(), 1);
        assert!(query.populate[0].exclude.is_empty());
    }

    #[test]
    fn test_pinned_id() {
        let filter = Filter::by_id("t1").ne("secretTour", true);
        assert_eq!(filter.pinned_id(), Some("t1"));

        assert_eq!(Filter::new().ne("id", "t1").pinned_id(), None);
        assert_eq!(Filter::new().eq("id", 7).pinned_id(), None);
    }

    #[test]
    fn test_foreign_key_columns() {
        assert_eq!(Collection::Reviews.foreign_key_column("tour"), Some("tour_id"));
        assert_eq!(Collection::Tours.foreign_key_column("guides"), None);
    }
}
