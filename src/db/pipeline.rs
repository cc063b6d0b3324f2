//! Aggregation pipelines
//!
//! A `Pipeline` is an ordered list of `Stage`s evaluated over the documents
//! of a collection. Stages follow the usual document-store semantics:
//!
//! - `GeoNear` must be the first stage; it drops documents without a point,
//!   writes the scaled distance and sorts nearest first
//! - `Unwind` emits one document per array element and drops empty arrays
//! - `Group` keeps groups in first-seen order
//! - `Sort` is stable

use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::geo;
use super::query::{compare_values, get_path, values_equal, Filter, Projection, SortSpec};

/// Errors raised while evaluating a pipeline
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("$geoNear is only valid as the first stage of a pipeline (found at stage {0})")]
    GeoNearNotFirst(usize),
}

/// Value expression evaluated against a single document
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(String),
    Literal(Value),
    ToUpper(Box<Expr>),
    /// Calendar month (1 to 12) of a timestamp
    Month(Box<Expr>),
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn to_upper(inner: Expr) -> Self {
        Expr::ToUpper(Box::new(inner))
    }

    pub fn month(inner: Expr) -> Self {
        Expr::Month(Box::new(inner))
    }

    pub fn eval(&self, doc: &Value) -> Value {
        match self {
            Expr::Field(path) => get_path(doc, path).cloned().unwrap_or(Value::Null),
            Expr::Literal(value) => value.clone(),
            Expr::ToUpper(inner) => match inner.eval(doc) {
                Value::String(s) => Value::String(s.to_uppercase()),
                Value::Null => Value::String(String::new()),
                other => Value::String(other.to_string().to_uppercase()),
            },
            Expr::Month(inner) => match inner.eval(doc) {
                Value::String(s) => chrono::DateTime::parse_from_rfc3339(&s)
                    .map(|d| {
                        use chrono::Datelike;
                        Value::from(d.with_timezone(&chrono::Utc).month())
                    })
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            },
        }
    }
}

/// Group accumulator
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Integer result while every input is an integer
    Sum(Expr),
    Avg(Expr),
    Min(Expr),
    Max(Expr),
    Push(Expr),
}

impl Accumulator {
    fn start(&self) -> AccState {
        match self {
            Accumulator::Sum(_) => AccState::Sum {
                int: 0,
                float: 0.0,
                all_int: true,
            },
            Accumulator::Avg(_) => AccState::Avg { total: 0.0, count: 0 },
            Accumulator::Min(_) => AccState::Min(None),
            Accumulator::Max(_) => AccState::Max(None),
            Accumulator::Push(_) => AccState::Push(Vec::new()),
        }
    }

    fn expr(&self) -> &Expr {
        match self {
            Accumulator::Sum(e)
            | Accumulator::Avg(e)
            | Accumulator::Min(e)
            | Accumulator::Max(e)
            | Accumulator::Push(e) => e,
        }
    }
}

enum AccState {
    Sum { int: i64, float: f64, all_int: bool },
    Avg { total: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Push(Vec<Value>),
}

impl AccState {
    fn add(&mut self, value: Value) {
        match self {
            AccState::Sum { int, float, all_int } => {
                if let Value::Number(n) = &value {
                    match (n.as_i64(), *all_int) {
                        (Some(i), true) => match int.checked_add(i) {
                            Some(sum) => *int = sum,
                            None => *all_int = false,
                        },
                        _ => *all_int = false,
                    }
                    *float += n.as_f64().unwrap_or(0.0);
                }
            }
            AccState::Avg { total, count } => {
                if let Some(n) = value.as_f64() {
                    *total += n;
                    *count += 1;
                }
            }
            AccState::Min(current) => keep_extreme(current, value, Ordering::Less),
            AccState::Max(current) => keep_extreme(current, value, Ordering::Greater),
            AccState::Push(items) => {
                if !value.is_null() {
                    items.push(value);
                }
            }
        }
    }

    fn finish(self) -> Value {
        match self {
            AccState::Sum { int, float, all_int } => {
                if all_int {
                    Value::from(int)
                } else {
                    Value::from(float)
                }
            }
            AccState::Avg { total, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::from(total / count as f64)
                }
            }
            AccState::Min(v) | AccState::Max(v) => v.unwrap_or(Value::Null),
            AccState::Push(items) => Value::Array(items),
        }
    }
}

fn keep_extreme(current: &mut Option<Value>, candidate: Value, wanted: Ordering) {
    if candidate.is_null() {
        return;
    }
    let replace = match current {
        None => true,
        Some(existing) => compare_values(&candidate, existing) == Some(wanted),
    };
    if replace {
        *current = Some(candidate);
    }
}

/// One pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Unwind(String),
    Group {
        key: Expr,
        fields: Vec<(String, Accumulator)>,
    },
    AddFields(Vec<(String, Expr)>),
    Project(Projection),
    Sort(SortSpec),
    Limit(usize),
    GeoNear {
        /// Path of the point field
        key: String,
        /// `[lng, lat]`
        near: [f64; 2],
        distance_field: String,
        /// Applied to distances in meters
        multiplier: f64,
    },
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Unwind(_) => "$unwind",
            Stage::Group { .. } => "$group",
            Stage::AddFields(_) => "$addFields",
            Stage::Project(_) => "$project",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::GeoNear { .. } => "$geoNear",
        }
    }

    fn run(&self, docs: Vec<Value>) -> Vec<Value> {
        match self {
            Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
            Stage::Unwind(path) => unwind(docs, path),
            Stage::Group { key, fields } => group(docs, key, fields),
            Stage::AddFields(fields) => docs
                .into_iter()
                .map(|mut doc| {
                    let values: Vec<(String, Value)> =
                        fields.iter().map(|(name, expr)| (name.clone(), expr.eval(&doc))).collect();
                    if let Value::Object(map) = &mut doc {
                        map.extend(values);
                    }
                    doc
                })
                .collect(),
            Stage::Project(projection) => docs.into_iter().map(|d| projection.apply(d)).collect(),
            Stage::Sort(spec) => {
                let mut docs = docs;
                spec.apply(&mut docs);
                docs
            }
            Stage::Limit(n) => docs.into_iter().take(*n).collect(),
            Stage::GeoNear {
                key,
                near,
                distance_field,
                multiplier,
            } => geo_near(docs, key, *near, distance_field, *multiplier),
        }
    }
}

fn unwind(docs: Vec<Value>, path: &str) -> Vec<Value> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match get_path(&doc, path) {
            Some(Value::Array(items)) => {
                for item in items.clone() {
                    let mut copy = doc.clone();
                    if let Value::Object(map) = &mut copy {
                        map.insert(path.to_string(), item);
                    }
                    out.push(copy);
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => out.push(doc),
        }
    }
    out
}

fn group(docs: Vec<Value>, key: &Expr, fields: &[(String, Accumulator)]) -> Vec<Value> {
    let mut groups: Vec<(Value, Vec<AccState>)> = Vec::new();

    for doc in &docs {
        let id = key.eval(doc);
        let index = match groups.iter().position(|(k, _)| values_equal(k, &id)) {
            Some(i) => i,
            None => {
                groups.push((id, fields.iter().map(|(_, acc)| acc.start()).collect()));
                groups.len() - 1
            }
        };

        for ((_, acc), state) in fields.iter().zip(groups[index].1.iter_mut()) {
            state.add(acc.expr().eval(doc));
        }
    }

    groups
        .into_iter()
        .map(|(id, states)| {
            let mut map = Map::new();
            map.insert("_id".to_string(), id);
            for ((name, _), state) in fields.iter().zip(states) {
                map.insert(name.clone(), state.finish());
            }
            Value::Object(map)
        })
        .collect()
}

fn geo_near(docs: Vec<Value>, key: &str, near: [f64; 2], distance_field: &str, multiplier: f64) -> Vec<Value> {
    let mut measured: Vec<(f64, Value)> = docs
        .into_iter()
        .filter_map(|doc| {
            let point = get_path(&doc, key).and_then(geo::point_coordinates)?;
            Some((geo::distance_meters(near, point) * multiplier, doc))
        })
        .collect();

    measured.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    measured
        .into_iter()
        .map(|(distance, mut doc)| {
            if let Value::Object(map) = &mut doc {
                map.insert(distance_field.to_string(), Value::from(distance));
            }
            doc
        })
        .collect()
}

/// Ordered aggregation stages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn matching(self, filter: Filter) -> Self {
        self.stage(Stage::Match(filter))
    }

    pub fn unwind(self, path: impl Into<String>) -> Self {
        self.stage(Stage::Unwind(path.into()))
    }

    pub fn group<S: Into<String>>(self, key: Expr, fields: impl IntoIterator<Item = (S, Accumulator)>) -> Self {
        let fields = fields.into_iter().map(|(n, a)| (n.into(), a)).collect();
        self.stage(Stage::Group { key, fields })
    }

    pub fn add_fields<S: Into<String>>(self, fields: impl IntoIterator<Item = (S, Expr)>) -> Self {
        let fields = fields.into_iter().map(|(n, e)| (n.into(), e)).collect();
        self.stage(Stage::AddFields(fields))
    }

    pub fn project(self, projection: Projection) -> Self {
        self.stage(Stage::Project(projection))
    }

    pub fn sort(self, spec: SortSpec) -> Self {
        self.stage(Stage::Sort(spec))
    }

    pub fn limit(self, n: usize) -> Self {
        self.stage(Stage::Limit(n))
    }

    pub fn geo_near(
        self,
        key: impl Into<String>,
        near: [f64; 2],
        distance_field: impl Into<String>,
        multiplier: f64,
    ) -> Self {
        self.stage(Stage::GeoNear {
            key: key.into(),
            near,
            distance_field: distance_field.into(),
            multiplier,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Insert a `$match` at the front, after a leading `$geoNear` if present
    pub fn insert_leading_match(&mut self, filter: Filter) {
        let index = match self.stages.first() {
            Some(Stage::GeoNear { .. }) => 1,
            _ => 0,
        };
        self.stages.insert(index, Stage::Match(filter));
    }

    /// Check stage placement rules
    pub fn validate(&self) -> Result<(), PipelineError> {
        match self
            .stages
            .iter()
            .enumerate()
            .find(|(i, s)| *i > 0 && matches!(s, Stage::GeoNear { .. }))
        {
            Some((i, _)) => Err(PipelineError::GeoNearNotFirst(i)),
            None => Ok(()),
        }
    }

    /// Evaluate every stage in order
    pub fn run(&self, docs: Vec<Value>) -> Result<Vec<Value>, PipelineError> {
        self.validate()?;
        Ok(self.stages.iter().fold(docs, |acc, stage| {
            tracing::trace!(stage = stage.name(), input = acc.len(), "running pipeline stage");
            stage.run(acc)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_with_sum_and_avg() {
        let docs = vec![
            json!({ "difficulty": "easy", "price": 100, "ratingsQuantity": 3 }),
            json!({ "difficulty": "easy", "price": 300, "ratingsQuantity": 4 }),
            json!({ "difficulty": "medium", "price": 200, "ratingsQuantity": 1 }),
        ];

        let out = Pipeline::new()
            .group(
                Expr::to_upper(Expr::field("difficulty")),
                [
                    ("numTours", Accumulator::Sum(Expr::literal(1))),
                    ("numRatings", Accumulator::Sum(Expr::field("ratingsQuantity"))),
                    ("avgPrice", Accumulator::Avg(Expr::field("price"))),
                    ("minPrice", Accumulator::Min(Expr::field("price"))),
                    ("maxPrice", Accumulator::Max(Expr::field("price"))),
                ],
            )
            .run(docs)
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["_id"], "EASY");
        assert_eq!(out[0]["numTours"], 2);
        assert_eq!(out[0]["numRatings"], 7);
        assert_eq!(out[0]["avgPrice"], 200.0);
        assert_eq!(out[0]["minPrice"], 100);
        assert_eq!(out[0]["maxPrice"], 300);
        assert_eq!(out[1]["_id"], "MEDIUM");
    }

    #[test]
    fn test_sum_of_floats_is_float() {
        let out = Pipeline::new()
            .group(Expr::literal(Value::Null), [("total", Accumulator::Sum(Expr::field("x")))])
            .run(vec![json!({ "x": 1 }), json!({ "x": 1.5 })])
            .unwrap();

        assert_eq!(out[0]["total"], 2.5);
    }

    #[test]
    fn test_unwind_and_month() {
        let docs = vec![
            json!({ "name": "A", "startDates": ["2023-03-01T09:00:00Z", "2023-07-01T09:00:00Z"] }),
            json!({ "name": "B", "startDates": [] }),
            json!({ "name": "C" }),
        ];

        let out = Pipeline::new()
            .unwind("startDates")
            .add_fields([("month", Expr::month(Expr::field("startDates")))])
            .run(docs)
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["month"], 3);
        assert_eq!(out[1]["month"], 7);
        assert_eq!(out[1]["name"], "A");
    }

    #[test]
    fn test_push_collects_in_order() {
        let out = Pipeline::new()
            .group(Expr::field("k"), [("names", Accumulator::Push(Expr::field("name")))])
            .run(vec![
                json!({ "k": 1, "name": "x" }),
                json!({ "k": 1, "name": "y" }),
            ])
            .unwrap();

        assert_eq!(out[0]["names"], json!(["x", "y"]));
    }

    #[test]
    fn test_geo_near_sorts_and_drops_missing_points() {
        let docs = vec![
            json!({ "name": "far", "startLocation": { "type": "Point", "coordinates": [-80.0, 25.0] } }),
            json!({ "name": "none" }),
            json!({ "name": "near", "startLocation": { "type": "Point", "coordinates": [-118.4, 34.0] } }),
        ];

        let out = Pipeline::new()
            .geo_near("startLocation", [-118.5, 34.1], "distance", 0.001)
            .run(docs)
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["name"], "near");
        assert!(out[0]["distance"].as_f64().unwrap() < out[1]["distance"].as_f64().unwrap());
    }

    #[test]
    fn test_geo_near_must_be_first() {
        let pipeline = Pipeline::new()
            .limit(1)
            .geo_near("startLocation", [0.0, 0.0], "distance", 1.0);

        assert_eq!(pipeline.run(vec![]), Err(PipelineError::GeoNearNotFirst(1)));
    }

    #[test]
    fn test_insert_leading_match() {
        let mut plain = Pipeline::new().limit(3);
        plain.insert_leading_match(Filter::new().ne("secretTour", true));
        assert!(matches!(plain.stages()[0], Stage::Match(_)));

        let mut geo = Pipeline::new().geo_near("startLocation", [0.0, 0.0], "distance", 1.0);
        geo.insert_leading_match(Filter::new().ne("secretTour", true));
        assert!(matches!(geo.stages()[0], Stage::GeoNear { .. }));
        assert!(matches!(geo.stages()[1], Stage::Match(_)));
        assert!(geo.validate().is_ok());
    }

    #[test]
    fn test_sort_and_limit() {
        let out = Pipeline::new()
            .sort(SortSpec::new().desc("n"))
            .limit(2)
            .project(Projection::exclude(["_id"]))
            .run(vec![
                json!({ "_id": 1, "n": 1 }),
                json!({ "_id": 2, "n": 3 }),
                json!({ "_id": 3, "n": 2 }),
            ])
            .unwrap();

        assert_eq!(out, vec![json!({ "n": 3 }), json!({ "n": 2 })]);
    }
}
