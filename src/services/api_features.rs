//! List query features
//!
//! Turns query-string style parameters into a `FindQuery`:
//! - `field=value` and `field[gte|gt|lte|lt]=value` filters
//! - `sort=-ratingsAverage,price`
//! - `fields=name,price` or `fields=-summary`
//! - `page` and `limit`

use serde_json::Value;

use super::validation::ValidationErrors;
use crate::db::{Condition, Filter, FindQuery, Projection, SortSpec};

/// Fields never returned unless a caller lists them explicitly
pub const HIDDEN_FIELDS: &[&str] = &["createdAt"];

/// Sort applied when none is requested
pub const DEFAULT_SORT: &str = "-createdAt";

const RESERVED_KEYS: &[&str] = &["page", "sort", "limit", "fields"];

/// Projection used when a caller asks for no particular fields
pub fn default_projection() -> Projection {
    Projection::exclude(HIDDEN_FIELDS.iter().copied())
}

/// Parameters of a list request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParams {
    /// Raw `key=value` filters, keys possibly carrying `[op]`
    pub filters: Vec<(String, String)>,
    pub sort: Option<String>,
    pub fields: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
    /// Return secret tours too
    pub include_secret: bool,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split query pairs into reserved parameters and filters
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Result<Self, ValidationErrors>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (key, value) in pairs {
            let (key, value) = (key.into(), value.into());
            match key.as_str() {
                "page" => params.page = Some(parse_positive("page", &value)?),
                "limit" => params.limit = Some(parse_positive("limit", &value)?),
                "sort" => params.sort = Some(value),
                "fields" => params.fields = Some(value),
                _ => params.filters.push((key, value)),
            }
        }
        Ok(params)
    }

    /// Best five tours, cheapest first on equal rating
    pub fn top_tours() -> Self {
        Self {
            sort: Some("-ratingsAverage,price".to_string()),
            fields: Some("name,price,ratingsAverage,summary,difficulty".to_string()),
            limit: Some(5),
            ..Self::default()
        }
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    pub fn page(mut self, page: usize, limit: usize) -> Self {
        self.page = Some(page);
        self.limit = Some(limit);
        self
    }

    pub fn including_secret(mut self) -> Self {
        self.include_secret = true;
        self
    }

    /// Build the find query, falling back to `default_limit` per page
    pub fn to_find_query(&self, default_limit: usize) -> Result<FindQuery, ValidationErrors> {
        let filter = self.build_filter()?;
        let sort = SortSpec::parse(self.sort.as_deref().unwrap_or(DEFAULT_SORT));
        let projection = self.build_projection()?;

        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(default_limit).max(1);

        Ok(FindQuery::new(filter)
            .sort(sort)
            .project(projection)
            .skip((page - 1).saturating_mul(limit))
            .limit(limit))
    }

    fn build_filter(&self) -> Result<Filter, ValidationErrors> {
        let mut filter = Filter::new();
        let mut errors = ValidationErrors::new();

        for (key, raw) in &self.filters {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let value = coerce(raw);
            match parse_filter_key(key) {
                Some((path, None)) => filter.push(path, Condition::Eq(value)),
                Some((path, Some("gte"))) => filter.push(path, Condition::Gte(value)),
                Some((path, Some("gt"))) => filter.push(path, Condition::Gt(value)),
                Some((path, Some("lte"))) => filter.push(path, Condition::Lte(value)),
                Some((path, Some("lt"))) => filter.push(path, Condition::Lt(value)),
                Some((path, Some(op))) => {
                    errors.add(path, format!("Unknown filter operator '{}' on '{}'", op, path))
                }
                None => errors.add(key.as_str(), format!("Malformed filter key '{}'", key)),
            }
        }

        if errors.is_empty() {
            Ok(filter)
        } else {
            Err(errors)
        }
    }

    fn build_projection(&self) -> Result<Projection, ValidationErrors> {
        let Some(fields) = self.fields.as_deref() else {
            return Ok(default_projection());
        };

        let names: Vec<&str> = fields.split(',').map(str::trim).filter(|f| !f.is_empty()).collect();
        if names.is_empty() {
            return Ok(default_projection());
        }

        let excluded: Vec<&str> = names.iter().filter_map(|f| f.strip_prefix('-')).collect();
        if excluded.is_empty() {
            Ok(Projection::include(names))
        } else if excluded.len() == names.len() {
            Ok(Projection::exclude(excluded.into_iter().chain(HIDDEN_FIELDS.iter().copied())))
        } else {
            Err(ValidationErrors::single(
                "fields",
                "Cannot mix included and excluded fields",
            ))
        }
    }
}

fn parse_positive(field: &str, value: &str) -> Result<usize, ValidationErrors> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ValidationErrors::single(
            field,
            format!("{} must be a positive integer, got '{}'", field, value),
        )),
    }
}

/// Split `price[gte]` into `("price", Some("gte"))`
fn parse_filter_key(key: &str) -> Option<(&str, Option<&str>)> {
    match key.split_once('[') {
        None if !key.is_empty() => Some((key, None)),
        None => None,
        Some((path, rest)) => {
            let op = rest.strip_suffix(']')?;
            if path.is_empty() || op.is_empty() {
                None
            } else {
                Some((path, Some(op)))
            }
        }
    }
}

/// Numbers and booleans become typed values; everything else stays a string
fn coerce(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        if n.is_finite() {
            return Value::from(n);
        }
    }
    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::SortOrder;
    use serde_json::json;

    #[test]
    fn test_from_query_pairs() {
        let params = ListParams::from_query_pairs([
            ("duration[gte]", "5"),
            ("difficulty", "easy"),
            ("sort", "price"),
            ("page", "2"),
            ("limit", "3"),
        ])
        .unwrap();

        assert_eq!(params.filters.len(), 2);
        assert_eq!(params.sort.as_deref(), Some("price"));
        assert_eq!(params.page, Some(2));
        assert_eq!(params.limit, Some(3));
    }

    #[test]
    fn test_invalid_page() {
        assert!(ListParams::from_query_pairs([("page", "0")]).is_err());
        assert!(ListParams::from_query_pairs([("limit", "ten")]).is_err());
    }

    #[test]
    fn test_filter_operators_and_coercion() {
        let query = ListParams::new()
            .filter("duration[gte]", "5")
            .filter("price[lt]", "1500.5")
            .filter("secretTour", "false")
            .filter("difficulty", "easy")
            .to_find_query(100)
            .unwrap();

        assert!(query.filter.matches(&json!({
            "duration": 7, "price": 997, "secretTour": false, "difficulty": "easy"
        })));
        assert!(!query.filter.matches(&json!({
            "duration": 4, "price": 997, "secretTour": false, "difficulty": "easy"
        })));
        assert_eq!(query.filter.clauses().len(), 4);
    }

    #[test]
    fn test_unknown_operator() {
        let err = ListParams::new()
            .filter("price[regex]", "9")
            .to_find_query(100)
            .unwrap_err();

        assert!(err.has("price"));
    }

    #[test]
    fn test_defaults() {
        let query = ListParams::new().to_find_query(100).unwrap();

        assert_eq!(query.sort.keys(), &[("createdAt".to_string(), SortOrder::Desc)]);
        assert_eq!(query.limit, Some(100));
        assert_eq!(query.skip, 0);
        assert_eq!(query.projection, default_projection());
    }

    #[test]
    fn test_pagination() {
        let query = ListParams::new().page(3, 10).to_find_query(100).unwrap();

        assert_eq!(query.skip, 20);
        assert_eq!(query.limit, Some(10));
    }

    #[test]
    fn test_field_limiting() {
        let include = ListParams::new().fields("name,duration").to_find_query(100).unwrap();
        assert_eq!(include.projection, Projection::include(["name", "duration"]));

        let exclude = ListParams::new().fields("-summary").to_find_query(100).unwrap();
        assert_eq!(exclude.projection, Projection::exclude(["summary", "createdAt"]));

        assert!(ListParams::new().fields("name,-summary").to_find_query(100).is_err());
    }

    #[test]
    fn test_created_at_only_when_requested() {
        let query = ListParams::new().fields("name,createdAt").to_find_query(100).unwrap();
        assert!(query.projection.keeps("createdAt"));

        let query = ListParams::new().to_find_query(100).unwrap();
        assert!(!query.projection.keeps("createdAt"));
    }

    #[test]
    fn test_top_tours_alias() {
        let query = ListParams::top_tours().to_find_query(100).unwrap();

        assert_eq!(query.limit, Some(5));
        assert_eq!(
            query.sort.keys(),
            &[
                ("ratingsAverage".to_string(), SortOrder::Desc),
                ("price".to_string(), SortOrder::Asc)
            ]
        );
        assert!(query.projection.keeps("summary"));
        assert!(!query.projection.keeps("description"));
    }

    #[test]
    fn test_parse_filter_key() {
        assert_eq!(parse_filter_key("price"), Some(("price", None)));
        assert_eq!(parse_filter_key("price[gte]"), Some(("price", Some("gte"))));
        assert_eq!(parse_filter_key("price[gte"), None);
        assert_eq!(parse_filter_key("[gte]"), None);
    }
}
