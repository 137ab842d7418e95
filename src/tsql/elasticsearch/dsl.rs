//! Minimal Elasticsearch query DSL, rendered as `serde_json` values.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value as Json};

/// A `bool` query. Clauses are rendered in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    filter: Vec<Json>,
    must_not: Vec<Json>,
    should: Vec<Json>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&mut self, query: Json) -> &mut Self {
        self.filter.push(query);
        self
    }

    pub fn must_not(&mut self, query: Json) -> &mut Self {
        self.must_not.push(query);
        self
    }

    pub fn should(&mut self, query: Json) -> &mut Self {
        self.should.push(query);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_empty() && self.must_not.is_empty() && self.should.is_empty()
    }

    pub fn to_json(&self) -> Json {
        let mut body = Map::new();
        if !self.filter.is_empty() {
            body.insert("filter".into(), Json::Array(self.filter.clone()));
        }
        if !self.must_not.is_empty() {
            body.insert("must_not".into(), Json::Array(self.must_not.clone()));
        }
        if !self.should.is_empty() {
            body.insert("should".into(), Json::Array(self.should.clone()));
            body.insert("minimum_should_match".into(), json!(1));
        }
        json!({ "bool": body })
    }
}

pub fn term(key: &str, value: Json) -> Json {
    json!({ "term": { key: value } })
}

pub fn terms(key: &str, values: Json) -> Json {
    json!({ "terms": { key: values } })
}

/// `op` is one of `gt`, `gte`, `lt`, `lte`.
pub fn range(key: &str, op: &str, value: Json) -> Json {
    json!({ "range": { key: { op: value } } })
}

pub fn time_range(key: &str, start: i64, end: i64) -> Json {
    json!({ "range": { key: { "gte": start, "lte": end } } })
}

pub fn regexp(key: &str, pattern: &str) -> Json {
    json!({ "regexp": { key: pattern } })
}

pub fn wildcard(key: &str, pattern: &str) -> Json {
    json!({ "wildcard": { key: pattern } })
}

pub fn exists(field: &str) -> Json {
    json!({ "exists": { "field": field } })
}

pub fn script(source: &str) -> Json {
    json!({ "source": source })
}

pub fn script_query(source: &str) -> Json {
    json!({ "script": { "script": script(source) } })
}

/// An aggregation with optional named sub-aggregations.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    kind: String,
    body: Json,
    subs: BTreeMap<String, Aggregation>,
}

impl Aggregation {
    pub fn new(kind: impl Into<String>, body: Json) -> Self {
        Self {
            kind: kind.into(),
            body,
            subs: BTreeMap::new(),
        }
    }

    /// A metric aggregation over a field or, when `field` is `None`, a script.
    pub fn metric(kind: &str, field: Option<&str>, script_source: Option<&str>) -> Self {
        let body = match (field, script_source) {
            (Some(f), _) => json!({ "field": f }),
            (None, Some(s)) => json!({ "script": script(s) }),
            (None, None) => json!({}),
        };
        Self::new(kind, body)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn set(&mut self, key: &str, value: Json) -> &mut Self {
        if let Some(obj) = self.body.as_object_mut() {
            obj.insert(key.to_string(), value);
        }
        self
    }

    pub fn sub_aggregation(&mut self, name: impl Into<String>, agg: Aggregation) -> &mut Self {
        self.subs.insert(name.into(), agg);
        self
    }

    pub fn sub_aggregations(&mut self, aggs: impl IntoIterator<Item = (String, Aggregation)>) -> &mut Self {
        self.subs.extend(aggs);
        self
    }

    pub fn to_json(&self) -> Json {
        let mut out = Map::new();
        out.insert(self.kind.clone(), self.body.clone());
        if !self.subs.is_empty() {
            out.insert("aggs".into(), aggregations_json(&self.subs));
        }
        Json::Object(out)
    }
}

pub fn aggregations_json(aggs: &BTreeMap<String, Aggregation>) -> Json {
    Json::Object(aggs.iter().map(|(name, agg)| (name.clone(), agg.to_json())).collect())
}

/// Reads a dotted path such as `tags.host` out of a document source. A key
/// stored flat (`"tags.host": ...`) wins over the nested form.
pub fn source_value<'a>(source: &'a Json, path: &str) -> Option<&'a Json> {
    if let Some(v) = source.get(path) {
        return Some(v);
    }
    let mut current = source;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Flattens a document source into dotted keys.
pub fn flatten_source(source: &Json, prefix: &str, out: &mut BTreeMap<String, Json>) {
    match source {
        Json::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                flatten_source(v, &key, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_query_rendering() {
        let mut q = BoolQuery::new();
        q.filter(term("tags.host", json!("a"))).must_not(exists("fields.x"));
        assert_eq!(
            q.to_json(),
            json!({"bool": {
                "filter": [{"term": {"tags.host": "a"}}],
                "must_not": [{"exists": {"field": "fields.x"}}]
            }})
        );
        let mut or = BoolQuery::new();
        or.should(term("a", json!(1)));
        assert_eq!(or.to_json()["bool"]["minimum_should_match"], json!(1));
        assert!(BoolQuery::new().is_empty());
    }

    #[test]
    fn nested_aggregations() {
        let mut terms = Aggregation::new("terms", json!({"field": "tags.host"}));
        terms.sub_aggregation("m", Aggregation::metric("max", Some("fields.cpu"), None));
        terms.set("size", json!(10));
        assert_eq!(
            terms.to_json(),
            json!({
                "terms": {"field": "tags.host", "size": 10},
                "aggs": {"m": {"max": {"field": "fields.cpu"}}}
            })
        );
        let script = Aggregation::metric("sum", None, Some("doc['a'].value"));
        assert_eq!(script.to_json(), json!({"sum": {"script": {"source": "doc['a'].value"}}}));
    }

    #[test]
    fn source_paths() {
        let doc = json!({"tags": {"host": "a"}, "fields.cpu": 2});
        assert_eq!(source_value(&doc, "tags.host"), Some(&json!("a")));
        assert_eq!(source_value(&doc, "fields.cpu"), Some(&json!(2)));
        assert_eq!(source_value(&doc, "tags.missing"), None);

        let mut flat = BTreeMap::new();
        flatten_source(&json!({"name": "m", "tags": {"host": "a"}}), "", &mut flat);
        assert_eq!(flat.keys().collect::<Vec<_>>(), vec!["name", "tags.host"]);
    }
}
