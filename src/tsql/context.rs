use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::tsql::ast::{Call, DataType, Expr};
use crate::tsql::resolver::{expr_key_and_flag, EsKeyResolver, TIMESTAMP_KEY};
use crate::tsql::timeunit::{TimeUnit, SECOND};

pub const DEFAULT_MAX_TIME_POINTS: i64 = 512;

/// Per-query compilation state. Created fresh for every statement; after
/// planning it is only read.
#[derive(Debug, Clone)]
pub struct Context {
    start: i64,
    end: i64,
    original_time_unit: TimeUnit,
    target_time_unit: TimeUnit,
    time_key: String,
    max_time_points: i64,
    interval: i64,
    now: i64,
    func_ids: HashMap<String, String>,
    dimensions: BTreeSet<String>,
    scopes: BTreeMap<String, BTreeMap<String, Call>>,
}

impl Context {
    /// `start` and `end` are unix nanoseconds.
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            original_time_unit: TimeUnit::Nanosecond,
            target_time_unit: TimeUnit::Unset,
            time_key: TIMESTAMP_KEY.to_string(),
            max_time_points: DEFAULT_MAX_TIME_POINTS,
            interval: 0,
            now: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            func_ids: HashMap::new(),
            dimensions: BTreeSet::new(),
            scopes: BTreeMap::new(),
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// The time range, optionally converted into the storage unit.
    pub fn range(&self, conv: bool) -> (i64, i64) {
        if conv && self.original_time_unit.is_set() {
            let unit = self.original_time_unit.nanos();
            return (self.start / unit, self.end / unit);
        }
        (self.start, self.end)
    }

    pub fn original_time_unit(&self) -> TimeUnit {
        self.original_time_unit
    }

    pub fn set_original_time_unit(&mut self, unit: TimeUnit) {
        self.original_time_unit = unit;
    }

    pub fn target_time_unit(&self) -> TimeUnit {
        self.target_time_unit
    }

    pub fn set_target_time_unit(&mut self, unit: TimeUnit) {
        self.target_time_unit = unit;
    }

    pub fn time_key(&self) -> &str {
        &self.time_key
    }

    pub fn set_time_key(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.time_key = if key.is_empty() { TIMESTAMP_KEY.to_string() } else { key };
    }

    pub fn max_time_points(&self) -> i64 {
        self.max_time_points
    }

    pub fn set_max_time_points(&mut self, points: i64) {
        self.max_time_points = points;
    }

    /// Bucket width in the target unit (nanoseconds when unset).
    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn set_interval(&mut self, interval: i64) {
        self.interval = interval;
    }

    /// Bucket width in seconds.
    pub fn interval_seconds(&self) -> f64 {
        (self.interval as f64) * (self.target_time_unit.nanos() as f64) / (SECOND as f64)
    }

    /// Unix nanoseconds captured when the context was created.
    pub fn now(&self) -> i64 {
        self.now
    }

    pub fn set_now(&mut self, now: i64) {
        self.now = now;
    }

    /// Canonical signature of a call, the input to its function id.
    pub fn canonical(&self, call: &Call) -> String {
        let resolver = EsKeyResolver::new(self.time_key.clone());
        expr_key_and_flag(&Expr::Call(call.clone()), DataType::AnyField, &resolver).0
    }

    /// Returns the id for `call`, remembering it for later lookups.
    pub fn func_id(&mut self, call: &Call) -> String {
        let canonical = self.canonical(call);
        self.func_ids
            .entry(canonical)
            .or_insert_with_key(|k| hash_id(k))
            .clone()
    }

    /// Read-only variant of [`Context::func_id`] used while decoding.
    pub fn lookup_func_id(&self, call: &Call) -> String {
        let canonical = self.canonical(call);
        match self.func_ids.get(&canonical) {
            Some(id) => id.clone(),
            None => hash_id(&canonical),
        }
    }

    pub fn func_ids(&self) -> impl Iterator<Item = &String> {
        self.func_ids.values()
    }

    pub fn add_dimension(&mut self, key: impl Into<String>) {
        self.dimensions.insert(key.into());
    }

    pub fn has_dimension(&self, key: &str) -> bool {
        self.dimensions.contains(key)
    }

    /// Registers an aggregate under a named scope ("global" or "terms").
    pub fn add_scope(&mut self, scope: &str, id: String, call: Call) {
        self.scopes.entry(scope.to_string()).or_default().insert(id, call);
    }

    pub fn scope(&self, scope: &str) -> Option<&BTreeMap<String, Call>> {
        self.scopes.get(scope)
    }
}

fn hash_id(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arg: &str) -> Call {
        Call {
            name: name.to_string(),
            args: vec![Expr::var(arg, DataType::Unknown)],
        }
    }

    #[test]
    fn func_ids_are_stable_and_deduplicated() {
        let mut a = Context::new(0, 0);
        let mut b = Context::new(10, 20);
        let id = a.func_id(&call("sum", "column"));
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, a.func_id(&call("sum", "column")));
        assert_eq!(id, b.func_id(&call("sum", "column")));
        assert_ne!(id, a.func_id(&call("max", "column")));
        assert_eq!(a.func_ids().count(), 2);
        assert_eq!(a.lookup_func_id(&call("sum", "column")), id);
    }

    #[test]
    fn paren_wrapping_does_not_change_id() {
        let mut ctx = Context::new(0, 0);
        let plain = Call {
            name: "max".into(),
            args: vec![Expr::var("a", DataType::Unknown)],
        };
        let wrapped = Call {
            name: "max".into(),
            args: vec![Expr::Paren(Box::new(Expr::var("a", DataType::Unknown)))],
        };
        assert_eq!(ctx.func_id(&plain), ctx.func_id(&wrapped));
    }

    #[test]
    fn range_conversion() {
        let mut ctx = Context::new(2_000_000_000, 4_000_000_000);
        ctx.set_original_time_unit(TimeUnit::Millisecond);
        assert_eq!(ctx.range(true), (2_000, 4_000));
        assert_eq!(ctx.range(false), (2_000_000_000, 4_000_000_000));
        ctx.set_time_key("");
        assert_eq!(ctx.time_key(), "timestamp");
    }

    #[test]
    fn interval_in_seconds() {
        let mut ctx = Context::new(0, 0);
        ctx.set_target_time_unit(TimeUnit::Second);
        ctx.set_interval(60);
        assert_eq!(ctx.interval_seconds(), 60.0);
        ctx.set_target_time_unit(TimeUnit::Unset);
        ctx.set_interval(30 * SECOND);
        assert_eq!(ctx.interval_seconds(), 30.0);
    }
}
