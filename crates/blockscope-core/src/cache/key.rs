use std::collections::BTreeMap;

/// Normalized request identity used as the response cache key.
///
/// Built from a route name plus named parameters. Parameters are kept in a
/// `BTreeMap` so query-string order never produces distinct keys, and list
/// parameters are de-duplicated and sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn builder(route: &str) -> CacheKeyBuilder {
        CacheKeyBuilder {
            route: route.to_owned(),
            params: BTreeMap::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct CacheKeyBuilder {
    route: String,
    params: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.to_owned(), value.to_string());
        self
    }

    pub fn opt_param(self, name: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    /// Add a set-valued parameter. Order and duplicates do not affect the key.
    pub fn list<S: AsRef<str>>(mut self, name: &str, values: &[S]) -> Self {
        let mut values: Vec<&str> = values.iter().map(AsRef::as_ref).collect();
        values.sort_unstable();
        values.dedup();
        self.params.insert(name.to_owned(), values.join(","));
        self
    }

    pub fn build(self) -> CacheKey {
        if self.params.is_empty() {
            return CacheKey(self.route);
        }
        let query: Vec<String> = self
            .params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        CacheKey(format!("{}?{}", self.route, query.join("&")))
    }
}
