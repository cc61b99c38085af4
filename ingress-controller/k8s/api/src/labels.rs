use std::collections::BTreeMap;

pub type Map = BTreeMap<String, String>;

/// The labels carried by a pod.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Labels(Map);

/// An equality-based label selector, as found on `Service.spec.selector`.
///
/// Unlike an API-server label query, an empty selector selects nothing: a Service without a
/// selector manages its Endpoints by hand and has no pods of its own.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector(Map);

// === Selector ===

impl Selector {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        !self.0.is_empty() && self.0.iter().all(|(k, v)| labels.get(k) == Some(v.as_str()))
    }
}

impl From<Option<&Map>> for Selector {
    fn from(map: Option<&Map>) -> Self {
        Self(map.cloned().unwrap_or_default())
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        Self(collect_owned(iter))
    }
}

// === Labels ===

impl Labels {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl From<Option<&Map>> for Labels {
    fn from(labels: Option<&Map>) -> Self {
        Self(labels.cloned().unwrap_or_default())
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        Self(collect_owned(iter))
    }
}

fn collect_owned<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Map {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
