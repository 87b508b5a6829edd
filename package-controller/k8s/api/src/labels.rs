use std::{collections::BTreeMap, fmt, sync::Arc};

/// A set of labels, as carried by object metadata or declared as a workload
/// selector in a package.
#[derive(Clone, Debug, Eq, Default, Hash, PartialOrd, Ord)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

// === Labels ===

impl Labels {
    /// Returns true when every label in `self` is present in `labels` with
    /// the same value. An empty set matches everything.
    pub fn matches(&self, labels: &Map) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Formats the labels as an equality-based label selector, e.g.
    /// `uds/package=app,uds/generation=3`.
    pub fn to_selector(&self) -> String {
        self.to_string()
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(String::as_str)
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl<'a> std::iter::FromIterator<(&'a str, &'a str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}
