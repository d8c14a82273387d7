use core::fmt;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Identifies the promtail config of one container running in workloads
/// selectable by `labels` in `namespace`.
///
/// Labels are not kept as a map but as the canonical string
/// `k1=v1,k2=v2,` (keys ascending) so keys compare cheaply, hash
/// consistently and can be written into the persisted document verbatim.
///
/// Field order defines the sort order: namespace, then labels, then
/// container name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    namespace: String,
    labels: String,
    container_name: String,
}

impl Key {
    /// Builds a key from a label set, canonicalising the labels.
    pub fn build<I, K, V>(
        namespace: impl Into<String>,
        labels: I,
        container_name: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let sorted: BTreeMap<String, String> = labels
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();
        Self::new(namespace, serialize_labels(&sorted), container_name)
    }

    /// Creates a key from an already serialized label string.
    pub fn new(
        namespace: impl Into<String>,
        labels: impl Into<String>,
        container_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            labels: labels.into(),
            container_name: container_name.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn labels(&self) -> &str {
        &self.labels
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.namespace, self.labels, self.container_name
        )
    }
}

/// Renders labels as `k=v,` pairs in key order.
pub fn serialize_labels(labels: &BTreeMap<String, String>) -> String {
    labels.iter().fold(String::new(), |mut out, (k, v)| {
        let _ = write!(out, "{}={},", k, v);
        out
    })
}
