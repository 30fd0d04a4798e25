//! Flattening of nested metric trees into `a/b/c` keyed records.

use tracing::debug;

use crate::client::{ActiveRun, TrackingClient};
use crate::error::Result;
use crate::models::{MetricValue, MetricsTree};

/// One leaf of a flattened [`MetricsTree`].
#[derive(Debug, Clone, PartialEq)]
pub enum FlatEntry {
    /// Integer or float leaf.
    Metric { key: String, value: f64 },
    /// Any other leaf, in its string form.
    Param { key: String, value: String },
}

impl FlatEntry {
    pub fn key(&self) -> &str {
        match self {
            FlatEntry::Metric { key, .. } | FlatEntry::Param { key, .. } => key,
        }
    }
}

/// Flatten `tree` into one entry per leaf, keyed by the `/`-joined path from the root.
pub fn flatten(tree: &MetricsTree) -> Vec<FlatEntry> {
    let mut out = Vec::new();
    visit("", tree, &mut out);
    out
}

fn visit(prefix: &str, tree: &MetricsTree, out: &mut Vec<FlatEntry>) {
    for (key, value) in tree {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}/{key}")
        };

        match value {
            MetricValue::Nested(subtree) => visit(&full_key, subtree, out),
            other => match other.as_number() {
                Some(number) => out.push(FlatEntry::Metric {
                    key: full_key,
                    value: number,
                }),
                None => out.push(FlatEntry::Param {
                    key: full_key,
                    value: other.to_string(),
                }),
            },
        }
    }
}

/// Log every leaf of `metrics` into `run`: numbers as metrics, everything else as params.
///
/// Stops at the first store error, leaving the leaves logged so far in place.
pub fn save_training_metrics(
    client: &TrackingClient,
    run: &ActiveRun,
    metrics: &MetricsTree,
) -> Result<()> {
    for entry in flatten(metrics) {
        debug!(run_id = %run.run_id(), key = entry.key(), "logging leaf");
        match entry {
            FlatEntry::Metric { key, value } => client.log_metric(run, &key, value, 0)?,
            FlatEntry::Param { key, value } => client.log_param(run, &key, &value)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(entries: Vec<(&str, MetricValue)>) -> MetricsTree {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn paths_join_keys_from_root_to_leaf() {
        let metrics = tree(vec![
            (
                "train",
                tree(vec![
                    ("loss", 0.123.into()),
                    ("details", tree(vec![("epochs", 10.into())]).into()),
                ])
                .into(),
            ),
            ("lr", 0.001.into()),
        ]);

        let mut entries = flatten(&metrics);
        entries.sort_by(|a, b| a.key().cmp(b.key()));
        assert_eq!(
            entries,
            vec![
                FlatEntry::Metric { key: "lr".into(), value: 0.001 },
                FlatEntry::Metric { key: "train/details/epochs".into(), value: 10.0 },
                FlatEntry::Metric { key: "train/loss".into(), value: 0.123 },
            ]
        );
    }

    #[test]
    fn non_numeric_leaves_become_params() {
        let metrics = tree(vec![
            ("optimizer", "adam".into()),
            ("shuffle", true.into()),
            ("layers", MetricValue::List(vec![64.into(), 32.into()])),
            ("notes", MetricValue::Null),
        ]);

        let entries = flatten(&metrics);
        assert!(entries.contains(&FlatEntry::Param { key: "optimizer".into(), value: "adam".into() }));
        assert!(entries.contains(&FlatEntry::Param { key: "shuffle".into(), value: "true".into() }));
        assert!(entries.contains(&FlatEntry::Param { key: "layers".into(), value: "[64,32]".into() }));
        assert!(entries.contains(&FlatEntry::Param { key: "notes".into(), value: "null".into() }));
    }

    #[test]
    fn empty_subtree_produces_nothing() {
        let metrics = tree(vec![("eval", MetricsTree::new().into())]);
        assert!(flatten(&metrics).is_empty());
    }
}
