//! Cluster-wide issues
//!
//! Issues are non-fatal conditions surfaced to administrators. Each one has a
//! human readable description and a JSON form for the admin API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use storage::OutdatedIndexMap;

pub trait GlobalIssue: Send + Sync {
    fn description(&self) -> String;
    fn json_description(&self) -> Value;
    fn is_critical(&self) -> bool {
        false
    }
}

/// Something that can be asked for its current issues
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn get_issues(&self) -> Vec<Box<dyn GlobalIssue>>;
}

/// Secondary indexes built with older, buggy semantics
#[derive(Debug, Clone, PartialEq)]
pub struct OutdatedIndexIssue {
    indexes: OutdatedIndexMap,
    time: DateTime<Utc>,
}

impl OutdatedIndexIssue {
    pub const TYPE: &'static str = "OUTDATED_INDEX_ISSUE";

    pub fn new(indexes: OutdatedIndexMap) -> Self {
        Self {
            indexes,
            time: Utc::now(),
        }
    }

    pub fn indexes(&self) -> &OutdatedIndexMap {
        &self.indexes
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

impl GlobalIssue for OutdatedIndexIssue {
    fn description(&self) -> String {
        let count: usize = self.indexes.values().map(|names| names.len()).sum();
        format!(
            "The cluster contains {} secondary index(es) across {} table(s) that were \
             created with an older index format whose semantics are known to be buggy. \
             Recreate them and drop the old ones to avoid relying on that behavior.",
            count,
            self.indexes.len()
        )
    }

    fn json_description(&self) -> Value {
        let indexes: Map<String, Value> = self
            .indexes
            .iter()
            .map(|(table, names)| (table.to_string(), json!(names)))
            .collect();
        json!({
            "type": Self::TYPE,
            "critical": self.is_critical(),
            "time": self.time.timestamp(),
            "description": self.description(),
            "indexes": indexes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nk_core::TableId;
    use std::collections::BTreeSet;

    #[test]
    fn test_json_shape() {
        let table = TableId::generate();
        let names: BTreeSet<String> = ["by_age".to_string(), "by_name".to_string()].into();
        let issue = OutdatedIndexIssue::new(OutdatedIndexMap::from([(table, names)]));

        let value = issue.json_description();
        assert_eq!(value["type"], "OUTDATED_INDEX_ISSUE");
        assert_eq!(value["critical"], false);
        assert_eq!(value["time"], issue.time().timestamp());
        assert_eq!(value["indexes"][table.to_string()], json!(["by_age", "by_name"]));
        assert!(value["description"].as_str().unwrap().contains("2 secondary index"));
    }
}
