use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw attribute map for one attribute group. Values are JSON so that
/// categorical attributes (e.g. `gender`) can be submitted as strings.
pub type AttributeMap = BTreeMap<String, serde_json::Value>;

/// Per-customer feature record submitted for a segmentation run.
///
/// Every group must be present, even if empty; an absent group is a schema
/// error rather than an implicit empty map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerFeatures {
    pub customer_id: String,
    pub demographics: Option<AttributeMap>,
    pub behavior: Option<AttributeMap>,
    pub purchase_history: Option<AttributeMap>,
    pub engagement: Option<AttributeMap>,
}

impl CustomerFeatures {
    /// Record with all four groups present and empty.
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            demographics: Some(AttributeMap::new()),
            behavior: Some(AttributeMap::new()),
            purchase_history: Some(AttributeMap::new()),
            engagement: Some(AttributeMap::new()),
        }
    }

    pub fn with_attribute(
        mut self,
        group: AttributeGroup,
        name: &str,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.group_mut(group)
            .get_or_insert_with(AttributeMap::new)
            .insert(name.to_string(), value.into());
        self
    }

    pub fn group(&self, group: AttributeGroup) -> Option<&AttributeMap> {
        match group {
            AttributeGroup::Demographics => self.demographics.as_ref(),
            AttributeGroup::Behavior => self.behavior.as_ref(),
            AttributeGroup::PurchaseHistory => self.purchase_history.as_ref(),
            AttributeGroup::Engagement => self.engagement.as_ref(),
        }
    }

    fn group_mut(&mut self, group: AttributeGroup) -> &mut Option<AttributeMap> {
        match group {
            AttributeGroup::Demographics => &mut self.demographics,
            AttributeGroup::Behavior => &mut self.behavior,
            AttributeGroup::PurchaseHistory => &mut self.purchase_history,
            AttributeGroup::Engagement => &mut self.engagement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeGroup {
    Demographics,
    Behavior,
    PurchaseHistory,
    Engagement,
}

impl AttributeGroup {
    pub const ALL: [AttributeGroup; 4] = [
        AttributeGroup::Demographics,
        AttributeGroup::Behavior,
        AttributeGroup::PurchaseHistory,
        AttributeGroup::Engagement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeGroup::Demographics => "demographics",
            AttributeGroup::Behavior => "behavior",
            AttributeGroup::PurchaseHistory => "purchase_history",
            AttributeGroup::Engagement => "engagement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub segment_id: String,
    pub name: String,
    pub description: String,
    pub size: usize,
    /// Mean of each derived feature within the segment; `None` for an empty segment.
    pub characteristics: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationResult {
    pub segments: Vec<Segment>,
    /// customer_id -> segment_id
    pub assignments: BTreeMap<String, String>,
    /// Silhouette-style score in [-1, 1].
    pub quality_score: f64,
    pub algorithm: String,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
}

impl SegmentationResult {
    pub fn segment(&self, segment_id: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.segment_id == segment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_group_deserializes_as_none() {
        let record: CustomerFeatures = serde_json::from_str(
            r#"{"customer_id": "c1", "demographics": {"age": 30}, "behavior": {}, "engagement": {}}"#,
        )
        .unwrap();
        assert!(record.demographics.is_some());
        assert!(record.purchase_history.is_none());
        assert_eq!(record.group(AttributeGroup::Behavior).map(|g| g.len()), Some(0));
    }

    #[test]
    fn test_builder_sets_attribute() {
        let record = CustomerFeatures::new("c1")
            .with_attribute(AttributeGroup::Demographics, "age", 42)
            .with_attribute(AttributeGroup::Demographics, "gender", "M");
        let demo = record.group(AttributeGroup::Demographics).unwrap();
        assert_eq!(demo.get("age"), Some(&serde_json::json!(42)));
        assert_eq!(demo.get("gender"), Some(&serde_json::json!("M")));
    }
}
