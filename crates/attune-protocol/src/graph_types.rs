use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Knowledge-graph node as carried in snapshots and diffs.
///
/// Every field except the flattened remainder is optional so a diff can carry a
/// partial update; [`GraphNode::merge_from`] applies it as a shallow merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical: Option<String>,
    #[serde(default, alias = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(
        default,
        alias = "lastSeenAt",
        deserialize_with = "deserialize_optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_seen_at: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GraphNode {
    pub fn new(id: &str, label: &str, canonical: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            label: Some(label.to_string()),
            canonical: Some(canonical.to_string()),
            ..Self::default()
        }
    }

    /// Stable identity: `id`, then `node_id`, then `label:canonical:session`.
    pub fn identity_key(&self) -> Option<String> {
        non_empty(self.id.as_deref())
            .or_else(|| extra_str(&self.extra, &["node_id", "nodeId"]))
            .or_else(|| {
                composite_key(&[
                    self.label.as_deref(),
                    self.canonical.as_deref(),
                    self.session_id.as_deref(),
                ])
            })
    }

    pub fn merge_from(&mut self, incoming: GraphNode) {
        overwrite(&mut self.id, incoming.id);
        overwrite(&mut self.label, incoming.label);
        overwrite(&mut self.canonical, incoming.canonical);
        overwrite(&mut self.session_id, incoming.session_id);
        overwrite(&mut self.properties, incoming.properties);
        overwrite(&mut self.last_seen_at, incoming.last_seen_at);
        self.extra.extend(incoming.extra);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default, alias = "sourceId", skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, alias = "targetId", skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, alias = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(
        default,
        alias = "lastSeenAt",
        deserialize_with = "deserialize_optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_seen_at: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GraphEdge {
    pub fn new(id: &str, relation: &str, source_id: &str, target_id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            relation: Some(relation.to_string()),
            source_id: Some(source_id.to_string()),
            target_id: Some(target_id.to_string()),
            ..Self::default()
        }
    }

    /// Stable identity: `id`, then `edge_id`, then `type:source:target`.
    pub fn identity_key(&self) -> Option<String> {
        non_empty(self.id.as_deref())
            .or_else(|| extra_str(&self.extra, &["edge_id", "edgeId"]))
            .or_else(|| {
                let source = self
                    .source_id
                    .clone()
                    .or_else(|| extra_str(&self.extra, &["source", "from"]));
                let target = self
                    .target_id
                    .clone()
                    .or_else(|| extra_str(&self.extra, &["target", "to"]));
                composite_key(&[
                    self.relation.as_deref(),
                    source.as_deref(),
                    target.as_deref(),
                ])
            })
    }

    pub fn merge_from(&mut self, incoming: GraphEdge) {
        overwrite(&mut self.id, incoming.id);
        overwrite(&mut self.relation, incoming.relation);
        overwrite(&mut self.source_id, incoming.source_id);
        overwrite(&mut self.target_id, incoming.target_id);
        overwrite(&mut self.session_id, incoming.session_id);
        overwrite(&mut self.properties, incoming.properties);
        overwrite(&mut self.last_seen_at, incoming.last_seen_at);
        self.extra.extend(incoming.extra);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptEvidence {
    #[serde(default, alias = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(default)]
    pub verified: bool,
}

/// Traceability record linking one backend tool invocation to the graph
/// entities it touched and the transcript evidence behind it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(default, alias = "receiptId", skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<String>,
    #[serde(default, alias = "toolName", skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<ReceiptEvidence>,
    #[serde(default, alias = "nodeIds", skip_serializing_if = "Option::is_none")]
    pub node_ids: Option<Vec<String>>,
    #[serde(default, alias = "edgeIds", skip_serializing_if = "Option::is_none")]
    pub edge_ids: Option<Vec<String>>,
    #[serde(
        default,
        alias = "appliedNodeIds",
        skip_serializing_if = "Option::is_none"
    )]
    pub applied_node_ids: Option<Vec<String>>,
    #[serde(
        default,
        alias = "appliedEdgeIds",
        skip_serializing_if = "Option::is_none"
    )]
    pub applied_edge_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(
        default,
        alias = "appliedAtMs",
        deserialize_with = "deserialize_optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub applied_at_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Receipt {
    /// Stable identity: `receipt_id`, then the originating `message_id`.
    pub fn identity_key(&self) -> Option<String> {
        non_empty(self.receipt_id.as_deref())
            .or_else(|| extra_str(&self.extra, &["message_id", "messageId"]))
    }

    /// Node ids this receipt touched, de-duplicated in first-seen order.
    pub fn touched_node_ids(&self) -> Vec<String> {
        union_ids(&[self.node_ids.as_deref(), self.applied_node_ids.as_deref()])
    }

    pub fn touched_edge_ids(&self) -> Vec<String> {
        union_ids(&[self.edge_ids.as_deref(), self.applied_edge_ids.as_deref()])
    }

    pub fn merge_from(&mut self, incoming: Receipt) {
        overwrite(&mut self.receipt_id, incoming.receipt_id);
        overwrite(&mut self.tool_name, incoming.tool_name);
        overwrite(&mut self.evidence, incoming.evidence);
        overwrite(&mut self.node_ids, incoming.node_ids);
        overwrite(&mut self.edge_ids, incoming.edge_ids);
        overwrite(&mut self.applied_node_ids, incoming.applied_node_ids);
        overwrite(&mut self.applied_edge_ids, incoming.applied_edge_ids);
        overwrite(&mut self.arguments, incoming.arguments);
        overwrite(&mut self.applied_at_ms, incoming.applied_at_ms);
        self.extra.extend(incoming.extra);
    }
}

/// Full graph state returned by the REST snapshot endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub warnings: Vec<String>,
}

impl GraphSnapshot {
    /// Lenient decode: entries that fail to decode are skipped, missing lists become empty.
    pub fn from_value(value: &Value) -> Self {
        Self {
            nodes: decode_lenient_list(value.get("nodes")),
            edges: decode_lenient_list(value.get("edges")),
            warnings: decode_lenient_list(value.get("warnings")),
        }
    }
}

impl<'de> Deserialize<'de> for GraphSnapshot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

/// Decodes each array element on its own, dropping the ones that do not fit `T`.
pub fn decode_lenient_list<T: DeserializeOwned>(value: Option<&Value>) -> Vec<T> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<T>(item.clone()) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                tracing::warn!(%error, "skipping undecodable list entry");
                None
            }
        })
        .collect()
}

fn deserialize_optional_millis<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| {
        value.as_u64().or_else(|| {
            value
                .as_f64()
                .filter(|millis| millis.is_finite() && *millis >= 0.0)
                .map(|millis| millis as u64)
        })
    }))
}

fn overwrite<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn extra_str(extra: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| non_empty(extra.get(*key).and_then(Value::as_str)))
}

fn composite_key(parts: &[Option<&str>]) -> Option<String> {
    let present = parts
        .iter()
        .filter_map(|part| non_empty(*part))
        .collect::<Vec<_>>();
    if present.is_empty() {
        None
    } else {
        Some(present.join(":"))
    }
}

fn union_ids(lists: &[Option<&[String]>]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in lists.iter().flatten().flat_map(|list| list.iter()) {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    ids
}
