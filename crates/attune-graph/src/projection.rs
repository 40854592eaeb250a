use attune_protocol::{
    decode_lenient_list, Envelope, EnvelopeType, GraphEdge, GraphNode, GraphSnapshot, Receipt,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::highlights::{receipt_highlights, ReceiptHighlights};
use crate::upsert::upsert_items;

pub const DEFAULT_MAX_RECEIPTS: usize = 100;

const GRAPH_UNAVAILABLE_MARKERS: &[&str] = &["graph", "neo4j"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionConfig {
    pub max_receipts: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            max_receipts: DEFAULT_MAX_RECEIPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphAction {
    Reset,
    ApplySnapshot(GraphSnapshot),
    ApplyEnvelope(Envelope),
    SelectReceipt(Option<String>),
}

/// Merged node/edge/receipt view for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphProjection {
    #[serde(skip)]
    config: ProjectionConfig,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub receipts: Vec<Receipt>,
    pub warnings: Vec<String>,
    pub highlighted_node_ids: Vec<String>,
    pub tool_calls: Vec<Value>,
    pub dropped_tool_calls: Vec<Value>,
    pub insight_card: Option<Value>,
    pub safety_signal: Option<Value>,
    pub last_server_error: Option<Value>,
    pub graph_unavailable: bool,
    pub updated_at_ms: Option<u64>,
    pub last_envelope_type: Option<EnvelopeType>,
    pub selected_receipt_id: Option<String>,
}

impl GraphProjection {
    pub fn new(config: ProjectionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> ProjectionConfig {
        self.config
    }

    /// Applies one action; returns whether the projection changed.
    pub fn apply(&mut self, action: GraphAction, now_ms: u64) -> bool {
        match action {
            GraphAction::Reset => {
                self.reset();
                true
            }
            GraphAction::ApplySnapshot(snapshot) => {
                self.apply_snapshot(snapshot, now_ms);
                true
            }
            GraphAction::ApplyEnvelope(envelope) => self.apply_envelope(&envelope, now_ms),
            GraphAction::SelectReceipt(receipt_id) => {
                self.select_receipt(receipt_id);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    pub fn apply_snapshot(&mut self, snapshot: GraphSnapshot, now_ms: u64) {
        let mut nodes = Vec::new();
        upsert_items(&mut nodes, snapshot.nodes);
        let mut edges = Vec::new();
        upsert_items(&mut edges, snapshot.edges);
        self.nodes = nodes;
        self.edges = edges;
        merge_warnings(&mut self.warnings, snapshot.warnings);
        self.graph_unavailable = false;
        self.updated_at_ms = Some(now_ms);
    }

    /// Folds one inbound envelope. Types without a projection effect only
    /// record `last_envelope_type` and return `false`.
    pub fn apply_envelope(&mut self, envelope: &Envelope, now_ms: u64) -> bool {
        self.last_envelope_type = Some(envelope.kind);
        let payload = &envelope.payload;
        match envelope.kind {
            EnvelopeType::KgDiff => self.apply_kg_diff(payload),
            EnvelopeType::KgToolCallsApplied => {
                self.tool_calls = read_value_list(payload, &["calls"]);
                self.dropped_tool_calls =
                    read_value_list(payload, &["dropped_calls", "droppedCalls"]);
            }
            EnvelopeType::CoachInsight => {
                self.insight_card = Some(
                    payload
                        .get("card")
                        .filter(|card| !card.is_null())
                        .cloned()
                        .unwrap_or_else(|| Value::Object(payload.clone())),
                );
                let receipts = decode_lenient_list(payload.get("receipts"));
                self.merge_receipts(receipts);
            }
            EnvelopeType::SafetyAlert | EnvelopeType::SafetyStatus => {
                self.safety_signal = Some(Value::Object(payload.clone()));
            }
            EnvelopeType::ServerError => {
                if infer_graph_unavailable(payload) {
                    self.graph_unavailable = true;
                }
                self.last_server_error = Some(Value::Object(payload.clone()));
            }
            EnvelopeType::EviUserMessageFinal
            | EnvelopeType::EviAssistantMessage
            | EnvelopeType::EviChatMetadata
            | EnvelopeType::ClientPing
            | EnvelopeType::SummaryPartial
            | EnvelopeType::ServerPong
            | EnvelopeType::ServerAck => return false,
        }
        self.updated_at_ms = Some(now_ms);
        true
    }

    pub fn select_receipt(&mut self, receipt_id: Option<String>) {
        self.selected_receipt_id = receipt_id.filter(|id| !id.is_empty());
    }

    pub fn selected_highlights(&self) -> ReceiptHighlights {
        receipt_highlights(&self.receipts, self.selected_receipt_id.as_deref())
    }

    fn apply_kg_diff(&mut self, payload: &Map<String, Value>) {
        let nodes = decode_lenient_list::<GraphNode>(first_present(
            payload,
            &["nodes_upsert", "nodesUpsert", "nodes"],
        ));
        let edges = decode_lenient_list::<GraphEdge>(first_present(
            payload,
            &["edges_upsert", "edgesUpsert", "edges"],
        ));
        let receipts = decode_lenient_list::<Receipt>(payload.get("receipts"));
        let warnings = decode_lenient_list::<String>(payload.get("warnings"));

        let mut highlighted = Vec::new();
        for id in receipts.iter().flat_map(Receipt::touched_node_ids) {
            if !highlighted.contains(&id) {
                highlighted.push(id);
            }
        }

        upsert_items(&mut self.nodes, nodes);
        upsert_items(&mut self.edges, edges);
        self.merge_receipts(receipts);
        merge_warnings(&mut self.warnings, warnings);
        self.highlighted_node_ids = highlighted;
        self.graph_unavailable = false;
    }

    fn merge_receipts(&mut self, receipts: Vec<Receipt>) {
        upsert_items(&mut self.receipts, receipts);
        let max = self.config.max_receipts.max(1);
        if self.receipts.len() > max {
            let overflow = self.receipts.len() - max;
            self.receipts.drain(..overflow);
        }
    }
}

/// Functional form of [`GraphProjection::apply`].
pub fn reduce(mut state: GraphProjection, action: GraphAction, now_ms: u64) -> GraphProjection {
    state.apply(action, now_ms);
    state
}

/// Best-effort classification of a `server.error` payload as "graph backend down".
///
/// Matches the markers case-insensitively as substrings of `code` and
/// `message`, and exactly against `details.subsystem`.
pub fn infer_graph_unavailable(payload: &Map<String, Value>) -> bool {
    let code = lowercase_field(payload.get("code"));
    let message = lowercase_field(payload.get("message"));
    let subsystem = lowercase_field(
        payload
            .get("details")
            .and_then(|details| details.get("subsystem")),
    );
    GRAPH_UNAVAILABLE_MARKERS.iter().any(|marker| {
        code.contains(marker) || message.contains(marker) || subsystem == *marker
    })
}

fn lowercase_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.to_lowercase(),
        Some(other) => other.to_string().to_lowercase(),
    }
}

fn first_present<'a>(payload: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| payload.get(*key).filter(|value| !value.is_null()))
}

fn read_value_list(payload: &Map<String, Value>, keys: &[&str]) -> Vec<Value> {
    match first_present(payload, keys) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn merge_warnings(current: &mut Vec<String>, incoming: Vec<String>) {
    for warning in incoming {
        if !warning.is_empty() && !current.contains(&warning) {
            current.push(warning);
        }
    }
}
