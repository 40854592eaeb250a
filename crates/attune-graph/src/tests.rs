//! Tests for graph projection transitions.

use attune_protocol::{Envelope, EnvelopeType, GraphEdge, GraphNode, GraphSnapshot, Receipt};
use serde_json::{json, Map, Value};

use crate::{
    infer_graph_unavailable, receipt_highlights, reduce, upsert_items, GraphAction,
    GraphProjection, ProjectionConfig,
};

fn envelope(kind: EnvelopeType, payload: Value) -> Envelope {
    let payload = match payload {
        Value::Object(map) => map,
        other => panic!("test payload must be an object, got {other}"),
    };
    Envelope::new(kind, "session-1", 1_700_000_000_000, payload)
}

fn diff(payload: Value) -> Envelope {
    envelope(EnvelopeType::KgDiff, payload)
}

fn node_ids(projection: &GraphProjection) -> Vec<String> {
    projection
        .nodes
        .iter()
        .filter_map(|node| node.id.clone())
        .collect()
}

#[test]
fn functional_kg_diff_populates_nodes_receipts_and_highlights() {
    let mut projection = GraphProjection::default();
    let changed = projection.apply_envelope(
        &diff(json!({
            "nodes_upsert": [{"id": "n1", "label": "Emotion", "canonical": "Calm"}],
            "receipts": [{"receiptId": "r1", "nodeIds": ["n1"]}]
        })),
        10,
    );

    assert!(changed);
    assert_eq!(projection.nodes.len(), 1);
    assert_eq!(projection.nodes[0].id.as_deref(), Some("n1"));
    assert_eq!(projection.nodes[0].canonical.as_deref(), Some("Calm"));
    assert_eq!(projection.receipts.len(), 1);
    assert_eq!(projection.receipts[0].receipt_id.as_deref(), Some("r1"));
    assert_eq!(projection.highlighted_node_ids, vec!["n1".to_string()]);
    assert_eq!(projection.updated_at_ms, Some(10));
    assert_eq!(projection.last_envelope_type, Some(EnvelopeType::KgDiff));
}

#[test]
fn functional_applying_the_same_diff_twice_is_idempotent() {
    let frame = diff(json!({
        "nodes_upsert": [
            {"id": "n1", "label": "Emotion", "canonical": "Calm"},
            {"id": "n2", "label": "Trigger", "canonical": "Deadline"}
        ],
        "edges_upsert": [
            {"id": "e1", "type": "CAUSES", "sourceId": "n2", "targetId": "n1"}
        ],
        "receipts": [{"receipt_id": "r1", "node_ids": ["n1", "n2"], "edge_ids": ["e1"]}]
    }));

    let mut once = GraphProjection::default();
    once.apply_envelope(&frame, 5);
    let mut twice = once.clone();
    twice.apply_envelope(&frame, 5);

    assert_eq!(once, twice);
}

#[test]
fn functional_reupsert_keeps_position_and_new_ids_append() {
    let mut projection = GraphProjection::default();
    projection.apply_envelope(
        &diff(json!({"nodes_upsert": [{"id": "a"}, {"id": "b"}, {"id": "c"}]})),
        1,
    );
    projection.apply_envelope(
        &diff(json!({"nodes_upsert": [{"id": "d"}, {"id": "b", "canonical": "Bee"}]})),
        2,
    );

    assert_eq!(node_ids(&projection), vec!["a", "b", "c", "d"]);
    assert_eq!(projection.nodes[1].canonical.as_deref(), Some("Bee"));
}

#[test]
fn unit_diff_merge_preserves_fields_the_update_omits() {
    let mut projection = GraphProjection::default();
    projection.apply_envelope(
        &diff(json!({"nodes_upsert": [{
            "id": "n1", "label": "Emotion", "canonical": "Calm",
            "properties": {"intensity": 3}
        }]})),
        1,
    );
    projection.apply_envelope(
        &diff(json!({"nodes_upsert": [{"id": "n1", "lastSeenAt": 99}]})),
        2,
    );

    let node = &projection.nodes[0];
    assert_eq!(node.label.as_deref(), Some("Emotion"));
    assert_eq!(node.canonical.as_deref(), Some("Calm"));
    assert_eq!(node.last_seen_at, Some(99));
    assert_eq!(
        node.properties.as_ref().and_then(|props| props.get("intensity")),
        Some(&json!(3))
    );
}

#[test]
fn unit_dangling_edges_are_kept() {
    let mut projection = GraphProjection::default();
    projection.apply_envelope(
        &diff(json!({"edges_upsert": [
            {"id": "e1", "type": "FEELS", "sourceId": "ghost", "targetId": "missing"}
        ]})),
        1,
    );
    assert_eq!(projection.edges.len(), 1);
    assert!(projection.nodes.is_empty());
}

#[test]
fn functional_highlights_are_recomputed_per_diff() {
    let mut projection = GraphProjection::default();
    projection.apply_envelope(
        &diff(json!({"receipts": [
            {"receiptId": "r1", "nodeIds": ["n1", "n2"]},
            {"receiptId": "r2", "applied_node_ids": ["n2", "n3"]}
        ]})),
        1,
    );
    assert_eq!(projection.highlighted_node_ids, vec!["n1", "n2", "n3"]);

    projection.apply_envelope(&diff(json!({"nodes_upsert": [{"id": "n4"}]})), 2);
    assert!(projection.highlighted_node_ids.is_empty());
    assert_eq!(projection.receipts.len(), 2);
}

#[test]
fn regression_receipts_are_bounded_and_evict_oldest_first() {
    let mut projection = GraphProjection::new(ProjectionConfig { max_receipts: 3 });
    for index in 0..5 {
        projection.apply_envelope(
            &diff(json!({"receipts": [{"receiptId": format!("r{index}")}]})),
            index,
        );
    }
    let ids = projection
        .receipts
        .iter()
        .filter_map(|receipt| receipt.receipt_id.clone())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["r2", "r3", "r4"]);
}

#[test]
fn functional_snapshot_replaces_graph_and_merges_warnings() {
    let mut projection = GraphProjection::default();
    projection.apply_envelope(&diff(json!({"nodes_upsert": [{"id": "stale"}]})), 1);
    projection.apply_envelope(
        &envelope(
            EnvelopeType::ServerError,
            json!({"code": "NEO4J_DOWN", "message": "database offline"}),
        ),
        2,
    );
    assert!(projection.graph_unavailable);

    let snapshot = GraphSnapshot {
        nodes: vec![
            GraphNode::new("n1", "Person", "User"),
            GraphNode::new("n2", "Emotion", "Overwhelmed"),
            GraphNode::new("n1", "Person", "Client"),
        ],
        edges: vec![GraphEdge::new("e1", "FEELS", "n1", "n2")],
        warnings: vec!["partial graph".to_string(), "partial graph".to_string()],
    };
    projection.apply(GraphAction::ApplySnapshot(snapshot), 3);

    assert_eq!(node_ids(&projection), vec!["n1", "n2"]);
    assert_eq!(projection.nodes[0].canonical.as_deref(), Some("Client"));
    assert_eq!(projection.edges.len(), 1);
    assert_eq!(projection.warnings, vec!["partial graph".to_string()]);
    assert!(!projection.graph_unavailable);
    assert_eq!(projection.updated_at_ms, Some(3));
}

#[test]
fn functional_tool_calls_are_replaced_not_merged() {
    let mut projection = GraphProjection::default();
    projection.apply_envelope(
        &envelope(
            EnvelopeType::KgToolCallsApplied,
            json!({"calls": [{"name": "upsert_node"}, {"name": "link"}], "dropped_calls": [{"name": "x"}]}),
        ),
        1,
    );
    assert_eq!(projection.tool_calls.len(), 2);
    assert_eq!(projection.dropped_tool_calls.len(), 1);

    projection.apply_envelope(
        &envelope(
            EnvelopeType::KgToolCallsApplied,
            json!({"calls": [{"name": "only"}]}),
        ),
        2,
    );
    assert_eq!(projection.tool_calls, vec![json!({"name": "only"})]);
    assert!(projection.dropped_tool_calls.is_empty());
}

#[test]
fn functional_insight_replaces_card_and_merges_receipts() {
    let mut projection = GraphProjection::default();
    projection.apply_envelope(
        &envelope(
            EnvelopeType::CoachInsight,
            json!({"card": {"title": "Notice the pause"}, "receipts": [{"receiptId": "r9"}]}),
        ),
        1,
    );
    assert_eq!(
        projection.insight_card,
        Some(json!({"title": "Notice the pause"}))
    );
    assert_eq!(projection.receipts.len(), 1);

    projection.apply_envelope(
        &envelope(EnvelopeType::CoachInsight, json!({"title": "Bare card"})),
        2,
    );
    assert_eq!(projection.insight_card, Some(json!({"title": "Bare card"})));
    assert_eq!(projection.receipts.len(), 1);
}

#[test]
fn unit_safety_alert_and_status_store_payload_verbatim() {
    let mut projection = GraphProjection::default();
    projection.apply_envelope(
        &envelope(EnvelopeType::SafetyAlert, json!({"level": "high", "reason": "crisis"})),
        1,
    );
    assert_eq!(
        projection.safety_signal,
        Some(json!({"level": "high", "reason": "crisis"}))
    );
    projection.apply_envelope(
        &envelope(EnvelopeType::SafetyStatus, json!({"level": "ok"})),
        2,
    );
    assert_eq!(projection.safety_signal, Some(json!({"level": "ok"})));
}

#[test]
fn regression_graph_unavailable_only_clears_on_snapshot_or_diff() {
    let mut projection = GraphProjection::default();
    projection.apply_envelope(
        &envelope(
            EnvelopeType::ServerError,
            json!({"code": "internal", "message": "x", "details": {"subsystem": "Graph"}}),
        ),
        1,
    );
    assert!(projection.graph_unavailable);

    projection.apply_envelope(
        &envelope(EnvelopeType::ServerError, json!({"code": "rate_limited"})),
        2,
    );
    assert!(projection.graph_unavailable);
    assert_eq!(
        projection.last_server_error,
        Some(json!({"code": "rate_limited"}))
    );

    projection.apply_envelope(&envelope(EnvelopeType::SafetyStatus, json!({})), 3);
    assert!(projection.graph_unavailable);

    projection.apply_envelope(&diff(json!({})), 4);
    assert!(!projection.graph_unavailable);
}

#[test]
fn unit_graph_unavailable_inference_markers() {
    let payload = |value: Value| value.as_object().cloned().unwrap_or_else(Map::new);
    assert!(infer_graph_unavailable(&payload(json!({"code": "GRAPH_TIMEOUT"}))));
    assert!(infer_graph_unavailable(&payload(
        json!({"message": "Neo4j connection refused"})
    )));
    assert!(infer_graph_unavailable(&payload(
        json!({"details": {"subsystem": "neo4j"}})
    )));
    assert!(!infer_graph_unavailable(&payload(
        json!({"details": {"subsystem": "neo4j-replica"}})
    )));
    assert!(!infer_graph_unavailable(&payload(json!({"code": 503}))));
    assert!(!infer_graph_unavailable(&payload(json!({}))));
}

#[test]
fn unit_pass_through_envelopes_do_not_touch_state() {
    let mut projection = GraphProjection::default();
    let changed = projection.apply_envelope(&envelope(EnvelopeType::ServerPong, json!({})), 7);
    assert!(!changed);
    assert_eq!(projection.updated_at_ms, None);
    assert_eq!(projection.last_envelope_type, Some(EnvelopeType::ServerPong));
}

#[test]
fn functional_reset_returns_to_empty_and_keeps_config() {
    let projection = GraphProjection::new(ProjectionConfig { max_receipts: 7 });
    let projection = reduce(
        projection,
        GraphAction::ApplyEnvelope(diff(json!({"nodes_upsert": [{"id": "n1"}]}))),
        1,
    );
    assert_eq!(projection.nodes.len(), 1);
    let projection = reduce(projection, GraphAction::Reset, 2);
    assert!(projection.nodes.is_empty());
    assert_eq!(projection.updated_at_ms, None);
    assert_eq!(projection.config().max_receipts, 7);
}

#[test]
fn functional_selected_receipt_drives_highlights() {
    let mut projection = GraphProjection::default();
    projection.apply_envelope(
        &diff(json!({"receipts": [
            {"receiptId": "r1", "nodeIds": ["n1"], "edgeIds": ["e1"]},
            {"receiptId": "r2", "nodeIds": ["n2"]}
        ]})),
        1,
    );
    projection.apply(GraphAction::SelectReceipt(Some("r1".to_string())), 2);
    let highlights = projection.selected_highlights();
    assert_eq!(highlights.highlight_node_ids, vec!["n1"]);
    assert_eq!(highlights.highlight_edge_ids, vec!["e1"]);

    let none = receipt_highlights(&projection.receipts, Some("missing"));
    assert!(none.highlight_node_ids.is_empty());
    assert!(receipt_highlights(&projection.receipts, None)
        .highlight_edge_ids
        .is_empty());
}

#[test]
fn unit_upsert_items_drops_records_without_identity() {
    let mut receipts: Vec<Receipt> = Vec::new();
    upsert_items(
        &mut receipts,
        vec![
            Receipt::default(),
            serde_json::from_value(json!({"message_id": "m1", "tool_name": "a"})).expect("r"),
            serde_json::from_value(json!({"message_id": "m1", "tool_name": "b"})).expect("r"),
        ],
    );
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].tool_name.as_deref(), Some("b"));
}
