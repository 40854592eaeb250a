use attune_graph::GraphProjection;
use attune_protocol::EnvelopeType;
use attune_session::SessionRecord;
use chrono::DateTime;

/// One-line view of the projection after an envelope was applied.
pub(crate) fn projection_summary(kind: EnvelopeType, projection: &GraphProjection) -> String {
    let mut line = format!(
        "{} nodes={} edges={} receipts={}",
        kind.as_str(),
        projection.nodes.len(),
        projection.edges.len(),
        projection.receipts.len()
    );
    if !projection.highlighted_node_ids.is_empty() {
        line.push_str(&format!(
            " highlighted={}",
            projection.highlighted_node_ids.join(",")
        ));
    }
    if !projection.tool_calls.is_empty() || !projection.dropped_tool_calls.is_empty() {
        line.push_str(&format!(
            " tool_calls={} dropped={}",
            projection.tool_calls.len(),
            projection.dropped_tool_calls.len()
        ));
    }
    if !projection.warnings.is_empty() {
        line.push_str(&format!(" warnings={}", projection.warnings.len()));
    }
    if projection.graph_unavailable {
        line.push_str(" graph_unavailable");
    }
    line
}

pub(crate) fn session_list(records: &[SessionRecord], active_session_id: Option<&str>) -> String {
    if records.is_empty() {
        return "no recorded sessions\n".to_string();
    }
    let mut output = String::new();
    for record in records {
        let marker = if active_session_id == Some(record.session_id.as_str()) {
            "*"
        } else {
            " "
        };
        let created = i64::try_from(record.created_at_ms)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .map(|created| created.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        output.push_str(&format!(
            "{marker} #{} {} created={created}",
            record.display_number, record.session_id
        ));
        if let Some(chat_group_id) = &record.chat_group_id {
            output.push_str(&format!(" chat_group={chat_group_id}"));
        }
        output.push('\n');
    }
    output
}
