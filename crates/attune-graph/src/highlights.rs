use attune_protocol::Receipt;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReceiptHighlights {
    pub highlight_node_ids: Vec<String>,
    pub highlight_edge_ids: Vec<String>,
}

/// Graph ids to highlight for the receipt the user selected, empty when none matches.
pub fn receipt_highlights(
    receipts: &[Receipt],
    selected_receipt_id: Option<&str>,
) -> ReceiptHighlights {
    let Some(selected) = selected_receipt_id.filter(|id| !id.is_empty()) else {
        return ReceiptHighlights::default();
    };
    receipts
        .iter()
        .find(|receipt| receipt.identity_key().as_deref() == Some(selected))
        .map(|receipt| ReceiptHighlights {
            highlight_node_ids: receipt.touched_node_ids(),
            highlight_edge_ids: receipt.touched_edge_ids(),
        })
        .unwrap_or_default()
}
