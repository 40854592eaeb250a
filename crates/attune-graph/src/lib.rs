//! Client-side projection of the session knowledge graph.
//!
//! Folds REST snapshots and socket envelopes (`kg.diff`, tool-call reports,
//! insights, safety signals, server errors) into one owned state value. All
//! transitions are synchronous and take the current time as an argument.

mod highlights;
mod projection;
mod upsert;

pub use highlights::{receipt_highlights, ReceiptHighlights};
pub use projection::{
    infer_graph_unavailable, reduce, GraphAction, GraphProjection, ProjectionConfig,
    DEFAULT_MAX_RECEIPTS,
};
pub use upsert::{upsert_items, Keyed};

#[cfg(test)]
mod tests;
