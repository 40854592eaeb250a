use std::collections::HashMap;

use attune_protocol::{GraphEdge, GraphNode, Receipt};

/// Record with a stable identity that can absorb a partial update of itself.
pub trait Keyed {
    fn identity_key(&self) -> Option<String>;
    fn merge_from(&mut self, incoming: Self);
}

impl Keyed for GraphNode {
    fn identity_key(&self) -> Option<String> {
        GraphNode::identity_key(self)
    }

    fn merge_from(&mut self, incoming: Self) {
        GraphNode::merge_from(self, incoming);
    }
}

impl Keyed for GraphEdge {
    fn identity_key(&self) -> Option<String> {
        GraphEdge::identity_key(self)
    }

    fn merge_from(&mut self, incoming: Self) {
        GraphEdge::merge_from(self, incoming);
    }
}

impl Keyed for Receipt {
    fn identity_key(&self) -> Option<String> {
        Receipt::identity_key(self)
    }

    fn merge_from(&mut self, incoming: Self) {
        Receipt::merge_from(self, incoming);
    }
}

/// Shallow-merges `incoming` into `current` by identity.
///
/// Existing ids keep their position, new ids are appended in arrival order,
/// and entries without a derivable identity are dropped. Applying the same
/// batch twice leaves the collection unchanged after the first application.
pub fn upsert_items<T: Keyed>(current: &mut Vec<T>, incoming: Vec<T>) {
    let mut index = HashMap::with_capacity(current.len() + incoming.len());
    let mut retained = Vec::with_capacity(current.len());
    for item in current.drain(..) {
        let Some(key) = item.identity_key() else {
            continue;
        };
        match index.get(&key) {
            Some(&position) => {
                let existing: &mut T = &mut retained[position];
                existing.merge_from(item);
            }
            None => {
                index.insert(key, retained.len());
                retained.push(item);
            }
        }
    }

    for item in incoming {
        let Some(key) = item.identity_key() else {
            tracing::debug!("dropping graph record without identity");
            continue;
        };
        match index.get(&key) {
            Some(&position) => retained[position].merge_from(item),
            None => {
                index.insert(key, retained.len());
                retained.push(item);
            }
        }
    }
    *current = retained;
}
