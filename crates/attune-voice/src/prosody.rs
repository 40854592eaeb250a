use attune_protocol::ProsodyScores;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProsodySignal {
    pub label: String,
    pub score: f64,
}

/// Ranks expression scores highest first. A `limit` of zero keeps every signal.
pub fn prosody_scores_to_signals(scores: &ProsodyScores, limit: usize) -> Vec<ProsodySignal> {
    let mut signals = scores
        .iter()
        .map(|(label, score)| ProsodySignal {
            label: label.clone(),
            score: *score,
        })
        .collect::<Vec<_>>();
    signals.sort_by(|left, right| right.score.total_cmp(&left.score));
    if limit > 0 {
        signals.truncate(limit);
    }
    signals
}
