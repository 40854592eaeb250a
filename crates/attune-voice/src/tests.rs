//! Tests for voice event forwarding policy.

use std::sync::{Arc, Mutex};

use attune_core::ManualClock;
use attune_protocol::{EnvelopeType, MessageRole};
use serde_json::{json, Map, Value};

use crate::{EnvelopeSink, EventForwarder, ForwardDisposition, ForwarderConfig};

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(EnvelopeType, Map<String, Value>)>>,
    reject: bool,
}

impl RecordingSink {
    fn sent(&self) -> Vec<(EnvelopeType, Map<String, Value>)> {
        self.sent.lock().expect("sink lock").clone()
    }
}

impl EnvelopeSink for RecordingSink {
    fn send_envelope(&self, kind: EnvelopeType, payload: Map<String, Value>) -> bool {
        if self.reject {
            return false;
        }
        self.sent.lock().expect("sink lock").push((kind, payload));
        true
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    sink: Arc<RecordingSink>,
    forwarder: EventForwarder,
}

fn harness_with(config: ForwarderConfig, session_id: Option<&str>) -> Harness {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let sink = Arc::new(RecordingSink::default());
    let forwarder = EventForwarder::new(config, session_id.map(str::to_string), clock.clone())
        .with_sink(sink.clone());
    Harness {
        clock,
        sink,
        forwarder,
    }
}

fn harness() -> Harness {
    harness_with(ForwarderConfig::default(), Some("session-1"))
}

fn user_message(id: &str, content: &str, interim: bool) -> Value {
    json!({
        "type": "user_message",
        "message_id": id,
        "content": content,
        "interim": interim,
        "timestamp_ms": 42
    })
}

#[test]
fn functional_interim_user_message_is_tracked_but_never_sent() {
    let mut h = harness();
    let outcome = h
        .forwarder
        .forward_event(&user_message("m1", "I feel", true))
        .expect("outcome");

    assert!(!outcome.forwarded);
    assert_eq!(outcome.envelope_type, "evi.user_message.interim");
    assert_eq!(outcome.disposition, ForwardDisposition::InterimNotForwarded);
    assert!(h.sink.sent().is_empty());
    assert_eq!(h.forwarder.transcript().len(), 1);
    assert!(h.forwarder.transcript()[0].interim);
    assert!(h.forwarder.final_transcript().is_empty());

    let outcome = h
        .forwarder
        .forward_event(&user_message("m1", "I feel calm", false))
        .expect("outcome");
    assert!(outcome.forwarded);
    assert_eq!(outcome.envelope_type, "evi.user_message.final");

    let sent = h.sink.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, EnvelopeType::EviUserMessageFinal);
    assert_eq!(sent[0].1["message_id"], "m1");
    assert_eq!(sent[0].1["content"], "I feel calm");
    assert_eq!(sent[0].1["interim"], false);
    assert_eq!(sent[0].1["role"], "user");
    assert_eq!(sent[0].1["prosody_scores"], Value::Null);
    assert_eq!(sent[0].1["timestamp_ms"], 42);

    assert_eq!(h.forwarder.transcript().len(), 1);
    assert_eq!(h.forwarder.transcript()[0].text, "I feel calm");
    assert_eq!(h.forwarder.final_transcript().len(), 1);
}

#[test]
fn functional_duplicate_inside_window_is_suppressed_and_reported() {
    let mut h = harness();
    let event = user_message("m1", "hello", false);

    assert!(h.forwarder.forward_event(&event).expect("first").forwarded);
    h.clock.advance_ms(749);
    let duplicate = h.forwarder.forward_event(&event).expect("second");
    assert!(!duplicate.forwarded);
    assert_eq!(duplicate.disposition, ForwardDisposition::SuppressedDuplicate);
    assert_eq!(duplicate.envelope_type, "evi.user_message.final");
    assert_eq!(h.sink.sent().len(), 1);

    h.clock.advance_ms(751);
    assert!(h.forwarder.forward_event(&event).expect("third").forwarded);
    assert_eq!(h.sink.sent().len(), 2);
}

#[test]
fn unit_dedupe_signature_includes_content_and_session() {
    let mut h = harness();
    assert!(h
        .forwarder
        .forward_event(&user_message("m1", "hello", false))
        .expect("first")
        .forwarded);
    assert!(h
        .forwarder
        .forward_event(&user_message("m1", "hello again", false))
        .expect("edited")
        .forwarded);

    let mut other = harness_with(ForwarderConfig::default(), None);
    assert!(other
        .forwarder
        .forward_event(&user_message("m1", "hello", false))
        .expect("no session")
        .forwarded);
}

#[test]
fn functional_assistant_messages_forward_unless_disabled() {
    let mut h = harness();
    let event = json!({"type": "assistant_message", "id": "a1", "message": {"content": "Take a breath."}});
    let outcome = h.forwarder.forward_event(&event).expect("outcome");
    assert!(outcome.forwarded);
    assert_eq!(outcome.payload["content"], "Take a breath.");
    assert_eq!(outcome.payload["role"], "assistant");
    assert!(outcome.payload.get("interim").is_none());
    assert_eq!(h.forwarder.transcript()[0].role, MessageRole::Assistant);

    let mut quiet = harness_with(
        ForwarderConfig {
            forward_assistant_messages: false,
            ..ForwarderConfig::default()
        },
        Some("session-1"),
    );
    let outcome = quiet.forwarder.forward_event(&event).expect("outcome");
    assert!(!outcome.forwarded);
    assert_eq!(outcome.disposition, ForwardDisposition::DisabledByConfig);
    assert!(quiet.sink.sent().is_empty());
    assert_eq!(quiet.forwarder.transcript().len(), 1);
}

#[test]
fn functional_chat_metadata_forwards_and_exposes_chat_group() {
    let mut h = harness();
    let event = json!({"type": "chat_metadata", "chat_group_id": "g-1", "chat_id": "c-1", "timestamp": 7});
    let outcome = h.forwarder.forward_event(&event).expect("outcome");
    assert!(outcome.forwarded);
    assert_eq!(
        outcome.payload,
        json!({"timestamp_ms": 7, "raw_event": event.clone()})
    );

    let metadata = outcome.chat_metadata().expect("metadata");
    assert_eq!(metadata.chat_group_id.as_deref(), Some("g-1"));
    assert_eq!(metadata.chat_id.as_deref(), Some("c-1"));

    let duplicate = h.forwarder.forward_event(&event).expect("duplicate");
    assert_eq!(duplicate.disposition, ForwardDisposition::SuppressedDuplicate);

    let mut quiet = harness_with(
        ForwarderConfig {
            forward_chat_metadata: false,
            ..ForwarderConfig::default()
        },
        Some("session-1"),
    );
    let outcome = quiet.forwarder.forward_event(&event).expect("outcome");
    assert_eq!(outcome.disposition, ForwardDisposition::DisabledByConfig);
}

#[test]
fn unit_unknown_and_untyped_events() {
    let mut h = harness();
    let raw = json!({"type": "audio_output", "data": "AAAA"});
    let outcome = h.forwarder.forward_event(&raw).expect("outcome");
    assert!(!outcome.forwarded);
    assert_eq!(outcome.envelope_type, "audio_output");
    assert_eq!(outcome.payload, raw);
    assert_eq!(outcome.disposition, ForwardDisposition::Unrecognized);

    assert!(h.forwarder.forward_event(&json!({"content": "x"})).is_none());
    assert!(h.sink.sent().is_empty());
}

#[test]
fn regression_sink_rejection_is_not_reported_as_forwarded() {
    let clock = Arc::new(ManualClock::new(0));
    let sink = Arc::new(RecordingSink {
        reject: true,
        ..RecordingSink::default()
    });
    let mut forwarder =
        EventForwarder::new(ForwarderConfig::default(), Some("s".to_string()), clock)
            .with_sink(sink);
    let outcome = forwarder
        .forward_event(&user_message("m1", "hi", false))
        .expect("outcome");
    assert!(!outcome.forwarded);
    assert_eq!(outcome.disposition, ForwardDisposition::SinkRejected);
    assert!(forwarder.last_forwarded_event().is_none());
}

#[test]
fn functional_prosody_frame_and_last_forwarded_event_are_tracked() {
    let mut h = harness();
    let event = json!({
        "type": "user_message",
        "message_id": "m9",
        "content": "ok",
        "models": {"prosody": {"scores": {"Calmness": 0.8, "Anxiety": 0.1}}}
    });
    let outcome = h.forwarder.forward_event(&event).expect("outcome");
    assert_eq!(outcome.payload["prosody_scores"]["Calmness"], 0.8);

    let frame = h.forwarder.latest_prosody_frame().expect("frame");
    assert_eq!(frame.message_id, "m9");
    assert_eq!(frame.prosody_scores.len(), 2);
    assert_eq!(frame.timestamp_ms, 1_000_000);

    let last = h.forwarder.last_forwarded_event().expect("last");
    assert_eq!(last.envelope_type, EnvelopeType::EviUserMessageFinal);
    assert_eq!(last.sent_at_ms, 1_000_000);
}

#[test]
fn regression_transcript_is_bounded_to_most_recent_entries() {
    let mut h = harness_with(
        ForwarderConfig {
            max_transcript_entries: 3,
            ..ForwarderConfig::default()
        },
        Some("session-1"),
    );
    for index in 0..5 {
        h.forwarder
            .forward_event(&user_message(&format!("m{index}"), "x", true));
    }
    let ids = h
        .forwarder
        .transcript()
        .iter()
        .map(|entry| entry.message_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["m2", "m3", "m4"]);
}

#[test]
fn functional_consume_pending_advances_and_rewinds_cursor() {
    let mut h = harness();
    let mut stream = vec![user_message("m1", "one", false)];
    assert_eq!(h.forwarder.consume_pending(&stream).len(), 1);
    assert_eq!(h.forwarder.consumed(), 1);
    assert!(h.forwarder.consume_pending(&stream).is_empty());

    stream.push(json!({"type": "audio_output"}));
    stream.push(user_message("m2", "two", false));
    let outcomes = h.forwarder.consume_pending(&stream);
    assert_eq!(outcomes.len(), 2);
    assert_eq!(h.forwarder.consumed(), 3);
    assert_eq!(h.sink.sent().len(), 2);

    h.clock.advance_ms(1_000);
    let restarted = vec![user_message("m3", "three", false)];
    assert_eq!(h.forwarder.consume_pending(&restarted).len(), 1);
    assert_eq!(h.forwarder.consumed(), 1);
}

#[test]
fn functional_reset_clears_all_forwarder_state() {
    let mut h = harness();
    let event = user_message("m1", "hello", false);
    h.forwarder.consume_pending(std::slice::from_ref(&event));
    h.forwarder.reset();

    assert!(h.forwarder.transcript().is_empty());
    assert!(h.forwarder.last_forwarded_event().is_none());
    assert!(h.forwarder.latest_prosody_frame().is_none());
    assert_eq!(h.forwarder.consumed(), 0);
    assert!(h.forwarder.forward_event(&event).expect("after reset").forwarded);
}
