use biometrics::{Collector, Counter};

pub(crate) static SSE_FRAMES: Counter = Counter::new("relaychat.sse.frames");

pub(crate) static ADAPTER_STREAMS: Counter = Counter::new("relaychat.adapter.streams");
pub(crate) static ADAPTER_CHUNKS: Counter = Counter::new("relaychat.adapter.chunks");
pub(crate) static ADAPTER_ERRORS: Counter = Counter::new("relaychat.adapter.errors");

pub(crate) static RELAY_REQUESTS: Counter = Counter::new("relaychat.relay.requests");
pub(crate) static RELAY_UNAUTHORIZED: Counter = Counter::new("relaychat.relay.unauthorized");
pub(crate) static RELAY_UNKNOWN_MODEL: Counter = Counter::new("relaychat.relay.unknown_model");
pub(crate) static RELAY_STREAM_ERRORS: Counter = Counter::new("relaychat.relay.stream_errors");
pub(crate) static RELAY_STREAMS_CLOSED: Counter = Counter::new("relaychat.relay.streams_closed");

pub(crate) static SESSION_TURNS_STARTED: Counter = Counter::new("relaychat.session.turns_started");
pub(crate) static SESSION_TURNS_COMMITTED: Counter =
    Counter::new("relaychat.session.turns_committed");
pub(crate) static SESSION_TURNS_ABORTED: Counter = Counter::new("relaychat.session.turns_aborted");
pub(crate) static SESSION_TURNS_FAILED: Counter = Counter::new("relaychat.session.turns_failed");
pub(crate) static SESSION_DRAFTS_RESTORED: Counter =
    Counter::new("relaychat.session.drafts_restored");

pub(crate) static STORE_RESETS: Counter = Counter::new("relaychat.store.resets");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&SSE_FRAMES);

    collector.register_counter(&ADAPTER_STREAMS);
    collector.register_counter(&ADAPTER_CHUNKS);
    collector.register_counter(&ADAPTER_ERRORS);

    collector.register_counter(&RELAY_REQUESTS);
    collector.register_counter(&RELAY_UNAUTHORIZED);
    collector.register_counter(&RELAY_UNKNOWN_MODEL);
    collector.register_counter(&RELAY_STREAM_ERRORS);
    collector.register_counter(&RELAY_STREAMS_CLOSED);

    collector.register_counter(&SESSION_TURNS_STARTED);
    collector.register_counter(&SESSION_TURNS_COMMITTED);
    collector.register_counter(&SESSION_TURNS_ABORTED);
    collector.register_counter(&SESSION_TURNS_FAILED);
    collector.register_counter(&SESSION_DRAFTS_RESTORED);

    collector.register_counter(&STORE_RESETS);
}
