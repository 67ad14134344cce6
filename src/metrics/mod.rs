use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::Histogram;
use prometheus::HistogramOpts;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::error;


lazy_static! {
    pub static ref EVENTS_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("dts_sdk_events_received", "Change events decoded per server account"),
        &["account"]
    )
    .expect("metric can not be created");

    pub static ref RECORDS_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("dts_sdk_records_dropped", "Stream records dropped before dispatch"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref RECONNECT_ATTEMPTS: IntCounter =
        IntCounter::new("dts_sdk_reconnect_attempts", "Event stream reconnect attempts")
            .expect("metric can not be created");

    pub static ref LIVE_STREAMS: IntGauge =
        IntGauge::new("dts_sdk_live_streams", "Event streams currently being dumped")
            .expect("metric can not be created");

    pub static ref ACTIVE_LISTENERS: IntGauge =
        IntGauge::new("dts_sdk_active_listeners", "Listeners held by the dispatcher")
            .expect("metric can not be created");

    pub static ref LISTEN_COST_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new("dts_sdk_listen_cost_ms", "Elapsed time of resolved row futures in ms")
            .buckets(exponential_buckets(1.0, 2.0, 14).expect("valid buckets"))
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = build_registry();
}

fn build_registry() -> Registry {
    let registry = Registry::new();
    register_custom_metrics(&registry);
    registry
}

fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(EVENTS_RECEIVED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(RECORDS_DROPPED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(RECONNECT_ATTEMPTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(LIVE_STREAMS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ACTIVE_LISTENERS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(LISTEN_COST_MS.clone()))
        .expect("collector can be registered");
}

/// Renders every sdk collector in the prometheus text exposition format.
///
/// The sdk never serves metrics itself; the embedding application exposes
/// this body on whatever endpoint it already runs.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode sdk metrics: {}", e);
        return String::default();
    }
    match String::from_utf8(buffer) {
        Ok(body) => body,
        Err(e) => {
            error!("sdk metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
