// -
// Event stream protocol

/// Subscriber endpoint appended to `http://{ip}:{port}{context_path}`
pub(crate) const SUBSCRIBER_PATH: &str = "/dts/sdk/subscriber";

/// Marker header asking the server for prefetch semantics
pub(crate) const AUTHORIZATION_FETCH_HEADER: &str = "Authorization-fetch";

pub(crate) const ID_FIELD: &str = "id:";
pub(crate) const EVENT_FIELD: &str = "event:";
pub(crate) const DATA_FIELD: &str = "data:";

// -
// Discovery key space, appended to the configured root prefix

pub(crate) const SDK_INSTANCE_KEY: &str = "sdk:ls:";
pub(crate) const SDK_SUBSCRIBE_CHANNEL: &str = "sdk:mq:sub";
pub(crate) const SERVER_SUBSCRIBE_CHANNEL: &str = "svr:mq:sub";
pub(crate) const SERVER_UNSUBSCRIBE_CHANNEL: &str = "svr:mq:unsub";
pub(crate) const SERVER_INSTANCE_KEY_PATTERN: &str = "svr:ls:*";

/// Lower bound of the self-record TTL (seconds)
pub(crate) const MIN_INSTANCE_EXPIRE_SEC: u64 = 2;

/// Heartbeat period used when the TTL sits at its lower bound
pub(crate) const MIN_HEARTBEAT_DELAY_MS: u64 = 500;

/// SCAN batch hint
pub(crate) const SCAN_COUNT: usize = 20;
