use std::time::Duration;

pub const BOTWIRE_URL: &str = "BOTWIRE_URL";
pub const BOTWIRE_BOT_KEY: &str = "BOTWIRE_BOT_KEY";
pub const BOTWIRE_DEVICE_ID: &str = "BOTWIRE_DEVICE_ID";
pub const BOTWIRE_AUTH_TOKEN: &str = "BOTWIRE_AUTH_TOKEN";

pub const DEFAULT_URL: &str = "wss://api.botwire.dev/v1/session";

pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Keep-alive ping cadence while the socket is open.
pub const PING_PERIOD: Duration = Duration::from_secs(10);
