use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use super::config::Config;
use super::consts;

/// Builds the websocket handshake request. The bearer header is only set
/// when an auth token is configured; the bot key and device id travel in
/// the `Init` message instead.
pub fn build_request(config: &Config) -> tungstenite::Result<Request> {
    let mut request = config.url().into_client_request()?;

    let token = config.auth_token().expose_secret();
    if !token.is_empty() {
        let bearer = format!("Bearer {}", token);
        request.headers_mut().insert(consts::AUTHORIZATION_HEADER, bearer.as_str().parse()?);
    }

    Ok(request)
}
