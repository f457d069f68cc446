//! HTTP surface of the admission oracle.
//!
//! The proxy's access hook calls `GET /njs/address_access` with the
//! connection details in headers and treats anything but `200` as deny.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::get,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::oracle::decision::{AdmissionOracle, AdmissionRequest, CheckKind};

pub const ACCESS_PATH: &str = "/njs/address_access";
pub const HEALTH_PATH: &str = "/health";

pub const HEADER_LISTEN_ID: &str = "listen_id";
pub const HEADER_REALIP: &str = "realip_remote_addr";
pub const HEADER_REMOTE: &str = "remote_addr";
pub const HEADER_TYPE: &str = "type";

/// Build the router with tracing, request id, and timeout layers.
#[allow(deprecated)]
pub fn build_router(oracle: Arc<AdmissionOracle>, request_timeout: Duration) -> Router {
    Router::new()
        .route(ACCESS_PATH, get(address_access))
        .route(HEALTH_PATH, get(health))
        .with_state(oracle)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("")
}

/// Read the callback headers. A missing, zero, or non-numeric listener id
/// selects the global check.
pub fn parse_request(headers: &HeaderMap) -> AdmissionRequest {
    AdmissionRequest {
        listener_id: parse_listen_id(header(headers, HEADER_LISTEN_ID)),
        realip_remote_addr: header(headers, HEADER_REALIP).to_string(),
        raw_remote_addr: header(headers, HEADER_REMOTE).to_string(),
        check_kind: CheckKind::parse(header(headers, HEADER_TYPE)),
    }
}

/// Integer prefix of `raw`, the way the proxy's script reads it: optional
/// sign, then digits, trailing junk ignored. Magnitudes past `i64` saturate.
fn parse_listen_id(raw: &str) -> Option<i64> {
    let (negative, rest) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }

    let magnitude = rest[..digits].parse::<i64>().unwrap_or(i64::MAX);
    let id = if negative { -magnitude } else { magnitude };
    (id != 0).then_some(id)
}

async fn address_access(State(oracle): State<Arc<AdmissionOracle>>, headers: HeaderMap) -> StatusCode {
    let request = parse_request(&headers);
    if oracle.decide(&request).await.is_allowed() {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Serve plain HTTP on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admission oracle listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Admission oracle stopped");
    Ok(())
}

/// Serve HTTPS until `shutdown` resolves.
pub async fn serve_tls(
    addr: SocketAddr,
    router: Router,
    tls: RustlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let handle = axum_server::Handle::new();
    let stopper = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        stopper.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    tracing::info!(address = %addr, "Admission oracle listening (TLS)");
    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;

    tracing::info!("Admission oracle stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_request() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_LISTEN_ID, HeaderValue::from_static("12"));
        headers.insert(HEADER_REALIP, HeaderValue::from_static(" 1.2.3.4 "));
        headers.insert(HEADER_REMOTE, HeaderValue::from_static("10.0.0.1"));
        headers.insert(HEADER_TYPE, HeaderValue::from_static("stream"));

        let request = parse_request(&headers);
        assert_eq!(request.listener_id, Some(12));
        assert_eq!(request.realip_remote_addr, "1.2.3.4");
        assert_eq!(request.raw_remote_addr, "10.0.0.1");
        assert_eq!(request.check_kind, CheckKind::Stream);
    }

    #[test]
    fn test_zero_or_garbage_listener_is_global() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_LISTEN_ID, HeaderValue::from_static("0"));
        assert_eq!(parse_request(&headers).listener_id, None);

        headers.insert(HEADER_LISTEN_ID, HeaderValue::from_static("abc"));
        assert_eq!(parse_request(&headers).listener_id, None);

        headers.insert(HEADER_LISTEN_ID, HeaderValue::from_static("-0"));
        assert_eq!(parse_request(&headers).listener_id, None);

        assert_eq!(parse_request(&HeaderMap::new()).listener_id, None);
    }

    #[test]
    fn test_listener_id_uses_integer_prefix() {
        let cases = [
            ("12abc", Some(12)),
            ("+7", Some(7)),
            ("-1", Some(-1)),
            ("4294967296", Some(4_294_967_296)),
            ("99999999999999999999999", Some(i64::MAX)),
            ("-99999999999999999999999", Some(-i64::MAX)),
            ("0x10", None),
        ];
        for (raw, expected) in cases {
            let mut headers = HeaderMap::new();
            headers.insert(HEADER_LISTEN_ID, HeaderValue::from_static(raw));
            assert_eq!(parse_request(&headers).listener_id, expected, "{raw}");
        }
    }
}
