//! Conversion from axum's header map to the service's `RequestHeaders`.

use axum::http::HeaderMap;

use phoenix_guard_service::identity::RequestHeaders;

/// Collects the identification headers. Non-UTF-8 values are skipped.
pub fn request_headers(headers: &HeaderMap) -> RequestHeaders {
    RequestHeaders::from_pairs(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn picks_identification_headers() {
        let mut map = HeaderMap::new();
        map.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        map.insert("user-agent", HeaderValue::from_static("UA1"));
        map.insert("content-type", HeaderValue::from_static("text/plain"));
        map.insert("accept-language", HeaderValue::from_bytes(b"\xff").unwrap());

        let headers = request_headers(&map);
        assert_eq!(headers.real_ip.as_deref(), Some("198.51.100.7"));
        assert_eq!(headers.user_agent.as_deref(), Some("UA1"));
        assert_eq!(headers.accept_language, None);
    }
}
