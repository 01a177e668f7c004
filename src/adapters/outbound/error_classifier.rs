//! Error Classifier
//!
//! Maps transport failures and non-2xx responses onto [`QueryError`].

use super::response_decoder;
use crate::domain::errors::QueryError;
use crate::domain::value_objects::ErrorType;
use std::error::Error;
use std::io;

/// Classify a failed HTTP exchange.
pub fn classify_transport(err: &reqwest::Error) -> QueryError {
    if err.is_timeout() {
        return QueryError::Timeout;
    }
    if has_io_kind(err, io::ErrorKind::ConnectionRefused) {
        return QueryError::ConnectionRefused;
    }
    QueryError::Connection(error_chain(err))
}

/// Classify a non-2xx response from its status code and body.
///
/// A body carrying an API error envelope keeps its declared class.
/// Anything else is classified by the status code family.
pub fn classify_status(status: u16, body: &[u8]) -> QueryError {
    if let Some(err) = response_decoder::decode_error(body) {
        return err;
    }
    match status / 100 {
        4 => QueryError::api(ErrorType::Client, format!("client error: {}", status)),
        5 => QueryError::api(ErrorType::Server, format!("server error: {}", status)),
        _ => QueryError::bad_response(format!("bad response code: {}", status)),
    }
}

fn has_io_kind(err: &(dyn Error + 'static), kind: io::ErrorKind) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == kind {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Render an error and its sources as `outer: inner: root`.
pub fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(err);
    while let Some(e) = current {
        let msg = e.to_string();
        // hyper and reqwest often repeat the inner message
        if !parts.iter().any(|p| p.contains(&msg)) {
            parts.push(msg);
        }
        current = e.source();
    }
    parts.join(": ")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::fmt;
    use std::time::Duration;

    #[derive(Debug)]
    struct Wrapped(io::Error);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "error trying to connect")
        }
    }

    impl Error for Wrapped {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_has_io_kind_walks_chain() {
        let err = Wrapped(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(has_io_kind(&err, io::ErrorKind::ConnectionRefused));
        assert!(!has_io_kind(&err, io::ErrorKind::TimedOut));
    }

    #[test]
    fn test_error_chain() {
        let err = Wrapped(io::Error::new(io::ErrorKind::Other, "dns failure"));
        assert_eq!(error_chain(&err), "error trying to connect: dns failure");
    }

    #[test]
    fn test_status_family() {
        let err = classify_status(503, b"Service Unavailable");
        assert_eq!(err.error_type(), ErrorType::Server);
        assert_eq!(err.to_string(), "server_error: server error: 503");
        assert!(err.is_unavailable());

        let err = classify_status(404, b"");
        assert_eq!(err.error_type(), ErrorType::Client);
        assert_eq!(err.to_string(), "client_error: client error: 404");

        let err = classify_status(302, b"");
        assert_eq!(err.error_type(), ErrorType::BadResponse);
        assert_eq!(err.to_string(), "bad_response: bad response code: 302");
    }

    #[test]
    fn test_envelope_overrides_status() {
        let body = br#"{"status":"error","errorType":"bad_data","error":"1:1: parse error"}"#;
        let err = classify_status(400, body);
        assert_eq!(err.error_type(), ErrorType::BadData);
        assert_eq!(err.to_string(), "bad_data: 1:1: parse error");

        let body = br#"{"status":"error","errorType":"execution","error":"too many samples"}"#;
        assert_eq!(classify_status(422, body).error_type(), ErrorType::Execution);
    }

    #[test]
    fn test_envelope_without_error_type_uses_status() {
        let body = br#"{"status":"error","error":"something"}"#;
        assert_eq!(classify_status(500, body).error_type(), ErrorType::Server);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::Client::new()
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap_err();
        assert_eq!(classify_transport(&err), QueryError::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and never answer.
        tokio::spawn(async move {
            let mut held = vec![];
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let err = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap()
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap_err();
        assert_eq!(classify_transport(&err), QueryError::Timeout);
    }
}
