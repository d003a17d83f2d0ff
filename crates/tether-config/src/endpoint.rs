//! Validation for remote debugging endpoints.

use url::Url;

use crate::ConfigError;

/// Scheme accepted by the bundled WebSocket transport.
pub const ENDPOINT_SCHEME: &str = "ws";

/// Parses and validates a debugging endpoint such as
/// `ws://127.0.0.1:9222/devtools/page/ABC`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEndpoint`] when the text is not a URL, and
/// the errors of [`validate_endpoint`] otherwise.
pub fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidEndpoint {
        endpoint: raw.to_owned(),
        source,
    })?;
    validate_endpoint(&url)?;
    Ok(url)
}

/// Checks that an endpoint uses the `ws` scheme and names a host.
///
/// # Errors
///
/// Returns [`ConfigError::UnsupportedScheme`] or
/// [`ConfigError::MissingHost`].
pub fn validate_endpoint(url: &Url) -> Result<(), ConfigError> {
    if url.scheme() != ENDPOINT_SCHEME {
        return Err(ConfigError::UnsupportedScheme {
            scheme: url.scheme().to_owned(),
        });
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::MissingHost {
            endpoint: url.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn accepts_devtools_page_endpoint() {
        let url = parse_endpoint("ws://127.0.0.1:9222/devtools/page/ABC").expect("valid endpoint");
        assert_eq!(url.port(), Some(9222));
        assert_eq!(url.path(), "/devtools/page/ABC");
    }

    #[rstest]
    #[case("wss://example.test/devtools", "wss")]
    #[case("http://127.0.0.1:9222/json", "http")]
    fn rejects_other_schemes(#[case] raw: &str, #[case] scheme: &str) {
        match parse_endpoint(raw) {
            Err(ConfigError::UnsupportedScheme { scheme: found }) => assert_eq!(found, scheme),
            other => panic!("expected unsupported scheme, got {other:?}"),
        }
    }

    #[rstest]
    fn rejects_unparseable_text() {
        assert!(matches!(
            parse_endpoint("not a url"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }
}
