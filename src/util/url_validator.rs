use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur while validating the backend base URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// Query strings and fragments cannot be combined with resource paths.
    #[error("Base URL must not carry a query string or fragment")]
    UnexpectedSuffix,
}

/// Validates the base URL of the category backend.
///
/// Accepts `http` and `https` URLs with a host and no query or fragment.
/// A trailing slash is stripped so resource segments can be appended
/// uniformly.
///
/// # Examples
///
/// ```
/// use catsync::util::validate_base_url;
///
/// let url = validate_base_url("http://localhost:5158/api/").unwrap();
/// assert_eq!(url.as_str(), "http://localhost:5158/api");
///
/// assert!(validate_base_url("ftp://example.com").is_err());
/// assert!(validate_base_url("https://example.com/api?x=1").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(UrlValidationError::UnexpectedSuffix);
    }

    let trimmed = url.path().trim_end_matches('/').to_owned();
    url.set_path(&trimmed);

    Ok(url)
}

/// Returns true if the URL points at the local machine.
///
/// Plain HTTP is expected there (development backends); anywhere else it is
/// worth a warning because the bearer token would travel in clear text.
pub fn is_loopback(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    if host == "localhost" {
        return true;
    }

    // Strip brackets from IPv6 addresses for parsing
    let host_for_parse = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    host_for_parse
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
