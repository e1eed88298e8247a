//! Region derivation for endpoints that embed their location in the hostname.
//!
//! Some providers publish one endpoint per location, such as
//! `https://hel1.your-objectstorage.com`. Requests must then be signed for
//! that location regardless of the region stored in the configuration.

use stowage_core::DEFAULT_REGION;

/// Extract a location code from an endpoint's first hostname label.
///
/// The hostname must have at least three labels. The first label must be
/// 2-4 ASCII letters followed by one or more ASCII digits, at least three
/// characters overall. Endpoints without a scheme are parsed as `https://`.
pub fn extract_location(endpoint: &str) -> Option<String> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return None;
    }

    let parsed = if endpoint.contains("://") {
        url::Url::parse(endpoint)
    } else {
        url::Url::parse(&format!("https://{endpoint}"))
    }
    .ok()?;

    let host = parsed.host_str()?;
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 {
        return None;
    }

    let first = labels[0];
    is_location_code(first).then(|| first.to_ascii_lowercase())
}

fn is_location_code(label: &str) -> bool {
    if label.len() < 3 {
        return false;
    }
    let letters = label
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .count();
    let digits = &label[letters..];
    (2..=4).contains(&letters) && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// The region a client for `endpoint` must sign requests for.
///
/// A location found in the endpoint wins. Otherwise the configured region
/// passes through unchanged.
pub fn effective_region(endpoint: Option<&str>, configured: &str) -> String {
    endpoint
        .and_then(extract_location)
        .unwrap_or_else(|| configured.to_string())
}

/// The `LocationConstraint` to send when creating a bucket.
///
/// `None` when the configured region is the default region, which rejects an
/// explicit constraint.
pub fn location_constraint(endpoint: Option<&str>, configured: &str) -> Option<String> {
    if configured == DEFAULT_REGION {
        return None;
    }
    Some(effective_region(endpoint, configured))
}
