//! `EXO2-HMAC-SHA256` request signatures.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::cli::error::ExoError;

/// Seconds a signature stays valid.
pub(crate) const SIGNATURE_VALIDITY_SECS: i64 = 600;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Copy)]
pub(crate) struct SignedParts<'a> {
    pub(crate) method: &'a str,
    /// Percent-encoded request path.
    pub(crate) path: &'a str,
    pub(crate) body: &'a str,
    pub(crate) query: &'a [(&'a str, &'a str)],
    pub(crate) expires: i64,
}

/// Only parameters that appear exactly once are signed, sorted by name.
fn signed_query(query: &[(&str, &str)]) -> (Vec<String>, String) {
    let mut single: Vec<(&str, &str)> = query
        .iter()
        .filter(|(name, _)| query.iter().filter(|(other, _)| other == name).count() == 1)
        .copied()
        .collect();
    single.sort_by(|a, b| a.0.cmp(b.0));

    let names = single.iter().map(|(name, _)| name.to_string()).collect();
    let values = single.iter().map(|(_, value)| *value).collect::<String>();
    (names, values)
}

/// The `Authorization` header value for a request.
pub(crate) fn authorization(key: &str, secret: &str, parts: &SignedParts<'_>) -> Result<String, ExoError> {
    let (signed_names, signed_values) = signed_query(parts.query);
    let message = format!(
        "{} {}\n{}\n{}\n\n{}",
        parts.method, parts.path, parts.body, signed_values, parts.expires
    );

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExoError::Config(format!("unusable API secret: {e}")))?;
    mac.update(message.as_bytes());
    let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    let mut header = format!("EXO2-HMAC-SHA256 credential={key}");
    if !signed_names.is_empty() {
        header.push_str(&format!(",signed-query-args={}", signed_names.join(";")));
    }
    header.push_str(&format!(",expires={},signature={signature}", parts.expires));

    Ok(header)
}

#[cfg(test)]
mod test {
    use base64::Engine;
    use hmac::Mac;

    use super::{HmacSha256, SignedParts, authorization, signed_query};

    #[test]
    fn repeated_query_parameters_are_not_signed() {
        let (names, values) = signed_query(&[("visibility", "public"), ("a", "1"), ("a", "2"), ("b", "x")]);
        assert_eq!(names, vec!["b", "visibility"]);
        assert_eq!(values, "xpublic");
    }

    #[test]
    fn header_carries_credential_expiry_and_signature() {
        let parts = SignedParts {
            method: "GET",
            path: "/v2/template",
            body: "",
            query: &[("visibility", "public")],
            expires: 1_700_000_000,
        };
        let header = authorization("EXOkey", "secret", &parts).unwrap();

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(b"GET /v2/template\n\npublic\n\n1700000000");
        let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        assert_eq!(
            header,
            format!(
                "EXO2-HMAC-SHA256 credential=EXOkey,signed-query-args=visibility,expires=1700000000,signature={expected}"
            )
        );
    }

    #[test]
    fn body_changes_the_signature() {
        let base = SignedParts {
            method: "POST",
            path: "/v2/instance",
            body: "{}",
            query: &[],
            expires: 1,
        };
        let other = SignedParts {
            body: "{\"name\":\"a\"}",
            ..base
        };
        assert_ne!(
            authorization("k", "s", &base).unwrap(),
            authorization("k", "s", &other).unwrap()
        );
    }
}
