// src/statement.rs

use crate::error::NilaDcrError;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;
use uuid::Uuid;

const MAX_CLIENT_NAME_CHARS: usize = 255;

/// A software statement that passed schema and domain validation.
///
/// Passing validation does not make a statement trusted. Whether its signature was
/// checked is tracked separately by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftwareStatement {
    pub software_id: Uuid,
    pub client_name: String,
    pub client_uri: Url,
    /// Always exactly one entry.
    pub redirect_uris: Vec<Url>,
    pub iss: Option<Url>,
    /// The full claim set, including claims this crate does not interpret.
    pub claims: Map<String, Value>,
}

impl SoftwareStatement {
    /// Validates a decoded claim set and returns the typed statement.
    ///
    /// Schema checks run first, in field order `software_id`, `client_name`,
    /// `client_uri`, `redirect_uris`, `iss`. Domain checks only run once the schema
    /// is satisfied: every redirect URI host, then the `iss` host, must equal the
    /// `client_uri` host.
    ///
    /// # Errors
    ///
    /// [`NilaDcrError::Schema`] for the first schema violation, otherwise
    /// [`NilaDcrError::DomainMismatch`] for the first inconsistent host.
    pub fn validate(claims: Map<String, Value>) -> Result<Self, NilaDcrError> {
        let software_id = parse_uuid(required_str(&claims, "software_id")?)?;
        let client_name = parse_client_name(required_str(&claims, "client_name")?)?;
        let client_uri = parse_uri("client_uri", required_str(&claims, "client_uri")?)?;
        let redirect_uris = parse_redirect_uris(claims.get("redirect_uris"))?;
        let iss = match claims.get("iss") {
            None => None,
            Some(Value::String(s)) => Some(parse_uri("iss", s)?),
            Some(_) => return Err(schema("iss", "must be a string")),
        };

        let statement = Self {
            software_id,
            client_name: client_name.to_string(),
            client_uri,
            redirect_uris,
            iss,
            claims,
        };
        statement.check_domains()?;

        debug!(software_id = %statement.software_id, "Software statement passed validation");
        Ok(statement)
    }

    /// The single registered callback.
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uris[0]
    }

    fn check_domains(&self) -> Result<(), NilaDcrError> {
        let expected = self.client_uri.host_str();
        for redirect_uri in &self.redirect_uris {
            same_host("redirect_uris", expected, redirect_uri.host_str())?;
        }
        if let Some(iss) = &self.iss {
            same_host("iss", expected, iss.host_str())?;
        }
        Ok(())
    }
}

fn schema(field: &'static str, reason: impl Into<String>) -> NilaDcrError {
    NilaDcrError::Schema { field, reason: reason.into() }
}

fn required_str<'a>(claims: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, NilaDcrError> {
    match claims.get(field) {
        None | Some(Value::Null) => Err(schema(field, "is required")),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(schema(field, "must be a string")),
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, NilaDcrError> {
    let uuid = Uuid::try_parse(value).map_err(|e| schema("software_id", e.to_string()))?;
    // Only the canonical hyphenated form is a UUID string.
    if uuid.hyphenated().to_string() != value.to_ascii_lowercase() {
        return Err(schema("software_id", "must be a hyphenated UUID"));
    }
    Ok(uuid)
}

fn parse_client_name(value: &str) -> Result<&str, NilaDcrError> {
    match value.chars().count() {
        0 => Err(schema("client_name", "must not be empty")),
        n if n > MAX_CLIENT_NAME_CHARS => Err(schema(
            "client_name",
            format!("must be at most {} characters", MAX_CLIENT_NAME_CHARS),
        )),
        _ => Ok(value),
    }
}

fn parse_uri(field: &'static str, value: &str) -> Result<Url, NilaDcrError> {
    Url::parse(value).map_err(|e| schema(field, format!("is not a valid URI: {}", e)))
}

fn parse_redirect_uris(value: Option<&Value>) -> Result<Vec<Url>, NilaDcrError> {
    let entries = match value {
        None | Some(Value::Null) => return Err(schema("redirect_uris", "is required")),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(schema("redirect_uris", "must be an array")),
    };
    if entries.len() != 1 {
        return Err(schema(
            "redirect_uris",
            format!("must contain exactly one URI, found {}", entries.len()),
        ));
    }
    entries
        .iter()
        .map(|entry| match entry {
            Value::String(s) => parse_uri("redirect_uris", s),
            _ => Err(schema("redirect_uris", "entries must be strings")),
        })
        .collect()
}

fn same_host(claim: &'static str, expected: Option<&str>, found: Option<&str>) -> Result<(), NilaDcrError> {
    let matches = match (expected, found) {
        (Some(expected), Some(found)) => expected.eq_ignore_ascii_case(found),
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(NilaDcrError::DomainMismatch {
            claim,
            expected: expected.unwrap_or_default().to_string(),
            found: found.unwrap_or_default().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    const SOFTWARE_ID: &str = "4f9c6f55-0d4e-4b8b-9d7a-2a7f0b3c1e11";

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn base() -> Map<String, Value> {
        claims(json!({
            "software_id": SOFTWARE_ID,
            "client_name": "Example App",
            "client_uri": "https://a.example/app",
            "redirect_uris": ["https://a.example/cb"],
        }))
    }

    fn field_of(err: NilaDcrError) -> &'static str {
        match err {
            NilaDcrError::Schema { field, .. } => field,
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_consistent_statement() {
        let statement = SoftwareStatement::validate(base()).unwrap();
        assert_eq!(statement.software_id.to_string(), SOFTWARE_ID);
        assert_eq!(statement.redirect_uri().as_str(), "https://a.example/cb");
        assert!(statement.iss.is_none());
    }

    #[test]
    fn rejects_redirect_on_other_domain() {
        let mut c = base();
        c.insert("redirect_uris".into(), json!(["https://b.example/cb"]));
        let err = SoftwareStatement::validate(c).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DomainMismatch);
        assert!(matches!(err, NilaDcrError::DomainMismatch { claim: "redirect_uris", .. }));
    }

    #[test]
    fn issuer_must_share_client_host() {
        let mut c = base();
        c.insert("iss".into(), json!("https://a.example"));
        assert!(SoftwareStatement::validate(c.clone()).is_ok());

        c.insert("iss".into(), json!("https://evil.example"));
        assert!(matches!(
            SoftwareStatement::validate(c),
            Err(NilaDcrError::DomainMismatch { claim: "iss", .. })
        ));
    }

    #[test]
    fn required_fields() {
        for field in ["software_id", "client_name", "client_uri", "redirect_uris"] {
            let mut c = base();
            c.remove(field);
            assert_eq!(field_of(SoftwareStatement::validate(c).unwrap_err()), field);
        }
    }

    #[test]
    fn field_formats() {
        let mut c = base();
        c.insert("software_id".into(), json!("not-a-uuid"));
        assert_eq!(field_of(SoftwareStatement::validate(c).unwrap_err()), "software_id");

        let mut c = base();
        c.insert("software_id".into(), json!("4f9c6f550d4e4b8b9d7a2a7f0b3c1e11"));
        assert_eq!(field_of(SoftwareStatement::validate(c).unwrap_err()), "software_id");

        let mut c = base();
        c.insert("client_name".into(), json!(""));
        assert_eq!(field_of(SoftwareStatement::validate(c).unwrap_err()), "client_name");

        let mut c = base();
        c.insert("client_name".into(), json!("x".repeat(256)));
        assert_eq!(field_of(SoftwareStatement::validate(c).unwrap_err()), "client_name");

        let mut c = base();
        c.insert("client_name".into(), json!("é".repeat(255)));
        assert!(SoftwareStatement::validate(c).is_ok());

        let mut c = base();
        c.insert("client_uri".into(), json!("not a uri"));
        assert_eq!(field_of(SoftwareStatement::validate(c).unwrap_err()), "client_uri");

        let mut c = base();
        c.insert("client_name".into(), json!(42));
        assert_eq!(field_of(SoftwareStatement::validate(c).unwrap_err()), "client_name");

        let mut c = base();
        c.insert("iss".into(), json!(7));
        assert_eq!(field_of(SoftwareStatement::validate(c).unwrap_err()), "iss");
    }

    #[test]
    fn exactly_one_redirect_uri() {
        for uris in [json!([]), json!(["https://a.example/1", "https://a.example/2"]), json!("https://a.example/cb")] {
            let mut c = base();
            c.insert("redirect_uris".into(), uris);
            assert_eq!(field_of(SoftwareStatement::validate(c).unwrap_err()), "redirect_uris");
        }
    }

    #[test]
    fn schema_errors_win_over_domain_errors() {
        let mut c = base();
        c.insert("redirect_uris".into(), json!(["https://b.example/cb"]));
        c.insert("iss".into(), json!("::bad::"));
        assert_eq!(field_of(SoftwareStatement::validate(c).unwrap_err()), "iss");
    }

    #[test]
    fn keeps_unknown_claims() {
        let mut c = base();
        c.insert("logo_uri".into(), json!("https://a.example/logo.png"));
        let statement = SoftwareStatement::validate(c).unwrap();
        assert_eq!(statement.claims["logo_uri"], "https://a.example/logo.png");
    }
}
