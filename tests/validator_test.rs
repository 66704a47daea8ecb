mod common;

use common::*;
use jsonwebtoken::{encode, EncodingKey, Header};
use nila_oidc_rp::prelude::*;
use serde_json::json;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn validator() -> Validator {
    Validator::new(ValidationDetails::default())
}

fn validate(token: &str) -> Result<Claims, TokenError> {
    validator().validate(token, &key_set(TEST_KID), ISSUER, CLIENT_ID)
}

#[test]
fn valid_token_yields_its_claims() {
    let payload = ada_claims(ISSUER, "n-1");
    let token = sign(Some(TEST_KID), &payload);

    let claims = validate(&token).expect("Token validation should succeed");

    assert_eq!(claims.sub, "u1");
    assert_eq!(claims.name.as_deref(), Some("Ada"));
    assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
    assert_eq!(claims.iss, ISSUER);
    assert_eq!(claims.aud, vec![CLIENT_ID.to_string()]);
    assert_eq!(claims.nonce.as_deref(), Some("n-1"));
    assert_eq!(claims.exp, payload["exp"].as_u64().unwrap());
    assert_eq!(claims.nbf, payload["nbf"].as_u64());
    assert_eq!(claims.iat, payload["iat"].as_u64());
}

#[test]
fn audience_array_containing_the_client_is_accepted() {
    let mut payload = ada_claims(ISSUER, "n");
    payload["aud"] = json!(["other-api", CLIENT_ID]);
    let claims = validate(&sign(Some(TEST_KID), &payload)).unwrap();
    assert_eq!(claims.aud.len(), 2);
}

#[test]
fn email_falls_back_to_preferred_username() {
    let mut payload = ada_claims(ISSUER, "n");
    payload.as_object_mut().unwrap().remove("email");
    payload["preferred_username"] = json!("ada@corp.example");
    let claims = validate(&sign(Some(TEST_KID), &payload)).unwrap();
    assert_eq!(claims.email_address(), "ada@corp.example");
}

#[test]
fn key_not_in_the_set_is_unknown() {
    let token = sign(Some("rotated-away"), &ada_claims(ISSUER, "n"));
    assert_eq!(validate(&token), Err(TokenError::UnknownKey("rotated-away".to_string())));
}

#[test]
fn any_altered_payload_byte_breaks_the_signature() {
    let token = sign(Some(TEST_KID), &ada_claims(ISSUER, "n"));
    let parts: Vec<&str> = token.split('.').collect();
    let payload = parts[1];

    for i in 0..payload.len() {
        let mut altered: Vec<u8> = payload.bytes().collect();
        altered[i] = if altered[i] == b'A' { b'B' } else { b'A' };
        let altered = String::from_utf8(altered).unwrap();
        let tampered = format!("{}.{}.{}", parts[0], altered, parts[2]);

        assert_eq!(
            validate(&tampered),
            Err(TokenError::SignatureInvalid),
            "altering payload byte {i} must be detected"
        );
    }
}

#[test]
fn expired_token_is_rejected_beyond_the_leeway() {
    let mut payload = ada_claims(ISSUER, "n");
    payload["exp"] = json!(now() - 120);
    assert_eq!(validate(&sign(Some(TEST_KID), &payload)), Err(TokenError::Expired));

    // Inside the 60s skew tolerance.
    payload["exp"] = json!(now() - 30);
    assert!(validate(&sign(Some(TEST_KID), &payload)).is_ok());
}

#[test]
fn token_from_the_future_is_not_yet_valid() {
    let mut payload = ada_claims(ISSUER, "n");
    payload["nbf"] = json!(now() + 120);
    payload["exp"] = json!(now() + 600);
    assert_eq!(validate(&sign(Some(TEST_KID), &payload)), Err(TokenError::NotYetValid));

    payload["nbf"] = json!(now() + 30);
    assert!(validate(&sign(Some(TEST_KID), &payload)).is_ok());
}

#[test]
fn leeway_is_configurable() {
    let strict = Validator::new(ValidationDetails {
        leeway: Duration::from_secs(0),
        ..ValidationDetails::default()
    });
    let mut payload = ada_claims(ISSUER, "n");
    payload["exp"] = json!(now() - 30);
    let result = strict.validate(&sign(Some(TEST_KID), &payload), &key_set(TEST_KID), ISSUER, CLIENT_ID);
    assert_eq!(result, Err(TokenError::Expired));
}

#[test]
fn wrong_issuer_and_audience_are_rejected() {
    let token = sign(Some(TEST_KID), &ada_claims("https://evil.example", "n"));
    assert_eq!(validate(&token), Err(TokenError::IssuerMismatch));

    let mut payload = ada_claims(ISSUER, "n");
    payload["aud"] = json!("someone-else");
    assert_eq!(validate(&sign(Some(TEST_KID), &payload)), Err(TokenError::AudienceMismatch));
}

#[test]
fn malformed_tokens_are_reported_as_such() {
    assert!(matches!(validate("not-a-jwt"), Err(TokenError::Malformed(_))));
    assert!(matches!(validate(""), Err(TokenError::Malformed(_))));

    let without_kid = sign(None, &ada_claims(ISSUER, "n"));
    assert!(matches!(validate(&without_kid), Err(TokenError::Malformed(_))));

    let mut payload = ada_claims(ISSUER, "n");
    payload.as_object_mut().unwrap().remove("sub");
    assert!(matches!(validate(&sign(Some(TEST_KID), &payload)), Err(TokenError::Malformed(_))));
}

#[test]
fn symmetric_token_cannot_pass_for_an_rsa_key() {
    // A forger signing with HS256 under the published kid must not get through.
    let mut header = Header::new(jsonwebtoken::Algorithm::HS256);
    header.kid = Some(TEST_KID.to_string());
    let token = encode(&header, &ada_claims(ISSUER, "n"), &EncodingKey::from_secret(b"guess")).unwrap();

    assert_eq!(validate(&token), Err(TokenError::SignatureInvalid));
}

/// Collects formatted log output in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn rejected_token_is_logged_as_a_warning() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let mut payload = ada_claims(ISSUER, "n");
    payload["exp"] = json!(now() - 3600);
    let token = sign(Some(TEST_KID), &payload);
    tracing::subscriber::with_default(subscriber, || {
        assert_eq!(validate(&token), Err(TokenError::Expired));
    });

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("WARN"), "expected a warning, got: {output}");
    assert!(!output.contains("ERROR"), "browser-caused rejections must not log at error: {output}");
}
