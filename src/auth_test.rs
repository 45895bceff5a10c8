use super::*;
use uuid::Uuid;

const KEY: &str = "unit-test-signing-key";

fn identity() -> Identity {
    Identity {
        user_id: Uuid::new_v4(),
        username: "ada".into(),
        email: "ada@example.com".into(),
        role: "editor".into(),
        organization_id: Uuid::new_v4(),
    }
}

fn future_exp() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp() + 3600
}

#[test]
fn valid_token_yields_identity() {
    let who = identity();
    let token = mint_token(KEY, &who, future_exp());

    let verified = TokenVerifier::new(KEY).verify(&token).expect("token should verify");
    assert_eq!(verified.user_id, who.user_id);
    assert_eq!(verified.username, "ada");
    assert_eq!(verified.email, "ada@example.com");
    assert_eq!(verified.role, "editor");
    assert_eq!(verified.organization_id, who.organization_id);
}

#[test]
fn wrong_key_is_a_signature_error() {
    let token = mint_token("some-other-key", &identity(), future_exp());
    let err = TokenVerifier::new(KEY).verify(&token).unwrap_err();
    assert!(matches!(err, AuthError::Signature));
}

#[test]
fn tampered_claims_fail_verification() {
    let token = mint_token(KEY, &identity(), future_exp());
    let mut parts: Vec<&str> = token.split('.').collect();

    // Swap in a different (validly encoded) claims segment.
    let forged = mint_token(KEY, &identity(), future_exp());
    let forged_body: Vec<&str> = forged.split('.').collect();
    parts[1] = forged_body[1];

    let err = TokenVerifier::new(KEY).verify(&parts.join(".")).unwrap_err();
    assert!(matches!(err, AuthError::Signature));
}

#[test]
fn expired_token_is_rejected() {
    let past = OffsetDateTime::now_utc().unix_timestamp() - 10;
    let token = mint_token(KEY, &identity(), past);
    let err = TokenVerifier::new(KEY).verify(&token).unwrap_err();
    assert!(matches!(err, AuthError::Expired));
}

#[test]
fn missing_segments_are_malformed() {
    let verifier = TokenVerifier::new(KEY);
    assert!(matches!(verifier.verify("").unwrap_err(), AuthError::Malformed));
    assert!(matches!(verifier.verify("a.b").unwrap_err(), AuthError::Malformed));
    assert!(matches!(verifier.verify("a.b.c.d").unwrap_err(), AuthError::Malformed));
    assert!(matches!(
        verifier.verify("!!.not-base64.!!").unwrap_err(),
        AuthError::Malformed
    ));
}

#[test]
fn unsupported_algorithm_is_rejected() {
    let head = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let body = URL_SAFE_NO_PAD.encode(br"{}");
    let err = TokenVerifier::new(KEY)
        .verify(&format!("{head}.{body}.sig"))
        .unwrap_err();
    let AuthError::Algorithm(alg) = err else {
        panic!("expected Algorithm error, got {err:?}");
    };
    assert_eq!(alg, "none");
}

#[test]
fn sender_tuple_mirrors_identity() {
    let who = identity();
    let sender = who.sender();
    assert_eq!(sender.id, who.user_id);
    assert_eq!(sender.username, who.username);
    assert_eq!(sender.email, who.email);
    assert_eq!(sender.role, who.role);
}
