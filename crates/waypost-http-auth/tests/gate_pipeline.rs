use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware,
    response::Response,
    Extension, Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use jsonwebtoken::{crypto, Algorithm, EncodingKey};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tower::ServiceExt;
use waypost_auth::{
    encode_unsigned, key_map, Capability, KeyDirectory, KeyId, KeyMap, KeyProvider,
    KeyProviderError, RevocationRegistry, SigningKey, TokenClaims, TokenId,
};
use waypost_http_auth::{require_token, AuthorizationGate, AuthorizedToken, ErrorResponse, GateConfig};

const KID: &str = "4242";

fn private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap())
}

fn other_private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap())
}

struct StaticKeys(KeyMap);

#[async_trait]
impl KeyProvider for StaticKeys {
    async fn public_keys(&self) -> Result<KeyMap, KeyProviderError> {
        Ok(self.0.clone())
    }
}

struct Harness {
    app: Router,
    revocations: Arc<RevocationRegistry>,
}

fn harness(allow_unsigned: bool) -> Harness {
    let signing = SigningKey::from_private_key(
        KeyId::from(KID),
        private_key(),
        Utc::now() + Duration::hours(24),
    )
    .unwrap();
    let directory = Arc::new(KeyDirectory::new(Arc::new(StaticKeys(key_map([
        signing.published(),
    ])))));
    let revocations = Arc::new(RevocationRegistry::new());
    let gate = Arc::new(AuthorizationGate::new(
        GateConfig {
            allow_unsigned,
            ..GateConfig::default()
        },
        directory,
        revocations.clone(),
    ));

    let app = Router::new()
        .fallback(|Extension(token): Extension<AuthorizedToken>| async move {
            token.jti.to_string()
        })
        .layer(middleware::from_fn_with_state(gate, require_token));

    Harness { app, revocations }
}

fn claims(jti: Option<Value>) -> Value {
    let mut claims = json!({
        "iss": "test",
        "exp": (Utc::now() + Duration::hours(1)).timestamp(),
        "connect-tcp": true,
    });
    if let Some(jti) = jti {
        claims["jti"] = jti;
    }
    claims
}

fn signed_token(key: &RsaPrivateKey, header: Value, claims: &Value) -> String {
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );
    let der = key.to_pkcs1_der().unwrap();
    let signature = crypto::sign(
        signing_input.as_bytes(),
        &EncodingKey::from_rsa_der(der.as_bytes()),
        Algorithm::RS256,
    )
    .unwrap();
    format!("{}.{}", signing_input, signature)
}

fn token(claims: &Value) -> String {
    signed_token(private_key(), json!({"alg": "RS256", "typ": "JWT", "kid": KID}), claims)
}

fn unsigned_token(claims: &Value) -> String {
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(json!({"alg": "none"}).to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

async fn send(app: &Router, authorization: Option<String>) -> Response {
    let mut request = Request::builder().uri("/anything");
    if let Some(value) = authorization {
        request = request.header("Proxy-Authorization", value);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn rejection_code(response: Response) -> String {
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    error.code.unwrap()
}

#[tokio::test]
async fn test_valid_token_reaches_handler_with_extension() {
    let h = harness(false);
    let response = send(&h.app, Some(format!("Bearer {}", token(&claims(Some(json!("777")))))))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"777");
}

#[tokio::test]
async fn test_header_and_scheme_failures() {
    let h = harness(false);
    let valid = token(&claims(Some(json!("1"))));

    assert_eq!(rejection_code(send(&h.app, None).await).await, "NO_AUTH_HEADER");
    assert_eq!(
        rejection_code(send(&h.app, Some(format!("Basic {}", valid))).await).await,
        "INVALID_AUTH_SCHEME"
    );
    assert_eq!(
        rejection_code(send(&h.app, Some(valid.clone())).await).await,
        "INVALID_AUTH_SCHEME"
    );
    assert_eq!(
        rejection_code(send(&h.app, Some("Bearer not-a-jwt".to_string())).await).await,
        "INVALID_TOKEN"
    );

    // Scheme match is case-insensitive
    let response = send(&h.app, Some(format!("bearer {}", valid))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_kid_and_foreign_signature() {
    let h = harness(false);
    let claims = claims(Some(json!("1")));

    let unknown = signed_token(private_key(), json!({"alg": "RS256", "kid": "999"}), &claims);
    assert_eq!(
        rejection_code(send(&h.app, Some(format!("Bearer {}", unknown))).await).await,
        "KEY_NOT_FOUND"
    );

    let forged = signed_token(other_private_key(), json!({"alg": "RS256", "kid": KID}), &claims);
    assert_eq!(
        rejection_code(send(&h.app, Some(format!("Bearer {}", forged))).await).await,
        "INVALID_TOKEN"
    );
}

#[tokio::test]
async fn test_numeric_kid_resolves_like_string_kid() {
    let h = harness(false);
    let numeric = signed_token(
        private_key(),
        json!({"alg": "RS256", "kid": 4242}),
        &claims(Some(json!(5))),
    );

    let response = send(&h.app, Some(format!("Bearer {}", numeric))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_token_without_jti_rejected() {
    let h = harness(false);
    let response = send(&h.app, Some(format!("Bearer {}", token(&claims(None))))).await;
    assert_eq!(rejection_code(response).await, "MISSING_JTI");
}

#[tokio::test]
async fn test_revoked_token_rejected_immediately() {
    let h = harness(false);
    let bearer = format!("Bearer {}", token(&claims(Some(json!("555")))));

    assert_eq!(send(&h.app, Some(bearer.clone())).await.status(), StatusCode::OK);
    h.revocations.revoke(TokenId::from("555"));
    assert_eq!(
        rejection_code(send(&h.app, Some(bearer)).await).await,
        "TOKEN_REVOKED"
    );
}

#[tokio::test]
async fn test_missing_or_false_capability_rejected() {
    let h = harness(false);

    let mut without = claims(Some(json!("1")));
    without.as_object_mut().unwrap().remove("connect-tcp");
    assert_eq!(
        rejection_code(send(&h.app, Some(format!("Bearer {}", token(&without)))).await).await,
        "MISSING_PERMISSION"
    );

    let mut denied = claims(Some(json!("1")));
    denied["connect-tcp"] = json!(false);
    assert_eq!(
        rejection_code(send(&h.app, Some(format!("Bearer {}", token(&denied)))).await).await,
        "MISSING_PERMISSION"
    );

    let mut string_true = claims(Some(json!("1")));
    string_true["connect-tcp"] = json!("true");
    let response = send(&h.app, Some(format!("Bearer {}", token(&string_true)))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unsigned_tokens_only_in_insecure_mode() {
    let secure = harness(false);
    let insecure = harness(true);
    let bearer = format!("Bearer {}", unsigned_token(&claims(Some(json!("9")))));

    assert_eq!(
        rejection_code(send(&secure.app, Some(bearer.clone())).await).await,
        "INVALID_TOKEN"
    );
    assert_eq!(send(&insecure.app, Some(bearer.clone())).await.status(), StatusCode::OK);

    insecure.revocations.revoke(TokenId::from("9"));
    assert_eq!(
        rejection_code(send(&insecure.app, Some(bearer)).await).await,
        "TOKEN_REVOKED"
    );

    let mut without = claims(Some(json!("10")));
    without.as_object_mut().unwrap().remove("connect-tcp");
    assert_eq!(
        rejection_code(
            send(&insecure.app, Some(format!("Bearer {}", unsigned_token(&without)))).await
        )
        .await,
        "MISSING_PERMISSION"
    );
}

#[tokio::test]
async fn test_minted_dev_token_passes_insecure_gate() {
    let claims = TokenClaims::new("waypost-dev", Duration::hours(24))
        .with_token_id(Some(TokenId::from("dev-1")))
        .with_capabilities(&[Capability::CONNECT_TCP]);
    let bearer = format!("Bearer {}", encode_unsigned(&claims).unwrap());

    let insecure = harness(true);
    let response = send(&insecure.app, Some(bearer.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"dev-1");

    let secure = harness(false);
    assert_eq!(
        rejection_code(send(&secure.app, Some(bearer)).await).await,
        "INVALID_TOKEN"
    );
}
