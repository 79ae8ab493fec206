//! Card validation and the tokenize call.

use std::sync::Arc;

use crate::card::{CardRecord, TokenResult, TokenizeRequest};
use crate::error::{ErrorCode, SdkError};
use crate::jwe::EnvelopeEncryptor;
use crate::key_provider::KeyProvider;
use crate::transport::{ApiRequest, Transport};

const PAN_LEN: std::ops::RangeInclusive<usize> = 13..=19;
const YEAR_LEN: std::ops::RangeInclusive<usize> = 2..=4;
const CVV_LEN: std::ops::RangeInclusive<usize> = 3..=4;

/// Pre-flight checks on card fields. No network or crypto work happens here.
///
/// Error messages name the field, never its value.
pub fn validate(card: &CardRecord) -> Result<(), SdkError> {
    if !is_digits(&card.pan, PAN_LEN) {
        return Err(SdkError::new(
            ErrorCode::InvalidPan,
            "card number must be 13 to 19 digits",
        )
        .with_data("field", "pan"));
    }

    let month_ok = is_digits(&card.exp_month, 2..=2)
        && matches!(card.exp_month.parse::<u8>(), Ok(1..=12));
    if !month_ok {
        return Err(SdkError::new(
            ErrorCode::InvalidExpiryMonth,
            "expiry month must be 01 to 12",
        )
        .with_data("field", "exp_month"));
    }

    if !is_digits(&card.exp_year, YEAR_LEN) {
        return Err(SdkError::new(
            ErrorCode::InvalidExpiryYear,
            "expiry year must be 2 to 4 digits",
        )
        .with_data("field", "exp_year"));
    }

    if !is_digits(&card.cvv, CVV_LEN) {
        return Err(
            SdkError::new(ErrorCode::InvalidCvv, "CVV must be 3 or 4 digits")
                .with_data("field", "cvv"),
        );
    }

    Ok(())
}

fn is_digits(value: &str, len: std::ops::RangeInclusive<usize>) -> bool {
    len.contains(&value.len()) && value.bytes().all(|b| b.is_ascii_digit())
}

/// Turns card data into a payment token.
pub struct TokenizationCoordinator {
    transport: Arc<dyn Transport>,
    keys: Arc<KeyProvider>,
    encryptor: EnvelopeEncryptor,
    tokenize_path: String,
}

impl TokenizationCoordinator {
    /// `transport` must be the authorizing gateway.
    pub fn new(
        transport: Arc<dyn Transport>,
        keys: Arc<KeyProvider>,
        encryptor: EnvelopeEncryptor,
        tokenize_path: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            keys,
            encryptor,
            tokenize_path: tokenize_path.into(),
        }
    }

    pub fn validate(&self, card: &CardRecord) -> Result<(), SdkError> {
        validate(card)
    }

    /// Validate, encrypt and submit `card`.
    ///
    /// # Errors
    ///
    /// - `VALIDATION_*` before any other work if a field is malformed
    /// - key errors from [`KeyProvider::get`]
    /// - `PAYMENT_TOKENIZATION_FAILED` with HTTP context on a non-success
    ///   status or empty body
    /// - `INTERNAL_SERIALIZATION` if the response is not a token result
    pub async fn tokenize(&self, card: &CardRecord, permanent: bool) -> Result<TokenResult, SdkError> {
        validate(card)?;

        let jwk = self.keys.get().await?;
        let payload = self.encryptor.encrypt(card, &jwk)?;
        let body = serde_json::to_value(TokenizeRequest { payload, permanent })?;

        let response = self
            .transport
            .send(ApiRequest::post_json(&self.tokenize_path, body))
            .await?;

        if !response.is_success() || response.body.trim().is_empty() {
            return Err(SdkError::new(
                ErrorCode::TokenizationFailed,
                format!("tokenize request failed with status {}", response.status),
            )
            .with_http_context(response.http_context())
            .with_data("permanent", permanent.to_string()));
        }

        let result: TokenResult = response.json()?;
        tracing::info!("Tokenized {} card (permanent: {})", result.brand, permanent);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialStore;
    use crate::jwe::testutil::test_jwk;
    use crate::store::MemoryStore;
    use crate::transport::{ApiResponse, RequestBody};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    fn card(pan: &str, month: &str, year: &str, cvv: &str) -> CardRecord {
        CardRecord::new(pan, month, year, cvv)
    }

    #[test]
    fn test_accepts_valid_cards() {
        for (pan, month, year, cvv) in [
            ("4444444444444448", "06", "27", "123"),
            ("4111111111111", "01", "2027", "1234"),
            ("4111111111111111111", "12", "027", "000"),
        ] {
            assert!(validate(&card(pan, month, year, cvv)).is_ok(), "{}", pan);
        }
    }

    #[test]
    fn test_rejects_bad_pan() {
        for pan in ["444444444444", "44444444444444444444", "4444 4444 4444 4448", "", "444444444444444a"] {
            let err = validate(&card(pan, "06", "27", "123")).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidPan);
        }
    }

    #[test]
    fn test_rejects_bad_month() {
        for month in ["13", "00", "6", "006", "ab", ""] {
            let err = validate(&card("4444444444444448", month, "27", "123")).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidExpiryMonth, "{:?}", month);
        }
    }

    #[test]
    fn test_rejects_bad_year() {
        for year in ["7", "20277", "2o27"] {
            let err = validate(&card("4444444444444448", "06", year, "123")).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidExpiryYear);
        }
    }

    #[test]
    fn test_rejects_bad_cvv() {
        for cvv in ["12", "12345", "12a"] {
            let err = validate(&card("4444444444444448", "06", "27", cvv)).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidCvv);
        }
    }

    #[test]
    fn test_errors_do_not_echo_values() {
        let err = validate(&card("444444444444", "06", "27", "123")).unwrap_err();
        assert!(!err.to_string().contains("444444444444"));

        let err = validate(&card("4444444444444448", "06", "27", "98")).unwrap_err();
        assert!(!err.to_string().contains("98"));
    }

    /// Serves the key endpoint and tokenize endpoint in process.
    struct FakeApi {
        tokenize_status: u16,
        tokenize_body: String,
        requests: Mutex<Vec<ApiRequest>>,
    }

    #[async_trait]
    impl Transport for FakeApi {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SdkError> {
            self.requests.lock().push(request.clone());
            let (status, body) = if request.path == "/v1/keys/public" {
                (200, serde_json::to_string(&test_jwk()).unwrap_or_default())
            } else {
                (self.tokenize_status, self.tokenize_body.clone())
            };
            Ok(ApiResponse {
                status,
                method: request.method,
                url: format!("https://api.example.com{}", request.path),
                body,
            })
        }
    }

    fn coordinator(status: u16, body: &str) -> (TokenizationCoordinator, Arc<FakeApi>) {
        let api = Arc::new(FakeApi {
            tokenize_status: status,
            tokenize_body: body.to_string(),
            requests: Mutex::new(Vec::new()),
        });
        let credentials = Arc::new(CredentialStore::unencrypted(Arc::new(MemoryStore::new())));
        let keys = Arc::new(KeyProvider::new(api.clone(), credentials.clone(), "/v1/keys/public"));
        let coordinator = TokenizationCoordinator::new(
            api.clone(),
            keys,
            EnvelopeEncryptor::new(credentials),
            "/v1/tokenize",
        );
        (coordinator, api)
    }

    fn token_result_body() -> String {
        json!({
            "masked_pan": "444444******4448",
            "expiration_month": "06",
            "expiration_year": "27",
            "brand": "visa",
            "fingerprint": "fp_123",
            "token": "tok_9f8e7d",
            "expires_in": 900
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_tokenize_fetches_key_and_posts_envelope() {
        let (coordinator, api) = coordinator(200, &token_result_body());

        let result = coordinator
            .tokenize(&card("4444444444444448", "06", "27", "123"), true)
            .await
            .unwrap();
        assert_eq!(result.token, "tok_9f8e7d");

        let requests = api.requests.lock().clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].path, "/v1/keys/public");

        let RequestBody::Json(body) = &requests[1].body else {
            panic!("tokenize body should be JSON");
        };
        assert_eq!(body["permanent"], true);
        let payload = body["payload"].as_str().unwrap();
        assert_eq!(payload.split('.').count(), 5);
        assert!(!payload.contains("4444444444444448"));
    }

    #[tokio::test]
    async fn test_invalid_card_makes_no_calls() {
        let (coordinator, api) = coordinator(200, &token_result_body());

        let err = coordinator
            .tokenize(&card("4444444444444448", "13", "27", "123"), false)
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::InvalidExpiryMonth);
        assert!(api.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_server_rejection_carries_context() {
        let (coordinator, _) = coordinator(422, r#"{"error":"card_declined"}"#);

        let err = coordinator
            .tokenize(&card("4444444444444448", "06", "27", "123"), false)
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::TokenizationFailed);
        let ctx = err.http_context().unwrap();
        assert_eq!(ctx.status_code, 422);
        assert_eq!(ctx.request_method, "POST");
        assert!(ctx.request_url.ends_with("/v1/tokenize"));
    }

    #[tokio::test]
    async fn test_empty_body_is_failure() {
        let (coordinator, _) = coordinator(200, "");

        let err = coordinator
            .tokenize(&card("4444444444444448", "06", "27", "123"), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenizationFailed);
    }

    #[tokio::test]
    async fn test_garbage_body_is_serialization_error() {
        let (coordinator, _) = coordinator(200, "{\"token\":");

        let err = coordinator
            .tokenize(&card("4444444444444448", "06", "27", "123"), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Serialization);
    }
}
