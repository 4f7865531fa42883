use anyhow::{Context, Result, anyhow};
use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::fingerprint::Fingerprint;
use crate::languages::LanguageCode;
use crate::models::{ApiTranslation, TextBox};
use crate::settings::ConfigStore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MODEL_ID: &str = "manga-translator-v1";

/// One `POST /translate` call.
#[derive(Debug, Clone)]
pub struct TranslateCall<'a> {
    pub target: LanguageCode,
    pub base64_image: &'a str,
    pub model: Option<&'a str>,
}

/// Remote OCR and translation service.
///
/// Quota exhaustion and server failure come back as synthetic results;
/// `Err` means the call itself failed (transport or unreadable response).
pub trait TranslateApi: Send + Sync {
    fn translate_image<'a>(&'a self, call: TranslateCall<'a>) -> BoxFuture<'a, Result<ApiTranslation>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslateBody<'a> {
    base64_images: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    translation_model: Option<&'a str>,
    target_lang_code: &'a str,
    fingerprint: &'a str,
    client_uuid: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    images: Vec<Vec<TextBox>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub email: Option<String>,
    pub subscription_tier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoginStatus {
    Unknown,
    UnknownEmail,
    BadPassword,
    InvalidEmail,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignupStatus {
    Unknown,
    Success,
    EmailTaken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationModelData {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_languages: Option<Vec<String>>,
}

pub fn default_models() -> Vec<TranslationModelData> {
    vec![TranslationModelData {
        id: DEFAULT_MODEL_ID.to_string(),
        name: "Manga Translator v1".to_string(),
        description: Some("Default manga translation model".to_string()),
        supported_languages: Some(
            ["ja", "ko", "zh", "en", "es", "fr", "de", "it", "pt", "ru"]
                .iter()
                .map(|code| code.to_string())
                .collect(),
        ),
    }]
}

/// Maps a `/translate` status and body to a result.
pub fn classify_translate_response(status: StatusCode, body: &str) -> Result<ApiTranslation> {
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        return Ok(ApiTranslation::server_error());
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Ok(ApiTranslation::out_of_quota());
    }
    if !status.is_success() {
        return Err(anyhow!("translate API error ({})", status));
    }
    let parsed: TranslateResponse =
        serde_json::from_str(body).context("failed to parse translate response")?;
    let translations = parsed
        .images
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("translate response carried no images"))?;
    Ok(ApiTranslation {
        translations,
        error_message: None,
    })
}

/// HTTP client for the translation service and its account endpoints.
#[derive(Clone)]
pub struct RemoteApi {
    client: reqwest::Client,
    base_url: String,
    client_version: String,
    config: Arc<dyn ConfigStore>,
    fingerprint: Arc<OnceLock<String>>,
}

impl RemoteApi {
    pub fn new(config: Arc<dyn ConfigStore>) -> Result<Self> {
        let settings = config.load()?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: settings.api_base,
            client_version: settings.client_version,
            config,
            fingerprint: Arc::new(OnceLock::new()),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn http_client(&self) -> reqwest::Client {
        self.client.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn fingerprint(&self) -> &str {
        self.fingerprint
            .get_or_init(|| Fingerprint::detect().encode())
            .as_str()
    }

    async fn call_translate(&self, call: TranslateCall<'_>) -> Result<ApiTranslation> {
        let client_uuid = self.config.client_uuid()?;
        let body = TranslateBody {
            base64_images: [call.base64_image],
            translation_model: call.model,
            target_lang_code: call.target.as_str(),
            fingerprint: self.fingerprint(),
            client_uuid: &client_uuid,
        };
        let response = self
            .client
            .post(self.url("/translate"))
            .json(&body)
            .send()
            .await
            .context("translate request failed")?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        debug!("translate API answered {}", status);
        classify_translate_response(status, &text)
    }

    pub async fn current_user(&self) -> Result<User> {
        let client_uuid = self.config.client_uuid()?;
        let response = self
            .client
            .get(self.url("/metrics"))
            .query(&[
                ("clientUuid", client_uuid.as_str()),
                ("fingerprint", self.fingerprint()),
            ])
            .header("Client-Version", self.client_version.as_str())
            .send()
            .await
            .context("metrics request failed")?;
        if response.status() != StatusCode::OK {
            return Err(anyhow!("failed to retrieve user ({})", response.status()));
        }
        response.json().await.context("failed to parse user")
    }

    pub async fn login(&self, email: &str, password: &str) -> LoginStatus {
        let response = match self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("login request failed: {}", err);
                return LoginStatus::Unknown;
            }
        };
        match response.status() {
            StatusCode::BAD_REQUEST => {
                let body: serde_json::Value = response.json().await.unwrap_or_default();
                match body
                    .get("detail")
                    .and_then(|detail| detail.get("kind"))
                    .and_then(|kind| kind.as_str())
                {
                    Some("emptyEmail") => LoginStatus::InvalidEmail,
                    Some("userNotFound") => LoginStatus::UnknownEmail,
                    _ => LoginStatus::Unknown,
                }
            }
            StatusCode::FORBIDDEN => LoginStatus::BadPassword,
            StatusCode::OK => LoginStatus::Success,
            _ => LoginStatus::Unknown,
        }
    }

    pub async fn logout(&self) -> bool {
        self.post_status("/auth/logout", json!({}))
            .await
            .is_some_and(|status| status == StatusCode::NO_CONTENT)
    }

    pub async fn signup(&self, email: &str, password: &str) -> SignupStatus {
        match self
            .post_status("/signup", json!({ "email": email, "password": password }))
            .await
        {
            Some(StatusCode::FORBIDDEN) => SignupStatus::EmailTaken,
            Some(StatusCode::CREATED) => SignupStatus::Success,
            _ => SignupStatus::Unknown,
        }
    }

    pub async fn submit_feedback(&self, text: &str) -> bool {
        self.post_status("/feedback", json!({ "text": text }))
            .await
            .is_some_and(|status| status == StatusCode::CREATED)
    }

    pub async fn translation_models(&self) -> Result<Vec<TranslationModelData>> {
        let response = self
            .client
            .get(self.url("/translate/models/extension"))
            .send()
            .await
            .context("models request failed")?;
        let value: serde_json::Value = response.json().await.context("failed to parse models")?;
        // Older deployments wrap the list in `{ "models": [...] }`.
        let list = value.get("models").cloned().unwrap_or(value);
        serde_json::from_value(list).context("unexpected models payload")
    }

    /// The service's model list, or the built-in list when it cannot be fetched.
    pub async fn available_models(&self) -> Vec<TranslationModelData> {
        match self.translation_models().await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => default_models(),
            Err(err) => {
                warn!("falling back to built-in models: {:#}", err);
                default_models()
            }
        }
    }

    async fn post_status(&self, path: &str, body: serde_json::Value) -> Option<StatusCode> {
        match self.client.post(self.url(path)).json(&body).send().await {
            Ok(response) => Some(response.status()),
            Err(err) => {
                warn!("request to {} failed: {}", path, err);
                None
            }
        }
    }
}

impl TranslateApi for RemoteApi {
    fn translate_image<'a>(&'a self, call: TranslateCall<'a>) -> BoxFuture<'a, Result<ApiTranslation>> {
        Box::pin(self.call_translate(call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OUT_OF_QUOTA_MESSAGE, SERVER_ERROR_MESSAGE};
    use crate::settings::{MemoryConfigStore, Settings};
    use axum::extract::Query;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;

    #[test]
    fn error_statuses_become_synthetic_results() {
        let quota = classify_translate_response(StatusCode::TOO_MANY_REQUESTS, "").unwrap();
        assert_eq!(quota.translations[0].translated_text, OUT_OF_QUOTA_MESSAGE);
        let down = classify_translate_response(StatusCode::INTERNAL_SERVER_ERROR, "").unwrap();
        assert_eq!(down.translations[0].translated_text, SERVER_ERROR_MESSAGE);
        assert!(classify_translate_response(StatusCode::BAD_GATEWAY, "").is_err());
        assert!(classify_translate_response(StatusCode::OK, "not json").is_err());
    }

    #[test]
    fn first_image_is_taken_from_success_body() {
        let body = r#"{"images":[[{"originalLanguage":"ja","translatedText":"Hi",
            "minX":1,"minY":2,"maxX":3,"maxY":4}]]}"#;
        let result = classify_translate_response(StatusCode::OK, body).unwrap();
        assert!(!result.is_error());
        assert_eq!(result.translations.len(), 1);
        assert_eq!(result.translations[0].translated_text, "Hi");
    }

    async fn fake_service() -> String {
        let app = Router::new()
            .route(
                "/translate",
                post(|Json(body): Json<serde_json::Value>| async move {
                    Json(json!({
                        "images": [[{
                            "originalLanguage": "ja",
                            "translatedText": format!(
                                "{}|{}|{}",
                                body["targetLangCode"].as_str().unwrap_or(""),
                                body["translationModel"].as_str().unwrap_or("-"),
                                body["clientUuid"].as_str().unwrap_or("")
                            ),
                            "minX": 0, "minY": 0, "maxX": 10, "maxY": 10
                        }]]
                    }))
                }),
            )
            .route(
                "/metrics",
                get(|Query(query): Query<HashMap<String, String>>| async move {
                    Json(json!({
                        "email": query.get("clientUuid"),
                        "subscriptionTier": "free"
                    }))
                }),
            )
            .route(
                "/auth/login",
                post(|Json(body): Json<serde_json::Value>| async move {
                    match body["email"].as_str() {
                        Some("") => (
                            axum::http::StatusCode::BAD_REQUEST,
                            Json(json!({"detail": {"kind": "emptyEmail"}})),
                        ),
                        Some("nobody@example.com") => (
                            axum::http::StatusCode::BAD_REQUEST,
                            Json(json!({"detail": {"kind": "userNotFound"}})),
                        ),
                        _ if body["password"] == "secret" => {
                            (axum::http::StatusCode::OK, Json(json!({})))
                        }
                        _ => (axum::http::StatusCode::FORBIDDEN, Json(json!({}))),
                    }
                }),
            )
            .route(
                "/signup",
                post(|| async { axum::http::StatusCode::FORBIDDEN }),
            )
            .route(
                "/feedback",
                post(|| async { axum::http::StatusCode::CREATED }),
            )
            .route(
                "/auth/logout",
                post(|| async { axum::http::StatusCode::NO_CONTENT }),
            )
            .route(
                "/translate/models/extension",
                get(|| async {
                    Json(json!([{ "id": "m1", "name": "Model One" }]))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn api(base: &str) -> RemoteApi {
        let config = Arc::new(MemoryConfigStore::new(Settings {
            client_uuid: Some("uuid-1".to_string()),
            ..Settings::default()
        }));
        RemoteApi::new(config).unwrap().with_base_url(base)
    }

    #[tokio::test]
    async fn translate_sends_language_model_and_client() {
        let base = fake_service().await;
        let api = api(&base);
        let result = api
            .translate_image(TranslateCall {
                target: LanguageCode::PtBr,
                base64_image: "data:image/png;base64,AA",
                model: Some("m1"),
            })
            .await
            .unwrap();
        assert_eq!(result.translations[0].translated_text, "pt-BR|m1|uuid-1");
    }

    #[tokio::test]
    async fn account_endpoints_map_statuses() {
        let base = fake_service().await;
        let api = api(&base);
        assert_eq!(api.login("", "x").await, LoginStatus::InvalidEmail);
        assert_eq!(
            api.login("nobody@example.com", "x").await,
            LoginStatus::UnknownEmail
        );
        assert_eq!(api.login("a@b.c", "wrong").await, LoginStatus::BadPassword);
        assert_eq!(api.login("a@b.c", "secret").await, LoginStatus::Success);
        assert_eq!(api.signup("a@b.c", "x").await, SignupStatus::EmailTaken);
        assert!(api.submit_feedback("great").await);
        assert!(api.logout().await);

        let user = api.current_user().await.unwrap();
        assert_eq!(user.email.as_deref(), Some("uuid-1"));
        assert_eq!(user.subscription_tier, "free");

        let models = api.translation_models().await.unwrap();
        assert_eq!(models[0].id, "m1");
        assert_eq!(api.available_models().await[0].id, "m1");
    }

    #[tokio::test]
    async fn unreachable_service_falls_back_to_built_in_models() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let models = api(&base).available_models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, DEFAULT_MODEL_ID);
        assert!(api(&base).translation_models().await.is_err());
    }
}
