/// Static model-prefix routing across LLM providers
///
/// Adding a provider means adding a variant and a branch here; there is no
/// plugin registry.
use super::{ChatMessage, ChatRequest, Completion, PLACEHOLDER_ANSWER};
use crate::{
    api_keys::ProviderCredentials,
    config::ProviderConfig,
    error::{ApiError, ApiResult},
};
use reqwest::{header::AUTHORIZATION, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

/// Model used for image questions sent through OpenRouter
pub const VISION_MODEL: &str = "openai/gpt-4o";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    DeepSeek,
    OpenAi,
    Yandex,
    GigaChat,
    Ollama,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "deepseek",
            Provider::OpenAi => "openai",
            Provider::Yandex => "yandex",
            Provider::GigaChat => "gigachat",
            Provider::Ollama => "ollama",
        }
    }
}

/// Provider chosen for a model, plus the model name the provider expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRoute {
    pub provider: Provider,
    pub upstream_model: String,
}

const PREFIX_TABLE: [(&str, Provider); 4] = [
    ("openai/", Provider::OpenAi),
    ("yandex/", Provider::Yandex),
    ("gigachat/", Provider::GigaChat),
    ("ollama/", Provider::Ollama),
];

/// Select a provider by exact name or family prefix
pub fn route_model(model: &str) -> ApiResult<ProviderRoute> {
    if model == "deepseek-chat" || model == "deepseek-reasoner" {
        return Ok(ProviderRoute {
            provider: Provider::DeepSeek,
            upstream_model: model.to_string(),
        });
    }

    for (prefix, provider) in PREFIX_TABLE {
        if let Some(rest) = model.strip_prefix(prefix) {
            if !rest.is_empty() {
                return Ok(ProviderRoute {
                    provider,
                    upstream_model: rest.to_string(),
                });
            }
        }
    }

    Err(ApiError::BadRequest("unsupported model".to_string()))
}

/// Where and how to call a provider
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub authorization: Option<String>,
    pub extra_headers: Vec<(&'static str, String)>,
}

/// Outbound call failure
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamFailure {
    /// Connection, TLS or timeout failure
    Network(String),
    /// Provider answered with a non-200 status
    Status { status: u16, body: String },
    /// Provider answered 200 with a body that is not the expected JSON
    InvalidResponse(String),
}

impl std::fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamFailure::Network(e) => write!(f, "network error: {}", e),
            UpstreamFailure::Status { status, body } => {
                write!(f, "provider returned {}: {}", status, truncate(body, 500))
            }
            UpstreamFailure::InvalidResponse(e) => write!(f, "invalid response: {}", e),
        }
    }
}

/// HTTP client for every provider, sharing one timeout policy
#[derive(Clone)]
pub struct ProviderRouter {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl ProviderRouter {
    pub fn new(config: ProviderConfig) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Shared client, for other outbound callers that want the same timeout
    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    pub fn yandex_configured(&self) -> bool {
        self.config.yandex_api_key.is_some() && self.config.yandex_folder_id.is_some()
    }

    /// Resolve URL and credentials; fails before any outbound call
    pub fn endpoint(
        &self,
        route: &ProviderRoute,
        credentials: &ProviderCredentials,
    ) -> ApiResult<Endpoint> {
        let chat_url = |base: &str| format!("{}/v1/chat/completions", base.trim_end_matches('/'));
        let missing = |provider: Provider| {
            ApiError::BadRequest(format!("API key for {} not configured", provider.name()))
        };

        match route.provider {
            Provider::DeepSeek => {
                let key = credentials
                    .deepseek
                    .as_ref()
                    .ok_or_else(|| missing(Provider::DeepSeek))?;
                Ok(Endpoint {
                    url: chat_url(&self.config.deepseek_base_url),
                    authorization: Some(format!("Bearer {}", key)),
                    extra_headers: vec![],
                })
            }
            Provider::OpenAi => {
                let key = credentials.openai.as_ref().ok_or_else(|| missing(Provider::OpenAi))?;
                Ok(Endpoint {
                    url: chat_url(&self.config.openai_base_url),
                    authorization: Some(format!("Bearer {}", key)),
                    extra_headers: vec![],
                })
            }
            Provider::Yandex => {
                let (key, folder) =
                    match (&self.config.yandex_api_key, &self.config.yandex_folder_id) {
                        (Some(key), Some(folder)) => (key, folder),
                        _ => {
                            return Err(ApiError::BadRequest(
                                "YandexGPT not configured".to_string(),
                            ))
                        }
                    };
                Ok(Endpoint {
                    url: format!(
                        "{}/foundationModels/v1/completion",
                        self.config.yandex_base_url.trim_end_matches('/')
                    ),
                    authorization: Some(format!("Api-Key {}", key)),
                    extra_headers: vec![("x-folder-id", folder.clone())],
                })
            }
            Provider::GigaChat => {
                let key = credentials
                    .gigachat
                    .as_ref()
                    .or(self.config.gigachat_auth_key.as_ref())
                    .ok_or_else(|| missing(Provider::GigaChat))?;
                Ok(Endpoint {
                    url: chat_url(&self.config.gigachat_base_url),
                    authorization: Some(format!("Bearer {}", key)),
                    extra_headers: vec![],
                })
            }
            Provider::Ollama => Ok(Endpoint {
                url: chat_url(&self.config.ollama_base_url),
                authorization: None,
                extra_headers: vec![],
            }),
        }
    }

    /// Provider-specific request body
    pub fn request_body(&self, route: &ProviderRoute, request: &ChatRequest) -> Value {
        match route.provider {
            Provider::Yandex => {
                let folder = self.config.yandex_folder_id.as_deref().unwrap_or_default();
                yandex_body(folder, request)
            }
            _ => json!({
                "model": route.upstream_model,
                "messages": request.messages,
                "stream": false,
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
            }),
        }
    }

    /// Call the provider and normalize its answer
    pub async fn complete(
        &self,
        route: &ProviderRoute,
        endpoint: &Endpoint,
        request: &ChatRequest,
    ) -> Result<Completion, UpstreamFailure> {
        let body = self.request_body(route, request);
        let bytes = self.post_json(endpoint, &body).await?;
        parse_completion(route.provider, &bytes)
    }

    /// Ask a question about an image (data URL) through OpenRouter
    pub async fn ask_with_image(&self, question: &str, data_url: &str) -> ApiResult<Completion> {
        let key = self
            .config
            .openrouter_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Upstream("OpenRouter key not configured".to_string()))?;

        let endpoint = Endpoint {
            url: format!(
                "{}/v1/chat/completions",
                self.config.openrouter_base_url.trim_end_matches('/')
            ),
            authorization: Some(format!("Bearer {}", key)),
            extra_headers: vec![],
        };

        let body = json!({
            "model": VISION_MODEL,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": question },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }],
            "max_tokens": 1000,
        });

        let bytes = self.post_json(&endpoint, &body).await.map_err(|failure| {
            tracing::error!("Vision request failed: {}", failure);
            ApiError::Upstream("failed to call AI".to_string())
        })?;

        parse_completion(Provider::OpenAi, &bytes).map_err(|failure| {
            tracing::error!("Vision response rejected: {}", failure);
            ApiError::Upstream("invalid response from provider".to_string())
        })
    }

    async fn post_json(
        &self,
        endpoint: &Endpoint,
        body: &Value,
    ) -> Result<Vec<u8>, UpstreamFailure> {
        let mut builder = self.client.post(&endpoint.url).json(body);
        if let Some(auth) = &endpoint.authorization {
            builder = builder.header(AUTHORIZATION, auth);
        }
        for (name, value) in &endpoint.extra_headers {
            builder = builder.header(*name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamFailure::Network(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| UpstreamFailure::Network(e.to_string()))?;

        if status != StatusCode::OK {
            return Err(UpstreamFailure::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(bytes.to_vec())
    }
}

/// Yandex wants `{role, text}` messages and a folder-scoped model URI
pub fn yandex_body(folder_id: &str, request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|ChatMessage { role, content }| json!({ "role": role, "text": content }))
        .collect();

    json!({
        "modelUri": format!("gpt://{}/yandexgpt-lite", folder_id),
        "completionOptions": {
            "stream": false,
            "temperature": request.temperature.unwrap_or(0.6),
            "maxTokens": request.max_tokens.unwrap_or(2000),
        },
        "messages": messages,
    })
}

#[derive(Deserialize)]
struct YandexResponse {
    result: YandexResult,
}

#[derive(Deserialize)]
struct YandexResult {
    #[serde(default)]
    alternatives: Vec<YandexAlternative>,
    #[serde(default)]
    usage: YandexUsage,
}

#[derive(Deserialize)]
struct YandexAlternative {
    message: YandexMessage,
}

#[derive(Deserialize)]
struct YandexMessage {
    #[serde(default)]
    text: String,
}

/// Yandex reports token counts as strings
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct YandexUsage {
    #[serde(default)]
    input_text_tokens: String,
    #[serde(default)]
    completion_tokens: String,
    #[serde(default)]
    total_tokens: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: OpenAiUsage,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}

fn parse_count(raw: &str) -> i64 {
    raw.trim().parse().unwrap_or(0)
}

/// Normalize a 200 response body into a `Completion`
pub fn parse_completion(provider: Provider, body: &[u8]) -> Result<Completion, UpstreamFailure> {
    match provider {
        Provider::Yandex => {
            let parsed: YandexResponse = serde_json::from_slice(body)
                .map_err(|e| UpstreamFailure::InvalidResponse(e.to_string()))?;

            let Some(first) = parsed.result.alternatives.into_iter().next() else {
                return Ok(Completion::soft(PLACEHOLDER_ANSWER));
            };

            let usage = parsed.result.usage;
            Ok(Completion {
                content: first.message.text,
                prompt_tokens: parse_count(&usage.input_text_tokens),
                completion_tokens: parse_count(&usage.completion_tokens),
                total_tokens: parse_count(&usage.total_tokens),
            })
        }
        _ => {
            let parsed: OpenAiResponse = serde_json::from_slice(body)
                .map_err(|e| UpstreamFailure::InvalidResponse(e.to_string()))?;

            if let Some(error) = parsed.error.filter(|e| !e.is_null()) {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .or_else(|| error.as_str())
                    .unwrap_or("provider returned an error")
                    .to_string();
                return Ok(Completion::soft(message));
            }

            let Some(first) = parsed.choices.into_iter().next() else {
                return Ok(Completion::soft(PLACEHOLDER_ANSWER));
            };

            Ok(Completion {
                content: first.message.content.unwrap_or_default(),
                prompt_tokens: parsed.usage.prompt_tokens,
                completion_tokens: parsed.usage.completion_tokens,
                total_tokens: parsed.usage.total_tokens,
            })
        }
    }
}

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{http::HeaderMap, http::StatusCode as HttpStatus, routing::post, Json, Router};

    fn router_with(pairs: &[(&str, &str)]) -> ProviderRouter {
        let owned: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = ServerConfig::from_lookup(|key| {
            owned.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap();
        ProviderRouter::new(config.providers).unwrap()
    }

    fn request(model: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage::new("system", "be brief"),
                ChatMessage::new("user", "hello"),
            ],
            stream: true,
            temperature: None,
            max_tokens: None,
        }
    }

    #[test]
    fn test_routing_table() {
        let route = route_model("openai/gpt-4").unwrap();
        assert_eq!(route.provider, Provider::OpenAi);
        assert_eq!(route.upstream_model, "gpt-4");

        assert_eq!(route_model("deepseek-chat").unwrap().provider, Provider::DeepSeek);
        assert_eq!(route_model("deepseek-reasoner").unwrap().provider, Provider::DeepSeek);
        assert_eq!(route_model("yandex/x").unwrap().provider, Provider::Yandex);
        assert_eq!(route_model("gigachat/GigaChat-Pro").unwrap().provider, Provider::GigaChat);
        assert_eq!(route_model("ollama/llama3").unwrap().provider, Provider::Ollama);
    }

    #[test]
    fn test_unsupported_models() {
        for model in ["anthropic/claude", "deepseek-coder", "openai/", "gpt-4", ""] {
            let err = route_model(model).unwrap_err();
            assert_eq!(err.to_string(), "unsupported model", "model {:?}", model);
        }
    }

    #[test]
    fn test_yandex_reshape() {
        let router = router_with(&[("YANDEX_API_KEY", "y-key"), ("YANDEX_FOLDER_ID", "b1g")]);
        let route = route_model("yandex/x").unwrap();
        let body = router.request_body(&route, &request("yandex/x"));

        assert_eq!(body["modelUri"], "gpt://b1g/yandexgpt-lite");
        assert_eq!(body["completionOptions"]["stream"], false);
        assert_eq!(body["completionOptions"]["temperature"], 0.6);
        assert_eq!(body["completionOptions"]["maxTokens"], 2000);
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["text"], "hello");
        assert!(body["messages"][1].get("content").is_none());
    }

    #[test]
    fn test_openai_body_strips_family_and_disables_streaming() {
        let router = router_with(&[]);
        let route = route_model("openai/gpt-4").unwrap();
        let body = router.request_body(&route, &request("openai/gpt-4"));

        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["content"], "be brief");
    }

    #[test]
    fn test_endpoint_requires_credentials() {
        let router = router_with(&[]);
        let creds = ProviderCredentials::default();

        let err = router
            .endpoint(&route_model("openai/gpt-4").unwrap(), &creds)
            .unwrap_err();
        assert_eq!(err.to_string(), "API key for openai not configured");

        let err = router
            .endpoint(&route_model("yandex/x").unwrap(), &creds)
            .unwrap_err();
        assert_eq!(err.to_string(), "YandexGPT not configured");

        let ollama = router
            .endpoint(&route_model("ollama/llama3").unwrap(), &creds)
            .unwrap();
        assert!(ollama.authorization.is_none());
        assert_eq!(ollama.url, "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn test_endpoint_uses_key_credentials() {
        let router = router_with(&[("DEEPSEEK_BASE_URL", "http://127.0.0.1:9/")]);
        let creds = ProviderCredentials {
            deepseek: Some("ds-key".to_string()),
            ..Default::default()
        };
        let endpoint = router
            .endpoint(&route_model("deepseek-chat").unwrap(), &creds)
            .unwrap();
        assert_eq!(endpoint.url, "http://127.0.0.1:9/v1/chat/completions");
        assert_eq!(endpoint.authorization.as_deref(), Some("Bearer ds-key"));
    }

    #[test]
    fn test_parse_openai_response() {
        let body = br#"{"choices":[{"message":{"role":"assistant","content":"hi"}}],
                        "usage":{"prompt_tokens":3,"completion_tokens":5,"total_tokens":8}}"#;
        let completion = parse_completion(Provider::OpenAi, body).unwrap();
        assert_eq!(completion.content, "hi");
        assert_eq!(completion.total_tokens, 8);
        assert_eq!(completion.prompt_tokens, 3);
    }

    #[test]
    fn test_parse_yandex_string_usage() {
        let body = br#"{"result":{
            "alternatives":[{"message":{"role":"assistant","text":"privet"}}],
            "usage":{"inputTextTokens":"10","completionTokens":"20","totalTokens":"30"}}}"#;
        let completion = parse_completion(Provider::Yandex, body).unwrap();
        assert_eq!(completion.content, "privet");
        assert_eq!(completion.total_tokens, 30);
        assert_eq!(completion.completion_tokens, 20);
    }

    #[test]
    fn test_soft_failures() {
        let empty = parse_completion(Provider::OpenAi, br#"{"choices":[]}"#).unwrap();
        assert_eq!(empty.content, PLACEHOLDER_ANSWER);
        assert_eq!(empty.total_tokens, 0);

        let body = br#"{"result":{"alternatives":[]}}"#;
        let empty = parse_completion(Provider::Yandex, body).unwrap();
        assert_eq!(empty.content, PLACEHOLDER_ANSWER);

        let error = parse_completion(
            Provider::DeepSeek,
            br#"{"error":{"message":"Insufficient Balance"}}"#,
        )
        .unwrap();
        assert_eq!(error.content, "Insufficient Balance");
        assert_eq!(error.total_tokens, 0);
    }

    #[test]
    fn test_malformed_body() {
        let failure = parse_completion(Provider::OpenAi, b"<html>oops</html>").unwrap_err();
        assert!(matches!(failure, UpstreamFailure::InvalidResponse(_)));

        let failure = parse_completion(Provider::Yandex, br#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(failure, UpstreamFailure::InvalidResponse(_)));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ab", 3), "ab");
    }

    /// Serve `app` on an ephemeral local port and return its base URL
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn deepseek_call(base: &str) -> (ProviderRouter, ProviderRoute, Endpoint) {
        let router = router_with(&[("DEEPSEEK_BASE_URL", base)]);
        let route = route_model("deepseek-chat").unwrap();
        let creds = ProviderCredentials {
            deepseek: Some("ds-key".to_string()),
            ..Default::default()
        };
        let endpoint = router.endpoint(&route, &creds).unwrap();
        (router, route, endpoint)
    }

    #[tokio::test]
    async fn test_complete_against_openai_style_upstream() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer ds-key");
                assert_eq!(body["model"], "deepseek-chat");
                assert_eq!(body["stream"], false);
                Json(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "pong" } }],
                    "usage": { "prompt_tokens": 4, "completion_tokens": 1, "total_tokens": 5 }
                }))
            }),
        );
        let base = serve(app).await;
        let (router, route, endpoint) = deepseek_call(&base);

        let completion = router
            .complete(&route, &endpoint, &request("deepseek-chat"))
            .await
            .unwrap();
        assert_eq!(completion.content, "pong");
        assert_eq!(completion.total_tokens, 5);
    }

    #[tokio::test]
    async fn test_non_200_passes_status_and_body_through() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (HttpStatus::INTERNAL_SERVER_ERROR, "upstream exploded") }),
        );
        let base = serve(app).await;
        let (router, route, endpoint) = deepseek_call(&base);

        let failure = router
            .complete(&route, &endpoint, &request("deepseek-chat"))
            .await
            .unwrap_err();
        assert_eq!(
            failure,
            UpstreamFailure::Status {
                status: 500,
                body: "upstream exploded".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_html_with_200_is_invalid_response() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { axum::response::Html("<html>maintenance</html>") }),
        );
        let base = serve(app).await;
        let (router, route, endpoint) = deepseek_call(&base);

        let failure = router
            .complete(&route, &endpoint, &request("deepseek-chat"))
            .await
            .unwrap_err();
        assert!(matches!(failure, UpstreamFailure::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_network_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let (router, route, endpoint) = deepseek_call(&format!("http://{}", addr));

        let failure = router
            .complete(&route, &endpoint, &request("deepseek-chat"))
            .await
            .unwrap_err();
        assert!(matches!(failure, UpstreamFailure::Network(_)));
    }

    #[tokio::test]
    async fn test_yandex_round_trip_with_string_usage() {
        let app = Router::new().route(
            "/foundationModels/v1/completion",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Api-Key y-key");
                assert_eq!(headers["x-folder-id"], "b1g");
                assert_eq!(body["modelUri"], "gpt://b1g/yandexgpt-lite");
                assert_eq!(body["messages"][1]["text"], "hello");
                Json(json!({
                    "result": {
                        "alternatives": [{ "message": { "role": "assistant", "text": "privet" } }],
                        "usage": {
                            "inputTextTokens": "12",
                            "completionTokens": "30",
                            "totalTokens": "42"
                        }
                    }
                }))
            }),
        );
        let base = serve(app).await;
        let router = router_with(&[
            ("YANDEX_API_KEY", "y-key"),
            ("YANDEX_FOLDER_ID", "b1g"),
            ("YANDEX_BASE_URL", base.as_str()),
        ]);
        let route = route_model("yandex/x").unwrap();
        let endpoint = router
            .endpoint(&route, &ProviderCredentials::default())
            .unwrap();

        let completion = router
            .complete(&route, &endpoint, &request("yandex/x"))
            .await
            .unwrap();
        assert_eq!(completion.content, "privet");
        assert_eq!(completion.prompt_tokens, 12);
        assert_eq!(completion.total_tokens, 42);
    }
}
