//! LLM 모듈 - 텍스트 생성 클라이언트
//!
//! - `OllamaChat`: 로컬 Ollama 서버 (응답 생성용)
//! - `GeminiChat`: Google Gemini API (평가 judge용, rate limit + 지수 백오프)
//!
//! 재시도/백오프는 이 모듈 안에서만 처리합니다. 상위 계층은 재시도하지 않습니다.

mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use rate_limit::RateLimiter;

/// 기본 Ollama 엔드포인트
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

// ============================================================================
// LlmClient Trait
// ============================================================================

/// LLM 클라이언트 트레이트
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 프롬프트에 대한 응답 텍스트 생성
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// 모델 이름
    fn model(&self) -> &str;
}

/// Ollama 엔드포인트 결정
///
/// 우선순위: 파라미터 > `OLLAMA_BASE_URL` 환경변수 > 기본값
pub fn ollama_base_url(param: Option<&str>) -> String {
    if let Some(url) = param.filter(|u| !u.is_empty()) {
        return url.trim_end_matches('/').to_string();
    }
    match std::env::var("OLLAMA_BASE_URL") {
        Ok(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
        _ => DEFAULT_OLLAMA_URL.to_string(),
    }
}

// ============================================================================
// Ollama Chat
// ============================================================================

/// Ollama chat 클라이언트
///
/// ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-chat-completion
#[derive(Debug, Clone)]
pub struct OllamaChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

impl OllamaChat {
    pub fn new(model: impl Into<String>, base_url: Option<&str>, temperature: f32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: ollama_base_url(base_url),
            model: model.into(),
            temperature,
        })
    }
}

#[async_trait]
impl LlmClient for OllamaChat {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages: vec![OllamaMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send chat request to {}", url))?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response body")?;

        if !status.is_success() {
            anyhow::bail!("Ollama chat error ({}): {}", status, body);
        }

        let parsed: OllamaChatResponse =
            serde_json::from_str(&body).context("Failed to parse Ollama chat response")?;
        Ok(parsed.message.content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Gemini Chat
// ============================================================================

/// Gemini generateContent 엔드포인트 (모델 이름 포함)
/// source: https://ai.google.dev/api/generate-content
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// 기본 judge 모델
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Rate Limiter 설정 (Gemini 무료 티어 기준)
const RATE_LIMIT_RPM: u32 = 15;
pub(crate) const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 호출 간 최소 딜레이
const MIN_DELAY_MS: u64 = 4000;
/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Gemini chat 클라이언트
///
/// 한 인스턴스를 공유하는 모든 호출이 같은 rate limiter를 거칩니다.
#[derive(Debug, Clone)]
pub struct GeminiChat {
    api_key: String,
    client: reqwest::Client,
    model: String,
    temperature: f32,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<GenerateContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateContent {
    #[serde(default)]
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeneratePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: GenerateContent,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

impl GeminiChat {
    pub fn new(api_key: String, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            model: model.into(),
            temperature: 0.0,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                RATE_LIMIT_RPM,
                RATE_LIMIT_WINDOW,
                Duration::from_millis(MIN_DELAY_MS),
            ))),
        })
    }

    /// 환경변수의 API 키로 기본 모델 클라이언트 생성
    pub fn from_env() -> Result<Self> {
        Self::new(get_api_key()?, DEFAULT_GEMINI_MODEL)
    }
}

#[async_trait]
impl LlmClient for GeminiChat {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![GenerateContent {
                parts: vec![GeneratePart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };
        let url = format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model);

        let body = gemini_post(&self.client, &url, &self.api_key, &request, &self.rate_limiter)
            .await?;
        let parsed: GenerateResponse =
            serde_json::from_str(&body).context("Failed to parse generate response")?;

        parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| anyhow::anyhow!("Gemini returned no candidates"))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Gemini API POST 호출 (rate limit + 429 지수 백오프)
///
/// 성공 시 응답 본문을 반환합니다. 429와 전송 실패만 재시도하고,
/// 그 외 HTTP 에러는 즉시 실패합니다.
pub(crate) async fn gemini_post<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    request: &T,
    rate_limiter: &Mutex<RateLimiter>,
) -> Result<String> {
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..=MAX_RETRIES {
        rate_limiter.lock().await.acquire().await;

        let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));

        let response = match client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                last_error = Some(anyhow::anyhow!("Failed to send Gemini request: {}", e));
                if attempt < MAX_RETRIES {
                    tracing::warn!(
                        "Request failed, retrying in {:?} (attempt {}/{})",
                        backoff,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                break;
            }
        };

        let status = response.status();
        let body = response.text().await.context("Failed to read response body")?;

        if status.is_success() {
            return Ok(body);
        }

        if status.as_u16() != 429 {
            if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                anyhow::bail!(
                    "Gemini API error ({}): {}",
                    error.error.status,
                    error.error.message
                );
            }
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        tracing::warn!(
            "Rate limit hit (429), backing off {:?} (attempt {}/{})",
            backoff,
            attempt + 1,
            MAX_RETRIES
        );
        last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));
        if attempt < MAX_RETRIES {
            tokio::time::sleep(backoff).await;
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow::anyhow!("Gemini request failed after {} retries", MAX_RETRIES)))
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키를 찾는 환경변수 (우선순위 순)
const API_KEY_VARS: [&str; 3] = ["GEMINI_API_KEY", "GOOGLE_API_KEY", "GOOGLE_AI_API_KEY"];

/// API 키 로드 (환경변수에서)
pub fn get_api_key() -> Result<String> {
    for var in API_KEY_VARS {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    API_KEY_VARS
        .iter()
        .any(|var| std::env::var(var).map(|k| !k.is_empty()).unwrap_or(false))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_base_url_param_wins() {
        assert_eq!(
            ollama_base_url(Some("http://gpu-box:11434/")),
            "http://gpu-box:11434"
        );
    }

    #[test]
    fn test_generate_request_shape() {
        let request = GenerateRequest {
            contents: vec![GenerateContent {
                parts: vec![GeneratePart {
                    text: "hi".to_string(),
                }],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
        assert!(value.get("generationConfig").is_some());
    }

    #[test]
    fn test_parse_chat_response() {
        let body = r#"{"model":"qwen2.5:3b","message":{"role":"assistant","content":"Einstein."},"done":true}"#;
        let parsed: OllamaChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.message.content, "Einstein.");
    }

    #[test]
    fn test_gemini_client_model_name() {
        let chat = GeminiChat::new("fake_key".to_string(), "gemini-2.0-flash-lite").unwrap();
        assert_eq!(chat.model(), "gemini-2.0-flash-lite");
    }
}
