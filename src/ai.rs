use std::error::Error;
use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum RpcError {
    Transport(String),
    Status { status: u16, message: String },
    Malformed(String),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Transport(message) => write!(f, "AI service unreachable: {}", message),
            RpcError::Status { status, message } => {
                write!(f, "AI service returned status {}: {}", status, message)
            }
            RpcError::Malformed(message) => {
                write!(f, "AI service returned a malformed payload: {}", message)
            }
        }
    }
}

impl Error for RpcError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    High,
    Low,
}

#[derive(Debug, Serialize)]
struct ImageField {
    mime: String,
    base64: String,
    detail: ImageDetail,
}

#[derive(Debug, Serialize)]
struct VisionRequest {
    image: ImageField,
    model: String,
}

/// Structured fields read off an aisle-sign photo. Any of them may be
/// missing; the ingestion pipeline decides what is usable.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SignReading {
    #[serde(default)]
    pub title_original: Option<String>,
    #[serde(default)]
    pub title_en: Option<String>,
    #[serde(default)]
    pub aisle_code: Option<String>,
    #[serde(default)]
    pub keywords_original: Vec<String>,
    #[serde(default)]
    pub keywords_en: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
}

pub trait VisionClient: Send + Sync {
    fn read_aisle_sign(&self, mime: &str, image: &[u8]) -> Result<SignReading, RpcError>;
}

#[derive(Debug, Serialize)]
pub struct RankingRequest {
    #[serde(rename = "productName")]
    pub product_name: String,
    pub aisles: Vec<AisleProjection>,
}

/// Compact per-aisle projection sent to the ranking RPC.
#[derive(Debug, Serialize)]
pub struct AisleProjection {
    pub id: String,
    #[serde(rename = "nameOrNumber")]
    pub name_or_number: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RankingResponse {
    #[serde(default)]
    pub candidates: Vec<RankedAisle>,
    #[serde(default)]
    pub not_found: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RankedAisle {
    #[serde(rename = "aisleId")]
    pub aisle_id: String,
    pub confidence_label: ConfidenceLabel,
    pub confidence_score: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLabel {
    Sure,
    Likely,
    Maybe,
    Uncertain,
}

impl ConfidenceLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLabel::Sure => "sure",
            ConfidenceLabel::Likely => "likely",
            ConfidenceLabel::Maybe => "maybe",
            ConfidenceLabel::Uncertain => "uncertain",
        }
    }
}

pub trait SuggestionClient: Send + Sync {
    fn rank_aisles(&self, request: &RankingRequest) -> Result<RankingResponse, RpcError>;
}

/// ureq-backed client for both AI endpoints.
pub struct HttpAiClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
    model: String,
    detail: ImageDetail,
}

impl HttpAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        detail: ImageDetail,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(RPC_TIMEOUT).build(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            detail,
        }
    }

    fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, RpcError> {
        let url = format!("{}{}", self.base_url, path);
        let request = match &self.api_key {
            Some(key) => self
                .agent
                .post(&url)
                .set("authorization", &format!("Bearer {}", key)),
            None => self.agent.post(&url),
        };
        let response = request.send_json(body).map_err(|err| match err {
            ureq::Error::Status(status, response) => RpcError::Status {
                status,
                message: response
                    .into_string()
                    .unwrap_or_else(|_| "<unreadable body>".to_string()),
            },
            ureq::Error::Transport(transport) => RpcError::Transport(transport.to_string()),
        })?;
        response
            .into_json()
            .map_err(|err| RpcError::Malformed(err.to_string()))
    }
}

impl VisionClient for HttpAiClient {
    fn read_aisle_sign(&self, mime: &str, image: &[u8]) -> Result<SignReading, RpcError> {
        let request = VisionRequest {
            image: ImageField {
                mime: mime.to_string(),
                base64: BASE64_STANDARD.encode(image),
                detail: self.detail,
            },
            model: self.model.clone(),
        };
        self.post_json("/v1/vision/aisle-sign", &request)
    }
}

impl SuggestionClient for HttpAiClient {
    fn rank_aisles(&self, request: &RankingRequest) -> Result<RankingResponse, RpcError> {
        self.post_json("/v1/suggest/aisle", request)
    }
}
