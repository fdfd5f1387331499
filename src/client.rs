use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};

use crate::config::ApiSettings;
use crate::error::ApiError;

#[async_trait]
pub trait IncidentSource: Send + Sync {
    async fn identities(&self) -> Result<Map<String, Value>, ApiError>;

    async fn incidents(&self, incident_type: &str) -> Result<Vec<Value>, ApiError>;
}

#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl GatewayClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .connect_timeout(settings.connect_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    fn url_for(&self, suffix: &str) -> String {
        format!("{}/{}/", self.base_url, suffix.trim_matches('/'))
    }

    pub async fn get_json(&self, suffix: &str) -> Result<Value, ApiError> {
        let url = self.url_for(suffix);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|source| ApiError::Network {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Auth { url, status });
        }
        if !status.is_success() {
            return Err(ApiError::Status { url, status });
        }

        let body = response.bytes().await.map_err(|source| ApiError::Network {
            url: url.clone(),
            source,
        })?;

        serde_json::from_slice(&body).map_err(|err| ApiError::Malformed {
            url,
            reason: err.to_string(),
        })
    }
}

#[async_trait]
impl IncidentSource for GatewayClient {
    async fn identities(&self) -> Result<Map<String, Value>, ApiError> {
        match self.get_json("identities").await? {
            Value::Object(mapping) => Ok(mapping),
            other => Err(ApiError::Malformed {
                url: self.url_for("identities"),
                reason: format!("expected an object, got {}", json_kind(&other)),
            }),
        }
    }

    async fn incidents(&self, incident_type: &str) -> Result<Vec<Value>, ApiError> {
        let suffix = format!("incidents/{incident_type}");
        let body = self.get_json(&suffix).await?;
        extract_results(body).map_err(|reason| ApiError::Malformed {
            url: self.url_for(&suffix),
            reason,
        })
    }
}

fn extract_results(body: Value) -> Result<Vec<Value>, String> {
    let Value::Object(mut object) = body else {
        return Err(format!("expected an object, got {}", json_kind(&body)));
    };

    match object.remove("results") {
        Some(Value::Array(results)) => Ok(results),
        Some(other) => Err(format!(
            "expected `results` to be an array, got {}",
            json_kind(&other)
        )),
        None => Err("missing `results` field".to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
