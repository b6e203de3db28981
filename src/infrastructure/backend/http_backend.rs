//! `BackendApi` over the backend's internal JSON API
//!
//! Every request carries the shared `x-api-key` credential and is bounded by
//! the configured timeout. Timeouts, transport failures and HTTP errors are
//! logged apart; callers only see a [`BackendError`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use rust_ocpp::v1_6::types::IdTagInfo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::application::ports::{
    BackendApi, BootInfo, ConnectorStatusReport, MeterReport, StartedTransaction,
    TransactionStart, TransactionStop,
};
use crate::config::BackendConfig;
use crate::support::BackendError;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct HttpBackendApi {
    client: Client,
    base_url: String,
}

// ── Wire types ─────────────────────────────────────────────────

#[derive(Serialize)]
struct BootBody<'a> {
    vendor: &'a str,
    model: &'a str,
    serial_number: Option<&'a str>,
    firmware_version: Option<&'a str>,
}

#[derive(Serialize)]
struct AuthorizeBody<'a> {
    id_tag: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeReply {
    id_tag_info: IdTagInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatReply {
    current_time: DateTime<Utc>,
}

#[derive(Serialize)]
struct StartBody<'a> {
    ocpp_id: &'a str,
    connector_id: u32,
    id_tag: &'a str,
    meter_start: i32,
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartReply {
    #[serde(alias = "transaction_id")]
    transaction_id: i32,
    #[serde(default, alias = "max_power_kw")]
    max_power_kw: Option<f64>,
}

#[derive(Serialize)]
struct StopBody<'a> {
    transaction_id: i32,
    meter_stop: i32,
    timestamp: DateTime<Utc>,
    id_tag: Option<&'a str>,
    reason: Option<&'a str>,
}

#[derive(Serialize)]
struct MeterBody {
    transaction_id: i32,
    meter_value: i64,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    ocpp_id: &'a str,
    connector_number: u32,
    status: &'a str,
    error_code: &'a str,
    info: Option<&'a str>,
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ChargerExistsReply {
    id: Value,
    #[serde(default = "default_active")]
    is_active: bool,
}

fn default_active() -> bool {
    true
}

// ── Client ─────────────────────────────────────────────────────

impl HttpBackendApi {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| BackendError::Network(format!("Invalid API key header: {}", e)))?;
            headers.insert(API_KEY_HEADER, value);
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| BackendError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
    }

    /// Send `request`; 2xx responses are handed back for decoding.
    async fn execute(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let result = request.send().await;
        let outcome = match &result {
            Ok(response) if response.status().is_success() => "ok",
            Ok(_) => "http_error",
            Err(e) if e.is_timeout() => "timeout",
            Err(_) => "network_error",
        };
        metrics::counter!("backend_requests_total", "endpoint" => endpoint, "outcome" => outcome)
            .increment(1);

        let response = result.map_err(|e| {
            if e.is_timeout() {
                warn!(endpoint, error = %e, "Backend request timed out");
                BackendError::Timeout
            } else {
                error!(endpoint, error = %e, "Backend unreachable");
                BackendError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(endpoint, status = status.as_u16(), "Backend request succeeded");
            return Ok(response);
        }

        let message = error_message(response).await;
        warn!(endpoint, status = status.as_u16(), message = message.as_str(), "Backend error response");
        Err(match status {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => BackendError::Rejected {
                status: status.as_u16(),
                message,
            },
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => BackendError::Timeout,
            _ => BackendError::Http {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn post_json<B: Serialize>(
        &self,
        endpoint: &'static str,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, BackendError> {
        self.execute(endpoint, self.request(Method::POST, path).json(body))
            .await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

/// Best-effort error text: FastAPI's `detail`, else the raw body.
async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(body)) => match body.get("detail").or_else(|| body.get("message")) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => text,
        },
        _ if text.is_empty() => format!("HTTP {}", status),
        _ => text,
    }
}

#[async_trait]
impl BackendApi for HttpBackendApi {
    async fn verify_identity(&self, charge_point_id: &str) -> Result<String, BackendError> {
        let request = self.request(Method::GET, &format!("/charger/exists/{}", charge_point_id));
        let reply: ChargerExistsReply = decode(self.execute("charger_exists", request).await?).await?;

        if !reply.is_active {
            return Err(BackendError::Rejected {
                status: StatusCode::FORBIDDEN.as_u16(),
                message: "charger is deactivated".to_string(),
            });
        }
        Ok(match reply.id {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    async fn authorize(&self, charge_point_id: &str, id_tag: &str) -> Result<IdTagInfo, BackendError> {
        let response = self
            .post_json(
                "authorize",
                &format!("/authorize/{}", charge_point_id),
                &AuthorizeBody { id_tag },
            )
            .await?;
        let reply: AuthorizeReply = decode(response).await?;
        Ok(reply.id_tag_info)
    }

    async fn notify_boot(&self, charge_point_id: &str, info: &BootInfo) -> Result<(), BackendError> {
        let body = BootBody {
            vendor: &info.vendor,
            model: &info.model,
            serial_number: info.serial_number.as_deref(),
            firmware_version: info.firmware_version.as_deref(),
        };
        self.post_json(
            "boot_notification",
            &format!("/boot-notification/{}", charge_point_id),
            &body,
        )
        .await?;
        Ok(())
    }

    async fn notify_heartbeat(&self, charge_point_id: &str) -> Result<DateTime<Utc>, BackendError> {
        let response = self
            .post_json(
                "heartbeat",
                &format!("/heartbeat/{}", charge_point_id),
                &serde_json::json!({}),
            )
            .await?;
        let reply: HeartbeatReply = decode(response).await?;
        Ok(reply.current_time)
    }

    async fn start_transaction(&self, start: &TransactionStart) -> Result<StartedTransaction, BackendError> {
        let body = StartBody {
            ocpp_id: &start.charge_point_id,
            connector_id: start.connector_id,
            id_tag: &start.id_tag,
            meter_start: start.meter_start,
            timestamp: start.timestamp,
        };
        let response = self
            .post_json("transaction_start", "/transaction/start", &body)
            .await?;
        let reply: StartReply = decode(response).await?;
        // Id 0 is what the charger gets when nothing is billed.
        if reply.transaction_id <= 0 {
            return Err(BackendError::Decode(format!(
                "unusable transaction id {}",
                reply.transaction_id
            )));
        }
        Ok(StartedTransaction {
            transaction_id: reply.transaction_id,
            max_power_kw: reply.max_power_kw,
        })
    }

    async fn stop_transaction(&self, stop: &TransactionStop) -> Result<(), BackendError> {
        let body = StopBody {
            transaction_id: stop.transaction_id,
            meter_stop: stop.meter_stop,
            timestamp: stop.timestamp,
            id_tag: stop.id_tag.as_deref(),
            reason: stop.reason.as_deref(),
        };
        self.post_json("transaction_stop", "/transaction/stop", &body)
            .await?;
        Ok(())
    }

    async fn report_meter_value(&self, report: &MeterReport) -> Result<(), BackendError> {
        let body = MeterBody {
            transaction_id: report.transaction_id,
            meter_value: report.meter_value_wh,
        };
        self.post_json("meter_values", "/transaction/meter-values", &body)
            .await?;
        Ok(())
    }

    async fn report_connector_status(&self, report: &ConnectorStatusReport) -> Result<(), BackendError> {
        let body = StatusBody {
            ocpp_id: &report.charge_point_id,
            connector_number: report.connector_id,
            status: &report.status,
            error_code: &report.error_code,
            info: report.info.as_deref(),
            timestamp: report.timestamp,
        };
        self.post_json("connector_status", "/connector-status", &body)
            .await?;
        Ok(())
    }
}
