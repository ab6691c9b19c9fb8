#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bws_contracts::gene::GeneTable;
use bws_contracts::result::{CancerRiskResult, MutationProbabilityResult};
use bws_contracts::ContractViolation;
use bws_engines::config::{
    engine_env, CancerModel, CancerModelConfig, EngineConfig, DEFAULT_ENGINE_TIMEOUT,
    DEFAULT_MAX_PEDIGREE_SIZE,
};
use bws_engines::pedigree_file::BoadiceaPedigreeParser;
use bws_engines::runner::ProcessRunner;
use bws_os::fields::{RawCalculationInput, FIELD_CANCER_RATES, FIELD_MUT_FREQ, FIELD_NON_FIELD, FIELD_PEDIGREE_DATA};
use bws_os::orchestrator::{
    OrchestratorConfig, OrchestratorError, RequestOrchestrator, RequestOutcome,
};
use serde::Serialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, info, Level};

pub const TIMEOUT_MESSAGE: &str = "computation did not complete in time";
pub const FAILURE_MESSAGE: &str = "calculation failed";

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";
const DEFAULT_ENGINE_HOME: &str = "/opt/boadicea";
const DEFAULT_NICE_PROGRAM: &str = "nice";
const ENGINE_TIMEOUT_SECS_RANGE: std::ops::RangeInclusive<u64> = 1..=3600;
const MAX_PEDIGREE_SIZE_RANGE: std::ops::RangeInclusive<usize> = 1..=1000;

pub type BwsOrchestrator = RequestOrchestrator<BoadiceaPedigreeParser, ProcessRunner>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: {reason} (got '{value}')")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("cancer model configuration invalid: {0}")]
    Model(#[from] ContractViolation),
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind: SocketAddr,
    pub engine_home: PathBuf,
    pub work_dir: PathBuf,
    pub engine_timeout: Duration,
    pub max_pedigree_size: usize,
    pub nice_program: Option<PathBuf>,
    pub log_level: Level,
    pub engine_env: Vec<(String, String)>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    pub fn from_env_var_map<F>(mut env_getter: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut get = |key: &str| env_getter(key).map(|v| v.trim().to_string());

        let bind_raw = get("BWS_HTTP_BIND")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
        let bind = bind_raw.parse().map_err(|_| ConfigError::InvalidEnv {
            key: "BWS_HTTP_BIND",
            value: bind_raw.clone(),
            reason: "expected host:port",
        })?;

        let engine_home = get("BWS_ENGINE_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_HOME));
        let work_dir = get("BWS_WORK_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);

        let engine_timeout = match get("BWS_ENGINE_TIMEOUT_SECS").filter(|v| !v.is_empty()) {
            None => DEFAULT_ENGINE_TIMEOUT,
            Some(v) => Duration::from_secs(parse_in_range(
                "BWS_ENGINE_TIMEOUT_SECS",
                &v,
                ENGINE_TIMEOUT_SECS_RANGE,
            )?),
        };
        let max_pedigree_size = match get("BWS_MAX_PEDIGREE_SIZE").filter(|v| !v.is_empty()) {
            None => DEFAULT_MAX_PEDIGREE_SIZE,
            Some(v) => parse_in_range("BWS_MAX_PEDIGREE_SIZE", &v, MAX_PEDIGREE_SIZE_RANGE)?,
        };

        // Set but empty disables the launcher.
        let nice_program = match get("BWS_NICE_PROGRAM") {
            None => Some(PathBuf::from(DEFAULT_NICE_PROGRAM)),
            Some(v) if v.is_empty() => None,
            Some(v) => Some(PathBuf::from(v)),
        };

        let level_raw = get("BWS_LOG")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "info".to_string());
        let log_level = Level::from_str(&level_raw).map_err(|_| ConfigError::InvalidEnv {
            key: "BWS_LOG",
            value: level_raw.clone(),
            reason: "expected trace, debug, info, warn or error",
        })?;

        let inherited = get("LD_LIBRARY_PATH").filter(|v| !v.is_empty());
        Ok(Self {
            bind,
            engine_home,
            work_dir,
            engine_timeout,
            max_pedigree_size,
            nice_program,
            log_level,
            engine_env: engine_env(inherited.as_deref()),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            timeout: self.engine_timeout,
            nice_program: self.nice_program.clone(),
            env: self.engine_env.clone(),
        }
    }
}

fn parse_in_range<T>(
    key: &'static str,
    raw: &str,
    range: std::ops::RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd,
{
    raw.parse::<T>()
        .ok()
        .filter(|v| range.contains(v))
        .ok_or_else(|| ConfigError::InvalidEnv {
            key,
            value: raw.to_string(),
            reason: "not a whole number in the accepted range",
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PedigreeResult {
    pub family_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancer_risks: Option<CancerRiskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation_probabilities: Option<MutationProbabilityResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationResponse {
    pub version: String,
    pub timestamp: String,
    /// Keyed by population label.
    pub mutation_frequency: BTreeMap<String, GeneTable>,
    pub mutation_sensitivity: GeneTable,
    /// Incidence table actually applied, by file stem.
    pub cancer_incidence_rates: String,
    pub pedigree_result: Vec<PedigreeResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl CalculationResponse {
    pub fn from_outcome(outcome: RequestOutcome, timestamp: String) -> Self {
        let request = outcome.request;
        Self {
            version: outcome.version,
            timestamp,
            mutation_frequency: BTreeMap::from([(
                request.population.as_str().to_string(),
                request.mutation_frequencies,
            )]),
            mutation_sensitivity: request.sensitivities,
            cancer_incidence_rates: request.cancer_rates.file_stem().to_string(),
            pedigree_result: outcome
                .families
                .into_iter()
                .map(|f| PedigreeResult {
                    family_id: f.family_id.as_str().to_string(),
                    cancer_risks: f.cancer_risks,
                    mutation_probabilities: f.mutation_probabilities,
                })
                .collect(),
            warnings: outcome.warnings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub outcome: String,
    pub detail: Value,
}

impl ErrorResponse {
    fn new(outcome: &str, detail: Value) -> Self {
        Self {
            status: "error".to_string(),
            outcome: outcome.to_string(),
            detail,
        }
    }
}

/// Maps an orchestration failure to its status and caller-visible body.
/// Engine diagnostics stay in the logs.
pub fn error_response(err: &OrchestratorError) -> (StatusCode, ErrorResponse) {
    match err {
        OrchestratorError::Validation(errors) => (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("REJECTED", json!(errors.fields())),
        ),
        OrchestratorError::Pedigree(e) => (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("REJECTED", json!({ FIELD_PEDIGREE_DATA: [e.to_string()] })),
        ),
        e if e.is_timeout() => (
            StatusCode::GATEWAY_TIMEOUT,
            ErrorResponse::new("TIMEOUT", json!(TIMEOUT_MESSAGE)),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::new("FAILED", json!(FAILURE_MESSAGE)),
        ),
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub struct AdapterRuntime {
    config: ServiceConfig,
    breast: BwsOrchestrator,
    ovarian: BwsOrchestrator,
}

impl AdapterRuntime {
    pub fn default_from_env() -> Result<Self, ConfigError> {
        Self::from_config(ServiceConfig::from_env()?)
    }

    pub fn from_config(config: ServiceConfig) -> Result<Self, ConfigError> {
        let build = |model: CancerModelConfig| {
            RequestOrchestrator::new(
                OrchestratorConfig::mvp_v1(config.work_dir.clone()),
                Arc::new(model),
                BoadiceaPedigreeParser::new(config.max_pedigree_size),
                ProcessRunner::new(config.engine_config()),
            )
        };
        let breast = build(CancerModelConfig::boadicea_v6(&config.engine_home)?);
        let ovarian = build(CancerModelConfig::ovarian_v2(&config.engine_home)?);
        Ok(Self {
            config,
            breast,
            ovarian,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn orchestrator(&self, model: CancerModel) -> &BwsOrchestrator {
        match model {
            CancerModel::Breast => &self.breast,
            CancerModel::Ovarian => &self.ovarian,
        }
    }

    pub fn health_report(&self) -> Result<AdapterHealthResponse, String> {
        if !self.config.work_dir.is_dir() {
            return Err(format!(
                "work directory {} is not available",
                self.config.work_dir.display()
            ));
        }
        Ok(AdapterHealthResponse {
            status: "ok".to_string(),
            outcome: "HEALTHY".to_string(),
            reason: None,
            models: vec![
                self.breast.model().version.clone(),
                self.ovarian.model().version.clone(),
            ],
        })
    }

    pub async fn run_calculation(&self, model: CancerModel, raw: &RawCalculationInput) -> Response {
        match self.orchestrator(model).handle(raw).await {
            Ok(outcome) => {
                info!(
                    model = model.as_str(),
                    families = outcome.families.len(),
                    "calculation complete"
                );
                let body = CalculationResponse::from_outcome(outcome, now_rfc3339());
                (StatusCode::OK, Json(body)).into_response()
            }
            Err(err) => {
                if err.is_client_error() {
                    info!(model = model.as_str(), error = %err, "request rejected");
                } else {
                    error!(model = model.as_str(), error = %err, "calculation failed");
                }
                let (status, body) = error_response(&err);
                (status, Json(body)).into_response()
            }
        }
    }
}

pub fn build_router(runtime: Arc<AdapterRuntime>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/bws", post(run_breast))
        .route("/ows", post(run_ovarian))
        .with_state(runtime)
}

async fn healthz(
    State(runtime): State<Arc<AdapterRuntime>>,
) -> (StatusCode, Json<AdapterHealthResponse>) {
    match runtime.health_report() {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(reason) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AdapterHealthResponse {
                status: "error".to_string(),
                outcome: "UNHEALTHY".to_string(),
                reason: Some(reason),
                models: Vec::new(),
            }),
        ),
    }
}

async fn run_breast(State(runtime): State<Arc<AdapterRuntime>>, req: Request) -> Response {
    run_model(&runtime, CancerModel::Breast, req).await
}

async fn run_ovarian(State(runtime): State<Arc<AdapterRuntime>>, req: Request) -> Response {
    run_model(&runtime, CancerModel::Ovarian, req).await
}

async fn run_model(runtime: &AdapterRuntime, model: CancerModel, req: Request) -> Response {
    match decode_request(req).await {
        Ok(raw) => runtime.run_calculation(model, &raw).await,
        Err(reason) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "REJECTED",
                json!({ FIELD_NON_FIELD: [reason] }),
            )),
        )
            .into_response(),
    }
}

/// Accepts `multipart/form-data` (the pedigree may be a file part) or a JSON
/// object with the same field names.
pub async fn decode_request(req: Request) -> Result<RawCalculationInput, String> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    let mut raw = RawCalculationInput::default();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| e.body_text())?;
        while let Some(field) = multipart.next_field().await.map_err(|e| e.body_text())? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let bytes = field.bytes().await.map_err(|e| e.body_text())?;
            let text = String::from_utf8(bytes.to_vec())
                .map_err(|_| format!("{name}: content is not valid UTF-8"))?;
            assign_field(&mut raw, &name, text);
        }
        return Ok(raw);
    }

    let Json(body) = Json::<serde_json::Map<String, Value>>::from_request(req, &())
        .await
        .map_err(|e| e.body_text())?;
    for (name, value) in body {
        let text = match value {
            Value::String(s) => s,
            Value::Null => continue,
            other => other.to_string(),
        };
        assign_field(&mut raw, &name, text);
    }
    Ok(raw)
}

fn assign_field(raw: &mut RawCalculationInput, name: &str, value: String) {
    match name {
        FIELD_PEDIGREE_DATA => raw.pedigree_data = Some(value),
        FIELD_MUT_FREQ => raw.mut_freq = Some(value),
        FIELD_CANCER_RATES => raw.cancer_rates = Some(value),
        n if n.ends_with("_mut_frequency") || n.ends_with("_mut_sensitivity") => {
            raw.gene_fields.insert(n.to_string(), value);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use bws_engines::runner::RunnerError;
    use bws_os::fields::ValidationErrors;

    fn env_map(pairs: &[(&str, &str)]) -> impl FnMut(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn at_adapter_01_config_defaults() {
        let cfg = ServiceConfig::from_env_var_map(env_map(&[])).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.engine_home, PathBuf::from("/opt/boadicea"));
        assert_eq!(cfg.engine_timeout, Duration::from_secs(240));
        assert_eq!(cfg.max_pedigree_size, 275);
        assert_eq!(cfg.nice_program, Some(PathBuf::from("nice")));
        assert_eq!(cfg.log_level, Level::INFO);
    }

    #[test]
    fn at_adapter_02_config_overrides_are_trimmed() {
        let cfg = ServiceConfig::from_env_var_map(env_map(&[
            ("BWS_HTTP_BIND", " 0.0.0.0:9000 "),
            ("BWS_ENGINE_TIMEOUT_SECS", "30"),
            ("BWS_MAX_PEDIGREE_SIZE", "100"),
            ("BWS_NICE_PROGRAM", ""),
            ("BWS_LOG", "debug"),
            ("LD_LIBRARY_PATH", "/lib64"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind.port(), 9000);
        assert_eq!(cfg.engine_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_pedigree_size, 100);
        assert_eq!(cfg.nice_program, None);
        assert_eq!(cfg.log_level, Level::DEBUG);
        assert!(cfg.engine_env.contains(&(
            "LD_LIBRARY_PATH".to_string(),
            "/lib64:/usr/local/lib".to_string()
        )));
    }

    #[test]
    fn at_adapter_03_config_rejects_out_of_range_values() {
        for (key, value) in [
            ("BWS_ENGINE_TIMEOUT_SECS", "0"),
            ("BWS_ENGINE_TIMEOUT_SECS", "ten"),
            ("BWS_MAX_PEDIGREE_SIZE", "5000"),
            ("BWS_HTTP_BIND", "localhost"),
            ("BWS_LOG", "chatty"),
        ] {
            let err = ServiceConfig::from_env_var_map(env_map(&[(key, value)])).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidEnv { key: k, .. } if k == key),
                "{key}={value}"
            );
        }
    }

    #[test]
    fn at_adapter_04_error_mapping() {
        let mut errors = ValidationErrors::new();
        errors.add("cancer_rates", "This field is required.");
        let (status, body) = error_response(&OrchestratorError::Validation(errors));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.detail["cancer_rates"][0], "This field is required.");

        let timeout = OrchestratorError::Engine {
            family_id: "F1".to_string(),
            kind: "cancer_risk",
            source: RunnerError::TimedOut {
                timeout: Duration::from_secs(240),
            },
        };
        let (status, body) = error_response(&timeout);
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body.detail, json!(TIMEOUT_MESSAGE));

        let failed = OrchestratorError::Engine {
            family_id: "F1".to_string(),
            kind: "cancer_risk",
            source: RunnerError::Failed { exit_code: Some(7) },
        };
        let (status, body) = error_response(&failed);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.detail.to_string().contains('7'));
    }

    #[tokio::test]
    async fn at_adapter_05_json_numbers_become_field_text() {
        let req = Request::builder()
            .method("POST")
            .uri("/bws")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "pedigree_data": "##BOADICEA import pedigree file format 4.0",
                    "mut_freq": "Custom",
                    "cancer_rates": "UK",
                    "brca1_mut_frequency": 0.001,
                    "brca2_mut_sensitivity": "0.9",
                    "ignored": true
                })
                .to_string(),
            ))
            .unwrap();
        let raw = decode_request(req).await.unwrap();
        assert_eq!(raw.mut_freq.as_deref(), Some("Custom"));
        assert_eq!(raw.gene_fields["brca1_mut_frequency"], "0.001");
        assert_eq!(raw.gene_fields["brca2_mut_sensitivity"], "0.9");
        assert_eq!(raw.gene_fields.len(), 2);
    }

    #[tokio::test]
    async fn at_adapter_06_multipart_accepts_file_part() {
        let boundary = "XyZbOuNdArY";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"pedigree_data\"; filename=\"ped.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             ##BOADICEA import pedigree file format 4.0\n\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"cancer_rates\"\r\n\r\n\
             New-Zealand\r\n\
             --{boundary}--\r\n"
        );
        let req = Request::builder()
            .method("POST")
            .uri("/bws")
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        let raw = decode_request(req).await.unwrap();
        assert_eq!(
            raw.pedigree_data.as_deref(),
            Some("##BOADICEA import pedigree file format 4.0\n")
        );
        assert_eq!(raw.cancer_rates.as_deref(), Some("New-Zealand"));
    }
}
