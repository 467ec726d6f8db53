//! Spoilage risk prediction client
//!
//! The model lives outside this process. We hand it one JSON object of
//! environmental readings and read back a JSON classification:
//!
//! ```json
//! { "prediction": "Risky", "confidence": 0.82, "risk_score": 64.0,
//!   "time_to_spoilage_hours": 96, "key_risk_factors": ["humidity"] }
//! ```
//!
//! Fields beyond the required ones are passed through untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{MlArgs, MlMode};
use crate::types::{GrainError, Result};

pub use crate::db::schemas::SpoilageClass;

/// Longest stderr excerpt carried into an error message
const STDERR_EXCERPT_LEN: usize = 300;

/// Model input, one value per feature
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    pub temperature: f64,
    pub humidity: f64,
    pub grain_moisture: f64,
    pub dew_point: f64,
    pub storage_days: f64,
    pub airflow: f64,
    pub ambient_light: f64,
    pub pest_presence: f64,
    pub rainfall: f64,
}

impl PredictionInput {
    pub fn validate(&self) -> Result<()> {
        let values = [
            ("temperature", self.temperature),
            ("humidity", self.humidity),
            ("grain_moisture", self.grain_moisture),
            ("dew_point", self.dew_point),
            ("storage_days", self.storage_days),
            ("airflow", self.airflow),
            ("ambient_light", self.ambient_light),
            ("pest_presence", self.pest_presence),
            ("rainfall", self.rainfall),
        ];
        match values.iter().find(|(_, v)| !v.is_finite()) {
            Some((name, _)) => Err(GrainError::BadRequest(format!(
                "{} must be a finite number",
                name
            ))),
            None => Ok(()),
        }
    }
}

/// Model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutput {
    pub prediction: SpoilageClass,
    pub confidence: f64,
    pub risk_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_spoilage_hours: Option<f64>,
    #[serde(default)]
    pub key_risk_factors: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PredictionOutput {
    /// Parse and normalize raw model output
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(ref object) = value else {
            return Err(GrainError::Prediction(
                "Model output is not a JSON object".into(),
            ));
        };

        for field in ["prediction", "confidence", "risk_score"] {
            if !object.contains_key(field) {
                return Err(GrainError::Prediction(format!(
                    "Model output is missing '{}'",
                    field
                )));
            }
        }

        let mut output: PredictionOutput = serde_json::from_value(value)
            .map_err(|e| GrainError::Prediction(format!("Malformed model output: {}", e)))?;

        if !output.risk_score.is_finite() {
            return Err(GrainError::Prediction("risk_score is not a number".into()));
        }
        output.risk_score = output.risk_score.clamp(0.0, 100.0);
        Ok(output)
    }
}

/// Anything that can score spoilage risk
#[async_trait]
pub trait SpoilagePredictor: Send + Sync {
    async fn predict(&self, input: &PredictionInput) -> Result<PredictionOutput>;

    /// Short name reported on /status
    fn mode(&self) -> &'static str;
}

/// Build the predictor selected by configuration
pub fn from_args(args: &MlArgs) -> Result<Arc<dyn SpoilagePredictor>> {
    Ok(match args.ml_mode {
        MlMode::Subprocess => Arc::new(SubprocessPredictor::new(
            args.ml_command.clone(),
            vec![args.ml_script.clone()],
            args.timeout(),
        )),
        MlMode::Http => {
            let url = args.ml_service_url.clone().ok_or_else(|| {
                GrainError::Config("ML_SERVICE_URL is required when ML_MODE=http".into())
            })?;
            Arc::new(HttpPredictor::new(url, args.timeout())?)
        }
        MlMode::Disabled => Arc::new(DisabledPredictor),
    })
}

/// Runs the model as a child process per request
pub struct SubprocessPredictor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SubprocessPredictor {
    pub fn new(program: String, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }

    async fn run(&self, payload: Vec<u8>) -> Result<(std::process::ExitStatus, Vec<u8>, Vec<u8>)> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            GrainError::Prediction(format!("Failed to start {}: {}", self.program, e))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| GrainError::Internal("Child stdin not captured".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| GrainError::Internal("Child stdout not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| GrainError::Internal("Child stderr not captured".into()))?;

        let write = async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
            // Dropping stdin closes the pipe so the model sees EOF
            drop(stdin);
            Ok::<_, std::io::Error>(())
        };
        let read_out = async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        };
        let read_err = async move {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await.map(|_| buf)
        };

        let (written, out, err) = tokio::join!(write, read_out, read_err);
        if let Err(e) = written {
            // A model that exits without reading stdin still gets judged on its output
            debug!("Prediction stdin closed early: {}", e);
        }
        let status = child.wait().await?;
        Ok((status, out?, err?))
    }
}

#[async_trait]
impl SpoilagePredictor for SubprocessPredictor {
    async fn predict(&self, input: &PredictionInput) -> Result<PredictionOutput> {
        input.validate()?;
        let payload = serde_json::to_vec(input)
            .map_err(|e| GrainError::Internal(format!("Failed to encode input: {}", e)))?;

        // The child is killed on drop when the timeout cancels the future
        let (status, stdout, stderr) = tokio::time::timeout(self.timeout, self.run(payload))
            .await
            .map_err(|_| {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Prediction timed out");
                GrainError::Prediction(format!(
                    "Model did not answer within {} ms",
                    self.timeout.as_millis()
                ))
            })??;

        if !status.success() {
            return Err(GrainError::Prediction(format!(
                "Model exited with {}: {}",
                status,
                excerpt(&stderr)
            )));
        }

        parse_model_stdout(&stdout)
    }

    fn mode(&self) -> &'static str {
        "subprocess"
    }
}

/// Parse stdout, tolerating log lines printed before the JSON result
fn parse_model_stdout(stdout: &[u8]) -> Result<PredictionOutput> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(GrainError::Prediction("Model produced no output".into()));
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return PredictionOutput::from_value(value);
    }

    let last_json_line = trimmed
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{'))
        .ok_or_else(|| GrainError::Prediction("Model output is not JSON".into()))?;

    let value = serde_json::from_str::<Value>(last_json_line)
        .map_err(|e| GrainError::Prediction(format!("Model output is not JSON: {}", e)))?;
    PredictionOutput::from_value(value)
}

fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return "no stderr output".to_string();
    }
    text.chars().take(STDERR_EXCERPT_LEN).collect()
}

/// Calls a prediction HTTP service
pub struct HttpPredictor {
    url: String,
    client: reqwest::Client,
}

impl HttpPredictor {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GrainError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl SpoilagePredictor for HttpPredictor {
    async fn predict(&self, input: &PredictionInput) -> Result<PredictionOutput> {
        input.validate()?;

        let response = self
            .client
            .post(&self.url)
            .json(input)
            .send()
            .await
            .map_err(|e| GrainError::Prediction(format!("Prediction service unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GrainError::Prediction(format!(
                "Prediction service returned {}: {}",
                status,
                excerpt(body.as_bytes())
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| GrainError::Prediction(format!("Invalid prediction response: {}", e)))?;
        PredictionOutput::from_value(value)
    }

    fn mode(&self) -> &'static str {
        "http"
    }
}

/// Used when predictions are switched off
pub struct DisabledPredictor;

#[async_trait]
impl SpoilagePredictor for DisabledPredictor {
    async fn predict(&self, _input: &PredictionInput) -> Result<PredictionOutput> {
        Err(GrainError::Unavailable(
            "Spoilage prediction is disabled".into(),
        ))
    }

    fn mode(&self) -> &'static str {
        "disabled"
    }
}
