//! `POST /ai/predict` - run the spoilage model on caller-supplied readings
//!
//! Nothing is stored; batch-bound predictions go through
//! `POST /grain-batches/{id}/predict` instead.
//!
//! The body is read as a [`PredictionInput`], so the model only ever sees the
//! nine documented features. Unknown fields are dropped, not forwarded.

use hyper::{Method, StatusCode};
use tracing::info;

use crate::auth::{AuthContext, Role};
use crate::routes::request::{json_response, ApiRequest, ApiResponse};
use crate::server::AppState;
use crate::services::PredictionInput;
use crate::types::{GrainError, Result};

pub async fn handle_predict(state: &AppState, req: &ApiRequest, ctx: &AuthContext) -> Result<ApiResponse> {
    if req.method != Method::POST {
        return Err(GrainError::MethodNotAllowed);
    }
    ctx.require(Role::Manager)?;

    let input: PredictionInput = req.json()?;
    input.validate()?;

    let output = state.predictor.predict(&input).await?;
    info!(
        user_id = %ctx.user_id,
        prediction = output.prediction.as_str(),
        risk_score = output.risk_score,
        "Ad-hoc prediction"
    );
    Ok(json_response(StatusCode::OK, &output))
}
