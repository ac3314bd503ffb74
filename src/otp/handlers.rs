use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    routing::post,
    Json, Router,
};
use tracing::{error, instrument, warn};

use crate::{
    auth::jwt::JwtKeys,
    error::ApiError,
    otp::{
        dto::{MessageResponse, SendOtpRequest, VerifyOtpRequest, VerifyOtpResponse},
        services::OtpError,
    },
    state::AppState,
};

const SEND_FAILED: &str = "Failed to send OTP";
const VERIFY_FAILED: &str = "Failed to verify OTP";

pub fn otp_routes() -> Router<AppState> {
    Router::new()
        .route("/send-otp", post(send_otp))
        .route("/verify-otp", post(verify_otp))
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    warn!(error = %rejection.body_text(), "rejected request body");
    ApiError::BadRequest("Invalid request body".into())
}

/// Map a domain failure to its HTTP shape; `fallback` is shown for internal errors.
fn reject(err: OtpError, fallback: &str) -> ApiError {
    match err {
        OtpError::InvalidIdentifier => ApiError::BadRequest("Invalid email".into()),
        OtpError::NotFound | OtpError::Expired => {
            ApiError::BadRequest("OTP has expired or is invalid".into())
        }
        OtpError::Mismatch { .. } => ApiError::BadRequest("Invalid OTP".into()),
        OtpError::TooManyAttempts => ApiError::TooManyRequests {
            message: "Too many failed attempts, request a new OTP".into(),
            retry_after_secs: None,
        },
        OtpError::RateLimited { retry_after_secs } => ApiError::TooManyRequests {
            message: "Please wait before requesting another OTP".into(),
            retry_after_secs: Some(retry_after_secs),
        },
        OtpError::Delivery(e) | OtpError::Store(e) => {
            error!(error = %e, "otp request failed");
            ApiError::Internal(fallback.into())
        }
    }
}

#[instrument(skip_all)]
pub async fn send_otp(
    State(state): State<AppState>,
    payload: Result<Json<SendOtpRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(payload) = payload.map_err(bad_body)?;

    state
        .otp
        .send(&payload.email)
        .await
        .map_err(|e| reject(e, SEND_FAILED))?;

    Ok(Json(MessageResponse {
        message: "OTP sent successfully".into(),
    }))
}

#[instrument(skip_all)]
pub async fn verify_otp(
    State(state): State<AppState>,
    payload: Result<Json<VerifyOtpRequest>, JsonRejection>,
) -> Result<Json<VerifyOtpResponse>, ApiError> {
    let Json(payload) = payload.map_err(bad_body)?;

    let email = state
        .otp
        .verify(&payload.email, &payload.otp)
        .await
        .map_err(|e| reject(e, VERIFY_FAILED))?;

    let token = JwtKeys::from_ref(&state).sign(&email).map_err(|e| {
        error!(error = %e, "jwt sign failed");
        ApiError::Internal(VERIFY_FAILED.into())
    })?;

    Ok(Json(VerifyOtpResponse {
        message: "OTP verified successfully".into(),
        token,
    }))
}
