use serde::{Deserialize, Serialize};

/// Request body for `POST /send-otp`.
#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    pub email: String,
}

/// Request body for `POST /verify-otp`.
#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Successful verification; `token` authenticates later requests.
#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub message: String,
    pub token: String,
}
