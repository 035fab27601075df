use serde::Serialize;

/// Response for `POST /api/v1/verify`.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub verified: bool,
    /// Base64 of the verified capture; absent when the capture is not usable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub message: String,
}
