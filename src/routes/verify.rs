use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use base64::Engine;

use crate::app_state::AppState;
use crate::models::verification::VerifyResponse;
use crate::services::capture::UploadCapture;
use crate::services::orchestrator::VerificationOrchestrator;

/// POST /api/v1/verify — Capture a frame and wait for the detection verdict.
pub async fn verify_capture(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<VerifyResponse>), StatusCode> {
    let mut frame: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        if field.name() == Some("image") {
            let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            frame = Some(data.to_vec());
        }
    }

    let frame = frame.ok_or(StatusCode::BAD_REQUEST)?;

    let capture = UploadCapture::new(
        frame,
        state.settings.capability(),
        state.settings.encode_settings(),
    );
    let orchestrator = VerificationOrchestrator::new(
        capture,
        state.dispatcher.clone(),
        state.correlator.clone(),
        state.settings.timeout(),
    );

    let response = match orchestrator.capture_and_verify_detailed().await {
        Ok(image) => (
            StatusCode::OK,
            Json(VerifyResponse {
                verified: true,
                image: Some(base64::engine::general_purpose::STANDARD.encode(&image.bytes)),
                content_type: Some(image.content_type),
                message: "Capture verified".to_string(),
            }),
        ),
        Err(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(VerifyResponse {
                verified: false,
                image: None,
                content_type: None,
                message: "Capture not usable, please retry".to_string(),
            }),
        ),
    };

    Ok(response)
}
