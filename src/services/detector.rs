use reqwest::Client;
use serde::{Deserialize, Serialize};

const DETECTION_MODEL: &str = "@cf/facebook/detr-resnet-50";

/// Client for Cloudflare Workers AI object detection.
pub struct WorkersAiDetector {
    http: Client,
    account_id: String,
    api_token: String,
    label: String,
    min_score: f64,
}

#[derive(Serialize)]
struct DetectionRequest<'a> {
    image: &'a [u8],
}

#[derive(Deserialize)]
struct DetectionResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Vec<Detection>,
}

/// One object found by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Detection {
    pub label: String,
    pub score: f64,
}

impl WorkersAiDetector {
    pub fn new(account_id: &str, api_token: &str, label: &str, min_score: f64) -> Result<Self, DetectorError> {
        if account_id.is_empty() || api_token.is_empty() {
            return Err(DetectorError::MissingCredentials);
        }

        Ok(Self {
            http: Client::new(),
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
            label: label.to_string(),
            min_score,
        })
    }

    /// Run detection on an image and count the qualifying detections.
    pub async fn count_matches(&self, image_bytes: &[u8]) -> Result<u32, DetectorError> {
        let url = format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            self.account_id, DETECTION_MODEL
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&DetectionRequest { image: image_bytes })
            .send()
            .await?
            .error_for_status()?;

        let body: DetectionResponse = response.json().await?;
        if !body.success {
            return Err(DetectorError::Rejected);
        }

        Ok(count_detections(&body.result, &self.label, self.min_score))
    }
}

/// Count detections carrying `label` with at least `min_score` confidence.
pub fn count_detections(detections: &[Detection], label: &str, min_score: f64) -> u32 {
    let count = detections
        .iter()
        .filter(|d| d.label.eq_ignore_ascii_case(label) && d.score >= min_score)
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Workers AI credentials are not configured")]
    MissingCredentials,

    #[error("Workers AI reported an unsuccessful run")]
    Rejected,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(label: &str, score: f64) -> Detection {
        Detection {
            label: label.to_string(),
            score,
        }
    }

    #[test]
    fn test_counts_only_confident_matching_labels() {
        let detections = vec![
            detection("person", 0.98),
            detection("Person", 0.71),
            detection("person", 0.40),
            detection("dog", 0.99),
        ];
        assert_eq!(count_detections(&detections, "person", 0.7), 2);
    }

    #[test]
    fn test_empty_result_counts_zero() {
        assert_eq!(count_detections(&[], "person", 0.7), 0);
    }

    #[test]
    fn test_response_shape_parses() {
        let body = r#"{"success":true,"result":[{"score":0.9,"label":"person","box":{"xmin":1,"ymin":2,"xmax":3,"ymax":4}}]}"#;
        let parsed: DetectionResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.result, vec![detection("person", 0.9)]);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        assert!(matches!(
            WorkersAiDetector::new("", "token", "person", 0.7),
            Err(DetectorError::MissingCredentials)
        ));
    }
}
