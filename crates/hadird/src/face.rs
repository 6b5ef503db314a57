use async_trait::async_trait;
use hadir_core::{Descriptor, DescriptorExtractor, MatcherError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct DescriptorRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct DescriptorResponse {
    descriptor: Option<Vec<f32>>,
}

/// Descriptor extraction delegated to an HTTP service.
///
/// `POST {base}/descriptor {"image": "<data url>"}` answers
/// `{"descriptor": [f32, ...]}`, or `{"descriptor": null}` when the image
/// holds no face.
pub struct HttpDescriptorExtractor {
    client: reqwest::Client,
    url: String,
}

impl HttpDescriptorExtractor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MatcherError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MatcherError::Unavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/descriptor", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl DescriptorExtractor for HttpDescriptorExtractor {
    async fn extract(&self, image: &str) -> Result<Option<Descriptor>, MatcherError> {
        let unavailable = |e: reqwest::Error| MatcherError::Unavailable(e.to_string());
        let resp = self
            .client
            .post(&self.url)
            .json(&DescriptorRequest { image })
            .send()
            .await
            .map_err(unavailable)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MatcherError::Unavailable(format!(
                "descriptor service returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: DescriptorResponse = resp.json().await.map_err(unavailable)?;
        match body.descriptor {
            Some(values) if values.is_empty() => Err(MatcherError::Unavailable(
                "descriptor service returned an empty descriptor".into(),
            )),
            Some(values) => Ok(Some(Descriptor { values })),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use hadir_core::{DescriptorMatcher, FaceMatcher, ImageRole};
    use serde_json::{json, Value};

    /// Descriptor service stub: "alice*" images share a face, "blank" has none.
    async fn describe(Json(body): Json<Value>) -> Json<Value> {
        let image = body["image"].as_str().unwrap_or_default();
        let descriptor = match image {
            "alice-ref" => json!([0.1, 0.2, 0.3]),
            "alice-now" => json!([0.12, 0.21, 0.28]),
            "bob" => json!([0.9, -0.4, 0.7]),
            "truncated" => json!([0.1]),
            "hollow" => json!([]),
            _ => Value::Null,
        };
        Json(json!({ "descriptor": descriptor }))
    }

    async fn start_stub() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/descriptor", post(describe));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_match_through_descriptor_service() {
        let base = start_stub().await;
        let matcher =
            DescriptorMatcher::new(HttpDescriptorExtractor::new(&base, Duration::from_secs(5)).unwrap());

        let same = matcher.compare("alice-ref", "alice-now").await.unwrap();
        assert!(same.is_match);
        assert!(same.score > 90.0);

        let other = matcher.compare("alice-ref", "bob").await.unwrap();
        assert!(!other.is_match);

        assert!(matches!(
            matcher.compare("alice-ref", "blank").await,
            Err(MatcherError::NoFace(ImageRole::Candidate))
        ));
        assert!(!matcher.detect("blank").await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_descriptors_fail_closed() {
        let base = start_stub().await;
        let extractor = HttpDescriptorExtractor::new(&base, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            extractor.extract("hollow").await,
            Err(MatcherError::Unavailable(_))
        ));

        let matcher = DescriptorMatcher::new(extractor);
        assert!(matches!(
            matcher.compare("alice-ref", "truncated").await,
            Err(MatcherError::Incomparable { reference: 3, candidate: 1 })
        ));
        assert!(matcher.compare("alice-ref", "hollow").await.is_err());
    }

    #[tokio::test]
    async fn test_service_down_is_unavailable() {
        let extractor =
            HttpDescriptorExtractor::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(matches!(
            extractor.extract("x").await,
            Err(MatcherError::Unavailable(_))
        ));
    }
}
