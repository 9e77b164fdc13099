//! HTTP generation backends.
//!
//! One endpoint per stage, configured through `GenerationConfig`. The
//! request body is the full [`GenerationRequest`]; the service answers with
//! a storage reference and optional metadata. The HTTP status is checked
//! before the body is parsed so service errors surface as generation
//! failures with the upstream message attached.

use std::time::Duration;

use async_trait::async_trait;
use attune_queue::{GeneratedArtifact, GenerationBackend, GenerationRequest, QueueError, QueueResult};
use attune_shared_config::GenerationConfig;

/// Generation engine client that posts each request to the stage's
/// configured endpoint.
pub struct HttpGenerationBackend {
    client: reqwest::Client,
    config: GenerationConfig,
}

impl HttpGenerationBackend {
    pub fn new(config: GenerationConfig) -> QueueResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| QueueError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn generate(&self, request: &GenerationRequest) -> QueueResult<GeneratedArtifact> {
        let stage = request.stage;
        let endpoint = self.config.endpoint(stage.as_str()).ok_or_else(|| {
            QueueError::generation(stage, format!("no endpoint configured for {stage}"))
        })?;

        tracing::debug!(
            job_id = %request.job_id,
            stage = %stage,
            document_index = request.document_index,
            endpoint,
            "calling generation backend"
        );

        let mut http = self.client.post(endpoint).json(request);
        if let Some(key) = &self.config.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| QueueError::generation(stage, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::generation(
                stage,
                format!("backend returned {status}: {body}"),
            ));
        }

        let artifact: GeneratedArtifact = response
            .json()
            .await
            .map_err(|e| QueueError::generation(stage, format!("malformed backend reply: {e}")))?;

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attune_queue::{JobType, Stage};
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_for(stage: Stage) -> GenerationRequest {
        GenerationRequest {
            job_id: Uuid::new_v4(),
            job_type: JobType::CompleteReading,
            stage,
            document_index: 2,
            params: json!({"subject": {"name": "Ada", "birth_date": "1990-03-14"}}),
            input: json!({"title": "Vedic Astrology"}),
        }
    }

    fn config_for(server_uri: &str) -> GenerationConfig {
        GenerationConfig {
            text_url: format!("{server_uri}/generate"),
            render_url: format!("{server_uri}/render"),
            audio_url: format!("{server_uri}/narrate"),
            song_url: format!("{server_uri}/compose"),
            api_key: None,
            request_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_generate_posts_to_stage_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/narrate"))
            .and(body_partial_json(json!({"stage": "audio", "document_index": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "storage_reference": "s3://attune/audio/2.ogg",
                "metadata": {"duration_secs": 412}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpGenerationBackend::new(config_for(&server.uri())).unwrap();
        let artifact = backend.generate(&request_for(Stage::Audio)).await.unwrap();
        assert_eq!(artifact.storage_reference, "s3://attune/audio/2.ogg");
        assert_eq!(
            artifact.metadata.get("duration_secs").and_then(|v| v.as_u64()),
            Some(412)
        );
    }

    #[tokio::test]
    async fn test_generate_surfaces_backend_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(503).set_body_string("model overloaded"))
            .mount(&server)
            .await;

        let backend = HttpGenerationBackend::new(config_for(&server.uri())).unwrap();
        let err = backend.generate(&request_for(Stage::Text)).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("503"), "got: {message}");
        assert!(message.contains("model overloaded"), "got: {message}");
    }

    #[tokio::test]
    async fn test_generate_rejects_malformed_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/compose"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let backend = HttpGenerationBackend::new(config_for(&server.uri())).unwrap();
        let err = backend.generate(&request_for(Stage::Song)).await.unwrap_err();
        assert!(err.to_string().contains("malformed backend reply"));
    }
}
