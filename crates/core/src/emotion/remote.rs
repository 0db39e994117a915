use crate::config::{ApiKey, ModelConfig, MODEL_SAMPLE_RATE_HZ};
use crate::emotion::{
    ClassifierError, Emotion, EmotionClassifier, EmotionDistribution, UnknownEmotion,
};
use crate::segment::resample;
use crate::util::{is_http_retryable, retry_with_backoff, RetryConfig};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const LOG_TARGET: &str = "emotion::remote";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Pretrained speech-emotion model served over HTTP.
#[derive(Clone)]
pub struct HttpModelClassifier {
    client: Client,
    predict_url: Url,
    api_key: Option<ApiKey>,
    retry: RetryConfig,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    sample_rate: u32,
    samples: &'a [f32],
}

#[derive(Debug, Deserialize)]
struct ModelResponse {
    labels: Vec<String>,
    #[serde(default)]
    probabilities: Option<Vec<f64>>,
    #[serde(default)]
    logits: Option<Vec<f64>>,
}

impl HttpModelClassifier {
    /// Builds a client without probing the service.
    pub fn new(endpoint: &Url, api_key: Option<ApiKey>) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClassifierError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            predict_url: endpoint_url(endpoint, "predict")?,
            api_key,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Builds a client and checks `GET <endpoint>/health`. Any failure means
    /// the model is treated as not loaded.
    pub async fn connect(config: &ModelConfig) -> Result<Self, ClassifierError> {
        let endpoint = config
            .endpoint
            .as_ref()
            .ok_or_else(|| ClassifierError::Unavailable("no model endpoint configured".into()))?;
        let this = Self::new(endpoint, config.api_key.clone())?;

        let health_url = endpoint_url(endpoint, "health")?;
        let mut request = this.client.get(health_url).timeout(HEALTH_TIMEOUT);
        if let Some(key) = &this.api_key {
            request = request.bearer_auth(key.expose());
        }
        let response = request
            .send()
            .await
            .map_err(|e| ClassifierError::Unavailable(format!("health check failed: {e}")))?;
        if !response.status().is_success() {
            return Err(ClassifierError::Unavailable(format!(
                "health check returned http {}",
                response.status().as_u16()
            )));
        }

        tracing::info!(target: LOG_TARGET, endpoint = %endpoint, "model service is healthy");
        Ok(this)
    }

    async fn send_predict(
        &self,
        body: &PredictRequest<'_>,
    ) -> Result<ModelResponse, ClassifierError> {
        let mut request = self.client.post(self.predict_url.clone()).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose());
        }
        let response = request
            .send()
            .await
            .map_err(|e| ClassifierError::Unavailable(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClassifierError::Http { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse(format!("failed to parse JSON: {e}")))
    }
}

impl EmotionClassifier for HttpModelClassifier {
    fn name(&self) -> &'static str {
        "model"
    }

    fn predict<'a>(
        &'a self,
        audio: &'a [f32],
        sample_rate: u32,
    ) -> BoxFuture<'a, Result<EmotionDistribution, ClassifierError>> {
        async move {
            let samples = resample(audio, sample_rate, MODEL_SAMPLE_RATE_HZ)
                .map_err(|e| ClassifierError::Unavailable(e.to_string()))?;
            let body = PredictRequest {
                sample_rate: MODEL_SAMPLE_RATE_HZ,
                samples: &samples,
            };
            let body = &body;
            let response =
                retry_with_backoff(&self.retry, move || self.send_predict(body), is_retryable)
                    .await?;
            parse_response(response)
        }
        .boxed()
    }
}

fn is_retryable(e: &ClassifierError) -> bool {
    match e {
        ClassifierError::Http { status, .. } => is_http_retryable(*status),
        ClassifierError::Unavailable(_) => true,
        ClassifierError::InvalidResponse(_) => false,
    }
}

/// `<endpoint>/<path>`, keeping any path prefix on the endpoint.
fn endpoint_url(endpoint: &Url, path: &str) -> Result<Url, ClassifierError> {
    let base = endpoint.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/{path}"))
        .map_err(|e| ClassifierError::Unavailable(format!("invalid endpoint {endpoint}: {e}")))
}

fn parse_response(response: ModelResponse) -> Result<EmotionDistribution, ClassifierError> {
    if response.labels.is_empty() {
        return Err(ClassifierError::InvalidResponse("no labels".into()));
    }
    let mut labels = Vec::with_capacity(response.labels.len());
    for raw in &response.labels {
        let label: Emotion = raw
            .parse()
            .map_err(|e: UnknownEmotion| ClassifierError::InvalidResponse(e.to_string()))?;
        if labels.contains(&label) {
            return Err(ClassifierError::InvalidResponse(format!(
                "duplicate label: {raw}"
            )));
        }
        labels.push(label);
    }

    let (values, softmax) = match (response.probabilities, response.logits) {
        (Some(p), _) => (p, false),
        (None, Some(l)) => (l, true),
        (None, None) => {
            return Err(ClassifierError::InvalidResponse(
                "response has neither probabilities nor logits".into(),
            ))
        }
    };
    if values.len() != labels.len() {
        return Err(ClassifierError::InvalidResponse(format!(
            "{} labels but {} scores",
            labels.len(),
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ClassifierError::InvalidResponse("non-finite score".into()));
    }

    let pairs = labels.into_iter().zip(values);
    Ok(if softmax {
        EmotionDistribution::from_logits(pairs)
    } else {
        EmotionDistribution::from_scores(pairs)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::{FallbackClassifier, RuleBasedClassifier};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn response(json: &str) -> ModelResponse {
        serde_json::from_str(json).expect("valid json")
    }

    #[test]
    fn probabilities_keep_label_order() {
        let d = parse_response(response(
            r#"{"labels":["calm","angry","sad"],"probabilities":[0.2,0.5,0.3]}"#,
        ))
        .unwrap();
        let labels: Vec<Emotion> = d.iter().map(|(e, _)| e).collect();
        assert_eq!(labels, vec![Emotion::Calm, Emotion::Angry, Emotion::Sad]);
        assert_eq!(d.top().0, Emotion::Angry);
        assert!((d.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn logits_are_softmaxed() {
        let d = parse_response(response(
            r#"{"labels":["neu","hap"],"logits":[0.0,2.0]}"#,
        ))
        .unwrap();
        let expected = 2f64.exp() / (1.0 + 2f64.exp());
        assert!((d.get(Emotion::Happy) - expected).abs() < 1e-9);
    }

    #[test]
    fn unknown_labels_are_rejected() {
        let err = parse_response(response(
            r#"{"labels":["bored"],"probabilities":[1.0]}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidResponse(_)));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = parse_response(response(
            r#"{"labels":["sad","happy"],"probabilities":[1.0]}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidResponse(_)));
        let err = parse_response(response(r#"{"labels":["sad"]}"#)).unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidResponse(_)));
    }

    #[test]
    fn endpoint_paths_are_appended() {
        let base = Url::parse("http://localhost:8000/models/ser/").unwrap();
        assert_eq!(
            endpoint_url(&base, "predict").unwrap().as_str(),
            "http://localhost:8000/models/ser/predict"
        );
        let base = Url::parse("http://localhost:8000").unwrap();
        assert_eq!(
            endpoint_url(&base, "health").unwrap().as_str(),
            "http://localhost:8000/health"
        );
    }

    #[test]
    fn server_errors_are_retried() {
        assert!(is_retryable(&ClassifierError::Http {
            status: 503,
            body: String::new()
        }));
        assert!(!is_retryable(&ClassifierError::Http {
            status: 400,
            body: String::new()
        }));
        assert!(!is_retryable(&ClassifierError::InvalidResponse("x".into())));
    }

    #[tokio::test]
    async fn connect_without_endpoint_is_unavailable() {
        let err = HttpModelClassifier::connect(&ModelConfig::default())
            .await
            .err()
            .expect("no endpoint");
        assert!(matches!(err, ClassifierError::Unavailable(_)));
    }

    #[derive(Debug)]
    struct Captured {
        line: String,
        authorization: Option<String>,
        body: Vec<u8>,
    }

    async fn read_request(stream: &mut TcpStream) -> Captured {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let n = stream.read(&mut chunk).await.expect("read head");
            assert!(n > 0, "client closed before sending headers");
            buf.extend_from_slice(&chunk[..n]);
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        let mut lines = head.lines();
        let line = lines.next().unwrap_or_default().to_owned();
        let headers: Vec<(String, String)> = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_owned()))
            .collect();
        let header = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        let len: usize = header("content-length").map_or(0, |v| v.parse().expect("content length"));

        let mut body = buf[head_end..].to_vec();
        while body.len() < len {
            let n = stream.read(&mut chunk).await.expect("read body");
            assert!(n > 0, "client closed mid-body");
            body.extend_from_slice(&chunk[..n]);
        }
        Captured {
            line,
            authorization: header("authorization"),
            body,
        }
    }

    /// Answers one request per connection with the next scripted response.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (Url, Arc<Mutex<Vec<Captured>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.expect("accept");
                let request = read_request(&mut stream).await;
                log.lock().unwrap().push(request);
                let reply = format!(
                    "HTTP/1.1 {status} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(reply.as_bytes()).await.expect("write reply");
                let _ = stream.shutdown().await;
            }
        });
        (Url::parse(&format!("http://{addr}")).unwrap(), seen)
    }

    fn model_config(endpoint: Url) -> ModelConfig {
        ModelConfig {
            endpoint: Some(endpoint),
            api_key: Some(ApiKey::new("secret").unwrap()),
        }
    }

    #[tokio::test]
    async fn predict_posts_samples_and_retries_server_errors() {
        let (url, seen) = serve(vec![
            (200, "{}"),
            (503, "busy"),
            (200, r#"{"labels":["neutral","happy"],"logits":[0.0,2.0]}"#),
        ])
        .await;

        let classifier = HttpModelClassifier::connect(&model_config(url))
            .await
            .expect("healthy service")
            .with_retry(RetryConfig::new(3, Duration::from_millis(1)));
        let d = classifier
            .predict(&[0.25; 4], 16_000)
            .await
            .expect("prediction after retry");

        let expected = 2f64.exp() / (1.0 + 2f64.exp());
        assert_eq!(d.top().0, Emotion::Happy);
        assert!((d.get(Emotion::Happy) - expected).abs() < 1e-9);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].line.starts_with("GET /health "), "{}", seen[0].line);
        for request in seen.iter() {
            assert_eq!(request.authorization.as_deref(), Some("Bearer secret"));
        }
        for request in &seen[1..] {
            assert!(request.line.starts_with("POST /predict "), "{}", request.line);
            let body: serde_json::Value =
                serde_json::from_slice(&request.body).expect("json body");
            assert_eq!(
                body,
                serde_json::json!({"sample_rate": 16000, "samples": [0.25, 0.25, 0.25, 0.25]})
            );
        }
    }

    #[tokio::test]
    async fn server_error_without_retries_falls_back_to_rules() {
        let (url, seen) = serve(vec![(200, "{}"), (503, "busy")]).await;
        let model = HttpModelClassifier::connect(&model_config(url))
            .await
            .expect("healthy service")
            .with_retry(RetryConfig::none());
        let classifier = FallbackClassifier::new(model, RuleBasedClassifier);

        let d = classifier.predict(&[0.0; 1_600], 16_000).await.expect("fallback");
        assert_eq!(d.top(), (Emotion::Neutral, 1.0));
        assert_eq!(classifier.fallback_count(), 1);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_health_check_is_unavailable() {
        let (url, _seen) = serve(vec![(500, "")]).await;
        let err = HttpModelClassifier::connect(&model_config(url))
            .await
            .err()
            .expect("unhealthy service");
        assert!(matches!(err, ClassifierError::Unavailable(_)));
    }
}
