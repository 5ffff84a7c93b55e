//! HTTP client for the inference runtime that hosts the speech models.
//!
//! The runtime is a sidecar process. revoice never touches model weights: it
//! verifies artifacts exist, asks the runtime to load them, then streams raw
//! PCM back out of it.
//!
//! ```text
//! GET  /health          → 2xx once models can be loaded
//! POST /v1/models       → LoadRequest  ⇒ LoadResponse
//! POST /v1/synthesize   → SynthesisRequest ⇒ s16le PCM (+ x-sample-rate)
//! POST /v1/convert      → multipart {request, audio} ⇒ s16le PCM (+ x-sample-rate)
//! ```

use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use tracing::{debug, info, warn};

use revoice_core::types::{ConversionRequest, LoadRequest, LoadResponse, SynthesisRequest};
use revoice_core::wav::pcm_from_le_bytes;

use crate::error::{Error, Result};

const SAMPLE_RATE_HEADER: &str = "x-sample-rate";

/// Interval between readiness checks at startup.
const READY_POLL: Duration = Duration::from_millis(500);

/// Rates the runtime may report for PCM it returns.
pub const SAMPLE_RATE_RANGE: RangeInclusive<u32> = 8_000..=192_000;

/// A model resident in the runtime. Lives for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    pub id: String,
    /// Native output rate, when the runtime reports one.
    pub sample_rate: Option<u32>,
}

/// Mono PCM returned by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pcm {
    pub samples: Vec<i16>,
    pub sample_rate: Option<u32>,
}

/// Cloneable handle to one inference runtime.
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    client: reqwest::Client,
    base_url: String,
    /// Bound on synthesis and conversion calls. Model loads are unbounded.
    inference_timeout: Option<Duration>,
}

impl RuntimeClient {
    pub fn new(base_url: &str, inference_timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            inference_timeout,
        })
    }

    fn inference(&self, endpoint: &str) -> RequestBuilder {
        let req = self.client.post(format!("{}{endpoint}", self.base_url));
        match self.inference_timeout {
            Some(timeout) => req.timeout(timeout),
            None => req,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Poll `/health` until it answers 2xx or `timeout` elapses.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let deadline = Instant::now() + timeout;

        loop {
            match self.client.get(&url).timeout(READY_POLL * 4).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("inference runtime at {} is ready", self.base_url);
                    return Ok(());
                }
                Ok(resp) => debug!("runtime at {} not ready: {}", self.base_url, resp.status()),
                Err(e) => debug!("runtime at {} unreachable: {e}", self.base_url),
            }

            if Instant::now() + READY_POLL > deadline {
                return Err(Error::RuntimeNotReady {
                    url: self.base_url.clone(),
                    secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    /// Load a model onto its device.
    pub async fn load(&self, req: &LoadRequest) -> Result<ModelHandle> {
        let t0 = Instant::now();
        info!("loading {} model on {}", req.engine, req.device);

        let resp = self
            .client
            .post(format!("{}/v1/models", self.base_url))
            .json(req)
            .send()
            .await?;
        let loaded: LoadResponse = check_status(resp).await?.json().await?;
        if let Some(rate) = loaded.sample_rate {
            check_sample_rate(rate)?;
        }

        info!(
            "{} model loaded as {} in {:.1?}",
            req.engine,
            loaded.model_id,
            t0.elapsed()
        );
        Ok(ModelHandle {
            id: loaded.model_id,
            sample_rate: loaded.sample_rate,
        })
    }

    /// Synthesize one chunk of text.
    pub async fn synthesize(&self, req: &SynthesisRequest) -> Result<Pcm> {
        debug!("synthesize: {} chars on {}", req.text.chars().count(), req.model_id);
        let resp = self.inference("/v1/synthesize").json(req).send().await?;
        read_pcm(check_status(resp).await?).await
    }

    /// Convert a WAV file to the target voice.
    pub async fn convert(
        &self,
        req: &ConversionRequest,
        file_name: &str,
        wav: Vec<u8>,
    ) -> Result<Pcm> {
        debug!("convert: {file_name} ({} bytes) on {}", wav.len(), req.model_id);
        let form = Form::new()
            .part(
                "request",
                Part::bytes(serde_json::to_vec(req)?).mime_str("application/json")?,
            )
            .part(
                "audio",
                Part::bytes(wav)
                    .file_name(file_name.to_string())
                    .mime_str("audio/wav")?,
            );

        let resp = self.inference("/v1/convert").multipart(form).send().await?;
        read_pcm(check_status(resp).await?).await
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Runtime { status, body })
}

fn check_sample_rate(rate: u32) -> Result<u32> {
    if SAMPLE_RATE_RANGE.contains(&rate) {
        Ok(rate)
    } else {
        Err(Error::InvalidSampleRate(rate))
    }
}

/// Drain a PCM body, carrying odd bytes across chunk boundaries.
async fn read_pcm(resp: Response) -> Result<Pcm> {
    let sample_rate = resp
        .headers()
        .get(SAMPLE_RATE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u32>().ok())
        .map(check_sample_rate)
        .transpose()?;

    let mut stream = resp.bytes_stream();
    let mut samples = Vec::new();
    let mut leftover: Option<u8> = None;

    while let Some(chunk) = stream.next().await {
        let (decoded, lo) = pcm_from_le_bytes(&chunk?, leftover.take());
        samples.extend(decoded);
        leftover = lo;
    }

    if leftover.is_some() {
        warn!("runtime PCM ended on an odd byte; dropping it");
    }
    if samples.is_empty() {
        return Err(Error::EmptyAudio);
    }

    Ok(Pcm {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::pcm_bytes;
    use revoice_core::types::{CONVERSION_SPEAKER_ID, DecodingParams, Device};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn load_request(engine: &str) -> LoadRequest {
        LoadRequest {
            engine: engine.into(),
            device: Device::Cpu,
            artifacts: Default::default(),
            options: Default::default(),
        }
    }

    fn synthesis_request(text: &str) -> SynthesisRequest {
        SynthesisRequest {
            model_id: "tts-0".into(),
            text: text.into(),
            language: Some("en".into()),
            reference_audio: vec![],
            reference_text: None,
            params: DecodingParams::default(),
        }
    }

    #[tokio::test]
    async fn load_returns_handle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/models"))
            .and(body_partial_json(serde_json::json!({"engine": "xtts", "device": "cpu"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"model_id": "xtts-1", "sample_rate": 24000})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = RuntimeClient::new(&server.uri(), None).unwrap();
        let handle = client.load(&load_request("xtts")).await.unwrap();
        assert_eq!(
            handle,
            ModelHandle {
                id: "xtts-1".into(),
                sample_rate: Some(24000)
            }
        );
    }

    #[tokio::test]
    async fn synthesize_decodes_pcm_and_rate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/synthesize"))
            .and(body_partial_json(serde_json::json!({"text": "hello"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-sample-rate", "22050")
                    .set_body_bytes(pcm_bytes(&[1, -2, 300])),
            )
            .mount(&server)
            .await;

        let client = RuntimeClient::new(&format!("{}/", server.uri()), None).unwrap();
        let pcm = client.synthesize(&synthesis_request("hello")).await.unwrap();
        assert_eq!(pcm.samples, vec![1, -2, 300]);
        assert_eq!(pcm.sample_rate, Some(22050));
    }

    #[tokio::test]
    async fn runtime_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/synthesize"))
            .respond_with(ResponseTemplate::new(500).set_body_string("CUDA out of memory"))
            .mount(&server)
            .await;

        let client = RuntimeClient::new(&server.uri(), None).unwrap();
        let err = client.synthesize(&synthesis_request("hi")).await.unwrap_err();
        match err {
            Error::Runtime { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "CUDA out of memory");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/synthesize"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = RuntimeClient::new(&server.uri(), None).unwrap();
        let err = client.synthesize(&synthesis_request("hi")).await.unwrap_err();
        assert!(matches!(err, Error::EmptyAudio));
    }

    #[tokio::test]
    async fn convert_sends_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/convert"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-sample-rate", "40000")
                    .set_body_bytes(pcm_bytes(&[5, 6])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = RuntimeClient::new(&server.uri(), None).unwrap();
        let req = ConversionRequest {
            model_id: "rvc-0".into(),
            speaker_id: CONVERSION_SPEAKER_ID,
            index_file: None,
        };
        let pcm = client
            .convert(&req, "abcdefg.wav", revoice_core::wav::write_wav(&[0; 8], 24000))
            .await
            .unwrap();
        assert_eq!(pcm.samples, vec![5, 6]);
        assert_eq!(pcm.sample_rate, Some(40000));

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"request\""));
        assert!(body.contains("filename=\"abcdefg.wav\""));
        assert!(body.contains("\"speaker_id\":1"));
    }

    #[tokio::test]
    async fn ready_when_health_answers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = RuntimeClient::new(&server.uri(), None).unwrap();
        client.wait_until_ready(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn not_ready_after_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = RuntimeClient::new(&server.uri(), None).unwrap();
        let err = client.wait_until_ready(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, Error::RuntimeNotReady { .. }));
    }

    #[tokio::test]
    async fn out_of_range_sample_rate_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/synthesize"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-sample-rate", "3000000000")
                    .set_body_bytes(pcm_bytes(&[1, 2])),
            )
            .mount(&server)
            .await;

        let client = RuntimeClient::new(&server.uri(), None).unwrap();
        let err = client.synthesize(&synthesis_request("hi")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidSampleRate(3_000_000_000)));
    }

    #[tokio::test]
    async fn zero_rate_from_load_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/models"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"model_id": "rvc-0", "sample_rate": 0})),
            )
            .mount(&server)
            .await;

        let client = RuntimeClient::new(&server.uri(), None).unwrap();
        let err = client.load(&load_request("rvc")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidSampleRate(0)));
    }

    #[tokio::test]
    async fn slow_load_ignores_inference_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/models"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"model_id": "xtts-0"}))
                    .set_delay(Duration::from_millis(600)),
            )
            .mount(&server)
            .await;

        let client = RuntimeClient::new(&server.uri(), Some(Duration::from_millis(200))).unwrap();
        let handle = client.load(&load_request("xtts")).await.unwrap();
        assert_eq!(handle.id, "xtts-0");
    }

    #[tokio::test]
    async fn slow_synthesis_hits_inference_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/synthesize"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(pcm_bytes(&[1]))
                    .set_delay(Duration::from_millis(600)),
            )
            .mount(&server)
            .await;

        let client = RuntimeClient::new(&server.uri(), Some(Duration::from_millis(200))).unwrap();
        match client.synthesize(&synthesis_request("hi")).await.unwrap_err() {
            Error::Http(e) => assert!(e.is_timeout(), "{e}"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
