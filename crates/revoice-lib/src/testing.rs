//! Shared test scaffolding: a scratch project root, a mocked inference
//! runtime, and in-process fakes for both pipeline stages.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Match, Mock, MockServer, ResponseTemplate};

use revoice_core::types::Device;
use revoice_core::wav::read_wav;

use crate::config::EngineSettings;
use crate::convert::VoiceConverter;
use crate::error::{Error, Result};
use crate::runtime::RuntimeClient;
use crate::staging::{AudioArtifact, Staging};
use crate::synth::SpeechSynthesizer;

pub(crate) struct Fixture {
    dir: TempDir,
    pub server: MockServer,
    pub staging: Staging,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let staging = Staging::under(dir.path());
        staging.ensure_dirs().unwrap();
        Self {
            dir,
            server: MockServer::start().await,
            staging,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn runtime_url(&self) -> String {
        self.server.uri()
    }

    pub fn runtime(&self) -> RuntimeClient {
        RuntimeClient::new(&self.server.uri(), Some(Duration::from_secs(5))).unwrap()
    }

    pub fn engine(&self) -> EngineSettings {
        EngineSettings {
            project_root: self.root().to_path_buf(),
            device: Device::Cpu,
            concurrency: 1,
            request_timeout: None,
            ready_timeout: Duration::from_secs(2),
        }
    }

    /// Create an empty file (and its parents) under the project root.
    pub fn touch(&self, rel: &str) -> PathBuf {
        self.write(rel, b"")
    }

    pub fn write(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub async fn samples(&self, artifact: &AudioArtifact) -> Vec<i16> {
        let bytes = artifact.read().await.unwrap();
        read_wav(&bytes).unwrap().0
    }
}

pub(crate) fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn pcm_response(samples: &[i16], rate: Option<u32>) -> ResponseTemplate {
    let mut resp = ResponseTemplate::new(200).set_body_bytes(pcm_bytes(samples));
    if let Some(rate) = rate {
        resp = resp.insert_header("x-sample-rate", rate.to_string().as_str());
    }
    resp
}

pub(crate) async fn mock_health(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

pub(crate) async fn mock_load(
    server: &MockServer,
    engine: &str,
    model_id: &str,
    sample_rate: Option<u32>,
) {
    Mock::given(method("POST"))
        .and(path("/v1/models"))
        .and(body_partial_json(serde_json::json!({"engine": engine})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model_id": model_id,
            "sample_rate": sample_rate,
        })))
        .mount(server)
        .await;
}

pub(crate) async fn mock_synthesize(
    server: &MockServer,
    matcher: impl Match + 'static,
    samples: &[i16],
    rate: Option<u32>,
) {
    Mock::given(method("POST"))
        .and(path("/v1/synthesize"))
        .and(matcher)
        .respond_with(pcm_response(samples, rate))
        .mount(server)
        .await;
}

pub(crate) async fn mock_convert(server: &MockServer, samples: &[i16], rate: Option<u32>) {
    Mock::given(method("POST"))
        .and(path("/v1/convert"))
        .respond_with(pcm_response(samples, rate))
        .mount(server)
        .await;
}

/// Synthesizer that stages a short tone. Tracks calls and peak concurrency.
#[derive(Default)]
pub(crate) struct ToneSynthesizer {
    pub calls: Arc<AtomicUsize>,
    pub peak_in_flight: Arc<AtomicUsize>,
    in_flight: AtomicUsize,
    pub delay: Duration,
}

impl ToneSynthesizer {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ToneSynthesizer {
    fn name(&self) -> &'static str {
        "tone"
    }

    fn sample_rate(&self) -> u32 {
        24_000
    }

    async fn synthesize(&self, text: &str, staging: &Staging) -> Result<AudioArtifact> {
        if text.trim().is_empty() {
            return Err(Error::EmptyText);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let samples: Vec<i16> = (0..480).map(|i| ((i % 48) * 500) as i16).collect();
        let result = staging.write_unconverted(&samples, self.sample_rate()).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Converter that copies the source samples. Fails while `fail` is set.
#[derive(Default)]
pub(crate) struct PassthroughConverter {
    pub fail: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl VoiceConverter for PassthroughConverter {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    async fn convert(&self, source: &AudioArtifact, staging: &Staging) -> Result<AudioArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Runtime {
                status: 500,
                body: "conversion failed".into(),
            });
        }
        let bytes = source.read().await?;
        let (samples, rate) = read_wav(&bytes).map_err(|reason| Error::InvalidWav {
            path: source.path().to_path_buf(),
            reason,
        })?;
        staging.write_converted(source, &samples, rate).await
    }
}

pub(crate) fn is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}
