//! Text → speech → converted speech.
//!
//! [`PipelinePlan`] is everything that can be checked without the runtime:
//! settings, artifact files, staging directories. [`PipelinePlan::load`]
//! then brings both models up and returns a [`Pipeline`] that serves
//! requests until the process exits.

use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::{EngineSettings, Env};
use crate::convert::{RvcConverter, RvcSettings, VoiceConverter};
use crate::error::{Error, Result};
use crate::runtime::RuntimeClient;
use crate::staging::{AudioArtifact, Staging};
use crate::synth::{Backend, SpeechSynthesizer, SynthesizerPlan, warm_up};

/// Loaded synthesizer and converter, each behind its own semaphore.
pub struct Pipeline {
    synthesizer: Box<dyn SpeechSynthesizer>,
    converter: Box<dyn VoiceConverter>,
    staging: Staging,
    synth_permits: Semaphore,
    convert_permits: Semaphore,
}

impl Pipeline {
    pub fn new(
        synthesizer: Box<dyn SpeechSynthesizer>,
        converter: Box<dyn VoiceConverter>,
        staging: Staging,
        concurrency: usize,
    ) -> Self {
        let permits = concurrency.max(1);
        Self {
            synthesizer,
            converter,
            staging,
            synth_permits: Semaphore::new(permits),
            convert_permits: Semaphore::new(permits),
        }
    }

    /// Fails with [`Error::EmptyText`] for blank text, before any runtime call.
    pub async fn synthesize(&self, text: &str) -> Result<AudioArtifact> {
        if text.trim().is_empty() {
            return Err(Error::EmptyText);
        }
        let _permit = self.synth_permits.acquire().await.map_err(|_| Error::Closed)?;
        self.synthesizer.synthesize(text, &self.staging).await
    }

    pub async fn convert(&self, source: &AudioArtifact) -> Result<AudioArtifact> {
        let _permit = self.convert_permits.acquire().await.map_err(|_| Error::Closed)?;
        self.converter.convert(source, &self.staging).await
    }

    /// Synthesize `text` and convert it to the target voice.
    ///
    /// The intermediate file is removed before this returns, whether or not
    /// conversion succeeded. The returned artifact removes itself on drop.
    pub async fn generate(&self, text: &str) -> Result<AudioArtifact> {
        let t0 = Instant::now();
        let source = self.synthesize(text).await?;
        debug!(
            "{} produced {} in {:.1?}",
            self.synthesizer.name(),
            source.file_name(),
            t0.elapsed()
        );

        let t1 = Instant::now();
        let converted = self.convert(&source).await;
        drop(source);

        let converted = converted?;
        debug!(
            "{} produced {} in {:.1?}",
            self.converter.name(),
            converted.file_name(),
            t1.elapsed()
        );
        Ok(converted)
    }

    /// Stop handing out permits. In-flight calls finish; later ones fail
    /// with [`Error::Closed`].
    pub fn close(&self) {
        self.synth_permits.close();
        self.convert_permits.close();
    }
}

/// Validated startup configuration for both stages.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    engine: EngineSettings,
    staging: Staging,
    synthesizer: SynthesizerPlan,
    converter: RvcSettings,
}

impl PipelinePlan {
    /// Validate every setting, check artifacts and create the staging
    /// directories. Nothing here talks to the runtime.
    pub fn from_env(env: &Env) -> Result<Self> {
        let engine = EngineSettings::from_env(env)?;
        let synthesizer = SynthesizerPlan::from_env(env, &engine)?;
        let converter = RvcSettings::from_env(env, &engine)?;

        let staging = Staging::under(&engine.project_root);
        staging.ensure_dirs()?;
        info!(
            "staging in {} and {}",
            staging.unconverted_dir().display(),
            staging.converted_dir().display()
        );

        Ok(Self {
            engine,
            staging,
            synthesizer,
            converter,
        })
    }

    pub fn backend(&self) -> Backend {
        self.synthesizer.backend()
    }

    /// Wait for the runtime(s), load both models and run the warm-up pass.
    pub async fn load(self) -> Result<Pipeline> {
        let t0 = Instant::now();
        let Self {
            engine,
            staging,
            synthesizer,
            converter,
        } = self;

        let tts_runtime = RuntimeClient::new(synthesizer.runtime_url(), engine.request_timeout)?;
        let rvc_runtime = RuntimeClient::new(&converter.runtime_url, engine.request_timeout)?;
        tts_runtime.wait_until_ready(engine.ready_timeout).await?;
        if rvc_runtime.base_url() != tts_runtime.base_url() {
            rvc_runtime.wait_until_ready(engine.ready_timeout).await?;
        }

        let warm = synthesizer.warm_up();
        let synth = synthesizer.load(tts_runtime, engine.device).await?;
        if warm {
            warm_up(synth.as_ref(), &staging).await?;
        }

        let converter = RvcConverter::load(converter, rvc_runtime, engine.device).await?;
        info!("pipeline ready in {:.1?}", t0.elapsed());

        Ok(Pipeline::new(
            synth,
            Box::new(converter),
            staging,
            engine.concurrency,
        ))
    }
}
