//! ASR worker. Invokes an external speech-to-text
//! CLI as a child process, the same way `capture::command` invokes the
//! transcoder -- the engine itself (faster-whisper/ctranslate2) is an
//! external collaborator, never reimplemented in this crate.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::Segment;
use crate::persistence::UpsertTranscript;
use crate::worker::{Analyser, AnalyserNeeds, Artifact, WorkerContext};
use crate::{Error, Result};

fn default_binary() -> String {
    "mobasher-asr".to_string()
}

/// Tunables threaded straight onto the external tool's CLI.
#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub binary: String,
    pub model_name: String,
    pub device: String,
    pub beam_size: u32,
    pub vad_filter: bool,
    pub word_timestamps: bool,
    pub condition_on_previous_text: bool,
    pub initial_prompt: Option<String>,
    pub language: String,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            model_name: "large-v3".to_string(),
            device: "cpu".to_string(),
            beam_size: 5,
            vad_filter: true,
            word_timestamps: false,
            condition_on_previous_text: false,
            initial_prompt: None,
            language: "ar".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AsrToolOutput {
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    words: Option<serde_json::Value>,
    faster_whisper_version: String,
    ctranslate2_version: String,
    engine_time_ms: i32,
}

pub struct AsrAnalyser {
    pub config: AsrConfig,
    normaliser: Arc<dyn Fn(&str) -> String + Send + Sync>,
}

impl AsrAnalyser {
    pub fn new(config: AsrConfig) -> Self {
        Self {
            config,
            normaliser: Arc::new(default_text_normaliser),
        }
    }

    /// Swaps the text normaliser applied to every transcript this analyser
    /// produces, e.g. a language-specific one for a channel whose `language`
    /// isn't Arabic.
    pub fn with_normaliser(mut self, normalise: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.normaliser = Arc::new(normalise);
        self
    }
}

/// Default normaliser: strips Arabic diacritics (tashkeel) and collapses
/// whitespace. A no-op on text that carries no such marks.
fn default_text_normaliser(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !is_arabic_diacritic(*c)).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_arabic_diacritic(c: char) -> bool {
    matches!(c as u32, 0x0610..=0x061A | 0x064B..=0x065F | 0x0670 | 0x06D6..=0x06ED)
}

#[async_trait]
impl Analyser for AsrAnalyser {
    fn name(&self) -> &'static str {
        "asr"
    }

    fn needs(&self) -> AnalyserNeeds {
        AnalyserNeeds {
            audio: true,
            video: false,
        }
    }

    async fn run(&self, ctx: &WorkerContext, segment: &Segment) -> Result<Vec<Artifact>> {
        let start = Instant::now();
        let mut command = process_utils::tokio_command(&self.config.binary);
        command
            .arg("--model")
            .arg(&self.config.model_name)
            .arg("--device")
            .arg(&self.config.device)
            .arg("--beam-size")
            .arg(self.config.beam_size.to_string())
            .arg("--language")
            .arg(&self.config.language)
            .arg(&ctx.media_path);
        if self.config.vad_filter {
            command.arg("--vad-filter");
        }
        if self.config.word_timestamps {
            command.arg("--word-timestamps");
        }
        if self.config.condition_on_previous_text {
            command.arg("--condition-on-previous-text");
        }
        if let Some(prompt) = &self.config.initial_prompt {
            command.arg("--initial-prompt").arg(prompt);
        }

        let output = command
            .output()
            .await
            .map_err(|e| Error::ModelLoad(format!("failed to spawn ASR tool: {e}")))?;
        if !output.status.success() {
            return Err(Error::ModelLoad(format!(
                "ASR tool exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let parsed: AsrToolOutput = serde_json::from_slice(&output.stdout)?;
        let processing_time_ms = start.elapsed().as_millis() as i32;
        let model_version = format!(
            "fw-{}|ct2-{}",
            parsed.faster_whisper_version, parsed.ctranslate2_version
        );

        let mut transcript = UpsertTranscript {
            segment_id: segment.id,
            segment_started_at: segment.started_at,
            language: self.config.language.clone(),
            text: parsed.text,
            text_norm: None,
            confidence: parsed.confidence,
            words: parsed.words,
            model_name: self.config.model_name.clone(),
            model_version: Some(model_version),
            processing_time_ms: Some(processing_time_ms),
            engine_time_ms: Some(parsed.engine_time_ms),
        };
        apply_normaliser(&mut transcript, |s| (self.normaliser)(s));

        Ok(vec![Artifact::Transcript(transcript)])
    }
}

/// Writes a normalised-text copy of a transcript via an injected normaliser
/// function, e.g. Arabic diacritics stripping. Kept
/// separate from [`AsrAnalyser::run`] so the normaliser can be swapped
/// without touching the engine invocation.
pub fn apply_normaliser(transcript: &mut UpsertTranscript, normalise: impl Fn(&str) -> String) {
    transcript.text_norm = Some(normalise(&transcript.text));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_version_format_matches_spec() {
        let version = format!("fw-{}|ct2-{}", "1.0.3", "4.2.1");
        assert_eq!(version, "fw-1.0.3|ct2-4.2.1");
    }

    #[test]
    fn normaliser_sets_text_norm_without_touching_text() {
        let mut transcript = UpsertTranscript {
            segment_id: uuid::Uuid::nil(),
            segment_started_at: chrono::Utc::now(),
            language: "ar".into(),
            text: "Hello".into(),
            text_norm: None,
            confidence: None,
            words: None,
            model_name: "large-v3".into(),
            model_version: None,
            processing_time_ms: None,
            engine_time_ms: None,
        };
        apply_normaliser(&mut transcript, |s| s.to_lowercase());
        assert_eq!(transcript.text, "Hello");
        assert_eq!(transcript.text_norm.as_deref(), Some("hello"));
    }

    #[test]
    fn default_normaliser_strips_arabic_diacritics() {
        let normalised = default_text_normaliser("مَرْحَبًا  بِكُمْ");
        assert_eq!(normalised, "مرحبا بكم");
    }

    #[test]
    fn analyser_defaults_to_arabic_diacritics_normaliser() {
        let analyser = AsrAnalyser::new(AsrConfig::default());
        assert_eq!((analyser.normaliser)("مَرْحَبًا"), "مرحبا");
    }
}
