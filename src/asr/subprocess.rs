//! Subprocess-wrapped engine (Parakeet-TDT via external binary, spec §4.3,
//! §4.13, §6, C13).
//!
//! Wire protocol: CLI flags select the model and tuning; stdin carries a
//! contiguous little-endian float32 PCM stream; stdout carries a single JSON
//! document `{segments, language?, model_version?, error?}`. stderr is
//! diagnostic only and is never parsed (spec §4.13).

use crate::asr::engine::Engine;
use crate::asr::types::{ASRError, TranscriptSegment, TranscriptWord};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::warn;

/// Model-load "ready" handshake timeout (spec §5).
pub const MODEL_LOAD_TIMEOUT: Duration = Duration::from_secs(60);
/// Completion ("finish") handshake timeout after input is sent (spec §5).
pub const FINISH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TranscriptionSubprocessConfig {
    pub binary_path: PathBuf,
    pub model: String,
    pub model_cache_dir: Option<PathBuf>,
    pub pause_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct WireWord {
    start: f64,
    end: f64,
    text: String,
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct WireSegment {
    start: f64,
    end: f64,
    text: String,
    words: Option<Vec<WireWord>>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    segments: Vec<WireSegment>,
    #[allow(dead_code)]
    language: Option<String>,
    #[allow(dead_code)]
    model_version: Option<String>,
    error: Option<String>,
}

fn samples_to_le_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

fn wire_response_to_segments(response: WireResponse) -> Result<Vec<TranscriptSegment>, ASRError> {
    if let Some(error) = response.error {
        return Err(ASRError::InferenceFailed(error));
    }
    let mut segments = Vec::with_capacity(response.segments.len());
    for seg in response.segments {
        let words = seg
            .words
            .unwrap_or_default()
            .into_iter()
            .map(|w| TranscriptWord {
                start_ms: (w.start * 1000.0).round() as u64,
                end_ms: (w.end * 1000.0).round() as u64,
                text: w.text,
                p: w.confidence.unwrap_or(1.0),
                speaker: None,
            })
            .collect::<Vec<_>>();

        if words.is_empty() {
            segments.push(TranscriptSegment {
                start_ms: (seg.start * 1000.0).round() as u64,
                end_ms: (seg.end * 1000.0).round() as u64,
                text: seg.text,
                speaker: None,
                words: Vec::new(),
            });
        } else {
            segments.push(TranscriptSegment::from_words(words, None));
        }
    }
    Ok(segments)
}

/// Runs `binary_path` with the wire protocol above, enforcing the two
/// handshake timeouts (spec §5): up to [`MODEL_LOAD_TIMEOUT`] for the first
/// byte of output, then up to [`FINISH_TIMEOUT`] for the process to exit
/// once output has started flowing.
async fn run_subprocess(
    config: &TranscriptionSubprocessConfig,
    samples: &[f32],
    high_quality: bool,
) -> Result<Vec<TranscriptSegment>, ASRError> {
    let mut cmd = Command::new(&config.binary_path);
    cmd.arg("--samples")
        .arg("--model")
        .arg(&config.model)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(dir) = &config.model_cache_dir {
        cmd.arg("--model-cache-dir").arg(dir);
    }
    if let Some(threshold) = config.pause_threshold {
        cmd.arg("--pause-threshold").arg(threshold.to_string());
    }
    if high_quality {
        cmd.arg("--high-quality");
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| ASRError::InferenceFailed(format!("failed to spawn subprocess: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        let bytes = samples_to_le_bytes(samples);
        if let Err(e) = stdin.write_all(&bytes).await {
            warn!("failed writing samples to subprocess stdin: {e}");
        }
    }

    let mut stdout = child.stdout.take().expect("stdout piped");
    let mut first_byte = [0u8; 1];
    let read_first = tokio::time::timeout(MODEL_LOAD_TIMEOUT, stdout.read(&mut first_byte))
        .await
        .map_err(|_| ASRError::InferenceFailed("subprocess model-load timeout".to_string()))?
        .map_err(|e| ASRError::InferenceFailed(format!("subprocess stdout read failed: {e}")))?;

    let mut out_buf = Vec::new();
    if read_first > 0 {
        out_buf.extend_from_slice(&first_byte[..read_first]);
    }

    tokio::time::timeout(FINISH_TIMEOUT, stdout.read_to_end(&mut out_buf))
        .await
        .map_err(|_| ASRError::InferenceFailed("subprocess finish timeout".to_string()))?
        .map_err(|e| ASRError::InferenceFailed(format!("subprocess stdout read failed: {e}")))?;

    let mut stderr_buf = Vec::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_end(&mut stderr_buf).await;
    }
    let status = child
        .wait()
        .await
        .map_err(|e| ASRError::InferenceFailed(format!("subprocess wait failed: {e}")))?;

    if !status.success() && !stderr_buf.is_empty() {
        return Err(ASRError::InferenceFailed(String::from_utf8_lossy(&stderr_buf).to_string()));
    }

    let response: WireResponse = serde_json::from_slice(&out_buf)
        .map_err(|e| ASRError::Decoding(format!("malformed subprocess JSON: {e}")))?;
    wire_response_to_segments(response)
}

pub struct ParakeetTdtEngine {
    name: String,
    config: Mutex<TranscriptionSubprocessConfig>,
    language: Mutex<Option<String>>,
    supported_languages: Vec<String>,
}

impl ParakeetTdtEngine {
    pub fn new(name: impl Into<String>, config: TranscriptionSubprocessConfig) -> Self {
        Self {
            name: name.into(),
            config: Mutex::new(config),
            language: Mutex::new(None),
            supported_languages: vec!["en".to_string(), "ru".to_string()],
        }
    }
}

#[async_trait::async_trait]
impl Engine for ParakeetTdtEngine {
    async fn transcribe(&self, samples: &[f32], _use_context: bool) -> Result<String, ASRError> {
        let segments = self.transcribe_with_segments(samples).await?;
        Ok(segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" "))
    }

    async fn transcribe_with_segments(
        &self,
        samples: &[f32],
    ) -> Result<Vec<TranscriptSegment>, ASRError> {
        if samples.len() < 1600 {
            return Err(ASRError::InputTooShort);
        }
        let config = self.config.lock().await.clone();
        run_subprocess(&config, samples, false).await
    }

    async fn transcribe_high_quality(
        &self,
        samples: &[f32],
    ) -> Result<Vec<TranscriptSegment>, ASRError> {
        if samples.len() < 1600 {
            return Err(ASRError::InputTooShort);
        }
        let config = self.config.lock().await.clone();
        run_subprocess(&config, samples, true).await
    }

    fn set_language(&mut self, language: Option<String>) {
        *self.language.get_mut() = language;
    }

    fn set_model(&mut self, path_or_id: String) -> Result<(), ASRError> {
        self.config.get_mut().model = path_or_id;
        Ok(())
    }

    fn close(&mut self) {}

    fn name(&self) -> &str {
        &self.name
    }

    fn supported_languages(&self) -> &[String] {
        &self.supported_languages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_encode_as_little_endian_f32() {
        let bytes = samples_to_le_bytes(&[1.0, -1.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(-1.0f32).to_le_bytes());
    }

    #[test]
    fn wire_error_field_surfaces_as_inference_failed() {
        let response = WireResponse {
            segments: Vec::new(),
            language: None,
            model_version: None,
            error: Some("model crashed".to_string()),
        };
        let result = wire_response_to_segments(response);
        assert!(matches!(result, Err(ASRError::InferenceFailed(msg)) if msg == "model crashed"));
    }

    #[test]
    fn wire_segments_without_words_keep_segment_level_text() {
        let response = WireResponse {
            segments: vec![WireSegment { start: 0.0, end: 1.5, text: "hello".to_string(), words: None }],
            language: Some("en".to_string()),
            model_version: Some("v1".to_string()),
            error: None,
        };
        let segments = wire_response_to_segments(response).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hello");
        assert_eq!(segments[0].end_ms, 1500);
    }
}
