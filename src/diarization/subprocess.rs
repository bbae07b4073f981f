//! External diarisation pipeline (spec §4.7, §6, C13).
//!
//! Wire protocol: the child process accepts either a positional
//! `<audio_path>` or `--samples` (reading little-endian float32 PCM from
//! stdin), plus `--clustering-threshold`, `--min-segment-duration`,
//! `--vbx-max-iterations`, `--min-gap-duration`, and `--debug`. stdout
//! carries one JSON document: `{segments:[{speaker,start,end}],
//! num_speakers, error?}`. Mirrors `asr::subprocess`'s handshake shape,
//! since both wrap the same "spawn, feed PCM, parse one JSON document"
//! external-pipeline pattern (spec §4.13).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::types::{DiarizationConfig, DiarizationError, SpeakerSegment};

pub const MODEL_LOAD_TIMEOUT: Duration = Duration::from_secs(60);
pub const FINISH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DiarizationSubprocessConfig {
    pub binary_path: PathBuf,
    pub debug: bool,
}

#[derive(Debug, Deserialize)]
struct WireSegment {
    speaker: i64,
    start: f64,
    end: f64,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    segments: Vec<WireSegment>,
    #[allow(dead_code)]
    num_speakers: Option<u32>,
    error: Option<String>,
}

fn samples_to_le_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

fn wire_response_to_segments(response: WireResponse) -> Result<Vec<SpeakerSegment>, DiarizationError> {
    if let Some(error) = response.error {
        return Err(DiarizationError::Decoding(error));
    }
    Ok(response
        .segments
        .into_iter()
        .map(|s| SpeakerSegment { start_s: s.start, end_s: s.end, speaker_id: s.speaker.max(0) as u32 })
        .collect())
}

/// Runs the external diarisation binary against raw samples via stdin,
/// forwarding the tuning parameters named in spec §4.7/§6.
pub async fn run_subprocess(
    binary: &DiarizationSubprocessConfig,
    samples: &[f32],
    config: &DiarizationConfig,
) -> Result<Vec<SpeakerSegment>, DiarizationError> {
    let mut cmd = Command::new(&binary.binary_path);
    cmd.arg("--samples")
        .arg("--clustering-threshold")
        .arg(config.clustering_threshold.to_string())
        .arg("--min-segment-duration")
        .arg(config.min_segment_duration_s.to_string())
        .arg("--vbx-max-iterations")
        .arg(config.vbx_max_iterations.to_string())
        .arg("--min-gap-duration")
        .arg(config.min_gap_duration_s.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if binary.debug {
        cmd.arg("--debug");
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| DiarizationError::SubprocessFailed { exit_code: None, stderr: format!("failed to spawn: {e}") })?;

    if let Some(mut stdin) = child.stdin.take() {
        let bytes = samples_to_le_bytes(samples);
        let _ = stdin.write_all(&bytes).await;
    }

    let mut stdout = child.stdout.take().expect("stdout piped");
    let mut first_byte = [0u8; 1];
    let read_first = tokio::time::timeout(MODEL_LOAD_TIMEOUT, stdout.read(&mut first_byte))
        .await
        .map_err(|_| DiarizationError::SubprocessFailed { exit_code: None, stderr: "model-load timeout".to_string() })?
        .map_err(|e| DiarizationError::SubprocessFailed { exit_code: None, stderr: format!("stdout read failed: {e}") })?;

    let mut out_buf = Vec::new();
    if read_first > 0 {
        out_buf.extend_from_slice(&first_byte[..read_first]);
    }

    tokio::time::timeout(FINISH_TIMEOUT, stdout.read_to_end(&mut out_buf))
        .await
        .map_err(|_| DiarizationError::SubprocessFailed { exit_code: None, stderr: "finish timeout".to_string() })?
        .map_err(|e| DiarizationError::SubprocessFailed { exit_code: None, stderr: format!("stdout read failed: {e}") })?;

    let mut stderr_buf = Vec::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_end(&mut stderr_buf).await;
    }
    let status = child
        .wait()
        .await
        .map_err(|e| DiarizationError::SubprocessFailed { exit_code: None, stderr: format!("wait failed: {e}") })?;

    if !status.success() && !stderr_buf.is_empty() {
        return Err(DiarizationError::SubprocessFailed {
            exit_code: status.code(),
            stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
        });
    }

    let response: WireResponse = serde_json::from_slice(&out_buf)
        .map_err(|e| DiarizationError::Decoding(format!("malformed subprocess JSON: {e}")))?;
    wire_response_to_segments(response)
}
