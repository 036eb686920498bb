//! Job request parameters and the separation model catalog.

use demix_core::error::CoreError;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Model used when the request does not name one.
pub const DEFAULT_MODEL: &str = "htdemucs";

/// Stems produced when the request does not list any.
pub const DEFAULT_STEMS: [&str; 4] = ["vocals", "drums", "bass", "other"];

/// Accepted segment length range, in seconds.
pub const MIN_SEGMENT_SECS: u32 = 1;
pub const MAX_SEGMENT_SECS: u32 = 60;

/// Segment length for hybrid transformer models when unset.
const HTDEMUCS_DEFAULT_SEGMENT_SECS: u32 = 7;

/// Segment length for every other model when unset.
const DEFAULT_SEGMENT_SECS: u32 = 10;

/// Accepted MP3 bitrate range, in kbps.
pub const MIN_MP3_BITRATE: u32 = 32;
pub const MAX_MP3_BITRATE: u32 = 320;

const FOUR_STEMS: &[&str] = &["vocals", "drums", "bass", "other"];
const SIX_STEMS: &[&str] = &["vocals", "drums", "bass", "other", "piano", "guitar"];

// ---------------------------------------------------------------------------
// Model catalog
// ---------------------------------------------------------------------------

/// Static description of a separation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub architecture: &'static str,
    pub quality: &'static str,
    pub speed: &'static str,
    pub stems: &'static [&'static str],
    pub recommended: bool,
}

pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "htdemucs",
        description: "Hybrid Transformer Demucs",
        architecture: "hybrid transformer",
        quality: "high",
        speed: "medium",
        stems: FOUR_STEMS,
        recommended: true,
    },
    ModelInfo {
        name: "htdemucs_ft",
        description: "Fine-tuned Hybrid Transformer Demucs",
        architecture: "hybrid transformer",
        quality: "highest",
        speed: "slow",
        stems: FOUR_STEMS,
        recommended: false,
    },
    ModelInfo {
        name: "htdemucs_6s",
        description: "6-stem Hybrid Transformer Demucs with piano and guitar",
        architecture: "hybrid transformer",
        quality: "high",
        speed: "medium",
        stems: SIX_STEMS,
        recommended: false,
    },
    ModelInfo {
        name: "mdx",
        description: "MDX model",
        architecture: "mdx",
        quality: "medium",
        speed: "fast",
        stems: FOUR_STEMS,
        recommended: false,
    },
    ModelInfo {
        name: "mdx_q",
        description: "Quantized MDX model",
        architecture: "mdx",
        quality: "medium",
        speed: "fastest",
        stems: FOUR_STEMS,
        recommended: false,
    },
];

/// Look up a model by name.
pub fn find_model(name: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|model| model.name == name)
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Reference to the artifact a job processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInput {
    /// Location of the input in the artifact store.
    pub source: String,
    /// Original upload name, used to name outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl JobInput {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filename: None,
        }
    }

    /// Base name for outputs: the file stem of `filename`, or of `source`.
    pub fn base_name(&self) -> &str {
        let name = self.filename.as_deref().unwrap_or(&self.source);
        let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }
}

/// Separation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationParams {
    pub model: String,
    pub stems: Vec<String>,
    /// Split into one stem and its complement instead of `stems`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_stems: Option<String>,
    /// Segment length in seconds; model default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<u32>,
    pub mp3: bool,
    pub mp3_bitrate: u32,
}

impl Default for SeparationParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            stems: DEFAULT_STEMS.iter().map(|s| s.to_string()).collect(),
            two_stems: None,
            segment: None,
            mp3: false,
            mp3_bitrate: MAX_MP3_BITRATE,
        }
    }
}

impl SeparationParams {
    /// Check the parameters against the model catalog.
    pub fn validate(&self) -> Result<(), CoreError> {
        let model = find_model(&self.model).ok_or_else(|| {
            CoreError::Validation(format!(
                "Unknown model '{}'. Available models: {}",
                self.model,
                model_names().join(", ")
            ))
        })?;

        if self.stems.is_empty() && self.two_stems.is_none() {
            return Err(CoreError::Validation(
                "At least one stem must be requested".to_string(),
            ));
        }
        for stem in self.stems.iter().chain(self.two_stems.iter()) {
            if !model.stems.contains(&stem.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Model '{}' does not produce stem '{stem}'",
                    model.name
                )));
            }
        }

        if let Some(segment) = self.segment {
            if !(MIN_SEGMENT_SECS..=MAX_SEGMENT_SECS).contains(&segment) {
                return Err(CoreError::Validation(format!(
                    "Segment must be between {MIN_SEGMENT_SECS} and {MAX_SEGMENT_SECS} seconds"
                )));
            }
        }

        if !(MIN_MP3_BITRATE..=MAX_MP3_BITRATE).contains(&self.mp3_bitrate) {
            return Err(CoreError::Validation(format!(
                "MP3 bitrate must be between {MIN_MP3_BITRATE} and {MAX_MP3_BITRATE} kbps"
            )));
        }

        Ok(())
    }

    /// Segment length that will actually be used.
    pub fn effective_segment(&self) -> u32 {
        self.segment.unwrap_or(if self.model.starts_with("htdemucs") {
            HTDEMUCS_DEFAULT_SEGMENT_SECS
        } else {
            DEFAULT_SEGMENT_SECS
        })
    }

    /// Names of the files a run produces, without extension.
    pub fn output_stems(&self) -> Vec<String> {
        match &self.two_stems {
            Some(stem) => vec![stem.clone(), format!("no_{stem}")],
            None => self.stems.clone(),
        }
    }

    pub fn output_extension(&self) -> &'static str {
        if self.mp3 {
            "mp3"
        } else {
            "wav"
        }
    }
}

/// A submission: what to process and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub input: JobInput,
    #[serde(default)]
    pub params: SeparationParams,
}

impl JobRequest {
    pub fn new(input: JobInput, params: SeparationParams) -> Self {
        Self { input, params }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.input.source.trim().is_empty() {
            return Err(CoreError::Validation(
                "Input source must not be empty".to_string(),
            ));
        }
        self.params.validate()
    }
}

fn model_names() -> Vec<&'static str> {
    MODELS.iter().map(|model| model.name).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn params() -> SeparationParams {
        SeparationParams::default()
    }

    #[test]
    fn defaults_are_valid() {
        assert!(params().validate().is_ok());
        assert_eq!(params().model, "htdemucs");
        assert_eq!(params().stems.len(), 4);
        assert_eq!(params().mp3_bitrate, 320);
    }

    #[test]
    fn deserializes_partial_body_with_defaults() {
        let request: JobRequest = serde_json::from_value(serde_json::json!({
            "input": { "source": "uploads/song.mp3" },
            "params": { "model": "mdx", "mp3": true }
        }))
        .unwrap();
        assert_eq!(request.params.model, "mdx");
        assert!(request.params.mp3);
        assert_eq!(request.params.stems, DEFAULT_STEMS);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn unknown_model_rejected() {
        let p = SeparationParams {
            model: "spleeter".into(),
            ..params()
        };
        assert_matches!(p.validate(), Err(CoreError::Validation(msg)) if msg.contains("spleeter"));
    }

    #[test]
    fn six_stem_only_stems_need_six_stem_model() {
        let mut p = SeparationParams {
            stems: vec!["piano".into()],
            ..params()
        };
        assert!(p.validate().is_err());
        p.model = "htdemucs_6s".into();
        assert!(p.validate().is_ok());
    }

    #[test]
    fn two_stems_must_be_supported() {
        let p = SeparationParams {
            two_stems: Some("guitar".into()),
            ..params()
        };
        assert!(p.validate().is_err());

        let p = SeparationParams {
            two_stems: Some("vocals".into()),
            ..params()
        };
        assert_eq!(p.output_stems(), vec!["vocals", "no_vocals"]);
    }

    #[test]
    fn segment_and_bitrate_bounds() {
        assert!(SeparationParams { segment: Some(0), ..params() }.validate().is_err());
        assert!(SeparationParams { segment: Some(61), ..params() }.validate().is_err());
        assert!(SeparationParams { segment: Some(60), ..params() }.validate().is_ok());
        assert!(SeparationParams { mp3_bitrate: 16, ..params() }.validate().is_err());
        assert!(SeparationParams { mp3_bitrate: 321, ..params() }.validate().is_err());
    }

    #[test]
    fn effective_segment_depends_on_model() {
        assert_eq!(params().effective_segment(), 7);
        let mdx = SeparationParams { model: "mdx_q".into(), ..params() };
        assert_eq!(mdx.effective_segment(), 10);
        let explicit = SeparationParams { segment: Some(30), ..params() };
        assert_eq!(explicit.effective_segment(), 30);
    }

    #[test]
    fn empty_source_rejected() {
        let request = JobRequest::new(JobInput::new("  "), params());
        assert_matches!(request.validate(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn base_name_prefers_filename() {
        let mut input = JobInput::new("uploads/abc123.wav");
        assert_eq!(input.base_name(), "abc123");
        input.filename = Some("My Song.flac".into());
        assert_eq!(input.base_name(), "My Song");
    }
}
