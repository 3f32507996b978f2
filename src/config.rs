//! Deployment configuration.
//!
//! Settings are taken from, in order of increasing precedence:
//!
//! - built-in defaults,
//! - a JSON file named by the `MUDRA_CONFIG` environment variable,
//! - individual `MUDRA_*` environment variables.

use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr};

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::vocab::{self, TranslationTable, Vocabulary};

/// How frames reach the pipeline. Selects the default thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One frame per HTTP request.
    Request,
    /// A continuous camera stream.
    Stream,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Gesture classifier ONNX file.
    pub model: PathBuf,
    /// Palm detection ONNX file.
    pub palm_model: PathBuf,
    /// Hand landmark ONNX file.
    pub hand_model: PathBuf,
    /// Maximum number of hands examined per frame.
    pub max_hands: usize,
    /// Confidence threshold of the gate. Defaults depend on the [`Mode`].
    pub threshold: Option<f32>,
    /// Minimum hand presence score. Defaults depend on the [`Mode`].
    pub min_hand_confidence: Option<f32>,
    pub addr: String,
    pub workers: usize,
    /// Webcam to open in stream mode. The first suitable one is used if unset.
    pub webcam_name: Option<String>,
    pub dataset_dir: PathBuf,
    /// Class labels in model output order. Defaults to the built-in Sinhala gesture set.
    pub labels: Option<Vec<String>>,
    /// Display strings of the labels. Required to be set together with `labels`.
    pub translations: Option<BTreeMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "gesture_model.onnx".into(),
            palm_model: "palm_detection.onnx".into(),
            hand_model: "hand_landmark.onnx".into(),
            max_hands: 2,
            threshold: None,
            min_hand_confidence: None,
            addr: "127.0.0.1:5000".into(),
            workers: 4,
            webcam_name: None,
            dataset_dir: "gestures".into(),
            labels: None,
            translations: None,
        }
    }
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Loads the configuration, looking up environment variables with `var`.
    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match var("MUDRA_CONFIG") {
            Some(path) => {
                let data = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file '{}'", path))?;
                Self::from_json(&data).with_context(|| format!("invalid config file '{}'", path))?
            }
            None => Self::default(),
        };

        if let Some(v) = var("MUDRA_MODEL") {
            config.model = v.into();
        }
        if let Some(v) = var("MUDRA_PALM_MODEL") {
            config.palm_model = v.into();
        }
        if let Some(v) = var("MUDRA_HAND_MODEL") {
            config.hand_model = v.into();
        }
        if let Some(v) = var("MUDRA_MAX_HANDS") {
            config.max_hands = parse_var("MUDRA_MAX_HANDS", &v)?;
        }
        if let Some(v) = var("MUDRA_THRESHOLD") {
            config.threshold = Some(parse_var("MUDRA_THRESHOLD", &v)?);
        }
        if let Some(v) = var("MUDRA_MIN_HAND_CONFIDENCE") {
            config.min_hand_confidence = Some(parse_var("MUDRA_MIN_HAND_CONFIDENCE", &v)?);
        }
        if let Some(v) = var("MUDRA_ADDR") {
            config.addr = v;
        }
        if let Some(v) = var("MUDRA_WORKERS") {
            config.workers = parse_var("MUDRA_WORKERS", &v)?;
        }
        if let Some(v) = var("MUDRA_WEBCAM_NAME") {
            config.webcam_name = Some(v);
        }
        if let Some(v) = var("MUDRA_DATASET_DIR") {
            config.dataset_dir = v.into();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("threshold", self.threshold),
            ("min_hand_confidence", self.min_hand_confidence),
        ] {
            if let Some(value) = value {
                if !(0.0..=1.0).contains(&value) {
                    bail!("`{}` must be in [0, 1], got {}", name, value);
                }
            }
        }
        if self.workers == 0 {
            bail!("`workers` must be at least 1");
        }
        if self.max_hands == 0 {
            bail!("`max_hands` must be at least 1");
        }
        if self.labels.is_some() != self.translations.is_some() {
            bail!("`labels` and `translations` must be configured together");
        }
        Ok(())
    }

    pub fn threshold(&self, mode: Mode) -> f32 {
        self.threshold.unwrap_or(match mode {
            Mode::Request => 0.5,
            Mode::Stream => 0.7,
        })
    }

    pub fn min_hand_confidence(&self, mode: Mode) -> f32 {
        self.min_hand_confidence.unwrap_or(match mode {
            Mode::Request => 0.2,
            Mode::Stream => 0.7,
        })
    }

    /// Builds the label vocabulary and translation table.
    pub fn vocabulary(&self) -> anyhow::Result<(Vocabulary, TranslationTable)> {
        match (&self.labels, &self.translations) {
            (Some(labels), Some(translations)) => {
                let vocabulary = Vocabulary::new(labels.iter().cloned())?;
                let table = translations.iter().collect::<TranslationTable>();
                table.validate(&vocabulary)?;
                Ok((vocabulary, table))
            }
            _ => Ok(vocab::sinhala()),
        }
    }
}

fn parse_var<T>(name: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value '{}' for {}: {}", value, name, e))
}
