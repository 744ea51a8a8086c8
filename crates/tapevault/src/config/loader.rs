use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let detector = &config.detector;
    if detector.threshold.is_nan() || detector.threshold <= 0.0 || detector.threshold > 1.0 {
        return Err(ConfigError::Validation {
            message: format!(
                "detector.threshold must be in (0, 1], got {}",
                detector.threshold
            ),
        });
    }
    if !detector.min_segment_seconds.is_finite() || detector.min_segment_seconds < 0.0 {
        return Err(ConfigError::Validation {
            message: format!(
                "detector.min_segment_seconds must be >= 0, got {}",
                detector.min_segment_seconds
            ),
        });
    }
    if let Some(fps) = detector.sample_fps {
        if fps.is_nan() || fps <= 0.0 {
            return Err(ConfigError::Validation {
                message: format!("detector.sample_fps must be positive, got {}", fps),
            });
        }
    }

    if config.export.crf > 51 {
        return Err(ConfigError::Validation {
            message: format!("export.crf must be 0-51, got {}", config.export.crf),
        });
    }

    let tools = &config.tools;
    for (name, secs) in [
        ("probe_timeout_secs", tools.probe_timeout_secs),
        ("thumbnail_timeout_secs", tools.thumbnail_timeout_secs),
        ("analysis_timeout_secs", tools.analysis_timeout_secs),
        ("export_timeout_secs", tools.export_timeout_secs),
    ] {
        if secs == 0 {
            return Err(ConfigError::Validation {
                message: format!("tools.{} must be positive", name),
            });
        }
    }

    Ok(())
}
