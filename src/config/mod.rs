//! Analysis configuration: validation shared by CLI flags and TOML files.

pub mod toml_config;

pub use toml_config::{TomlAnalysis, load_analysis};

use std::collections::HashSet;

use crate::domain::{AnalysisConfig, ContrastSpec};
use crate::error::AppError;

/// `tab`, `comma`, `semicolon`, `\t` or any single ASCII character.
pub fn parse_delimiter(s: &str) -> Result<u8, AppError> {
    match s {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        "comma" => Ok(b','),
        "semicolon" => Ok(b';'),
        other if other.len() == 1 && other.is_ascii() => Ok(other.as_bytes()[0]),
        other => Err(AppError::input(format!(
            "Invalid delimiter '{other}'; use tab, comma, semicolon or a single character."
        ))),
    }
}

/// Parse a `NAME=EXPR` contrast argument.
pub fn parse_contrast_arg(arg: &str) -> Result<ContrastSpec, AppError> {
    let Some((id, expr)) = arg.split_once('=') else {
        return Err(AppError::input(format!("Contrast '{arg}' must be written NAME=EXPR.")));
    };
    Ok(ContrastSpec {
        id: id.trim().to_string(),
        expr: expr.trim().to_string(),
    })
}

/// Checks that do not need the data.
pub fn validate(config: &AnalysisConfig) -> Result<(), AppError> {
    if config.runs.is_empty() {
        return Err(AppError::input("At least one run (bold + events) is required."));
    }

    let d = &config.design;
    if !(d.t_r.is_finite() && d.t_r > 0.0) {
        return Err(AppError::input(format!("t_r must be positive, got {}.", d.t_r)));
    }
    if !(0.0..=1.0).contains(&d.slice_time_ref) {
        return Err(AppError::input(format!(
            "slice_time_ref must be within [0, 1], got {}.",
            d.slice_time_ref
        )));
    }
    if !(d.high_pass.is_finite() && d.high_pass >= 0.0) {
        return Err(AppError::input(format!("high_pass must be >= 0, got {}.", d.high_pass)));
    }
    if d.oversampling == 0 {
        return Err(AppError::input("oversampling must be positive."));
    }
    if config.model.ar_bins == 0 {
        return Err(AppError::input("ar_bins must be positive."));
    }
    if !(config.output.threshold.is_finite() && config.output.threshold >= 0.0) {
        return Err(AppError::input(format!(
            "threshold must be >= 0, got {}.",
            config.output.threshold
        )));
    }

    let mut seen = HashSet::new();
    for c in &config.contrasts {
        if c.id.is_empty() {
            return Err(AppError::input(format!("Contrast '{}' has an empty name.", c.expr)));
        }
        if c.id.contains(['/', '\\']) {
            return Err(AppError::input(format!("Contrast name '{}' cannot contain path separators.", c.id)));
        }
        if c.expr.is_empty() {
            return Err(AppError::input(format!("Contrast '{}' has an empty expression.", c.id)));
        }
        if !seen.insert(c.id.as_str()) {
            return Err(AppError::input(format!("Contrast name '{}' is used twice.", c.id)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DesignOptions, ModelOptions, OutputOptions, RunInput};

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            runs: vec![RunInput {
                bold: "bold.nii".into(),
                events: "events.tsv".into(),
                confounds: None,
            }],
            delimiter: b'\t',
            design: DesignOptions::default(),
            model: ModelOptions::default(),
            contrasts: vec![],
            output: OutputOptions::default(),
        }
    }

    #[test]
    fn delimiters() {
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert_eq!(parse_delimiter(",").unwrap(), b',');
        assert_eq!(parse_delimiter("comma").unwrap(), b',');
        assert!(parse_delimiter("::").is_err());
    }

    #[test]
    fn contrast_arguments() {
        let c = parse_contrast_arg("all = a + b").unwrap();
        assert_eq!(c.id, "all");
        assert_eq!(c.expr, "a + b");
        assert!(parse_contrast_arg("a + b").is_err());
    }

    #[test]
    fn validation_catches_bad_values() {
        assert!(validate(&config()).is_ok());

        let mut c = config();
        c.design.slice_time_ref = 1.5;
        assert!(validate(&c).is_err());

        let mut c = config();
        c.contrasts = vec![
            ContrastSpec { id: "x".into(), expr: "a".into() },
            ContrastSpec { id: "x".into(), expr: "b".into() },
        ];
        assert!(validate(&c).unwrap_err().message().contains("twice"));

        let mut c = config();
        c.runs.clear();
        assert_eq!(validate(&c).unwrap_err().exit_code(), 2);
    }
}
