//! TOML analysis files.
//!
//! ```toml
//! delimiter = "tab"
//!
//! [[runs]]
//! bold = "${DATA_DIR}/sub-01_run-1_bold.nii.gz"
//! events = "sub-01_run-1_events.tsv"
//!
//! [design]
//! t_r = 2.4
//! hrf_model = "glover + derivative"
//!
//! [model]
//! noise_model = "ar1"
//!
//! [output]
//! prefix = "results/sub-01"
//!
//! [[contrasts]]
//! id = "audio_minus_visual"
//! expr = "audio - visual"
//! ```
//!
//! Relative paths resolve against the directory of the TOML file.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{parse_delimiter, validate};
use crate::domain::{AnalysisConfig, ContrastSpec, DesignOptions, ModelOptions, OutputOptions, RunInput};
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlAnalysis {
    /// `tab`, `comma` or a single character; tab when absent.
    #[serde(default)]
    pub delimiter: Option<String>,
    pub runs: Vec<RunInput>,
    #[serde(default)]
    pub design: DesignOptions,
    #[serde(default)]
    pub model: ModelOptions,
    #[serde(default)]
    pub output: OutputOptions,
    #[serde(default)]
    pub contrasts: Vec<ContrastSpec>,
}

impl TomlAnalysis {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::input(format!("Failed to read analysis file '{}': {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        let processed = substitute_env_vars(content)?;
        toml::from_str(&processed).map_err(|e| AppError::input(format!("Invalid analysis file: {e}")))
    }

    /// Resolve into an `AnalysisConfig`, relative paths against `base_dir`.
    pub fn into_config(self, base_dir: &Path) -> Result<AnalysisConfig, AppError> {
        let delimiter = match &self.delimiter {
            Some(d) => parse_delimiter(d)?,
            None => b'\t',
        };
        let resolve = |p: PathBuf| if p.is_relative() { base_dir.join(p) } else { p };

        let runs = self
            .runs
            .into_iter()
            .map(|r| RunInput {
                bold: resolve(r.bold),
                events: resolve(r.events),
                confounds: r.confounds.map(resolve),
            })
            .collect();

        let mut model = self.model;
        model.mask = model.mask.map(resolve);
        let mut output = self.output;
        output.prefix = output.prefix.map(resolve);
        output.export_design = output.export_design.map(resolve);
        output.summary = output.summary.map(resolve);

        let config = AnalysisConfig {
            runs,
            delimiter,
            design: self.design,
            model,
            contrasts: self.contrasts,
            output,
        };
        validate(&config)?;
        Ok(config)
    }
}

/// Load and resolve an analysis file.
pub fn load_analysis(path: &Path) -> Result<AnalysisConfig, AppError> {
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    TomlAnalysis::from_file(path)?.into_config(&base_dir)
}

/// Replace `${VAR}` with the environment value; unset variables stay as written.
fn substitute_env_vars(content: &str) -> Result<String, AppError> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| AppError::input(format!("Invalid substitution pattern: {e}")))?;

    let result = re.replace_all(content, |caps: &regex::Captures| {
        let name = &caps[1];
        std::env::var(name).unwrap_or_else(|_| {
            warn!(variable = name, "environment variable not set; left unsubstituted");
            format!("${{{name}}}")
        })
    });
    Ok(result.into_owned())
}
