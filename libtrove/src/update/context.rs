//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::deps::{DepsError, Flavor};
use crate::versions::{Label, VersionError};
use ini::Ini;
use miette::Diagnostic;
use regex::Regex;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const CLIENT_SECTION: &str = "client";

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {message}")]
    #[diagnostic(
        code(trove::config_error::read),
        help("Check that the configuration file exists and is valid INI")
    )]
    Read { path: String, message: String },

    #[error("invalid configuration: {0}")]
    #[diagnostic(code(trove::config_error::parse))]
    Parse(String),

    #[error("invalid value {value:?} for {key}")]
    #[diagnostic(
        code(trove::config_error::invalid_value),
        help("Booleans are true/false, thresholds are non-negative integers")
    )]
    InvalidValue { key: String, value: String },

    #[error("invalid pattern {pattern:?} for {key}: {source}")]
    #[diagnostic(code(trove::config_error::invalid_pattern))]
    InvalidPattern {
        key: String,
        pattern: String,
        source: regex::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Deps(#[from] DepsError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Settings every planner component reads. Built once and shared by
/// reference for the whole planning pass.
#[derive(Debug, Clone)]
pub struct PlanningContext {
    pub install_label_path: Vec<Label>,
    /// Install flavors in order of preference
    pub flavors: Vec<Flavor>,
    pub exclude_troves: Vec<Regex>,
    /// Troves matching one of these are pinned as soon as they are installed
    pub auto_pin: Vec<Regex>,
    pub auto_resolve: bool,
    /// Largest number of jobs in one batch; 0 disables the limit
    pub update_threshold: usize,
    /// Build changesets on a worker thread while batches are committed
    pub threaded: bool,
}

impl Default for PlanningContext {
    fn default() -> Self {
        PlanningContext {
            install_label_path: Vec::new(),
            flavors: Vec::new(),
            exclude_troves: Vec::new(),
            auto_pin: Vec::new(),
            auto_resolve: false,
            update_threshold: 0,
            threaded: true,
        }
    }
}

impl PlanningContext {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let ctx = Self::from_ini(&ini)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(ctx)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let ini = Ini::load_from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let mut ctx = PlanningContext::default();
        let Some(client) = ini.section(Some(CLIENT_SECTION)) else {
            return Ok(ctx);
        };

        for (key, value) in client.iter() {
            match key {
                "installLabelPath" => {
                    for label in value.split_whitespace() {
                        ctx.install_label_path.push(Label::parse(label)?);
                    }
                }
                "flavor" => ctx.flavors.push(Flavor::parse(value)?),
                "excludeTroves" => ctx.exclude_troves.push(pattern(key, value)?),
                "autoPinList" => {
                    for p in value.split_whitespace() {
                        ctx.auto_pin.push(pattern(key, p)?);
                    }
                }
                "autoResolve" => ctx.auto_resolve = boolean(key, value)?,
                "threaded" => ctx.threaded = boolean(key, value)?,
                "updateThreshold" => {
                    ctx.update_threshold =
                        value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                            key: key.to_string(),
                            value: value.to_string(),
                        })?
                }
                _ => warn!("Ignoring unknown configuration key {}", key),
            }
        }

        Ok(ctx)
    }

    /// The install flavors to score against; no configured flavor scores
    /// against the empty flavor
    pub fn install_flavors(&self) -> Vec<Flavor> {
        if self.flavors.is_empty() {
            vec![Flavor::new()]
        } else {
            self.flavors.clone()
        }
    }

    pub fn is_auto_pinned(&self, name: &str) -> bool {
        self.auto_pin.iter().any(|re| re.is_match(name))
    }
}

fn pattern(key: &str, value: &str) -> Result<Regex> {
    // patterns match the whole trove name
    Regex::new(&format!("^(?:{})$", value.trim())).map_err(|source| ConfigError::InvalidPattern {
        key: key.to_string(),
        pattern: value.to_string(),
        source,
    })
}

fn boolean(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
