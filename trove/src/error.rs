//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use libtrove::local::InstalledError;
use libtrove::repository::RepositoryError;
use libtrove::source::SourceError;
use libtrove::update::ConfigError;
use libtrove::UpdateError;
use miette::Diagnostic;
use thiserror::Error;

/// Result type for trove commands
pub type Result<T> = std::result::Result<T, TroveCliError>;

/// Errors that can occur in trove commands
#[derive(Debug, Error, Diagnostic)]
pub enum TroveCliError {
    #[error("I/O error: {0}")]
    #[diagnostic(
        code(trove::cli::io_error),
        help("Check system resources and permissions")
    )]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    #[diagnostic(code(trove::cli::json_error))]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Installed(#[from] InstalledError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("logging environment setup error: {0}")]
    #[diagnostic(
        code(trove::cli::logging_env_error),
        help("Check the RUST_LOG environment variable")
    )]
    LoggingEnvError(String),

    #[error("unsupported output format: {0}")]
    #[diagnostic(
        code(trove::cli::unsupported_output_format),
        help("Supported output formats: table, json")
    )]
    UnsupportedOutputFormat(String),
}
