//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Uniform read access to troves
//!
//! The planner reads troves from three places: the local database, the
//! repository and changesets merged earlier in the same planning pass.
//! All of them implement [`TroveSource`]; [`LayeredSource`] stacks them so
//! the first source holding a trove answers.

mod changeset;
mod query;

pub use changeset::{ChangeSet, ChangeSetTroveSource};
pub use query::{find_matching, VersionQuery};

use crate::deps::{DepsError, Flavor};
use crate::trove::{Trove, TroveTuple};
use crate::versions::{Label, VersionError};
use miette::Diagnostic;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SourceError {
    #[error("trove not found: {0}")]
    #[diagnostic(
        code(trove::source_error::trove_not_found),
        help("Check the trove name, version and flavor, and the install label path")
    )]
    TroveNotFound(String),

    #[error("invalid trove spec: {0}")]
    #[diagnostic(
        code(trove::source_error::invalid_spec),
        help("Trove specs look like name[=version][[flavor]]")
    )]
    InvalidSpec(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Deps(#[from] DepsError),

    #[error("database error: {0}")]
    #[diagnostic(code(trove::source_error::database))]
    Database(String),

    #[error("I/O error: {0}")]
    #[diagnostic(
        code(trove::source_error::io),
        help("Check system resources and permissions")
    )]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    #[diagnostic(
        code(trove::source_error::json),
        help("Check the JSON format and try again")
    )]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// A request for troves by name with an optional version and flavor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TroveSpec {
    pub name: String,
    pub version: Option<String>,
    pub flavor: Option<Flavor>,
}

impl TroveSpec {
    pub fn new(name: &str, version: Option<&str>, flavor: Option<Flavor>) -> Self {
        TroveSpec {
            name: name.to_string(),
            version: version.map(str::to_string),
            flavor,
        }
    }

    /// Parse `name[=version][[flavor]]`
    pub fn parse(s: &str) -> Result<Self> {
        let (rest, flavor) = match s.find('[') {
            Some(idx) => {
                let inner = s[idx + 1..]
                    .strip_suffix(']')
                    .ok_or_else(|| SourceError::InvalidSpec(s.to_string()))?;
                (&s[..idx], Some(Flavor::parse(inner)?))
            }
            None => (s, None),
        };

        let (name, version) = match rest.split_once('=') {
            Some((name, version)) if !version.is_empty() => (name, Some(version)),
            Some(_) => return Err(SourceError::InvalidSpec(s.to_string())),
            None => (rest, None),
        };

        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(SourceError::InvalidSpec(s.to_string()));
        }

        Ok(TroveSpec::new(name, version, flavor))
    }
}

impl fmt::Display for TroveSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, "={}", version)?;
        }
        if let Some(flavor) = &self.flavor {
            write!(f, "[{}]", flavor)?;
        }
        Ok(())
    }
}

/// Read access to troves
pub trait TroveSource {
    fn get_trove(&self, tuple: &TroveTuple) -> Result<Trove>;

    fn has_trove(&self, tuple: &TroveTuple) -> Result<bool>;

    fn has_troves(&self, tuples: &[TroveTuple]) -> Result<Vec<bool>> {
        tuples.iter().map(|t| self.has_trove(t)).collect()
    }

    fn get_troves(&self, tuples: &[TroveTuple]) -> Result<Vec<Trove>> {
        tuples.iter().map(|t| self.get_trove(t)).collect()
    }

    /// Resolve every spec to matching tuples. The best match for each spec
    /// is searched for along `label_path`, scoring against `flavors` in
    /// order; a spec with no match is an error.
    fn find_troves(
        &self,
        label_path: &[Label],
        specs: &[TroveSpec],
        flavors: &[Flavor],
    ) -> Result<BTreeMap<TroveSpec, Vec<TroveTuple>>>;
}

/// Sources stacked in priority order
pub struct LayeredSource<'a> {
    layers: Vec<&'a dyn TroveSource>,
}

impl<'a> LayeredSource<'a> {
    pub fn new(layers: Vec<&'a dyn TroveSource>) -> Self {
        LayeredSource { layers }
    }
}

impl TroveSource for LayeredSource<'_> {
    fn get_trove(&self, tuple: &TroveTuple) -> Result<Trove> {
        for layer in &self.layers {
            if layer.has_trove(tuple)? {
                return layer.get_trove(tuple);
            }
        }
        Err(SourceError::TroveNotFound(tuple.to_string()))
    }

    fn has_trove(&self, tuple: &TroveTuple) -> Result<bool> {
        for layer in &self.layers {
            if layer.has_trove(tuple)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn find_troves(
        &self,
        label_path: &[Label],
        specs: &[TroveSpec],
        flavors: &[Flavor],
    ) -> Result<BTreeMap<TroveSpec, Vec<TroveTuple>>> {
        let mut results = BTreeMap::new();
        'spec: for spec in specs {
            for layer in &self.layers {
                match layer.find_troves(label_path, std::slice::from_ref(spec), flavors) {
                    Ok(mut found) => {
                        if let Some(tuples) = found.remove(spec) {
                            results.insert(spec.clone(), tuples);
                            continue 'spec;
                        }
                    }
                    Err(SourceError::TroveNotFound(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
            return Err(SourceError::TroveNotFound(spec.to_string()));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_parse() {
        let spec = TroveSpec::parse("foo:runtime=1.0-1-1[~ssl is: x86]").unwrap();
        assert_eq!(spec.name, "foo:runtime");
        assert_eq!(spec.version.as_deref(), Some("1.0-1-1"));
        assert_eq!(spec.flavor.unwrap().to_string(), "~ssl is: x86");

        let bare = TroveSpec::parse("group-base").unwrap();
        assert_eq!(bare.version, None);
        assert_eq!(bare.flavor, None);

        let labeled = TroveSpec::parse("foo=a.com@rpl:devel").unwrap();
        assert_eq!(labeled.to_string(), "foo=a.com@rpl:devel");

        assert!(TroveSpec::parse("foo=").is_err());
        assert!(TroveSpec::parse("foo[ssl").is_err());
        assert!(TroveSpec::parse("").is_err());
    }
}
