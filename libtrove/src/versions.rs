// This Source Code Form is subject to the terms of
// the Mozilla Public License, v. 2.0. If a copy of the
// MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Versions, branches and labels
//!
//! A version names one build of a trove on one line of development. It
//! follows the format: /label[/label|//label]*/[timestamp:]revision
//! where:
//! - a label is `host@namespace:tag` (e.g., conary.example.com@rpl:devel)
//! - every label after the first is reached either by branching (`/`) or by
//!   shadowing (`//`)
//! - revision is `upstream-source[-build]` (e.g., 1.0-1-1)
//! - timestamp is optional, an integer number of seconds; versions on one
//!   branch are ordered by it
//!
//! Examples:
//! - /conary.example.com@rpl:devel/1.0-1-1
//! - /conary.example.com@rpl:devel//local@site:1/1700000000:2.4-3-0.1
//!
//! # Examples
//!
//! ```
//! use libtrove::versions::{Label, Version};
//!
//! let version = Version::parse("/example.com@rpl:devel/1700000000:1.0-1-1").unwrap();
//! assert_eq!(version.trailing_label(), &Label::parse("example.com@rpl:devel").unwrap());
//! assert_eq!(version.trailing_revision().to_string(), "1.0-1-1");
//! assert_eq!(version.timestamp, 1700000000);
//! assert_eq!(version.to_string(), "/example.com@rpl:devel/1.0-1-1");
//! ```

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing versions
#[derive(Debug, Error, Diagnostic, PartialEq)]
pub enum VersionError {
    #[error("invalid label: {0}")]
    #[diagnostic(
        code(trove::version_error::invalid_label),
        help("Labels should be in the format: host@namespace:tag")
    )]
    InvalidLabel(String),

    #[error("invalid branch: {0}")]
    #[diagnostic(
        code(trove::version_error::invalid_branch),
        help("Branches start with / and separate labels with / (branch) or // (shadow)")
    )]
    InvalidBranch(String),

    #[error("invalid revision: {0}")]
    #[diagnostic(
        code(trove::version_error::invalid_revision),
        help("Revisions should be in the format: upstream-source[-build] (e.g., 1.0-1-1)")
    )]
    InvalidRevision(String),

    #[error("invalid version: {0}")]
    #[diagnostic(
        code(trove::version_error::invalid_version),
        help("Versions should be in the format: /label[/label]*/[timestamp:]revision")
    )]
    InvalidVersion(String),

    #[error("invalid timestamp: {0}")]
    #[diagnostic(
        code(trove::version_error::invalid_timestamp),
        help("Timestamps are a number of seconds (e.g., 1700000000)")
    )]
    InvalidTimestamp(String),
}

/// Result type for version operations
pub type Result<T> = std::result::Result<T, VersionError>;

fn valid_part(part: &str) -> bool {
    !part.is_empty() && !part.contains(['/', '@', ':', '[', ']', '=']) && !part.contains(char::is_whitespace)
}

/// A repository label: `host@namespace:tag`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label {
    pub host: String,
    pub namespace: String,
    pub tag: String,
}

impl Label {
    pub fn new(host: &str, namespace: &str, tag: &str) -> Self {
        Label {
            host: host.to_string(),
            namespace: namespace.to_string(),
            tag: tag.to_string(),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (host, rest) = s
            .split_once('@')
            .ok_or_else(|| VersionError::InvalidLabel(s.to_string()))?;
        let (namespace, tag) = rest
            .split_once(':')
            .ok_or_else(|| VersionError::InvalidLabel(s.to_string()))?;

        if !valid_part(host) || !valid_part(namespace) || !valid_part(tag) {
            return Err(VersionError::InvalidLabel(s.to_string()));
        }

        Ok(Label::new(host, namespace, tag))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}:{}", self.host, self.namespace, self.tag)
    }
}

impl FromStr for Label {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Label {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.to_string()
    }
}

/// One label of a branch and how it was reached from the previous one
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchStep {
    pub label: Label,
    pub shadow: bool,
}

/// A line of development: the root label followed by branch and shadow steps
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Branch {
    steps: Vec<BranchStep>,
}

impl Branch {
    /// A branch rooted directly on `label`
    pub fn new(label: Label) -> Self {
        Branch {
            steps: vec![BranchStep {
                label,
                shadow: false,
            }],
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| VersionError::InvalidBranch(s.to_string()))?;

        let mut steps: Vec<BranchStep> = Vec::new();
        let mut shadow = false;
        for part in rest.split('/') {
            if part.is_empty() {
                if steps.is_empty() || shadow {
                    return Err(VersionError::InvalidBranch(s.to_string()));
                }
                shadow = true;
                continue;
            }
            let label =
                Label::parse(part).map_err(|_| VersionError::InvalidBranch(s.to_string()))?;
            steps.push(BranchStep { label, shadow });
            shadow = false;
        }

        if steps.is_empty() || shadow {
            return Err(VersionError::InvalidBranch(s.to_string()));
        }

        Ok(Branch { steps })
    }

    /// The trailing label of the branch
    pub fn label(&self) -> &Label {
        // a branch always has at least its root step
        &self.steps[self.steps.len() - 1].label
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.steps.iter().map(|s| &s.label)
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    /// True if the last step of this branch is a shadow
    pub fn is_shadow(&self) -> bool {
        self.steps.last().is_some_and(|s| s.shadow)
    }

    /// The branch this one was branched or shadowed from
    pub fn parent(&self) -> Option<Branch> {
        if self.steps.len() < 2 {
            return None;
        }
        Some(Branch {
            steps: self.steps[..self.steps.len() - 1].to_vec(),
        })
    }

    /// True if `other` is this branch or was derived from it
    pub fn is_ancestor_of(&self, other: &Branch) -> bool {
        other.steps.len() >= self.steps.len() && other.steps[..self.steps.len()] == self.steps[..]
    }

    fn child(&self, label: Label, shadow: bool) -> Branch {
        let mut steps = self.steps.clone();
        steps.push(BranchStep { label, shadow });
        Branch { steps }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for step in &self.steps {
            if step.shadow {
                write!(f, "//{}", step.label)?;
            } else {
                write!(f, "/{}", step.label)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Branch {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Compare dotted counts numerically where possible (e.g. 1.10 > 1.9)
fn cmp_counts(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// The trailing revision of a version: upstream version, source count and
/// an optional build count
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    pub upstream: String,
    pub source_count: String,
    pub build_count: Option<String>,
}

impl Revision {
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() < 2 || parts.len() > 3 || parts.iter().any(|p| !valid_part(p)) {
            return Err(VersionError::InvalidRevision(s.to_string()));
        }
        Ok(Revision {
            upstream: parts[0].to_string(),
            source_count: parts[1].to_string(),
            build_count: parts.get(2).map(|b| b.to_string()),
        })
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_counts(&self.upstream, &other.upstream)
            .then_with(|| cmp_counts(&self.source_count, &other.source_count))
            .then_with(|| match (&self.build_count, &other.build_count) {
                (Some(a), Some(b)) => cmp_counts(a, b),
                (a, b) => a.is_some().cmp(&b.is_some()),
            })
            .then_with(|| self.upstream.cmp(&other.upstream))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.upstream, self.source_count)?;
        if let Some(build) = &self.build_count {
            write!(f, "-{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for Revision {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A concrete version of a trove
///
/// Versions order by timestamp first, then revision, then branch. Two
/// versions on one branch therefore order by when they were committed, and
/// the order is total across branches so versions can key ordered maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub branch: Branch,
    pub revision: Revision,
    pub timestamp: u64,
}

impl Version {
    pub fn new(branch: Branch, revision: Revision, timestamp: u64) -> Self {
        Version {
            branch,
            revision,
            timestamp,
        }
    }

    /// Parse a version in its plain (`/label/1.0-1-1`) or frozen
    /// (`/label/1700000000:1.0-1-1`) form
    pub fn parse(s: &str) -> Result<Self> {
        let (branch, tail) = s
            .rsplit_once('/')
            .ok_or_else(|| VersionError::InvalidVersion(s.to_string()))?;
        if branch.is_empty() || branch.ends_with('/') {
            return Err(VersionError::InvalidVersion(s.to_string()));
        }

        let branch = Branch::parse(branch)?;
        let (timestamp, revision) = match tail.split_once(':') {
            Some((ts, rev)) => {
                let whole = ts.split('.').next().unwrap_or(ts);
                let ts = whole
                    .parse::<u64>()
                    .map_err(|_| VersionError::InvalidTimestamp(ts.to_string()))?;
                (ts, rev)
            }
            None => (0, tail),
        };

        Ok(Version {
            branch,
            revision: Revision::parse(revision)?,
            timestamp,
        })
    }

    /// The form including the timestamp
    pub fn freeze(&self) -> String {
        format!("{}/{}:{}", self.branch, self.timestamp, self.revision)
    }

    pub fn branch(&self) -> &Branch {
        &self.branch
    }

    pub fn trailing_label(&self) -> &Label {
        self.branch.label()
    }

    pub fn trailing_revision(&self) -> &Revision {
        &self.revision
    }

    /// True if this version lives on `branch` or on a branch derived from it
    pub fn is_uphill(&self, branch: &Branch) -> bool {
        branch.is_ancestor_of(&self.branch)
    }

    pub fn create_branch(&self, label: Label) -> Branch {
        self.branch.child(label, false)
    }

    pub fn create_shadow(&self, label: Label) -> Version {
        Version {
            branch: self.branch.child(label, true),
            revision: self.revision.clone(),
            timestamp: self.timestamp,
        }
    }

    /// How many leading labels the branches of two versions share. Zero
    /// means the versions are unrelated.
    pub fn closeness(&self, other: &Version) -> usize {
        self.branch
            .steps
            .iter()
            .zip(other.branch.steps.iter())
            .take_while(|(a, b)| a.label == b.label)
            .count()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.revision.cmp(&other.revision))
            .then_with(|| self.branch.cmp(&other.branch))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.branch, self.revision)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parse() {
        let label = Label::parse("conary.example.com@rpl:devel").unwrap();
        assert_eq!(label.host, "conary.example.com");
        assert_eq!(label.namespace, "rpl");
        assert_eq!(label.tag, "devel");
        assert_eq!(label.to_string(), "conary.example.com@rpl:devel");

        assert!(Label::parse("nohost").is_err());
        assert!(Label::parse("host@ns").is_err());
        assert!(Label::parse("@ns:tag").is_err());
    }

    #[test]
    fn test_branch_parse_and_shadow() {
        let branch = Branch::parse("/a.com@rpl:devel//b.com@rpl:shadow").unwrap();
        assert_eq!(branch.depth(), 2);
        assert!(branch.is_shadow());
        assert_eq!(branch.label(), &Label::new("b.com", "rpl", "shadow"));
        assert_eq!(branch.to_string(), "/a.com@rpl:devel//b.com@rpl:shadow");

        let parent = branch.parent().unwrap();
        assert_eq!(parent.to_string(), "/a.com@rpl:devel");
        assert!(parent.is_ancestor_of(&branch));
        assert!(!branch.is_ancestor_of(&parent));

        assert!(Branch::parse("a.com@rpl:devel").is_err());
        assert!(Branch::parse("/a.com@rpl:devel///b.com@rpl:x").is_err());
        assert!(Branch::parse("/").is_err());
    }

    #[test]
    fn test_version_parse_frozen() {
        let v = Version::parse("/a.com@rpl:devel/1700000000:1.0-1-1").unwrap();
        assert_eq!(v.timestamp, 1700000000);
        assert_eq!(v.revision.upstream, "1.0");
        assert_eq!(v.revision.source_count, "1");
        assert_eq!(v.revision.build_count.as_deref(), Some("1"));
        assert_eq!(v.freeze(), "/a.com@rpl:devel/1700000000:1.0-1-1");

        let plain = Version::parse("/a.com@rpl:devel/1.0-1").unwrap();
        assert_eq!(plain.timestamp, 0);
        assert_eq!(plain.revision.build_count, None);

        assert!(Version::parse("1.0-1-1").is_err());
        assert!(Version::parse("/a.com@rpl:devel/1.0").is_err());
        assert!(Version::parse("/a.com@rpl:devel/abc:1.0-1").is_err());
    }

    #[test]
    fn test_version_ordering() {
        let old = Version::parse("/a.com@rpl:devel/10:1.0-1-1").unwrap();
        let new = Version::parse("/a.com@rpl:devel/20:1.0-1-2").unwrap();
        assert!(old < new);

        // the timestamp decides before the revision does
        let rebuilt = Version::parse("/a.com@rpl:devel/30:0.9-1-1").unwrap();
        assert!(new < rebuilt);

        let r1 = Revision::parse("1.9-1").unwrap();
        let r2 = Revision::parse("1.10-1").unwrap();
        assert!(r1 < r2);
    }

    #[test]
    fn test_uphill_and_closeness() {
        let trunk = Version::parse("/a.com@rpl:devel/1.0-1-1").unwrap();
        let shadow = trunk.create_shadow(Label::new("b.com", "rpl", "1"));
        assert_eq!(shadow.to_string(), "/a.com@rpl:devel//b.com@rpl:1/1.0-1-1");
        assert!(shadow.is_uphill(trunk.branch()));
        assert!(!trunk.is_uphill(shadow.branch()));
        assert_eq!(trunk.closeness(&shadow), 1);
        assert_eq!(shadow.closeness(&shadow), 2);

        let other = Version::parse("/c.com@rpl:devel/1.0-1-1").unwrap();
        assert_eq!(trunk.closeness(&other), 0);

        let branch = trunk.create_branch(Label::new("a.com", "rpl", "stable"));
        assert_eq!(branch.to_string(), "/a.com@rpl:devel/a.com@rpl:stable");
        assert!(!branch.is_shadow());
    }

    #[test]
    fn test_version_serde() {
        let v = Version::parse("/a.com@rpl:devel/5:1.0-1-1").unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"/a.com@rpl:devel/5:1.0-1-1\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
