// This Source Code Form is subject to the terms of
// the Mozilla Public License, v. 2.0. If a copy of the
// MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Dependency sets and flavors
//!
//! A dependency set groups dependencies by class. Flavors are dependency
//! sets restricted to the `use` and `is` classes and are written with the
//! use flags first, e.g. `~ssl,!readline is: x86(i686,~sse2)`. Requires
//! and provides use the other classes, e.g. `trove: foo:runtime soname:
//! ELF32/libc.so.6(SysV,x86)`.
//!
//! Flags carry a sense. Scoring a system flavor against a trove flavor
//! yields `None` when the two are incompatible and a higher number for a
//! better match.

use miette::Diagnostic;
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum::{Display as StrumDisplay, EnumString};
use thiserror::Error;

#[derive(Parser)]
#[grammar = "deps/deps.pest"]
struct DepsParser;

#[derive(Debug, Error, Diagnostic, PartialEq)]
pub enum DepsError {
    #[error("unable to parse dependency set '{input}': {message}")]
    #[diagnostic(
        code(trove::deps_error::parse),
        help("Flavors look like '~ssl,!readline is: x86(i686)' and dependencies like 'trove: foo:runtime'")
    )]
    Parse { input: String, message: String },

    #[error("unknown dependency class: {0}")]
    #[diagnostic(
        code(trove::deps_error::unknown_class),
        help("Known classes are use, is, trove, soname, file and abi")
    )]
    UnknownClass(String),

    #[error("invalid flag combination in merge: {this} and {other}")]
    #[diagnostic(
        code(trove::deps_error::invalid_flag_combination),
        help("Use a prefs or override merge when combining conflicting flavors")
    )]
    InvalidFlagCombination { this: String, other: String },
}

pub type Result<T> = std::result::Result<T, DepsError>;

/// The sense of a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sense {
    Required,
    Preferred,
    PreferNot,
    Disallowed,
}

impl Sense {
    pub fn prefix(self) -> &'static str {
        match self {
            Sense::Required => "",
            Sense::Preferred => "~",
            Sense::PreferNot => "~!",
            Sense::Disallowed => "!",
        }
    }

    pub fn is_strong(self) -> bool {
        matches!(self, Sense::Required | Sense::Disallowed)
    }

    pub fn to_strong(self) -> Sense {
        match self {
            Sense::Preferred => Sense::Required,
            Sense::PreferNot => Sense::Disallowed,
            other => other,
        }
    }

    pub fn to_weak(self) -> Sense {
        match self {
            Sense::Required => Sense::Preferred,
            Sense::Disallowed => Sense::PreferNot,
            other => other,
        }
    }

    fn from_prefix(prefix: &str) -> Sense {
        match prefix {
            "~!" => Sense::PreferNot,
            "~" => Sense::Preferred,
            "!" => Sense::Disallowed,
            _ => Sense::Required,
        }
    }
}

/// Score of a system flag sense (`None` when the system does not mention
/// the flag) against the sense a trove asks for. `None` is incompatible.
fn flag_score(this: Option<Sense>, required: Sense) -> Option<i32> {
    use Sense::*;
    match (this, required) {
        (None, Required) => None,
        (None, Disallowed) => Some(0),
        (None, Preferred) => Some(-1),
        (None, PreferNot) => Some(1),

        (Some(Required), Required) => Some(2),
        (Some(Required), Disallowed) => None,
        (Some(Required), Preferred) => Some(1),
        (Some(Required), PreferNot) => None,

        (Some(Disallowed), Required) => None,
        (Some(Disallowed), Disallowed) => Some(2),
        (Some(Disallowed), Preferred) => None,
        (Some(Disallowed), PreferNot) => Some(1),

        (Some(Preferred), Required) => Some(1),
        (Some(Preferred), Disallowed) => None,
        (Some(Preferred), Preferred) => Some(2),
        (Some(Preferred), PreferNot) => Some(-1),

        (Some(PreferNot), Required) => Some(-2),
        (Some(PreferNot), Disallowed) => Some(1),
        (Some(PreferNot), Preferred) => Some(-1),
        (Some(PreferNot), PreferNot) => Some(1),
    }
}

/// How two flag sets are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeType {
    /// Compatible flags combine, conflicting flags of equal strength fail
    Normal,
    /// The other side always wins
    Override,
    /// The other side wins conflicts but only as a preference
    Prefs,
    /// Conflicting flags are dropped
    DropConflicts,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, StrumDisplay,
)]
#[strum(serialize_all = "lowercase")]
pub enum DepClass {
    #[strum(serialize = "use")]
    Use,
    #[strum(serialize = "is")]
    InstructionSet,
    Trove,
    Soname,
    File,
    Abi,
}

impl DepClass {
    /// Every class except `use` is defined by its dependency names; a
    /// missing name cannot be satisfied by flags alone.
    pub fn name_significant(self) -> bool {
        !matches!(self, DepClass::Use)
    }
}

const USE_DEP: &str = "use";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dependency {
    pub name: String,
    pub flags: BTreeMap<String, Sense>,
}

impl Dependency {
    pub fn new(name: &str) -> Self {
        Dependency {
            name: name.to_string(),
            flags: BTreeMap::new(),
        }
    }

    pub fn with_flags<I, S>(name: &str, flags: I) -> Self
    where
        I: IntoIterator<Item = (S, Sense)>,
        S: Into<String>,
    {
        Dependency {
            name: name.to_string(),
            flags: flags.into_iter().map(|(f, s)| (f.into(), s)).collect(),
        }
    }

    /// Score of this (system) dependency against a required one
    pub fn score(&self, required: &Dependency) -> Option<i32> {
        if self.name != required.name {
            return None;
        }
        let mut score = 0;
        for (flag, sense) in &required.flags {
            score += flag_score(self.flags.get(flag).copied(), *sense)?;
        }
        Some(score)
    }

    /// Score when the system provides nothing for this dependency
    pub fn empty_deps_score(&self) -> Option<i32> {
        if self.flags.is_empty() {
            return None;
        }
        let mut score = 0;
        for sense in self.flags.values() {
            score += flag_score(None, *sense)?;
        }
        Some(score)
    }

    pub fn merge_flags(&self, other: &Dependency, merge_type: MergeType) -> Result<Dependency> {
        let mut flags = self.flags.clone();
        for (flag, &other_sense) in &other.flags {
            let this_sense = match flags.get(flag) {
                Some(s) if merge_type != MergeType::Override => *s,
                _ => {
                    flags.insert(flag.clone(), other_sense);
                    continue;
                }
            };

            if this_sense == other_sense {
                continue;
            }

            let this_strong = this_sense.is_strong();
            let other_strong = other_sense.is_strong();

            if this_strong == other_strong {
                match merge_type {
                    MergeType::DropConflicts => {
                        flags.remove(flag);
                    }
                    MergeType::Prefs => {
                        flags.insert(flag.clone(), other_sense);
                    }
                    _ => {
                        return Err(DepsError::InvalidFlagCombination {
                            this: format!("{}{}", this_sense.prefix(), flag),
                            other: format!("{}{}", other_sense.prefix(), flag),
                        });
                    }
                }
                continue;
            }

            if merge_type == MergeType::Prefs {
                if this_strong && other_sense.to_strong() == this_sense {
                    continue;
                }
                flags.insert(flag.clone(), other_sense.to_weak());
            } else if other_strong {
                flags.insert(flag.clone(), other_sense);
            }
        }

        Ok(Dependency {
            name: self.name.clone(),
            flags,
        })
    }

    fn fmt_flags(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, (flag, sense)) in self.flags.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}{}", sense.prefix(), flag)?;
        }
        Ok(())
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.flags.is_empty() {
            write!(f, "(")?;
            self.fmt_flags(f)?;
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// A set of dependencies grouped by class
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DependencySet {
    classes: BTreeMap<DepClass, BTreeMap<String, Dependency>>,
}

/// A flavor is a dependency set describing build variation
pub type Flavor = DependencySet;

fn split_flag(text: &str) -> (String, Sense) {
    for prefix in ["~!", "~", "!"] {
        if let Some(name) = text.strip_prefix(prefix) {
            return (name.to_string(), Sense::from_prefix(prefix));
        }
    }
    (text.to_string(), Sense::Required)
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(s: &str) -> Result<Self> {
        let pairs = DepsParser::parse(Rule::dep_set, s).map_err(|e| DepsError::Parse {
            input: s.to_string(),
            message: e.to_string(),
        })?;

        let mut set = DependencySet::new();
        for pair in pairs.flatten() {
            match pair.as_rule() {
                Rule::use_flags => {
                    let flags = pair
                        .into_inner()
                        .filter(|p| p.as_rule() == Rule::flag)
                        .map(|p| split_flag(p.as_str()));
                    set.add_dep(DepClass::Use, Dependency::with_flags(USE_DEP, flags));
                }
                Rule::class_block => {
                    let mut inner = pair.into_inner();
                    let tag = inner.next().map(|t| t.as_str()).unwrap_or_default();
                    let tag = tag.trim_end_matches(':');
                    let class = DepClass::from_str(tag)
                        .map_err(|_| DepsError::UnknownClass(tag.to_string()))?;

                    for dep in inner.filter(|p| p.as_rule() == Rule::dependency) {
                        let mut name = "";
                        let mut flags = Vec::new();
                        for part in dep.into_inner() {
                            match part.as_rule() {
                                Rule::dep_name => name = part.as_str(),
                                Rule::dep_flags => {
                                    flags.extend(part.into_inner().map(|f| split_flag(f.as_str())))
                                }
                                _ => {}
                            }
                        }

                        if class == DepClass::Use {
                            let flag = split_flag(name);
                            set.add_dep(class, Dependency::with_flags(USE_DEP, [flag]));
                        } else {
                            set.add_dep(class, Dependency::with_flags(name, flags));
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.classes.values().all(|deps| deps.is_empty())
    }

    /// Add a dependency; flags of an existing dependency with the same
    /// name are overridden by the new ones
    pub fn add_dep(&mut self, class: DepClass, dep: Dependency) {
        let deps = self.classes.entry(class).or_default();
        match deps.get(&dep.name) {
            Some(existing) => {
                let mut merged = existing.clone();
                merged.flags.extend(dep.flags);
                deps.insert(merged.name.clone(), merged);
            }
            None => {
                deps.insert(dep.name.clone(), dep);
            }
        }
    }

    pub fn has_class(&self, class: DepClass) -> bool {
        self.classes.get(&class).is_some_and(|d| !d.is_empty())
    }

    pub fn deps(&self, class: DepClass) -> impl Iterator<Item = &Dependency> {
        self.classes.get(&class).into_iter().flat_map(|d| d.values())
    }

    /// Every dependency with its class
    pub fn iter(&self) -> impl Iterator<Item = (DepClass, &Dependency)> {
        self.classes
            .iter()
            .flat_map(|(class, deps)| deps.values().map(move |d| (*class, d)))
    }

    /// A set holding just one dependency
    pub fn single(class: DepClass, dep: Dependency) -> Self {
        let mut set = DependencySet::new();
        set.add_dep(class, dep);
        set
    }

    /// Score this (system) set against `other` (what a trove asks for)
    pub fn score(&self, other: &DependencySet) -> Option<i32> {
        let mut score = 0;
        for (class, required) in &other.classes {
            if required.is_empty() {
                continue;
            }
            let class_score = match self.classes.get(class) {
                None => {
                    if class.name_significant() {
                        return None;
                    }
                    let mut s = 0;
                    for dep in required.values() {
                        s += dep.empty_deps_score()?;
                    }
                    s
                }
                Some(provided) => {
                    let mut s = 0;
                    for dep in required.values() {
                        s += match provided.get(&dep.name) {
                            Some(have) => have.score(dep)?,
                            None if class.name_significant() => return None,
                            None => dep.empty_deps_score()?,
                        };
                    }
                    s
                }
            };
            score += class_score;
        }
        Some(score)
    }

    pub fn satisfies(&self, other: &DependencySet) -> bool {
        self.score(other).is_some()
    }

    pub fn union(&mut self, other: &DependencySet, merge_type: MergeType) -> Result<()> {
        for (class, deps) in &other.classes {
            let mine = self.classes.entry(*class).or_default();
            for dep in deps.values() {
                let merged = match mine.get(&dep.name) {
                    Some(existing) => existing.merge_flags(dep, merge_type)?,
                    None => dep.clone(),
                };
                mine.insert(merged.name.clone(), merged);
            }

            if merge_type == MergeType::DropConflicts
                && *class == DepClass::Use
                && mine.values().all(|d| d.flags.is_empty())
            {
                self.classes.remove(class);
            }
        }
        self.classes.retain(|_, deps| !deps.is_empty());
        Ok(())
    }

    /// A copy of this set with `other` merged in
    pub fn merged(&self, other: &DependencySet, merge_type: MergeType) -> Result<DependencySet> {
        let mut merged = self.clone();
        merged.union(other, merge_type)?;
        Ok(merged)
    }
}

impl fmt::Display for DependencySet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        if let Some(use_deps) = self.classes.get(&DepClass::Use) {
            for dep in use_deps.values() {
                if dep.flags.is_empty() {
                    continue;
                }
                dep.fmt_flags(f)?;
                first = false;
            }
        }

        for (class, deps) in &self.classes {
            if *class == DepClass::Use || deps.is_empty() {
                continue;
            }
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}:", class)?;
            for dep in deps.values() {
                write!(f, " {}", dep)?;
            }
            first = false;
        }
        Ok(())
    }
}

impl FromStr for DependencySet {
    type Err = DepsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DependencySet {
    type Error = DepsError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<DependencySet> for String {
    fn from(set: DependencySet) -> Self {
        set.to_string()
    }
}
