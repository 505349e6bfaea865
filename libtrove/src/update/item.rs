//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::{Result, UpdateError};
use crate::deps::Flavor;
use crate::source::{ChangeSet, TroveSpec};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// What a change spec asks for when it names no explicit sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemAction {
    /// Plain `name`
    #[default]
    Default,
    /// `+name`
    Install,
    /// `-name`
    Erase,
}

/// A version and flavor request for one side of an item; either part may
/// be left for the search to decide
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemSide {
    pub version: Option<String>,
    pub flavor: Option<Flavor>,
}

impl ItemSide {
    pub fn new(version: Option<&str>, flavor: Option<Flavor>) -> Self {
        ItemSide {
            version: version.map(str::to_string),
            flavor,
        }
    }

    pub fn is_given(&self) -> bool {
        self.version.is_some() || self.flavor.is_some()
    }

    pub fn spec(&self, name: &str) -> TroveSpec {
        TroveSpec::new(name, self.version.as_deref(), self.flavor.clone())
    }
}

impl From<TroveSpec> for ItemSide {
    fn from(spec: TroveSpec) -> Self {
        ItemSide {
            version: spec.version,
            flavor: spec.flavor,
        }
    }
}

/// One requested change by trove name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateItem {
    pub name: String,
    pub action: ItemAction,
    pub old: ItemSide,
    pub new: ItemSide,
    /// Root the new trove against whatever is installed
    pub absolute: bool,
}

impl UpdateItem {
    /// An absolute update of `name`, optionally narrowed by version and
    /// flavor
    pub fn update(name: &str, version: Option<&str>, flavor: Option<Flavor>) -> Self {
        UpdateItem {
            name: name.to_string(),
            action: ItemAction::Default,
            old: ItemSide::default(),
            new: ItemSide::new(version, flavor),
            absolute: true,
        }
    }

    pub fn erase(name: &str, version: Option<&str>, flavor: Option<Flavor>) -> Self {
        UpdateItem {
            name: name.to_string(),
            action: ItemAction::Erase,
            old: ItemSide::new(version, flavor),
            new: ItemSide::default(),
            absolute: false,
        }
    }

    /// Parse a change spec.
    ///
    /// `-name[=version][[flavor]]` erases, `+name...` installs and
    /// `name=old--new` is a relative update (either side may be empty). A
    /// plain spec installs or updates when `update_by_default` is set and
    /// erases otherwise. Installs are absolute unless `keep_existing`.
    pub fn parse(s: &str, keep_existing: bool, update_by_default: bool) -> Result<Self> {
        let (action, body) = if let Some(rest) = s.strip_prefix('-') {
            (ItemAction::Erase, rest)
        } else if let Some(rest) = s.strip_prefix('+') {
            (ItemAction::Install, rest)
        } else {
            (ItemAction::Default, s)
        };

        let Some((old_spec, new_spec)) = body.split_once("--") else {
            let spec = TroveSpec::parse(body)?;
            let name = spec.name.clone();
            let installs = action == ItemAction::Install
                || (action == ItemAction::Default && update_by_default);
            let item = if installs {
                UpdateItem {
                    name,
                    action,
                    old: ItemSide::default(),
                    new: spec.into(),
                    absolute: !keep_existing,
                }
            } else {
                UpdateItem {
                    name,
                    action,
                    old: spec.into(),
                    new: ItemSide::default(),
                    absolute: false,
                }
            };
            return Ok(item);
        };

        // `foo=--2.0` leaves the old side open
        let old = TroveSpec::parse(old_spec.strip_suffix('=').unwrap_or(old_spec))?;
        let name = old.name.clone();
        let new = if new_spec.is_empty() {
            ItemSide::default()
        } else if new_spec.starts_with('[') {
            TroveSpec::parse(&format!("{}{}", name, new_spec))?.into()
        } else {
            TroveSpec::parse(&format!("{}={}", name, new_spec))?.into()
        };

        Ok(UpdateItem {
            name,
            action,
            old: old.into(),
            new,
            absolute: false,
        })
    }

    /// Which sides have to be looked up, as (old, new)
    pub(crate) fn needs(&self, update_mode: bool) -> (bool, bool) {
        match self.action {
            ItemAction::Erase => (true, self.new.is_given()),
            ItemAction::Install => (self.old.is_given(), true),
            ItemAction::Default => {
                let (old, new) = (self.old.is_given(), self.new.is_given());
                if old || new {
                    (old, new)
                } else if update_mode {
                    (false, true)
                } else {
                    (true, false)
                }
            }
        }
    }
}

impl fmt::Display for UpdateItem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.action {
            ItemAction::Install => write!(f, "+")?,
            ItemAction::Erase => write!(f, "-")?,
            ItemAction::Default => {}
        }
        write!(f, "{}", self.name)?;
        let side = |f: &mut fmt::Formatter, side: &ItemSide| -> fmt::Result {
            if let Some(version) = &side.version {
                write!(f, "{}", version)?;
            }
            if let Some(flavor) = &side.flavor {
                write!(f, "[{}]", flavor)?;
            }
            Ok(())
        };
        if self.old.is_given() {
            write!(f, "=")?;
            side(f, &self.old)?;
            write!(f, "--")?;
            side(f, &self.new)
        } else if self.new.is_given() {
            if self.new.version.is_some() {
                write!(f, "=")?;
            }
            side(f, &self.new)
        } else {
            Ok(())
        }
    }
}

/// A requested change: a trove spec, or a changeset read from a file
#[derive(Debug, Clone)]
pub enum ChangeItem {
    Trove(UpdateItem),
    ChangeSet(Box<ChangeSet>),
}

impl From<UpdateItem> for ChangeItem {
    fn from(item: UpdateItem) -> Self {
        ChangeItem::Trove(item)
    }
}

/// Turn command line arguments into change items. An argument naming an
/// existing file is read as a changeset.
pub fn parse_change_items<S: AsRef<str>>(
    args: &[S],
    keep_existing: bool,
    update_by_default: bool,
) -> Result<Vec<ChangeItem>> {
    let mut items: Vec<ChangeItem> = Vec::new();
    for arg in args {
        let arg = arg.as_ref();
        if Path::new(arg).is_file() {
            debug!("Reading changeset {}", arg);
            items.push(ChangeItem::ChangeSet(Box::new(ChangeSet::load(arg)?)));
            continue;
        }

        if let Some((path, _)) = arg.split_once('=') {
            if Path::new(path).is_file() {
                return Err(UpdateError::VersionSupplied(arg.to_string()));
            }
        }

        let item = UpdateItem::parse(arg, keep_existing, update_by_default)?;
        let duplicate = items
            .iter()
            .any(|i| matches!(i, ChangeItem::Trove(have) if *have == item));
        if !duplicate {
            items.push(item.into());
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_change_specs() {
        let item = UpdateItem::parse("foo:runtime=2.0-1-1", false, true).unwrap();
        assert_eq!(item.name, "foo:runtime");
        assert_eq!(item.new.version.as_deref(), Some("2.0-1-1"));
        assert!(item.absolute);
        assert_eq!(item.needs(true), (false, true));

        let item = UpdateItem::parse("foo", true, true).unwrap();
        assert!(!item.absolute);

        let item = UpdateItem::parse("-foo[is: x86]", false, true).unwrap();
        assert_eq!(item.action, ItemAction::Erase);
        assert!(item.old.flavor.is_some());
        assert_eq!(item.needs(true), (true, false));

        let item = UpdateItem::parse("foo", false, false).unwrap();
        assert_eq!(item.needs(false), (true, false));

        let item = UpdateItem::parse("foo=1.0--2.0", false, true).unwrap();
        assert_eq!(item.old.version.as_deref(), Some("1.0"));
        assert_eq!(item.new.version.as_deref(), Some("2.0"));
        assert!(!item.absolute);
        assert_eq!(item.to_string(), "foo=1.0--2.0");

        let item = UpdateItem::parse("foo=--2.0", false, true).unwrap();
        assert!(!item.old.is_given());
        assert_eq!(item.needs(true), (false, true));

        let item = UpdateItem::parse("foo=1.0--", false, true).unwrap();
        assert_eq!(item.needs(true), (true, false));
    }

    #[test]
    fn test_changeset_with_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.ccs");
        ChangeSet::default().save(&path).unwrap();

        let arg = path.display().to_string();
        let items = parse_change_items(&[arg.clone()], false, true).unwrap();
        assert!(matches!(items[0], ChangeItem::ChangeSet(_)));

        let err = parse_change_items(&[format!("{}=1.0", arg)], false, true).unwrap_err();
        assert!(matches!(err, UpdateError::VersionSupplied(_)));
    }
}
