//! Augmented paths: `/entry:NXentry/data:NXdata/signal`.
//!
//! Each segment may carry a class annotation after `:`. Stripping the
//! annotations gives the plain path; creating the parents of an augmented
//! path tags every new group with an `NX_class` attribute.

use std::fmt;
use std::str::FromStr;

use hdfslab_native::{Hid, Library, ObjectKind};

use crate::attribute::{read_string_attr, write_string_attr};
use crate::error::{Error, Result};
use crate::guard::NativeGuard;

/// Separator between a segment name and its class.
pub const CLASS_SEPARATOR: char = ':';

/// Attribute naming the class of a group.
pub const NX_CLASS: &str = "NX_class";

/// One path component with an optional class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub class: Option<String>,
}

/// A parsed absolute path whose segments may carry classes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AugmentedPath {
    segments: Vec<PathSegment>,
}

impl AugmentedPath {
    /// Parse an augmented or plain path. Empty segments are skipped.
    pub fn parse(path: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for raw in path.split('/').filter(|s| !s.is_empty()) {
            let (name, class) = match raw.split_once(CLASS_SEPARATOR) {
                Some((name, class)) => (name, Some(class)),
                None => (raw, None),
            };
            if name.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "empty segment name in {path:?}"
                )));
            }
            let class = match class {
                Some(c) if c.is_empty() || c.contains(CLASS_SEPARATOR) => {
                    return Err(Error::InvalidArgument(format!(
                        "bad class annotation {raw:?} in {path:?}"
                    )))
                }
                other => other.map(str::to_string),
            };
            segments.push(PathSegment {
                name: name.to_string(),
                class,
            });
        }
        Ok(AugmentedPath { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Path with annotations removed.
    pub fn plain(&self) -> String {
        let names: Vec<&str> = self.segments.iter().map(|s| s.name.as_str()).collect();
        format!("/{}", names.join("/"))
    }

    /// Last segment name; empty for the root.
    pub fn name(&self) -> &str {
        self.segments.last().map_or("", |s| s.name.as_str())
    }

    /// All segments but the last.
    pub fn parent(&self) -> AugmentedPath {
        let n = self.segments.len().saturating_sub(1);
        AugmentedPath {
            segments: self.segments[..n].to_vec(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl FromStr for AugmentedPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AugmentedPath::parse(s)
    }
}

impl fmt::Display for AugmentedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for seg in &self.segments {
            write!(f, "/{}", seg.name)?;
            if let Some(class) = &seg.class {
                write!(f, "{CLASS_SEPARATOR}{class}")?;
            }
        }
        Ok(())
    }
}

/// Strip class annotations from a path.
pub fn strip_classes(path: &str) -> Result<String> {
    Ok(AugmentedPath::parse(path)?.plain())
}

/// Create every group along `groups` that does not exist yet, tagging new
/// (or untagged) groups with their class. An existing group of another
/// class, or a non-group object in the way, is a collision.
pub(crate) fn ensure_groups(lib: &Library, file: Hid, groups: &AugmentedPath) -> Result<()> {
    let mut prefix = String::new();
    for seg in groups.segments() {
        prefix.push('/');
        prefix.push_str(&seg.name);
        let group = match lib.object_kind(file, &prefix)? {
            None => {
                tracing::debug!(path = %prefix, class = ?seg.class, "creating group");
                NativeGuard::group(lib, lib.group_create(file, &prefix))?
            }
            Some(ObjectKind::Group) => NativeGuard::group(lib, lib.group_open(file, &prefix))?,
            Some(kind) => {
                return Err(Error::InvalidArgument(format!(
                    "{prefix} exists as {kind:?}, not a group"
                )))
            }
        };
        let Some(class) = &seg.class else {
            continue;
        };
        match read_string_attr(lib, group.id(), NX_CLASS)? {
            Some(existing) if existing.first().map(String::as_str) == Some(class.as_str()) => {}
            Some(existing) => {
                return Err(Error::InvalidArgument(format!(
                    "{prefix} has class {existing:?}, not {class}"
                )))
            }
            None => write_string_attr(lib, group.id(), NX_CLASS, &[class.as_str()])?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_strip() {
        let p = AugmentedPath::parse("/entry:NXentry/data:NXdata/signal").unwrap();
        assert_eq!(p.plain(), "/entry/data/signal");
        assert_eq!(p.name(), "signal");
        assert_eq!(p.segments()[1].class.as_deref(), Some("NXdata"));
        assert_eq!(p.to_string(), "/entry:NXentry/data:NXdata/signal");
        assert_eq!(p.parent().to_string(), "/entry:NXentry/data:NXdata");
        assert_eq!(strip_classes("a//b:X/").unwrap(), "/a/b");
    }

    #[test]
    fn root_path() {
        let p: AugmentedPath = "/".parse().unwrap();
        assert!(p.is_root());
        assert_eq!(p.plain(), "/");
        assert_eq!(p.to_string(), "/");
    }

    #[test]
    fn bad_annotations() {
        for bad in ["/:NXentry", "/a:", "/a:b:c"] {
            assert!(matches!(
                AugmentedPath::parse(bad),
                Err(Error::InvalidArgument(_))
            ));
        }
    }
}
