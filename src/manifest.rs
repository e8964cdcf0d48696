//! Multi-document YAML manifests and the idempotent argument patcher.
//!
//! Documents are kept as plain `serde_yaml::Value`s so that fields we never
//! look at survive a load/patch/save cycle untouched.
use serde::Deserialize;
use serde_yaml::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Where the container arguments live in a Deployment-shaped resource.
pub const CONTAINER_ARGS: &str = "spec.template.spec.containers[0].args";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not valid YAML: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("could not serialize manifest: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid field path `{0}`")]
    InvalidPath(String),
}

/// Identifies a single document by `kind` and `metadata.name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub kind: String,
    pub name: String,
}

impl Selector {
    pub fn new(kind: &str, name: &str) -> Selector {
        Selector {
            kind: String::from(kind),
            name: String::from(name),
        }
    }

    fn matches(&self, document: &Value) -> bool {
        let kind = document.get("kind").and_then(Value::as_str);
        let name = document
            .get("metadata")
            .and_then(|metadata| metadata.get("name"))
            .and_then(Value::as_str);

        kind == Some(self.kind.as_str()) && name == Some(self.name.as_str())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A descent path such as `spec.template.spec.containers[0].args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Same as parsing [`CONTAINER_ARGS`].
    pub fn container_args() -> FieldPath {
        let key = |k: &str| Segment::Key(String::from(k));
        FieldPath {
            segments: vec![
                key("spec"),
                key("template"),
                key("spec"),
                key("containers"),
                Segment::Index(0),
                key("args"),
            ],
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl FromStr for FieldPath {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ManifestError::InvalidPath(String::from(s));
        let mut segments = Vec::new();

        for part in s.split('.') {
            let (key, mut rest) = match part.find('[') {
                Some(open) => (&part[..open], &part[open..]),
                None => (part, ""),
            };
            if key.is_empty() {
                return Err(invalid());
            }
            segments.push(Segment::Key(String::from(key)));

            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(invalid)?;
                if !rest.starts_with('[') {
                    return Err(invalid());
                }
                let index = rest[1..close].parse::<usize>().map_err(|_| invalid())?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
            }
        }

        Ok(FieldPath { segments })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => write!(f, "{}", key)?,
                Segment::Key(key) => write!(f, ".{}", key)?,
                Segment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// Result of [`ensure_arg`] on a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPatch {
    Changed,
    AlreadyPresent,
    PathMissing,
}

/// Result of [`patch_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched,
    AlreadyPresent,
    NotFound,
    PathMissing,
}

impl PatchOutcome {
    /// `NotFound` and `PathMissing` need somebody to look at the file.
    pub fn needs_attention(self) -> bool {
        matches!(self, PatchOutcome::NotFound | PatchOutcome::PathMissing)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    documents: Vec<Value>,
}

impl Manifest {
    pub fn parse(raw: &str) -> Result<Manifest, ManifestError> {
        let mut documents = Vec::new();
        for de in serde_yaml::Deserializer::from_str(raw) {
            let document = Value::deserialize(de).map_err(ManifestError::Parse)?;
            if !document.is_null() {
                documents.push(document);
            }
        }

        Ok(Manifest { documents })
    }

    pub fn load(path: &Path) -> Result<Manifest, ManifestError> {
        let raw = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Manifest::parse(&raw)
    }

    /// Writes next to `path` first and renames over it, so a failed write
    /// never leaves a truncated manifest behind.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let yaml = self.to_yaml()?;
        let write_error = |source| ManifestError::Write {
            path: path.to_path_buf(),
            source,
        };

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = path.with_file_name(format!(".{}.tmp", file_name));

        if let Err(e) = fs::write(&staging, yaml).and_then(|_| fs::rename(&staging, path)) {
            let _ = fs::remove_file(&staging);
            return Err(write_error(e));
        }

        Ok(())
    }

    pub fn documents(&self) -> &[Value] {
        &self.documents
    }

    /// First document matching `selector`, if any.
    pub fn find_target(&mut self, selector: &Selector) -> Option<&mut Value> {
        self.documents.iter_mut().find(|doc| selector.matches(doc))
    }

    pub fn first_of_kind(&self, kind: &str) -> Option<&Value> {
        self.documents()
            .iter()
            .find(|doc| doc.get("kind").and_then(Value::as_str) == Some(kind))
    }

    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        let mut docs = Vec::with_capacity(self.documents.len());
        for document in &self.documents {
            docs.push(serde_yaml::to_string(document).map_err(ManifestError::Serialize)?);
        }

        Ok(docs.join("---\n"))
    }
}

fn descend<'v>(value: &'v mut Value, segment: &Segment) -> Option<&'v mut Value> {
    match segment {
        Segment::Key(key) => value.as_mapping_mut()?.get_mut(key.as_str()),
        Segment::Index(index) => value.as_sequence_mut()?.get_mut(*index),
    }
}

/// Read-only walk down `path`; `None` when any segment is absent or of the
/// wrong shape.
pub fn lookup<'v>(document: &'v Value, path: &FieldPath) -> Option<&'v Value> {
    let mut current = document;
    for segment in path.segments() {
        current = match segment {
            Segment::Key(key) => current.as_mapping()?.get(key.as_str())?,
            Segment::Index(index) => current.as_sequence()?.get(*index)?,
        };
    }
    Some(current)
}

/// Makes sure the sequence at `path` contains `value`, appending it at the
/// end when it does not.
pub fn ensure_arg(document: &mut Value, path: &FieldPath, value: &str) -> ArgPatch {
    let mut current = document;
    for segment in path.segments() {
        current = match descend(current, segment) {
            Some(next) => next,
            None => return ArgPatch::PathMissing,
        };
    }

    let args = match current.as_sequence_mut() {
        Some(args) => args,
        None => return ArgPatch::PathMissing,
    };

    if args.iter().any(|arg| arg.as_str() == Some(value)) {
        return ArgPatch::AlreadyPresent;
    }

    args.push(Value::String(String::from(value)));
    ArgPatch::Changed
}

/// Load, patch and save in one go. The file is only rewritten when the
/// target document actually changed.
pub fn patch_file(
    path: &Path,
    selector: &Selector,
    field: &FieldPath,
    value: &str,
) -> Result<PatchOutcome, ManifestError> {
    let mut manifest = Manifest::load(path)?;

    let document = match manifest.find_target(selector) {
        Some(document) => document,
        None => return Ok(PatchOutcome::NotFound),
    };

    match ensure_arg(document, field, value) {
        ArgPatch::AlreadyPresent => Ok(PatchOutcome::AlreadyPresent),
        ArgPatch::PathMissing => Ok(PatchOutcome::PathMissing),
        ArgPatch::Changed => {
            manifest.save(path)?;
            Ok(PatchOutcome::Patched)
        }
    }
}
