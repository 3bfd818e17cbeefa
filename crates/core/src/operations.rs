//! Container image operation handlers.
//!
//! Pull, push and tag are pure functions over their arguments: they validate the
//! image references and produce a structured result. Both the coordinator's local
//! execution path and the node agent run operations through [`execute`].

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::{CoordinatorError, CoordinatorResult};
use crate::models::{OperationArgs, OperationType};

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_NAMESPACE: &str = "library";
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LENGTH: usize = 128;
const MIN_DIGEST_HEX_LENGTH: usize = 32;

/// A parsed `[registry/][namespace/]name[:tag][@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: String,
    pub namespace: Option<String>,
    pub name: String,
    pub tag: String,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> CoordinatorResult<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(CoordinatorError::validation("image reference is empty"));
        }

        let (remainder, digest) = match reference.split_once('@') {
            Some((head, digest)) => {
                validate_digest(digest)?;
                (head, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A colon after the last slash is a tag; before it, a registry port.
        let last_slash = remainder.rfind('/');
        let (path, tag) = match remainder.rfind(':') {
            Some(idx) if last_slash.map_or(true, |slash| idx > slash) => {
                let tag = &remainder[idx + 1..];
                validate_tag(tag)?;
                (&remainder[..idx], tag.to_string())
            }
            _ => (remainder, DEFAULT_TAG.to_string()),
        };

        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(CoordinatorError::validation(format!(
                "invalid image reference: {reference}"
            )));
        }

        let has_registry = segments.len() > 1 && is_registry(segments[0]);
        let (registry, repository) = if has_registry {
            (segments[0].to_string(), &segments[1..])
        } else {
            (DEFAULT_REGISTRY.to_string(), &segments[..])
        };

        for component in repository {
            validate_component(component, reference)?;
        }

        let (namespace, name) = match repository {
            [name] if registry == DEFAULT_REGISTRY => {
                (Some(DEFAULT_NAMESPACE.to_string()), name.to_string())
            }
            [name] => (None, name.to_string()),
            [namespace @ .., name] => (Some(namespace.join("/")), name.to_string()),
            [] => {
                return Err(CoordinatorError::validation(format!(
                    "image reference has no repository: {reference}"
                )))
            }
        };

        Ok(Self {
            registry,
            namespace,
            name,
            tag,
            digest,
        })
    }

    pub fn repository(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}/{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn canonical(&self) -> String {
        let mut canonical = format!("{}/{}:{}", self.registry, self.repository(), self.tag);
        if let Some(digest) = &self.digest {
            canonical.push('@');
            canonical.push_str(digest);
        }
        canonical
    }
}

fn is_registry(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

fn validate_component(component: &str, reference: &str) -> CoordinatorResult<()> {
    let valid_chars = component
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    let valid_edges = component
        .chars()
        .next()
        .zip(component.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
    if valid_chars && valid_edges {
        Ok(())
    } else {
        Err(CoordinatorError::validation(format!(
            "invalid repository component '{component}' in {reference}"
        )))
    }
}

fn validate_tag(tag: &str) -> CoordinatorResult<()> {
    let mut chars = tag.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid_first && valid_rest && tag.len() <= MAX_TAG_LENGTH {
        Ok(())
    } else {
        Err(CoordinatorError::validation(format!("invalid image tag: {tag}")))
    }
}

fn validate_digest(digest: &str) -> CoordinatorResult<()> {
    let valid = digest.split_once(':').is_some_and(|(algorithm, hex)| {
        algorithm
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && algorithm
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
            && hex.len() >= MIN_DIGEST_HEX_LENGTH
            && hex.chars().all(|c| c.is_ascii_hexdigit())
    });
    if valid {
        Ok(())
    } else {
        Err(CoordinatorError::validation(format!("invalid image digest: {digest}")))
    }
}

fn required_ref<'a>(args: &'a OperationArgs, key: &str) -> CoordinatorResult<&'a str> {
    match args.get(key) {
        Some(serde_json::Value::String(value)) => Ok(value.as_str()),
        Some(_) => Err(CoordinatorError::validation(format!(
            "argument '{key}' must be a string"
        ))),
        None => Err(CoordinatorError::validation(format!(
            "missing required argument '{key}'"
        ))),
    }
}

/// Checks that `args` carry well-formed references for `operation_type`.
pub fn validate_args(operation_type: OperationType, args: &OperationArgs) -> CoordinatorResult<()> {
    match operation_type {
        OperationType::Pull | OperationType::Push => {
            ImageReference::parse(required_ref(args, "image_ref")?)?;
        }
        OperationType::Tag => {
            ImageReference::parse(required_ref(args, "source_ref")?)?;
            ImageReference::parse(required_ref(args, "target_ref")?)?;
        }
    }
    Ok(())
}

/// Runs one image operation in-process on `node_id`.
pub fn execute(
    operation_type: OperationType,
    args: &OperationArgs,
    node_id: &str,
) -> CoordinatorResult<serde_json::Value> {
    match operation_type {
        OperationType::Pull | OperationType::Push => {
            let image_ref = required_ref(args, "image_ref")?;
            let parsed = ImageReference::parse(image_ref)?;
            Ok(json!({
                "operation": operation_type.as_str(),
                "image_ref": image_ref,
                "image": parsed,
                "canonical_ref": parsed.canonical(),
                "node_id": node_id,
                "success": true,
            }))
        }
        OperationType::Tag => {
            let source_ref = required_ref(args, "source_ref")?;
            let target_ref = required_ref(args, "target_ref")?;
            let source = ImageReference::parse(source_ref)?;
            let target = ImageReference::parse(target_ref)?;
            Ok(json!({
                "operation": "tag",
                "source_ref": source_ref,
                "target_ref": target_ref,
                "source": source,
                "target": target,
                "node_id": node_id,
                "success": true,
            }))
        }
    }
}
