//! Image reference parsing.
//!
//! Normalizes short names the way registries expect them:
//! `busybox` becomes `docker.io/library/busybox:latest`.

use std::fmt;
use thiserror::Error;

const DEFAULT_REGISTRY: &str = "docker.io";
const DEFAULT_TAG: &str = "latest";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const MAX_TAG_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("invalid reference format: empty reference")]
    Empty,
    #[error("invalid reference format: repository name must be lowercase: {0:?}")]
    Uppercase(String),
    #[error("invalid reference format: {0:?}")]
    InvalidFormat(String),
    #[error("invalid tag {tag:?} in reference {reference:?}")]
    InvalidTag { reference: String, tag: String },
    #[error("invalid digest {digest:?} in reference {reference:?}")]
    InvalidDigest { reference: String, digest: String },
}

/// Parsed, fully-qualified image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference such as `nginx`, `nginx:1.25`, `ghcr.io/org/img:tag`
    /// or `localhost:5000/img@sha256:...`.
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (name_tag, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                validate_digest(reference, digest)?;
                (name, Some(digest.to_owned()))
            }
            None => (reference, None),
        };

        // A tag colon must come after the last slash, otherwise it is a port.
        let last_slash = name_tag.rfind('/').map_or(0, |p| p + 1);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon) => {
                let split = last_slash + colon;
                (&name_tag[..split], Some(name_tag[split + 1..].to_owned()))
            }
            None => (name_tag, None),
        };

        if let Some(ref t) = tag {
            if !is_valid_tag(t) {
                return Err(ReferenceError::InvalidTag {
                    reference: reference.to_owned(),
                    tag: t.clone(),
                });
            }
        }

        let (registry, repository) = split_registry_repository(name)?;
        validate_repository(reference, &repository)?;

        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_owned())
        } else {
            tag
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Repository name including the registry, without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_registry_repository(name: &str) -> Result<(String, String), ReferenceError> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(ReferenceError::InvalidFormat(name.to_owned()));
            }
            return Ok((first.to_owned(), rest.to_owned()));
        }
    }

    let repository = if name.contains('/') {
        name.to_owned()
    } else {
        format!("{OFFICIAL_REPO_PREFIX}{name}")
    };
    Ok((DEFAULT_REGISTRY.to_owned(), repository))
}

fn validate_repository(reference: &str, repository: &str) -> Result<(), ReferenceError> {
    for component in repository.split('/') {
        if component.is_empty() {
            return Err(ReferenceError::InvalidFormat(reference.to_owned()));
        }
        if component.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(ReferenceError::Uppercase(reference.to_owned()));
        }
        let valid_chars = component
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"._-".contains(&b));
        let alnum_edges = component
            .bytes()
            .next()
            .is_some_and(|b| b.is_ascii_alphanumeric())
            && component
                .bytes()
                .last()
                .is_some_and(|b| b.is_ascii_alphanumeric());
        if !valid_chars || !alnum_edges {
            return Err(ReferenceError::InvalidFormat(reference.to_owned()));
        }
    }
    Ok(())
}

fn is_valid_tag(tag: &str) -> bool {
    let mut bytes = tag.bytes();
    let first_ok = bytes
        .next()
        .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_');
    first_ok
        && tag.len() <= MAX_TAG_LEN
        && bytes.all(|b| b.is_ascii_alphanumeric() || b"_.-".contains(&b))
}

fn validate_digest(reference: &str, digest: &str) -> Result<(), ReferenceError> {
    let ok = crate::types::Digest::new(digest).is_valid();
    if ok {
        Ok(())
    } else {
        Err(ReferenceError::InvalidDigest {
            reference: reference.to_owned(),
            digest: digest.to_owned(),
        })
    }
}
