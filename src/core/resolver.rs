//! Identifier resolution: module identifier + referencing locator →
//! canonical locator.
//!
//! The pipeline is fixed and order-significant: alias substitution, `{name}`
//! variable expansion, base resolution over the four identifier shapes,
//! normalization, then the ordered map rewrite. Resolution is pure given the
//! configuration and idempotent: re-resolving an output against itself is
//! the identity.

use once_cell::sync::Lazy;
use regex::Regex;

use super::config::{Config, MapRule};
use super::error::ResolveError;

/// Default extension appended by normalization.
const DEFAULT_EXT: &str = ".js";

/// Extensions that suppress the default extension.
const KNOWN_EXTS: [&str; 2] = [".js", ".css"];

/// Trailing sentinel meaning "exact locator, no extension"; stripped.
const EXACT_SENTINEL: char = '#';

static VARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^{}]+)\}").unwrap());
static MULTI_SLASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^:/])/{2,}").unwrap());

/// Resolve `id` against `reference` under `config`.
pub fn resolve(id: &str, reference: &str, config: &Config) -> Result<String, ResolveError> {
    if id.is_empty() {
        return Err(ResolveError::EmptyIdentifier);
    }
    let id = apply_alias(id, config);
    let id = expand_vars(&id, config);
    let based = add_base(&id, reference, config);
    let normalized = normalize(&based)?;
    Ok(apply_map(&normalized, config))
}

/// `true` when the identifier contains a scheme separator past the start,
/// or is protocol-relative.
pub fn is_absolute(id: &str) -> bool {
    id.find("://").is_some_and(|i| i > 0) || id.starts_with("//")
}

/// `true` for `./` and `../` identifiers.
pub fn is_relative(id: &str) -> bool {
    id.starts_with("./") || id.starts_with("../")
}

/// `true` for `/` identifiers that are not protocol-relative.
pub fn is_root(id: &str) -> bool {
    id.starts_with('/') && !id.starts_with("//")
}

/// `true` when the identifier is none of the other three shapes.
pub fn is_top_level(id: &str) -> bool {
    !id.contains("://") && !id.starts_with('.') && !id.starts_with('/')
}

fn apply_alias(id: &str, config: &Config) -> String {
    if is_top_level(id) {
        if let Some(target) = config.alias.get(id) {
            // Wholesale, non-recursive: the result is not re-aliased.
            return target.clone();
        }
    }
    id.to_string()
}

fn expand_vars(id: &str, config: &Config) -> String {
    if !id.contains('{') {
        return id.to_string();
    }
    VARS_RE
        .replace_all(id, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match config.vars.get(name) {
                Some(value) => value.clone(),
                // Unmatched placeholders stay verbatim.
                None => format!("{{{name}}}"),
            }
        })
        .into_owned()
}

fn add_base(id: &str, reference: &str, config: &Config) -> String {
    if is_absolute(id) {
        id.to_string()
    } else if is_relative(id) {
        let id = id.strip_prefix("./").unwrap_or(id);
        format!("{}{id}", dirname(reference))
    } else if is_root(id) {
        match root_of(reference) {
            Some(root) => format!("{root}{id}"),
            None => id.to_string(),
        }
    } else {
        format!("{}{id}", config.base)
    }
}

/// Directory portion of a locator, query excluded.
///
/// `dirname("a/b/c.js")` is `"a/b/"`; `dirname("d.js")` is `"./"`.
fn dirname(locator: &str) -> String {
    let pre_query = match locator.find('?') {
        Some(i) => &locator[..i],
        None => locator,
    };
    match pre_query.rfind('/') {
        Some(i) => format!("{}/", &locator[..i]),
        None => "./".to_string(),
    }
}

/// Scheme-and-host portion of a reference: the shortest prefix ending in a
/// word character that is followed by `/` or the end of the string.
fn root_of(reference: &str) -> Option<&str> {
    let bytes = reference.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b.is_ascii_alphanumeric() || b == b'_' {
            match bytes.get(i + 1) {
                Some(b'/') | None => return Some(&reference[..=i]),
                _ => {}
            }
        }
    }
    None
}

fn normalize(locator: &str) -> Result<String, ResolveError> {
    let mut locator = realpath(locator)?;
    if locator.ends_with(EXACT_SENTINEL) {
        locator.pop();
        return Ok(locator);
    }
    if needs_default_ext(&locator) {
        locator.push_str(DEFAULT_EXT);
    }
    Ok(locator)
}

fn needs_default_ext(locator: &str) -> bool {
    !KNOWN_EXTS.iter().any(|ext| locator.ends_with(ext))
        && !locator.ends_with('/')
        && !locator.contains('?')
}

/// Collapse `.` segments, pop on `..`, and collapse duplicate separators
/// outside the scheme prefix. `..` past the accumulated depth is fatal.
fn realpath(locator: &str) -> Result<String, ResolveError> {
    let mut path = locator.to_string();

    // "http://a//b" keeps its scheme slashes; "a//b" collapses.
    if path.rfind("//").is_some_and(|i| i > 7) {
        path = MULTI_SLASH_RE.replace_all(&path, "$1/").into_owned();
    }

    if !path.contains('.') {
        return Ok(path);
    }

    let mut kept: Vec<&str> = Vec::new();
    for part in path.split('/') {
        if part == ".." {
            if kept.is_empty() {
                return Err(ResolveError::AscentPastRoot(locator.to_string()));
            }
            kept.pop();
        } else if part != "." {
            kept.push(part);
        }
    }
    Ok(kept.join("/"))
}

fn apply_map(locator: &str, config: &Config) -> String {
    for rule in &config.map {
        let mapped = match rule {
            MapRule::Pattern {
                pattern,
                replacement,
            } => {
                let out = pattern.replace(locator, replacement.as_str());
                (out != locator).then(|| out.into_owned())
            }
            MapRule::Func(f) => f(locator).filter(|out| out != locator),
        };
        // First matching rule wins.
        if let Some(out) = mapped {
            return out;
        }
    }
    locator.to_string()
}
