//! Request validation chain
//!
//! An ordered sequence of syntactic checks run before anything touches the
//! cache or a content collaborator. Each stage either lets the request
//! continue or halts it with a structured error response; the dispatcher
//! folds over the stage list and stops at the first halt.

use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;
use path_clean::PathClean;
use percent_encoding::percent_decode_str;
use rama::http::{Body, Response, StatusCode};
use regex::Regex;
use serde_json::json;

use super::response::respond_json;
use super::types::PackagePathname;

/// Outcome of one validation stage.
pub enum StageOutcome {
    Continue(PackagePathname),
    Halt(Response<Body>),
}

/// One validation stage: a pure check over the parsed pathname.
pub type Stage = fn(PackagePathname) -> Result<StageOutcome>;

/// Stage order for browse routes (no filename requirements).
pub const BROWSE_STAGES: &[Stage] = &[check_package_name, check_package_version];

/// Stage order for the generic routes, which also constrain the filename.
pub const GENERIC_STAGES: &[Stage] = &[
    check_package_name,
    check_package_version,
    check_filename,
];

/// Run the pathname-shape check followed by `stages`, stopping at the
/// first halt. On success the fully validated pathname comes back.
pub fn run_chain(pathname: &str, stages: &[Stage]) -> Result<StageOutcome> {
    let mut pkg = match parse_package_pathname(pathname) {
        Some(pkg) => pkg,
        None => {
            return Ok(StageOutcome::Halt(invalid(&format!(
                "Invalid URL: {pathname}"
            ))?));
        }
    };
    for stage in stages {
        match stage(pkg)? {
            StageOutcome::Continue(next) => pkg = next,
            halted @ StageOutcome::Halt(_) => return Ok(halted),
        }
    }
    Ok(StageOutcome::Continue(pkg))
}

static PACKAGE_PATHNAME: Lazy<Regex> = Lazy::new(|| {
    // /{name}[@{version}][/filename], where name may be scoped
    Regex::new(r"^/((?:@[^/@]+/)?[^/@]+)(?:@([^/]+))?(/.*)?$")
        .expect("package pathname pattern compiles")
});

/// Parse `/{pkg}[@{version}]{/filename}` after percent-decoding.
///
/// The version defaults to `latest` when the URL names none; the filename
/// keeps its leading slash and is empty when absent.
pub fn parse_package_pathname(pathname: &str) -> Option<PackagePathname> {
    let decoded = percent_decode_str(pathname).decode_utf8().ok()?;
    let captures = PACKAGE_PATHNAME.captures(&decoded)?;
    let name = captures.get(1)?.as_str().to_string();
    let version = captures
        .get(2)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "latest".to_string());
    let filename = captures
        .get(3)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    Some(PackagePathname {
        name,
        version,
        filename,
    })
}

fn check_package_name(pkg: PackagePathname) -> Result<StageOutcome> {
    match package_name_error(&pkg.name) {
        None => Ok(StageOutcome::Continue(pkg)),
        Some(reason) => Ok(StageOutcome::Halt(invalid(&format!(
            "Invalid package name \"{}\" ({reason})",
            pkg.name
        ))?)),
    }
}

/// npm naming rules, syntactic subset: lowercase URL-safe characters, no
/// leading `.` or `_`, at most 214 characters, scope and name both checked.
fn package_name_error(name: &str) -> Option<&'static str> {
    if name.is_empty() {
        return Some("name is empty");
    }
    if name.len() > 214 {
        return Some("name is longer than 214 characters");
    }
    let bare = match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, bare)) => {
                if let Some(reason) = name_part_error(scope) {
                    return Some(reason);
                }
                bare
            }
            None => return Some("scoped name is missing a package part"),
        },
        None => name,
    };
    name_part_error(bare)
}

fn name_part_error(part: &str) -> Option<&'static str> {
    if part.is_empty() {
        return Some("name is empty");
    }
    if part.starts_with('.') || part.starts_with('_') {
        return Some("name cannot start with a period or underscore");
    }
    if part.chars().any(|c| c.is_ascii_uppercase()) {
        return Some("name cannot contain uppercase letters");
    }
    if !part
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.' | '~'))
    {
        return Some("name contains invalid characters");
    }
    None
}

fn check_package_version(pkg: PackagePathname) -> Result<StageOutcome> {
    if version_is_valid(&pkg.version) {
        Ok(StageOutcome::Continue(pkg))
    } else {
        Ok(StageOutcome::Halt(invalid(&format!(
            "Invalid package version \"{}\"",
            pkg.version
        ))?))
    }
}

/// A version segment is acceptable when it is an exact semver version, a
/// parsable range, or a plausible dist-tag.
fn version_is_valid(version: &str) -> bool {
    if version.is_empty() {
        return false;
    }
    if semver::Version::parse(version).is_ok() {
        return true;
    }
    if semver::VersionReq::parse(version).is_ok() {
        return true;
    }
    // dist-tags: "latest", "next", "beta-3", ...
    version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn check_filename(pkg: PackagePathname) -> Result<StageOutcome> {
    match filename_error(&pkg.filename) {
        None => Ok(StageOutcome::Continue(pkg)),
        Some(reason) => Ok(StageOutcome::Halt(invalid(&format!(
            "Invalid filename \"{}\" ({reason})",
            pkg.filename
        ))?)),
    }
}

/// Filenames must be normalized paths: no NUL or backslash, no empty or
/// dot segments. An empty filename (bare package URL) is fine.
fn filename_error(filename: &str) -> Option<&'static str> {
    if filename.is_empty() {
        return None;
    }
    if filename.contains('\0') {
        return Some("contains a NUL byte");
    }
    if filename.contains('\\') {
        return Some("contains a backslash");
    }
    let trimmed = filename.strip_suffix('/').unwrap_or(filename);
    if trimmed.is_empty() {
        // the filename was exactly "/": a bare directory request
        return None;
    }
    let cleaned = PathBuf::from(trimmed).clean();
    if cleaned != PathBuf::from(trimmed) {
        return Some("must be a normalized path");
    }
    None
}

fn invalid(message: &str) -> Result<Response<Body>> {
    respond_json(
        StatusCode::FORBIDDEN,
        &json!({ "error": message }).to_string(),
    )
}
