// src/formula/parser.rs

//! Formula file parsing and validation
//!
//! Parsing is purely structural: it never touches the network or the
//! filesystem beyond reading the formula file itself.

use crate::error::{Error, Result};
use crate::fetch::Scheme;
use crate::formula::format::{Formula, InstallStep};
use crate::formula::placeholder::{scan, Placeholder};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Parse a formula from a TOML string
///
/// Rejects malformed TOML, missing url or checksum, malformed checksums,
/// unsupported URL schemes, duplicate resource names, an empty install
/// procedure, and unknown placeholders.
pub fn parse_formula(content: &str) -> Result<Formula> {
    let formula: Formula =
        toml::from_str(content).map_err(|e| Error::ParseError(e.message().to_string()))?;
    check_formula(&formula)?;
    debug!(
        "Parsed formula {} ({} resources, {} steps)",
        formula.name,
        formula.resources.len(),
        formula.install.len()
    );
    Ok(formula)
}

/// Parse a formula from a file
pub fn parse_formula_file(path: &Path) -> Result<Formula> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::IoError(format!("Failed to read formula {}: {}", path.display(), e))
    })?;

    parse_formula(&content)
}

/// Serialize a formula back to TOML
pub fn to_toml(formula: &Formula) -> Result<String> {
    toml::to_string_pretty(formula)
        .map_err(|e| Error::ParseError(format!("Failed to serialize formula: {}", e)))
}

/// Validate a formula and collect non-fatal warnings
pub fn validate_formula(formula: &Formula) -> Result<Vec<String>> {
    check_formula(formula)?;

    let mut warnings = Vec::new();

    match &formula.homepage {
        None => warnings.push("Missing homepage".to_string()),
        Some(homepage) if url::Url::parse(homepage).is_err() => {
            warnings.push(format!("Homepage is not a valid URL: {}", homepage));
        }
        Some(_) => {}
    }

    if formula.version.is_none() {
        warnings.push("Missing version".to_string());
    }

    // Each digest is authoritative for its own artifact; a shared digest is
    // almost always a copy-paste slip.
    for resource in &formula.resources {
        if resource.url != formula.url && resource.checksum == formula.checksum {
            warnings.push(format!(
                "Resource {} declares the same checksum as the main source",
                resource.name
            ));
        }
    }

    Ok(warnings)
}

/// Structural checks shared by parsing and validation
fn check_formula(formula: &Formula) -> Result<()> {
    check_name("formula name", &formula.name)?;
    check_url(&formula.url)?;

    let mut deps = HashSet::new();
    for dep in &formula.depends_on {
        if dep.trim().is_empty() {
            return Err(Error::ParseError("Dependency name cannot be empty".to_string()));
        }
        if !deps.insert(dep.as_str()) {
            return Err(Error::ParseError(format!("Duplicate dependency: {}", dep)));
        }
    }

    let mut resource_names = HashSet::new();
    for resource in &formula.resources {
        check_name("resource name", &resource.name)?;
        check_url(&resource.url)?;
        if !resource_names.insert(resource.name.as_str()) {
            return Err(Error::ParseError(format!(
                "Duplicate resource name: {}",
                resource.name
            )));
        }
    }

    // Setup steps run in declaration order, so they may only reference
    // resources staged before them (or themselves).
    let mut staged = HashSet::new();
    for resource in &formula.resources {
        staged.insert(resource.name.as_str());
        for (index, step) in resource.setup.iter().enumerate() {
            check_step(step, &staged).map_err(|e| {
                context(e, &format!("resource {} setup step {}", resource.name, index))
            })?;
        }
    }

    if formula.install.is_empty() {
        return Err(Error::ParseError("Install procedure is empty".to_string()));
    }

    for (index, step) in formula.install.iter().enumerate() {
        check_step(step, &resource_names)
            .map_err(|e| context(e, &format!("install step {}", index)))?;
    }

    Ok(())
}

fn check_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ParseError(format!("{} cannot be empty", capitalize(what))));
    }

    let valid = !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'));
    if !valid {
        return Err(Error::ParseError(format!(
            "Invalid {} '{}': use letters, digits, '.', '_', '+', '-'",
            what, name
        )));
    }

    Ok(())
}

fn check_url(raw: &str) -> Result<()> {
    if raw.trim().is_empty() {
        return Err(Error::ParseError("Missing url".to_string()));
    }

    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::ParseError(format!("Invalid url '{}': {}", raw, e)))?;

    if Scheme::parse(parsed.scheme()).is_none() {
        return Err(Error::ParseError(format!(
            "Unsupported url scheme '{}' in {} (supported: {})",
            parsed.scheme(),
            raw,
            Scheme::SUPPORTED.join(", ")
        )));
    }

    Ok(())
}

fn check_step(step: &InstallStep, resources: &HashSet<&str>) -> Result<()> {
    if step.executable.trim().is_empty() {
        return Err(Error::ParseError("executable cannot be empty".to_string()));
    }

    for template in step.templates() {
        for placeholder in scan(template)? {
            if let Placeholder::Resource(name) = placeholder {
                if !resources.contains(name.as_str()) {
                    return Err(Error::ParseError(format!(
                        "reference to undeclared resource '{}'",
                        name
                    )));
                }
            }
        }
    }

    Ok(())
}

fn context(err: Error, location: &str) -> Error {
    match err {
        Error::ParseError(msg) => Error::ParseError(format!("{}: {}", location, msg)),
        other => other,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;

    const SCNMASTER: &str = r#"
name = "scnmaster"
version = "0.0.5"
homepage = "http://shortcutoslo.no"
url = "https://github.com/santonsen/homebrew-scnmaster/raw/master/dist/scnmaster_0.0.5/scnmaster_0.0.5.tar.gz"
checksum = { algorithm = "sha1", digest = "1cba61d5b29e1761b0ffdb73377339670abd7188" }
depends_on = ["ffmpeg"]

[[resource]]
name = "pexpect"
url = "https://pypi.python.org/packages/source/p/pexpect/pexpect-3.3.tar.gz"
checksum = "sha1:1cba61d5b29e1761b0ffdb73377339670abd7188"
setup = [
  { executable = "python", args = ["setup.py", "install", "--prefix=%(vendor)s"] },
]

[[install]]
executable = "make"
args = ["prefix=%(prefix)s", "install"]
"#;

    #[test]
    fn test_parse_valid_formula() {
        let formula = parse_formula(SCNMASTER).unwrap();
        assert_eq!(formula.name, "scnmaster");
        assert_eq!(formula.checksum.algorithm, HashAlgorithm::Sha1);
        assert_eq!(formula.depends_on, vec!["ffmpeg"]);
        assert_eq!(formula.resources.len(), 1);
        assert_eq!(formula.resources[0].setup[0].executable, "python");
        assert_eq!(formula.install[0].args, vec!["prefix=%(prefix)s", "install"]);
        assert_eq!(formula.archive_filename(), "scnmaster_0.0.5.tar.gz");
    }

    #[test]
    fn test_round_trip() {
        let formula = parse_formula(SCNMASTER).unwrap();
        let serialized = to_toml(&formula).unwrap();
        let reparsed = parse_formula(&serialized).unwrap();
        assert_eq!(formula, reparsed);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = parse_formula("this is not valid toml at all {}").unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_missing_url() {
        let content = r#"
name = "test"
checksum = "sha1:1cba61d5b29e1761b0ffdb73377339670abd7188"

[[install]]
executable = "true"
"#;
        let err = parse_formula(content).unwrap_err();
        assert!(err.to_string().contains("url"));
    }

    #[test]
    fn test_missing_checksum() {
        let content = r#"
name = "test"
url = "https://example.com/test.tar.gz"

[[install]]
executable = "true"
"#;
        assert!(parse_formula(content).is_err());
    }

    #[test]
    fn test_malformed_checksum() {
        let content = r#"
name = "test"
url = "https://example.com/test.tar.gz"
checksum = "sha256:1cba61d5b29e1761b0ffdb73377339670abd7188"

[[install]]
executable = "true"
"#;
        let err = parse_formula(content).unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));
    }

    #[test]
    fn test_duplicate_resources() {
        let content = r#"
name = "test"
url = "https://example.com/test.tar.gz"
checksum = "sha1:1cba61d5b29e1761b0ffdb73377339670abd7188"

[[resource]]
name = "dup"
url = "https://example.com/a.tar.gz"
checksum = "sha1:0000000000000000000000000000000000000001"

[[resource]]
name = "dup"
url = "https://example.com/b.tar.gz"
checksum = "sha1:0000000000000000000000000000000000000002"

[[install]]
executable = "true"
"#;
        let err = parse_formula(content).unwrap_err();
        assert!(err.to_string().contains("Duplicate resource name"));
    }

    #[test]
    fn test_empty_install() {
        let content = r#"
name = "test"
url = "https://example.com/test.tar.gz"
checksum = "sha1:1cba61d5b29e1761b0ffdb73377339670abd7188"
"#;
        let err = parse_formula(content).unwrap_err();
        assert!(err.to_string().contains("Install procedure is empty"));
    }

    #[test]
    fn test_unsupported_scheme() {
        let content = r#"
name = "test"
url = "ftp://example.com/test.tar.gz"
checksum = "sha1:1cba61d5b29e1761b0ffdb73377339670abd7188"

[[install]]
executable = "true"
"#;
        let err = parse_formula(content).unwrap_err();
        assert!(err.to_string().contains("ftp"));
    }

    #[test]
    fn test_undeclared_resource_reference() {
        let content = r#"
name = "test"
url = "https://example.com/test.tar.gz"
checksum = "sha1:1cba61d5b29e1761b0ffdb73377339670abd7188"

[[install]]
executable = "cp"
args = ["-R", "%(resource:missing)s", "%(vendor)s"]
"#;
        let err = parse_formula(content).unwrap_err();
        assert!(err.to_string().contains("install step 0"));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_setup_cannot_reference_later_resource() {
        let content = r#"
name = "test"
url = "https://example.com/test.tar.gz"
checksum = "sha1:1cba61d5b29e1761b0ffdb73377339670abd7188"

[[resource]]
name = "first"
url = "https://example.com/a.tar.gz"
checksum = "sha1:0000000000000000000000000000000000000001"
setup = [{ executable = "cp", args = ["-R", "%(resource:second)s", "."] }]

[[resource]]
name = "second"
url = "https://example.com/b.tar.gz"
checksum = "sha1:0000000000000000000000000000000000000002"

[[install]]
executable = "true"
"#;
        let err = parse_formula(content).unwrap_err();
        assert!(err.to_string().contains("resource first setup step 0"));
    }

    #[test]
    fn test_resource_name_must_be_path_safe() {
        let content = r#"
name = "test"
url = "https://example.com/test.tar.gz"
checksum = "sha1:1cba61d5b29e1761b0ffdb73377339670abd7188"

[[resource]]
name = "../escape"
url = "https://example.com/a.tar.gz"
checksum = "sha1:0000000000000000000000000000000000000001"

[[install]]
executable = "true"
"#;
        assert!(parse_formula(content).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let content = r#"
name = "test"
url = "https://example.com/test.tar.gz"
checksum = "sha1:1cba61d5b29e1761b0ffdb73377339670abd7188"
sha1 = "1cba61d5b29e1761b0ffdb73377339670abd7188"

[[install]]
executable = "true"
"#;
        assert!(parse_formula(content).is_err());
    }

    #[test]
    fn test_validate_warnings() {
        let formula = parse_formula(SCNMASTER).unwrap();
        let warnings = validate_formula(&formula).unwrap();
        assert!(warnings.iter().any(|w| w.contains("pexpect")));
        assert!(!warnings.iter().any(|w| w.contains("homepage")));

        let mut bare = formula.clone();
        bare.homepage = None;
        bare.version = None;
        bare.resources.clear();
        let warnings = validate_formula(&bare).unwrap();
        assert!(warnings.iter().any(|w| w.contains("homepage")));
        assert!(warnings.iter().any(|w| w.contains("version")));
    }
}
