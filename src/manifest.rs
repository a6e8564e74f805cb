// src/manifest.rs
//
// Pinned dependency manifest parsing.
// One `name==version` requirement per line, `#` comment lines title a group,
// blank lines separate groups.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

// =============================================================================
// Types
// =============================================================================

/// A single pinned requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    pub name: String,
    pub version: String,
    /// 1-based line number in the source text.
    pub line: usize,
}

/// Requirements sharing a comment title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestGroup {
    pub title: Option<String>,
    pub requirements: Vec<Requirement>,
}

/// Parsed manifest, groups in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub groups: Vec<ManifestGroup>,
}

/// Manifest validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// A non-comment, non-blank line is not exactly `name==version`.
    InvalidLine { line: usize, content: String },
    /// The same package is pinned twice.
    DuplicatePackage {
        name: String,
        first_line: usize,
        line: usize,
    },
    Io(String),
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::InvalidLine { line, content } => {
                write!(f, "line {}: expected `name==version`, got `{}`", line, content)
            }
            ManifestError::DuplicatePackage {
                name,
                first_line,
                line,
            } => write!(
                f,
                "line {}: duplicate package `{}` (first declared on line {})",
                line, name, first_line
            ),
            ManifestError::Io(e) => write!(f, "Failed to read manifest: {}", e),
        }
    }
}

impl std::error::Error for ManifestError {}

// =============================================================================
// Parsing
// =============================================================================

fn requirement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)==([^\s=<>!~,;]+)$")
            .expect("requirement pattern is valid")
    })
}

/// Normalized form used for duplicate detection (`Foo_Bar` == `foo-bar`).
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

/// Parses one requirement line. Surrounding whitespace is ignored.
pub fn parse_requirement(text: &str, line: usize) -> Result<Requirement, ManifestError> {
    let trimmed = text.trim();
    let caps = requirement_regex()
        .captures(trimmed)
        .ok_or_else(|| ManifestError::InvalidLine {
            line,
            content: trimmed.to_string(),
        })?;

    Ok(Requirement {
        name: caps[1].to_string(),
        version: caps[2].to_string(),
        line,
    })
}

/// Parses manifest text, rejecting malformed lines and duplicate packages.
pub fn parse_manifest(text: &str) -> Result<Manifest, ManifestError> {
    let mut groups: Vec<ManifestGroup> = Vec::new();
    let mut current = ManifestGroup {
        title: None,
        requirements: Vec::new(),
    };
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();

        if line.is_empty() {
            if current.title.is_some() || !current.requirements.is_empty() {
                groups.push(std::mem::replace(
                    &mut current,
                    ManifestGroup {
                        title: None,
                        requirements: Vec::new(),
                    },
                ));
            }
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            let title = comment.trim().to_string();
            // A comment after requirements starts a new group even without a blank line.
            if !current.requirements.is_empty() {
                groups.push(std::mem::replace(
                    &mut current,
                    ManifestGroup {
                        title: None,
                        requirements: Vec::new(),
                    },
                ));
            }
            current.title = match current.title.take() {
                Some(existing) if !title.is_empty() => Some(format!("{} {}", existing, title)),
                Some(existing) => Some(existing),
                None => Some(title),
            };
            continue;
        }

        let req = parse_requirement(line, line_no)?;
        let key = normalize_name(&req.name);
        if let Some(&first_line) = seen.get(&key) {
            return Err(ManifestError::DuplicatePackage {
                name: req.name,
                first_line,
                line: line_no,
            });
        }
        seen.insert(key, line_no);
        current.requirements.push(req);
    }

    if current.title.is_some() || !current.requirements.is_empty() {
        groups.push(current);
    }

    Ok(Manifest { groups })
}

/// Reads and validates a manifest file.
pub fn check_manifest_file<P: AsRef<Path>>(path: P) -> Result<Manifest, ManifestError> {
    let contents =
        std::fs::read_to_string(&path).map_err(|e| ManifestError::Io(e.to_string()))?;
    parse_manifest(&contents)
}

impl Manifest {
    /// All requirements in file order.
    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.groups.iter().flat_map(|g| g.requirements.iter())
    }

    pub fn len(&self) -> usize {
        self.requirements().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks a package up by normalized name.
    pub fn get(&self, name: &str) -> Option<&Requirement> {
        let key = normalize_name(name);
        self.requirements().find(|r| normalize_name(&r.name) == key)
    }

    /// Canonical text form: titles as `# title`, one blank line between groups.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            if let Some(title) = &group.title {
                out.push_str(&format!("# {}\n", title));
            }
            for req in &group.requirements {
                out.push_str(&format!("{}=={}\n", req.name, req.version));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_pin() {
        let manifest = parse_manifest("torch==2.0.1\n").unwrap();
        let req = manifest.get("torch").unwrap();
        assert_eq!(req.name, "torch");
        assert_eq!(req.version, "2.0.1");
        assert_eq!(req.line, 1);
    }

    #[test]
    fn test_groups_follow_comments_and_blank_lines() {
        let text = "# MetaTrader\nMetaTrader5==5.0.45\n\n# UI\nstreamlit==1.28.0\nplotly==5.18.0\n";
        let manifest = parse_manifest(text).unwrap();
        assert_eq!(manifest.groups.len(), 2);
        assert_eq!(manifest.groups[0].title.as_deref(), Some("MetaTrader"));
        assert_eq!(manifest.groups[1].requirements.len(), 2);
        assert_eq!(manifest.len(), 3);
    }

    #[test]
    fn test_rejects_range_and_double_pin() {
        let err = parse_manifest("pandas>=2.0\n").unwrap_err();
        assert_eq!(
            err,
            ManifestError::InvalidLine {
                line: 1,
                content: "pandas>=2.0".to_string()
            }
        );
        assert!(parse_manifest("numpy==1.2==1.3").is_err());
        assert!(parse_manifest("numpy==").is_err());
        assert!(parse_manifest("==1.0").is_err());
        assert!(parse_manifest("numpy == 1.2").is_err());
    }

    #[test]
    fn test_duplicate_detection_is_normalized() {
        let text = "python-telegram-bot==20.6\n\npython_telegram_bot==20.7\n";
        match parse_manifest(text).unwrap_err() {
            ManifestError::DuplicatePackage {
                first_line, line, ..
            } => {
                assert_eq!(first_line, 1);
                assert_eq!(line, 3);
            }
            other => panic!("Expected duplicate error, got {:?}", other),
        }
    }

    #[test]
    fn test_render_is_stable() {
        let text = "# Data\nnumpy==1.24.3\npandas==2.0.3\n\n# ML\ntorch==2.0.1\n";
        let manifest = parse_manifest(text).unwrap();
        assert_eq!(manifest.render(), text);
        assert_eq!(parse_manifest(&manifest.render()).unwrap(), manifest);
    }
}
