//! Dependency extraction from the package manager's verbose transcript
//!
//! A local-only unpack run prints one line per resolved requirement. The
//! pattern table turns those lines into an ordered, deduplicated install plan.

use crate::error::{AccelError, AccelResult};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bundled transcript patterns. Each has named groups `name` and `version`,
/// and optionally `source`.
pub const DEFAULT_PATTERNS: &[&str] = &[
    r"^\s*Source in (?P<source>.+?) has version (?P<version>[^\s,]+), which satisfies requirement (?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)",
    r"^\s*Requirement already satisfied[^:]*: (?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)==(?P<version>[^\s]+) in (?P<source>\S+)",
    r"^\s*(?:Downloading|Unpacking)(?:/unpacking)? (?:\S*/)?(?P<name>[A-Za-z0-9][A-Za-z0-9._-]*?)-(?P<version>[0-9][^/\s]*?)\.(?:tar\.gz|tar\.bz2|tgz|zip)\b",
];

/// A concrete, versioned dependency with its unpacked sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Normalized project name
    pub name: String,
    pub version: String,
    /// Directory holding the unpacked source distribution
    pub source_path: PathBuf,
}

impl Requirement {
    pub fn new(name: &str, version: &str, source_path: impl Into<PathBuf>) -> Self {
        Self {
            name: normalize_name(name),
            version: version.to_string(),
            source_path: source_path.into(),
        }
    }

    /// Identity used for deduplication: `(name, version)` normalized
    pub fn identity(&self) -> (String, String) {
        (self.name.clone(), self.version.to_lowercase())
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.version)
    }
}

/// Lower-case and collapse runs of `-`, `_` and `.` into a single `-`
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    out
}

/// Transcript parser built from a pattern table
pub struct Extractor {
    patterns: Vec<Regex>,
    build_dir: PathBuf,
}

impl Extractor {
    /// Compile `patterns`. Every pattern must define `name` and `version`
    /// groups; `build_dir` anchors source paths for patterns without `source`.
    pub fn new(patterns: &[String], build_dir: &Path) -> AccelResult<Self> {
        let compiled = patterns
            .iter()
            .map(|pattern| {
                let regex = Regex::new(pattern).map_err(|e| AccelError::PatternInvalid {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                let groups: Vec<&str> = regex.capture_names().flatten().collect();
                if !groups.contains(&"name") || !groups.contains(&"version") {
                    return Err(AccelError::PatternInvalid {
                        pattern: pattern.clone(),
                        reason: "missing `name` or `version` group".to_string(),
                    });
                }
                Ok(regex)
            })
            .collect::<AccelResult<Vec<_>>>()?;

        Ok(Self {
            patterns: compiled,
            build_dir: build_dir.to_path_buf(),
        })
    }

    /// Extract requirements in first-seen order
    ///
    /// Fails with `ExtractionFormat` when no line matches, since an empty plan
    /// for a successful install run means the transcript format changed.
    pub fn extract(&self, transcript: &[String]) -> AccelResult<Vec<Requirement>> {
        let mut seen = HashSet::new();
        let mut requirements = Vec::new();

        for line in transcript {
            let Some(caps) = self.patterns.iter().find_map(|p| p.captures(line)) else {
                continue;
            };
            let (Some(name), Some(version)) = (caps.name("name"), caps.name("version")) else {
                continue;
            };
            let source = match caps.name("source") {
                Some(source) => PathBuf::from(source.as_str()),
                None => self.build_dir.join(name.as_str()),
            };

            let requirement = Requirement::new(name.as_str(), version.as_str(), source);
            if seen.insert(requirement.identity()) {
                debug!("Found dependency: {}", requirement);
                requirements.push(requirement);
            }
        }

        if requirements.is_empty() {
            return Err(AccelError::ExtractionFormat {
                output: transcript.join("\n"),
            });
        }

        info!(
            "Found {} {} in the package manager's output",
            requirements.len(),
            if requirements.len() == 1 { "dependency" } else { "dependencies" }
        );
        Ok(requirements)
    }
}
