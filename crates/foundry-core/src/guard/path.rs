//! Structured path matching
//!
//! Paths are compared segment by segment, never as raw strings. A rule
//! written as `backend/core/config.py` only matches whole segments, so
//! `mybackend/core/config.py` does not match it.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{FoundryError, Result};

/// Relative path split into normalised segments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuardPath {
    segments: Vec<String>,
}

impl GuardPath {
    /// Normalise a raw path.
    ///
    /// Backslashes become `/`, leading separators as well as empty and `.`
    /// segments are dropped. Any `..` segment, or nothing left after
    /// normalisation, is an error.
    pub fn parse(raw: &str) -> Result<Self> {
        let unified = raw.replace('\\', "/");
        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(FoundryError::validation(format!(
                        "path traversal is not allowed: {raw}"
                    )))
                }
                s => segments.push(s.to_string()),
            }
        }
        if segments.is_empty() {
            return Err(FoundryError::validation(format!("empty path: {raw:?}")));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn file_name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Lower-cased extension of the last segment, with the dot
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        let dot = name.rfind('.')?;
        if dot == 0 {
            return None;
        }
        Some(name[dot..].to_ascii_lowercase())
    }

    /// A single segment, i.e. a file at the root
    pub fn is_root_level(&self) -> bool {
        self.segments.len() == 1
    }

    pub fn starts_with(&self, prefix: &[String]) -> bool {
        self.segments.len() >= prefix.len() && self.segments[..prefix.len()] == *prefix
    }

    pub fn ends_with(&self, suffix: &[String]) -> bool {
        self.segments.len() >= suffix.len()
            && self.segments[self.segments.len() - suffix.len()..] == *suffix
    }

    /// `/`-joined form
    pub fn as_string(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for GuardPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// A single path matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRule {
    /// Whole path equals
    Exact(Vec<String>),
    /// Path lies under these leading segments
    Prefix(Vec<String>),
    /// Path ends with these segments (any parent directories)
    SegmentSuffix(Vec<String>),
    /// Some segment equals, at any depth
    AnySegment(String),
    /// Last segment equals
    FileName(String),
    /// Last segment is the name itself or a `name.*` variant
    FileFamily(String),
}

impl PathRule {
    pub fn matches(&self, path: &GuardPath) -> bool {
        match self {
            PathRule::Exact(segments) => path.segments() == segments.as_slice(),
            PathRule::Prefix(segments) => path.starts_with(segments),
            PathRule::SegmentSuffix(segments) => path.ends_with(segments),
            PathRule::AnySegment(name) => path.segments().iter().any(|s| s == name),
            PathRule::FileName(name) => path.file_name() == name,
            PathRule::FileFamily(name) => {
                let file = path.file_name();
                file == name
                    || file
                        .strip_prefix(name.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }
        }
    }

    fn split(body: &str) -> Result<Vec<String>> {
        Ok(GuardPath::parse(body)?.segments)
    }
}

/// Rule syntax used in configuration files.
///
/// Explicit kinds: `exact:a/b`, `prefix:a/`, `suffix:a/b`, `segment:.git`,
/// `name:.env`, `family:.env`. Without a kind a pattern ending in `/` is a segment rule
/// when it has one segment and a prefix rule otherwise; a bare file name is
/// a file-name rule; anything else is a segment-suffix rule.
impl FromStr for PathRule {
    type Err = FoundryError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some((kind, body)) = s.split_once(':') {
            return match kind {
                "exact" => Ok(PathRule::Exact(Self::split(body)?)),
                "prefix" => Ok(PathRule::Prefix(Self::split(body)?)),
                "suffix" => Ok(PathRule::SegmentSuffix(Self::split(body)?)),
                "segment" => Ok(PathRule::AnySegment(body.trim_matches('/').to_string())),
                "name" => Ok(PathRule::FileName(body.to_string())),
                "family" => Ok(PathRule::FileFamily(body.to_string())),
                other => Err(FoundryError::Config(format!(
                    "unknown path rule kind '{other}' in '{s}'"
                ))),
            };
        }

        let segments = Self::split(s).map_err(|e| FoundryError::Config(e.to_string()))?;
        let directory = s.ends_with('/');
        Ok(match (directory, segments.len()) {
            (true, 1) => PathRule::AnySegment(segments[0].clone()),
            (true, _) => PathRule::Prefix(segments),
            (false, 1) => PathRule::FileName(segments[0].clone()),
            (false, _) => PathRule::SegmentSuffix(segments),
        })
    }
}

impl fmt::Display for PathRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRule::Exact(s) => write!(f, "exact:{}", s.join("/")),
            PathRule::Prefix(s) => write!(f, "prefix:{}/", s.join("/")),
            PathRule::SegmentSuffix(s) => write!(f, "suffix:{}", s.join("/")),
            PathRule::AnySegment(s) => write!(f, "segment:{s}"),
            PathRule::FileName(s) => write!(f, "name:{s}"),
            PathRule::FileFamily(s) => write!(f, "family:{s}"),
        }
    }
}

impl Serialize for PathRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Core-identity files of the target repository
pub const DEFAULT_PROTECTED: &[&str] = &[
    "backend/core/config.py",
    "backend/core/state.py",
    "backend/core/build_loop.py",
    "backend/core/llm.py",
    "backend/core/file_guardian.py",
    "backend/agents/orchestrator.py",
    "backend/agents/planner.py",
    "backend/agents/builder.py",
    "backend/agents/validator.py",
    "backend/agents/toolsmith.py",
    "backend/agents/self_improver.py",
    "backend/tools/base_tools.py",
    "backend/tools/self_improver_tools.py",
    "backend/api.py",
    "backend/main.py",
    "frontend/app/layout.tsx",
    "frontend/app/page.tsx",
    "frontend/next.config.ts",
    "frontend/package.json",
    "frontend/tsconfig.json",
    "frontend/components/ChatInterface.tsx",
    "frontend/components/StatusPanel.tsx",
    "frontend/components/CapabilitiesPanel.tsx",
    "frontend/components/BuildStepsPanel.tsx",
    "frontend/components/ControlPanel.tsx",
    "frontend/components/ApprovalsPanel.tsx",
];

/// Credentials and version-control metadata
pub const DEFAULT_FORBIDDEN: &[&str] = &["family:.env", ".git/"];

/// An ordered set of rules; a path matches when any rule does
#[derive(Debug, Clone, Default, Serialize)]
pub struct PathMatcher {
    rules: Vec<PathRule>,
}

impl PathMatcher {
    pub fn new(rules: Vec<PathRule>) -> Self {
        Self { rules }
    }

    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let rules = patterns
            .iter()
            .map(|p| p.as_ref().parse())
            .collect::<Result<Vec<PathRule>>>()?;
        Ok(Self::new(rules))
    }

    pub fn default_protected() -> Self {
        Self::from_defaults(DEFAULT_PROTECTED)
    }

    pub fn default_forbidden() -> Self {
        Self::from_defaults(DEFAULT_FORBIDDEN)
    }

    fn from_defaults(patterns: &[&str]) -> Self {
        // The built-in tables contain no `..` segments, so none are dropped.
        Self::new(patterns.iter().filter_map(|p| p.parse().ok()).collect())
    }

    pub fn rules(&self) -> &[PathRule] {
        &self.rules
    }

    pub fn matches(&self, path: &GuardPath) -> bool {
        self.rules.iter().any(|rule| rule.matches(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: &str) -> GuardPath {
        GuardPath::parse(raw).unwrap()
    }

    #[test]
    fn test_normalisation() {
        assert_eq!(p("\\backend\\core\\config.py").as_string(), "backend/core/config.py");
        assert_eq!(p("/./backend//x.py").as_string(), "backend/x.py");
        assert!(GuardPath::parse("backend/../.env").is_err());
        assert!(GuardPath::parse("/").is_err());
        assert!(GuardPath::parse("").is_err());
    }

    #[test]
    fn test_extension() {
        assert_eq!(p("a/B.PY").extension().as_deref(), Some(".py"));
        assert_eq!(p(".env").extension(), None);
        assert_eq!(p("Makefile").extension(), None);
    }

    #[test]
    fn test_rule_parsing() {
        assert_eq!(".env".parse::<PathRule>().unwrap(), PathRule::FileName(".env".into()));
        assert_eq!(".git/".parse::<PathRule>().unwrap(), PathRule::AnySegment(".git".into()));
        assert_eq!(
            "backend/core/".parse::<PathRule>().unwrap(),
            PathRule::Prefix(vec!["backend".into(), "core".into()])
        );
        assert_eq!(
            "backend/api.py".parse::<PathRule>().unwrap(),
            PathRule::SegmentSuffix(vec!["backend".into(), "api.py".into()])
        );
        assert_eq!(
            "exact:backend/api.py".parse::<PathRule>().unwrap(),
            PathRule::Exact(vec!["backend".into(), "api.py".into()])
        );
        assert!("bogus:x".parse::<PathRule>().is_err());
    }

    #[test]
    fn test_suffix_matches_whole_segments() {
        let rule: PathRule = "backend/core/config.py".parse().unwrap();
        assert!(rule.matches(&p("backend/core/config.py")));
        assert!(rule.matches(&p("repo/backend/core/config.py")));
        assert!(!rule.matches(&p("mybackend/core/config.py")));
        assert!(!rule.matches(&p("backend/core/config.py.bak")));
    }

    #[test]
    fn test_default_forbidden() {
        let forbidden = PathMatcher::default_forbidden();
        assert!(forbidden.matches(&p(".env")));
        assert!(forbidden.matches(&p("backend/.env.local")));
        assert!(forbidden.matches(&p(".env.production")));
        assert!(forbidden.matches(&p("deploy/.env.prod.local")));
        assert!(forbidden.matches(&p(".git/config")));
        assert!(forbidden.matches(&p("vendor/lib/.git/HEAD")));
        assert!(!forbidden.matches(&p("backend/x.py")));
        assert!(!forbidden.matches(&p(".envrc")));
        assert!(!forbidden.matches(&p("backend/env.py")));
    }

    #[test]
    fn test_prefix_and_exact() {
        let matcher =
            PathMatcher::from_patterns(&["prefix:deploy/", "exact:README.md"]).unwrap();
        assert!(matcher.matches(&p("deploy/fly.toml")));
        assert!(matcher.matches(&p("README.md")));
        assert!(!matcher.matches(&p("docs/README.md")));
        assert!(!matcher.matches(&p("src/deploy/fly.toml")));
    }

    #[test]
    fn test_display_round_trips() {
        for raw in ["exact:a/b", "prefix:a/", "suffix:a/b", "segment:.git", "name:.env", "family:.env"] {
            let rule: PathRule = raw.parse().unwrap();
            assert_eq!(rule.to_string(), raw);
        }
    }
}
