//! Built-in security scanner
//!
//! Regex scan for hardcoded secrets and unsafe calls. Used when no external
//! scanner command is configured. Only high and medium findings count
//! toward the safety sub-score.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use super::SecurityScanner;
use crate::error::Result;

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A single pattern hit
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub rule: &'static str,
    pub severity: Severity,
    pub line: usize,
}

lazy_static! {
    static ref PATTERNS: Vec<(&'static str, Regex, Severity)> = vec![
        ("AWS Key", Regex::new(r"AKIA[0-9A-Z]{16}").unwrap(), Severity::High),
        ("Private Key Block", Regex::new(r"-----BEGIN (RSA |EC |OPENSSH )?PRIVATE KEY-----").unwrap(), Severity::High),
        ("Generic Private Key", Regex::new(r#"(?i)private_key\s*=\s*['"][^'"]+['"]"#).unwrap(), Severity::High),
        ("Hardcoded Password", Regex::new(r#"(?i)password\s*=\s*['"][^'"]+['"]"#).unwrap(), Severity::High),
        ("Hardcoded API Key", Regex::new(r#"(?i)api_?key\s*=\s*['"][A-Za-z0-9_\-]{16,}['"]"#).unwrap(), Severity::Medium),
        ("Dynamic Eval", Regex::new(r"\beval\s*\(").unwrap(), Severity::Medium),
        ("Dynamic Exec", Regex::new(r"\bexec\s*\(").unwrap(), Severity::Medium),
        ("Shell Command", Regex::new(r"\bos\.system\s*\(").unwrap(), Severity::Medium),
        ("Subprocess Popen", Regex::new(r"\bsubprocess\.Popen\b").unwrap(), Severity::Medium),
        ("Shell=True", Regex::new(r"shell\s*=\s*True").unwrap(), Severity::Medium),
        ("Pickle Load", Regex::new(r"\bpickle\.loads?\s*\(").unwrap(), Severity::Medium),
        ("TODO Critical", Regex::new(r"(?i)TODO.*(security|hack)").unwrap(), Severity::Low),
        ("IP Address Hardcoded", Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap(), Severity::Low),
    ];
}

/// Regex-based scanner
#[derive(Debug, Default, Clone)]
pub struct PatternScanner;

impl PatternScanner {
    pub fn new() -> Self {
        Self
    }

    /// Every pattern hit, line by line
    pub fn scan(content: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            for (name, regex, severity) in PATTERNS.iter() {
                if regex.is_match(line) {
                    findings.push(Finding {
                        rule: name,
                        severity: *severity,
                        line: idx + 1,
                    });
                }
            }
        }
        findings
    }

    /// Number of findings at medium severity or above
    pub fn count_serious(content: &str) -> usize {
        Self::scan(content)
            .iter()
            .filter(|f| f.severity >= Severity::Medium)
            .count()
    }
}

#[async_trait]
impl SecurityScanner for PatternScanner {
    fn name(&self) -> &str {
        "pattern-scanner"
    }

    async fn count_findings(&self, artifact: &str) -> Result<usize> {
        Ok(Self::count_serious(artifact))
    }
}
