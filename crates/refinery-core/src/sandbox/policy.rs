//! Import allow-list for candidate programs.
//!
//! The policy is enforced twice: statically here, before any process is
//! spawned, and dynamically by the harness import hook for imports the scan
//! cannot see (`__import__("os")`, imports built from strings). Anything not
//! on the list is denied.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::Violation;

/// Compiler directives, importable under every policy.
pub const FUTURE_MODULE: &str = "__future__";

/// Top-level modules candidates may import by default.
pub const DEFAULT_ALLOWED_MODULES: &[&str] = &[
    "bisect",
    "collections",
    "copy",
    "dataclasses",
    "fractions",
    "functools",
    "heapq",
    "itertools",
    "math",
    "numpy",
    "operator",
    "re",
    "statistics",
    "string",
    "typing",
];

/// Default-deny set of importable top-level modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPolicy {
    allowed: BTreeSet<String>,
}

impl Default for ImportPolicy {
    fn default() -> Self {
        Self::from_modules(DEFAULT_ALLOWED_MODULES.iter().copied())
    }
}

impl ImportPolicy {
    /// A policy that denies every import.
    pub fn deny_all() -> Self {
        Self {
            allowed: BTreeSet::new(),
        }
    }

    pub fn from_modules<I, S>(modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: modules.into_iter().map(Into::into).collect(),
        }
    }

    /// Append a module and return `self` (builder pattern).
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.allowed.insert(module.into());
        self
    }

    pub fn allows(&self, module: &str) -> bool {
        let top = module.split('.').next().unwrap_or(module);
        !top.is_empty() && (top == FUTURE_MODULE || self.allowed.contains(top))
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    /// Scan `source` for import statements and return the first violation.
    ///
    /// Relative imports (`from . import x`) are always denied. Text inside
    /// string literals is not scanned.
    pub fn check_source(&self, source: &str) -> Result<(), Violation> {
        for module in imported_modules(source) {
            if !self.allows(&module) {
                return Err(Violation::DisallowedImport { module });
            }
        }
        Ok(())
    }
}

fn string_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)""".*?"""|'''.*?'''|"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'"#)
            .expect("valid string literal regex")
    })
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)(?:^|;)[ \t]*import[ \t]+([^;#\n]+)").expect("valid import regex")
    })
}

fn from_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)(?:^|;)[ \t]*from[ \t]+(\.*[\w.]*)[ \t]+import\b")
            .expect("valid from-import regex")
    })
}

/// Module paths named by `import a, b.c as d` and `from x.y import z`.
fn imported_modules(source: &str) -> Vec<String> {
    let stripped = string_literal_re().replace_all(source, "\"\"");
    let source = stripped.as_ref();
    let mut modules = Vec::new();

    for cap in import_re().captures_iter(source) {
        for item in cap[1].split(',') {
            let name = item.split_whitespace().next().unwrap_or("");
            let name = name.trim_matches(|c| c == '(' || c == ')');
            if !name.is_empty() {
                modules.push(name.to_string());
            }
        }
    }

    for cap in from_import_re().captures_iter(source) {
        modules.push(cap[1].to_string());
    }

    modules
}
