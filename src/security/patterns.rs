//! Static XSS and SQL-injection signatures
//!
//! Compiled once on first use. Email addresses, plain identifiers and
//! free text without SQL structure never match the SQL set.

use once_cell::sync::Lazy;
use regex::Regex;

static SQL_INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // keyword forms
        r"(?i)\bunion\b(\s+all)?\s+\bselect\b",
        r"(?i)\bselect\s+(\*|[\w\.`\(\)\*]+(\s*,\s*[\w\.`\(\)\*]+)*)\s+from\s+[\w\.`]+",
        r"(?i)\binsert\s+into\b",
        r"(?i)\bdelete\s+from\b",
        r"(?i)\bupdate\s+\w+\s+set\b",
        r"(?i)\b(drop|truncate|alter)\s+(table|database|schema)\b",
        // boolean injection
        r#"(?i)['"]\s*(or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#,
        r"(?i)\b(or|and)\s+\d+\s*=\s*\d+",
        // comment tokens
        r"(--|/\*|\*/)",
        // dangerous functions and procedures
        r"(?i)\b(exec|execute)\s*(\(|\s+(sp_|xp_)\w*)",
        r"(?i)\b(xp_cmdshell|sp_executesql|information_schema|load_file)\b",
        r"(?i)\binto\s+(out|dump)file\b",
        // timing primitives
        r"(?i)\b(sleep|pg_sleep|benchmark)\s*\(",
        r"(?i)\bwaitfor\s+delay\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("Invalid SQL injection pattern regex"))
    .collect()
});

static XSS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<\s*script",
        r"(?i)javascript\s*:",
        r"(?i)vbscript\s*:",
        r"(?i)<[^>]*\bon[a-z]+\s*=",
        r"(?i)<\s*(iframe|object|embed|applet|svg|meta|base)\b",
        r"(?i)expression\s*\(",
        r"(?i)data\s*:\s*text/html",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("Invalid XSS pattern regex"))
    .collect()
});

/// Whether `input` carries a SQL-injection signature
pub fn contains_sql_injection(input: &str) -> bool {
    SQL_INJECTION_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(input))
}

/// Whether `input` carries an XSS signature
pub fn contains_xss(input: &str) -> bool {
    XSS_PATTERNS.iter().any(|pattern| pattern.is_match(input))
}
