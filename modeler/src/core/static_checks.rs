//! Static checks on generated solver code, run before the syntax check.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("fence regex is valid")
});

static ORTOOLS_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(from\s+ortools[\w.]*\s+import|import\s+ortools)")
        .expect("ortools regex is valid")
});

/// Calls a solver script has no business making inside the sandbox.
static FORBIDDEN: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?m)^\s*(import|from)\s+subprocess\b", "imports subprocess"),
        (r"(?m)^\s*(import|from)\s+socket\b", "imports socket"),
        (r"(?m)^\s*(import|from)\s+(requests|urllib)\b", "performs network access"),
        (
            r"\bos\.(system|popen|exec\w*|spawn\w*|remove|unlink|rmdir)\s*\(",
            "calls a process or file-removal API from os",
        ),
        (r"\bshutil\.rmtree\s*\(", "calls shutil.rmtree"),
        (r"\b__import__\s*\(", "uses __import__"),
        (r"(^|[^.\w])(eval|exec)\s*\(", "uses eval/exec"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("forbidden regex is valid"), label))
    .collect()
});

/// Strip markdown code fences from agent output.
///
/// Returns the body of the first fenced block when one is present, otherwise
/// the trimmed input.
pub fn extract_code(raw: &str) -> String {
    if let Some(caps) = FENCE_RE.captures(raw)
        && let Some(body) = caps.get(1)
    {
        return body.as_str().trim_end().to_string() + "\n";
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{trimmed}\n")
}

/// Findings that make code invalid without running it.
pub fn static_findings(code: &str) -> Vec<String> {
    if code.trim().is_empty() {
        return vec!["code is empty".to_string()];
    }
    let mut findings = Vec::new();
    if !ORTOOLS_IMPORT_RE.is_match(code) {
        findings.push("code does not import ortools".to_string());
    }
    for (re, label) in FORBIDDEN.iter() {
        if re.is_match(code) {
            findings.push(format!("code {label}"));
        }
    }
    findings
}
