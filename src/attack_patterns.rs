use once_cell::sync::Lazy;
use regex::Regex;

/// Payload pattern that marks a request value as an attack probe
#[derive(Debug, Clone)]
pub struct AttackRule {
    pub id: u32,
    pub description: &'static str,
    pub pattern: Regex,
    pub category: &'static str,
}

/// First rule that fired against a request value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackMatch {
    pub rule_id: u32,
    pub category: &'static str,
    pub matched_value: String,
}

fn rule(id: u32, description: &'static str, pattern: &str, category: &'static str) -> AttackRule {
    AttackRule {
        id,
        description,
        pattern: Regex::new(pattern).unwrap(),
        category,
    }
}

/// Curated rule set for form and query values. SQL rules require context
/// around comment markers; a bare `--` or `#` is allowed.
pub static ATTACK_RULES: Lazy<Vec<AttackRule>> = Lazy::new(|| {
    vec![
        // SQL injection
        rule(942100, "SQL Injection: UNION SELECT", r"(?i)\bunion\b[\s\S]*\bselect\b", "sqli"),
        rule(942110, "SQL Injection: quoted tautology", r"(?i)'\s*(or|and)\s+\S+\s*=\s*\S+", "sqli"),
        rule(
            942120,
            "SQL Injection: stacked statement",
            r"(?i);\s*(drop|delete|truncate|alter|insert|update)\s",
            "sqli",
        ),
        rule(
            942130,
            "SQL Injection: time-based probe",
            r"(?i)(\b(sleep|benchmark|pg_sleep)\s*\(|\bwaitfor\s+delay\b)",
            "sqli",
        ),
        rule(942140, "SQL Injection: catalog and procedure access", r"(?i)(xp_cmdshell|sp_executesql|information_schema)", "sqli"),
        // Cross-site scripting
        rule(941100, "XSS: script tag", r"(?i)<\s*script\b", "xss"),
        rule(941110, "XSS: event handler attribute", r"(?i)\bon(error|load|click|mouseover|focus|submit)\s*=", "xss"),
        rule(941120, "XSS: javascript protocol", r"(?i)javascript\s*:", "xss"),
        rule(941130, "XSS: embedded frame or object", r"(?i)<\s*(iframe|object|embed|svg)\b", "xss"),
        // Path traversal / file inclusion
        rule(930100, "Path Traversal: ../ patterns", r"\.\.[/\\]", "path-traversal"),
        rule(930105, "Path Traversal: encoded dot-dot", r"(?i)%2e%2e(%2f|%5c|/|\\)", "path-traversal"),
        rule(
            930110,
            "Path Traversal: sensitive system files",
            r"(?i)(/etc/passwd|/etc/shadow|/proc/self/environ|boot\.ini|win\.ini)",
            "path-traversal",
        ),
        rule(930120, "File Inclusion: stream wrapper", r"(?i)\b(php|file|phar|expect)://", "path-traversal"),
        // Code evaluation
        rule(
            933100,
            "Code Injection: eval-style call",
            r"(?i)\b(eval|assert|system|exec|passthru|shell_exec|popen|proc_open)\s*\(",
            "eval",
        ),
        rule(933110, "Code Injection: base64 payload decode", r"(?i)\bbase64_decode\s*\(", "eval"),
        rule(933120, "Code Injection: JNDI lookup", r"(?i)\$\{jndi:", "eval"),
        // Server-side template injection
        rule(
            934100,
            "Template Injection: expression probe",
            r"(\{\{|\$\{|<%=?|#\{)\s*\d+\s*\*\s*\d+\s*(\}\}|\}|%>)",
            "template",
        ),
        rule(
            934110,
            "Template Injection: object traversal",
            r"(?i)\{\{[^}]*(__class__|__globals__|__subclasses__|__builtins__)",
            "template",
        ),
    ]
});

/// First rule matching `value`
pub fn match_value(value: &str) -> Option<AttackMatch> {
    if value.is_empty() {
        return None;
    }
    ATTACK_RULES.iter().find_map(|rule| {
        rule.pattern.find(value).map(|m| AttackMatch {
            rule_id: rule.id,
            category: rule.category,
            matched_value: m.as_str().to_string(),
        })
    })
}

/// First match across several values, in iteration order
pub fn match_any<'a, I>(values: I) -> Option<AttackMatch>
where
    I: IntoIterator<Item = &'a str>,
{
    values.into_iter().find_map(match_value)
}
