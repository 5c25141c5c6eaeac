//! Static attack-signature libraries.
//!
//! # Responsibilities
//! - Classify strings against path, SQL, XSS and scanner signatures
//! - Hold the NoSQL operator and dangerous identifier token lists
//!
//! # Design Decisions
//! - Compiled once on first use, never mutated
//! - A matcher only answers "does this string exhibit the signature";
//!   sanitizing is the caller's job

use once_cell::sync::Lazy;
use regex::Regex;

use crate::security::types::ViolationCode;

/// A named signature.
#[derive(Debug)]
pub struct Rule {
    pub name: &'static str,
    pub pattern: Regex,
}

/// Signatures grouped by attack class, tied to one violation code.
#[derive(Debug)]
pub struct RuleSet {
    code: ViolationCode,
    rules: Vec<Rule>,
}

impl RuleSet {
    fn compile(code: ViolationCode, specs: &[(&'static str, &'static str)]) -> Self {
        let rules = specs
            .iter()
            .map(|(name, source)| Rule {
                name,
                pattern: Regex::new(source)
                    .unwrap_or_else(|e| panic!("invalid built-in pattern {name}: {e}")),
            })
            .collect();
        Self { code, rules }
    }

    /// Violation code raised when any rule matches.
    pub fn code(&self) -> ViolationCode {
        self.code
    }

    /// First rule matching the input, if any.
    pub fn first_match(&self, input: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.pattern.is_match(input))
    }

    pub fn is_match(&self, input: &str) -> bool {
        self.first_match(input).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Directory traversal and path injection.
pub static PATH_INJECTION: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::compile(
        ViolationCode::PathInjection,
        &[
            ("directory_traversal", r"\.\."),
            ("encoded_traversal", r"(?i)\.\.%2f"),
            ("double_encoded_traversal", r"(?i)\.\.%252f"),
            ("encoded_dots", r"(?i)%2e%2e"),
            ("overlong_utf8_traversal", r"(?i)\.\.%c0%af"),
            ("alternate_encoding_traversal", r"(?i)\.\.%c1%1c"),
            ("path_separator", r"[/\\]"),
            ("null_byte", r"\x00"),
            ("control_character", r"[\x00-\x1f\x7f]"),
            ("invalid_filename_character", r#"[<>:"|*?]"#),
            ("reserved_device_name", r"(?i)^(CON|PRN|AUX|NUL|COM[1-9]|LPT[1-9])$"),
            ("template_injection", r"\$\{.*\}"),
            ("encoded_null", r"%00"),
            ("traversal_command_chain", r"\.\.[;|&]"),
        ],
    )
});

/// SQL injection heuristics.
pub static SQL_INJECTION: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::compile(
        ViolationCode::SqlInjection,
        &[
            (
                "quote_or_statement",
                r"(?i)('|(\\')|(;)|(\s*(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|EXECUTE)\s+))",
            ),
            ("union_or_boolean", r"(?i)(UNION\s+SELECT)|(\s+OR\s+)|(\s+AND\s+)"),
            ("comment_marker", r"(-{2})|(/\*)|(\*/)"),
            ("procedure_or_hex", r"(?i)(xp_|sp_|0x[0-9a-f]+)"),
            ("logical_operator", r"(\|\||&&)"),
            ("cast_function", r"(?i)(CAST|CONVERT|CHAR|NCHAR|VARCHAR|NVARCHAR)\s*\("),
            ("time_based", r"(?i)(WAITFOR|DELAY|BENCHMARK|SLEEP)"),
            ("file_operation", r"(?i)(INTO\s+(OUTFILE|DUMPFILE))"),
        ],
    )
});

/// Cross-site scripting.
pub static XSS: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::compile(
        ViolationCode::XssDetected,
        &[
            ("script_tag", r"(?is)<script[^>]*>.*?</script>"),
            ("javascript_scheme", r"(?i)javascript:"),
            ("event_handler", r"(?i)on\w+\s*="),
            ("iframe_tag", r"(?i)<iframe"),
            ("object_tag", r"(?i)<object"),
            ("embed_tag", r"(?i)<embed"),
            ("applet_tag", r"(?i)<applet"),
            ("html_data_uri", r"(?i)data:text/html"),
            ("vbscript_scheme", r"(?i)vbscript:"),
        ],
    )
});

/// Known scanner and attack tool user agents.
pub static SCANNER_USER_AGENT: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::compile(
        ViolationCode::SuspiciousUserAgent,
        &[(
            "scanner_tool",
            r"(?i)(sqlmap|nikto|nmap|burp|acunetix|nessus|metasploit|w3af|havij|owasp)",
        )],
    )
});

/// Private IPv4 ranges smuggled through `X-Forwarded-For`.
pub static PRIVATE_FORWARD: Lazy<RuleSet> = Lazy::new(|| {
    RuleSet::compile(
        ViolationCode::PrivateIpForward,
        &[(
            "private_range",
            r"^\s*(10\.|172\.(1[6-9]|2[0-9]|3[0-1])\.|192\.168\.)",
        )],
    )
});

/// Query-operator tokens understood by document stores.
pub const NOSQL_OPERATORS: &[&str] = &[
    "$where", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin",
    "$regex", "$exists", "$type", "$mod", "$all", "$size", "$elemMatch",
    "$or", "$and", "$not", "$nor", "$text", "$search", "$geoWithin",
    "$geoIntersects", "$near", "$nearSphere", "$geometry", "$maxDistance",
    "$minDistance", "$polygon", "$center", "$centerSphere", "$box",
    "$expr", "$jsonSchema", "$comment", "$meta",
];

/// Identifiers that enable code execution or prototype access in JavaScript backends.
pub const DANGEROUS_IDENTIFIERS: &[&str] = &[
    "eval", "Function", "setTimeout", "setInterval", "exec",
    "execSync", "spawn", "spawnSync", "__proto__", "constructor",
    "prototype", "process", "require", "global", "module",
];

/// Keys that reach an object's prototype chain.
pub const POLLUTION_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// First NoSQL operator token contained in the input.
pub fn find_nosql_operator(input: &str) -> Option<&'static str> {
    NOSQL_OPERATORS.iter().copied().find(|op| input.contains(op))
}

/// First dangerous identifier contained in the input.
pub fn find_dangerous_identifier(input: &str) -> Option<&'static str> {
    DANGEROUS_IDENTIFIERS.iter().copied().find(|id| input.contains(id))
}

pub fn is_nosql_operator_key(key: &str) -> bool {
    key.starts_with('$') || NOSQL_OPERATORS.contains(&key)
}

pub fn is_pollution_key(key: &str) -> bool {
    POLLUTION_KEYS.contains(&key)
}

/// Keys naming executable identifiers, excluding the prototype keys.
pub fn is_dangerous_function_key(key: &str) -> bool {
    !is_pollution_key(key) && DANGEROUS_IDENTIFIERS.contains(&key)
}

/// Control characters in the C0 range plus DEL.
pub fn is_control(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{1f}' | '\u{7f}')
}
