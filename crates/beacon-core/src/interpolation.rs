use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("placeholder regex"));

/// Replace every `${{ expr }}` placeholder for which `resolve` returns a
/// value; unresolved placeholders are left in place.
pub fn interpolate_with<F>(input: &str, resolve: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    PLACEHOLDER
        .replace_all(input, |caps: &regex::Captures| {
            let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
            resolve(expr).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Names a builder binds at expansion time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuilderBinding {
    pub name: String,
    pub worker: String,
    pub environment: String,
    pub image: String,
}

impl BuilderBinding {
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "name" => Some(self.name.clone()),
            "worker" => Some(self.worker.clone()),
            "environment" => Some(self.environment.clone()),
            "image" => Some(self.image.clone()),
            _ => None,
        }
    }

    /// Resolve `${{ builder.* }}` placeholders, leaving property
    /// placeholders for dispatch time.
    pub fn bind(&self, input: &str) -> String {
        interpolate_with(input, |expr| {
            expr.strip_prefix("builder.").and_then(|key| self.lookup(key))
        })
    }
}

/// Context for rendering step commands when a job is dispatched.
#[derive(Debug, Clone, Default)]
pub struct PropertyContext {
    /// Job properties after scheduler/event merging.
    pub properties: BTreeMap<String, String>,
    /// Secret values to mask in outward text.
    pub secrets: Vec<String>,
}

impl PropertyContext {
    pub fn new(properties: BTreeMap<String, String>) -> Self {
        Self {
            properties,
            secrets: Vec::new(),
        }
    }

    /// Interpolate properties in a string.
    ///
    /// Supports:
    /// - `${{ props.NAME }}` - property lookup, empty when missing
    /// - `${{ props.NAME || fallback }}` - property lookup with a default
    pub fn render(&self, input: &str) -> String {
        interpolate_with(input, |expr| self.resolve_expression(expr))
    }

    fn resolve_expression(&self, expr: &str) -> Option<String> {
        let rest = expr.strip_prefix("props.")?;
        let (name, fallback) = match rest.split_once("||") {
            Some((name, fallback)) => (name.trim(), Some(fallback.trim())),
            None => (rest.trim(), None),
        };

        match (self.properties.get(name), fallback) {
            (Some(value), _) => Some(value.clone()),
            (None, Some(fallback)) => Some(unquote(fallback).to_string()),
            (None, None) => Some(String::new()),
        }
    }

    /// Mask secrets in the input string.
    pub fn mask_secrets(&self, input: &str) -> String {
        mask_secrets(input, self.secrets.iter().map(String::as_str))
    }
}

/// Replace every occurrence of each non-empty secret with `***`.
pub fn mask_secrets<'a>(input: &str, secrets: impl IntoIterator<Item = &'a str>) -> String {
    let mut output = input.to_string();
    for value in secrets {
        if !value.is_empty() {
            output = output.replace(value, "***");
        }
    }
    output
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
        .unwrap_or(value)
}
