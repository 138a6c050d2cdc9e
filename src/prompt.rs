//! # Prompt templates
//!
//! A prompt template is a string with placeholders. A placeholder is written
//! `{name}`, where the name is one or more word characters (letters, digits,
//! underscore). Anything else between braces is not a placeholder and is left
//! untouched, so malformed braces never raise an error.
//!
//! [PromptTemplate::placeholders] is the deduplicated set of names found in the
//! template. [PromptTemplate::render] substitutes every placeholder from a
//! name-to-value mapping and fails with [errors::MissingValue] when a referenced
//! name has no entry in the mapping. There is deliberately no silent fallback:
//! the row mapper upstream guarantees a value (possibly empty) for every
//! recognized variable, so a missing entry here means the caller skipped that
//! step.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use lazy_static::lazy_static;
use log::warn;
use regex::{Captures, Regex};
use crate::prompt::errors::MissingValue;

lazy_static! {
    static ref PLACEHOLDER_MATCH_RE: Regex = Regex::new(r"\{(\w+)\}").unwrap();
}

/// Extract the deduplicated set of placeholder names from a template string.
pub fn get_placeholders(string: &str) -> HashSet<String> {
    PLACEHOLDER_MATCH_RE.captures_iter(string)
        .map(|captures| captures[1].to_string())
        .collect()
}

/// A prompt template with `{name}` placeholders.
#[derive(Debug, Clone)]
#[readonly::make]
pub struct PromptTemplate {
    /// The template string, immutable
    template: Arc<String>,

    /// The placeholders in the template, readonly
    pub placeholders: HashSet<String>,
}

impl PromptTemplate {
    /// Create a prompt template from a string. Warns if the template does not
    /// have any placeholder, since a placeholder-free template produces the
    /// same prompt for every row.
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let placeholders = get_placeholders(&template);
        if placeholders.is_empty() {
            warn!("Prompt template has no placeholder. If this is intended, ignore this message. \
            Otherwise, check whether you have written placeholders like {{column_name}} correctly.\n\
            Got prompt template:\n\
            {}", template);
        }
        Self {
            template: Arc::new(template),
            placeholders,
        }
    }

    /// Get the template as a string.
    #[inline]
    pub fn str(&self) -> &str {
        &self.template
    }

    /// Substitute every placeholder with its value from `values`.
    /// Returns an error if any placeholder in the template has no entry in
    /// `values`. Names that appear in `values` but not in the template are
    /// ignored.
    pub fn render(&self, values: &HashMap<String, String>) -> Result<String, MissingValue> {
        for name in self.placeholders.iter() {
            if !values.contains_key(name) {
                return Err(MissingValue::new(name, &self.placeholders));
            }
        }
        // Every captured name is checked above, so the lookup cannot miss.
        let rendered = PLACEHOLDER_MATCH_RE.replace_all(self.str(), |captures: &Captures| {
            values.get(&captures[1]).map(String::as_str).unwrap_or_default()
        });
        Ok(rendered.to_string())
    }
}

pub mod errors {
    use std::collections::HashSet;
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// Error when rendering a template that references a placeholder absent
    /// from the supplied value mapping.
    #[derive(Debug, Clone)]
    pub struct MissingValue {
        pub placeholder: String,
        pub template_placeholders: Vec<String>,
    }

    impl MissingValue {
        pub(crate) fn new(placeholder: impl Into<String>, template_placeholders: &HashSet<String>) -> Self {
            MissingValue {
                placeholder: placeholder.into(),
                template_placeholders: template_placeholders.iter().cloned().collect(),
            }
        }
    }

    impl fmt::Display for MissingValue {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "MissingValue: no value supplied for placeholder = {}, template references {:?}",
                   self.placeholder,
                   self.template_placeholders)
        }
    }

    impl Error for MissingValue {}
}

#[cfg(test)]
mod prompt_tests {
    use std::collections::{HashMap, HashSet};
    use super::{get_placeholders, PromptTemplate};

    #[test]
    fn test_get_placeholders() {
        let keys = get_placeholders("{a}");
        assert_eq!(HashSet::from(["a".to_string()]), keys);

        // word characters only; anything else is not a placeholder
        assert_eq!(0, get_placeholders("{a b}").len());
        assert_eq!(0, get_placeholders("{a\n}").len());
        assert_eq!(0, get_placeholders("no braces at all").len());

        let keys = get_placeholders("{a}    {b} and {a}");
        assert_eq!(HashSet::from(["a".to_string(), "b".to_string()]), keys);
    }

    #[test]
    fn test_nested_and_unmatched_braces() {
        // the inner pair still matches, the stray braces do not
        let keys = get_placeholders("{{inner}} and { open");
        assert_eq!(HashSet::from(["inner".to_string()]), keys);
    }

    #[test]
    fn test_render() {
        let template = PromptTemplate::new("{a} and {b} and {a}");
        let mapping = HashMap::from([
            ("a".to_string(), "alice".to_string()),
            ("b".to_string(), "bob".to_string()),
            ("unused".to_string(), "ignored".to_string()),
        ]);
        assert_eq!("alice and bob and alice", template.render(&mapping).unwrap());
    }

    #[test]
    fn test_render_empty_value() {
        let template = PromptTemplate::new("[{a}]");
        let mapping = HashMap::from([("a".to_string(), String::new())]);
        assert_eq!("[]", template.render(&mapping).unwrap());
    }

    #[test]
    fn test_render_missing_value() {
        let template = PromptTemplate::new("Hi {name}, you are {age}");
        let mapping = HashMap::from([("name".to_string(), "alice".to_string())]);
        let err = template.render(&mapping).unwrap_err();
        assert_eq!("age", err.placeholder);
    }
}
