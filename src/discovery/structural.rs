//! Structural rules: regexes for known response shapes, each paired with
//! the template it proposes.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::StructuralRuleConfig;
use crate::error::{AuraError, Result};

lazy_static! {
    /// Built-in rule library
    static ref DEFAULT_RULES: Vec<StructuralRuleConfig> = [
        ("error_code", r"^Error \S+: .+$", "Error {0}: {1}", None),
        ("numbered_step", r"^Step \S+: .+$", "Step {0}: {1}", Some("instructions")),
        ("weather_report", r"^The weather in .+ is .+\.$", "The weather in {0} is {1}.", Some("facts")),
        ("apology", r"^I'm sorry, but .+\.$", "I'm sorry, but {0}.", Some("limitations")),
        ("offer_help", r"^I'd be happy to help with .+\.$", "I'd be happy to help with {0}.", None),
        ("gratitude", r"^Thank you for .+\.$", "Thank you for {0}.", None),
        ("restatement", r"^You asked about .+\.$", "You asked about {0}.", Some("clarifications")),
        ("note", r"^Note: .+$", "Note: {0}", None),
        ("result", r"^Result: .+$", "Result: {0}", None),
        ("listing_intro", r"^Here is the .+:$", "Here is the {0}:", Some("code_examples")),
    ]
    .iter()
    .map(|(name, regex, template, category)| StructuralRuleConfig {
        name: (*name).to_string(),
        regex: (*regex).to_string(),
        template: (*template).to_string(),
        category: category.map(str::to_string),
    })
    .collect();
}

/// Built-in rule definitions
pub fn default_rules() -> &'static [StructuralRuleConfig] {
    &DEFAULT_RULES
}

/// A compiled structural rule
#[derive(Debug, Clone)]
pub struct StructuralRule {
    name: String,
    regex: Regex,
    template: String,
    category: Option<String>,
}

impl StructuralRule {
    /// Compile a rule definition
    pub fn from_config(config: &StructuralRuleConfig) -> Result<Self> {
        let regex = Regex::new(&config.regex).map_err(|e| {
            AuraError::Config(format!("Structural rule {:?}: {e}", config.name))
        })?;
        Ok(Self {
            name: config.name.clone(),
            regex,
            template: config.template.clone(),
            category: config.category.clone(),
        })
    }

    /// Rule name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Proposed template pattern
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Category override
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Whether `text` has this rule's shape
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parse_pattern;

    #[test]
    fn test_defaults_compile_and_parse() {
        for config in default_rules() {
            StructuralRule::from_config(config).unwrap();
            parse_pattern(&config.template).unwrap();
        }
    }

    #[test]
    fn test_rule_match() {
        let rule = StructuralRule::from_config(&default_rules()[0]).unwrap();
        assert_eq!(rule.name(), "error_code");
        assert!(rule.is_match("Error 404: Not Found"));
        assert!(!rule.is_match("No error here"));
        assert!(rule.category().is_none());
    }
}
