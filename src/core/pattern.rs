//! Layer-name templates with `{placeholder}` segments
//!
//! A layer configured with the pattern `weather_{product}_{level}` matches the
//! incoming layer name `weather_radar_low` and binds `product = radar` and
//! `level = low`. Bindings flow into URL templates through `{layer.NAME}`.

use regex::Regex;

use crate::prelude::{HashMap, HashSet};
use crate::{Error, Result};

/// One piece of a compiled layer pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A compiled layer pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compiles `pattern`, failing on unterminated, adjacent or duplicate placeholders
    pub fn parse(pattern: &str) -> Result<Self> {
        Ok(Self {
            source: pattern.to_string(),
            segments: parse_segments(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the pattern has no placeholders at all
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// Matches `candidate`, returning the placeholder bindings on success
    pub fn matches(&self, candidate: &str) -> Option<HashMap<String, String>> {
        match_segments(&self.segments, candidate)
    }

    /// Replaces every `{name}` with its value from `values`; unknown names are left as-is
    pub fn substitute(&self, values: &HashMap<String, String>) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Placeholder(name) => values
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| format!("{{{}}}", name)),
            })
            .collect()
    }
}

/// Splits a template into alternating literal and placeholder segments
pub fn parse_segments(pattern: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut seen = HashSet::default();
    let mut rest = pattern;

    while !rest.is_empty() {
        let Some(open) = rest.find('{') else {
            segments.push(Segment::Literal(rest.to_string()));
            break;
        };

        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }

        let after_open = &rest[open + 1..];
        let close = after_open.find('}').ok_or_else(|| {
            Error::Config(format!("unterminated placeholder in pattern '{}'", pattern))
        })?;
        let name = &after_open[..close];

        if name.is_empty() || name.contains('{') {
            return Err(Error::Config(format!(
                "invalid placeholder in pattern '{}'",
                pattern
            )));
        }
        if matches!(segments.last(), Some(Segment::Placeholder(_))) {
            return Err(Error::Config(format!(
                "placeholders must be separated by literal text in pattern '{}'",
                pattern
            )));
        }
        if !seen.insert(name.to_string()) {
            return Err(Error::Config(format!(
                "placeholder '{}' appears more than once in pattern '{}'",
                name, pattern
            )));
        }

        segments.push(Segment::Placeholder(name.to_string()));
        rest = &after_open[close + 1..];
    }

    Ok(segments)
}

/// Greedy left-to-right match of `candidate` against `segments`
pub fn match_segments(segments: &[Segment], candidate: &str) -> Option<HashMap<String, String>> {
    let mut bindings = HashMap::default();
    let mut cursor = 0;
    let mut pending: Option<&str> = None;

    for segment in segments {
        match segment {
            Segment::Placeholder(name) => pending = Some(name.as_str()),
            Segment::Literal(literal) => {
                let found = match pending {
                    // A literal that follows nothing must sit exactly at the cursor
                    None => candidate[cursor..].starts_with(literal.as_str()).then_some(cursor),
                    Some(_) => candidate[cursor..].find(literal.as_str()).map(|i| cursor + i),
                }?;

                if let Some(name) = pending.take() {
                    bindings.insert(name.to_string(), candidate[cursor..found].to_string());
                }
                cursor = found + literal.len();
            }
        }
    }

    match pending {
        Some(name) => {
            bindings.insert(name.to_string(), candidate[cursor..].to_string());
        }
        None if cursor != candidate.len() => return None,
        None => {}
    }

    Some(bindings)
}

/// Per-placeholder regular expressions. The key `*` applies to every binding.
#[derive(Debug, Clone, Default)]
pub struct ParamValidator {
    rules: Vec<(String, Regex)>,
}

impl ParamValidator {
    /// Compiles every rule anchored as `^...$`
    pub fn new(rules: &HashMap<String, String>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (name, expr) in rules {
            let regex = Regex::new(&format!("^(?:{})$", expr)).map_err(|e| {
                Error::Config(format!("invalid validator for '{}': {}", name, e))
            })?;
            compiled.push((name.clone(), regex));
        }
        Ok(Self { rules: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Checks every binding against the rules; no rules means everything passes
    pub fn validate(&self, bindings: &HashMap<String, String>) -> bool {
        self.rules.iter().all(|(name, regex)| {
            if name == "*" {
                bindings.values().all(|value| regex.is_match(value))
            } else {
                bindings.get(name).map_or(true, |value| regex.is_match(value))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_match_three_placeholders() {
        let pattern = Pattern::parse("a{b}c{d}e{f}").unwrap();
        let bindings = pattern.matches("aHELLOcWORLDeTEST").unwrap();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings["b"], "HELLO");
        assert_eq!(bindings["d"], "WORLD");
        assert_eq!(bindings["f"], "TEST");
    }

    #[test]
    fn test_parse_errors() {
        assert!(Pattern::parse("a{b}{c}d").is_err());
        assert!(Pattern::parse("a{b}c{b}").is_err());
        assert!(Pattern::parse("a{b").is_err());
        assert!(Pattern::parse("a{}b").is_err());
    }

    #[test]
    fn test_literal_pattern() {
        let pattern = Pattern::parse("osm").unwrap();
        assert!(pattern.is_literal());
        assert!(pattern.matches("osm").is_some());
        assert!(pattern.matches("osm2").is_none());
        assert!(pattern.matches("xosm").is_none());
    }

    #[test]
    fn test_trailing_placeholder_may_be_empty() {
        let pattern = Pattern::parse("layer_{suffix}").unwrap();
        assert_eq!(pattern.matches("layer_").unwrap()["suffix"], "");
        assert_eq!(pattern.matches("layer_abc").unwrap()["suffix"], "abc");
    }

    #[test]
    fn test_leading_placeholder() {
        let pattern = Pattern::parse("{kind}_tiles").unwrap();
        assert_eq!(pattern.matches("roads_tiles").unwrap()["kind"], "roads");
        assert!(pattern.matches("roads_tile").is_none());
    }

    #[test]
    fn test_residual_text_is_no_match() {
        let pattern = Pattern::parse("a{b}c").unwrap();
        assert!(pattern.matches("axxcyy").is_none());
    }

    #[test]
    fn test_substitute() {
        let pattern = Pattern::parse("weather_{product}").unwrap();
        let values = rules(&[("product", "radar")]);
        assert_eq!(pattern.substitute(&values), "weather_radar");
    }

    #[test]
    fn test_validator() {
        let validator = ParamValidator::new(&rules(&[("z", "[0-9]+")])).unwrap();
        assert!(validator.validate(&rules(&[("z", "12")])));
        assert!(!validator.validate(&rules(&[("z", "12a")])));

        let all = ParamValidator::new(&rules(&[("*", "[a-z]+")])).unwrap();
        assert!(all.validate(&rules(&[("a", "abc"), ("b", "def")])));
        assert!(!all.validate(&rules(&[("a", "abc"), ("b", "DEF")])));

        assert!(ParamValidator::default().validate(&rules(&[("a", "anything")])));
    }
}
