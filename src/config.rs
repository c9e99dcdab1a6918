use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Character introducing preprocessor directives (`%define`, `%[..]`).
    pub prefix_char: char,
    /// Base address of the unit, `org` overrides it.
    pub origin: i64,
    pub max_expansion_iterations: usize,
    pub max_recursion_depth: usize,
    /// Total `%rep` iterations allowed per unit.
    pub max_rep_iterations: usize,
    /// Total `times` repetitions unrolled per unit.
    pub max_times_iterations: usize,
    /// Preprocessor source run in the root scope before the unit.
    pub pre_exec: Option<String>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            prefix_char: '%',
            origin: 0,
            max_expansion_iterations: 256,
            max_recursion_depth: 128,
            max_rep_iterations: 100_000,
            max_times_iterations: 1_000_000,
            pre_exec: None,
        }
    }
}

impl AssemblerConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Appends a `%define NAME VALUE` predefinition.
    pub fn with_define(mut self, name: &str, value: Option<&str>) -> Self {
        let line = format!("{}define {} {}\n", self.prefix_char, name, value.unwrap_or(""));
        self.pre_exec.get_or_insert_with(String::new).push_str(&line);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = AssemblerConfig::from_json(r#"{ "origin": 31744 }"#).unwrap();
        assert_eq!(cfg.origin, 0x7C00);
        assert_eq!(cfg.prefix_char, '%');
        assert_eq!(cfg.max_expansion_iterations, 256);
        assert_eq!(cfg.max_times_iterations, 1_000_000);
    }

    #[test]
    fn defines_accumulate() {
        let cfg = AssemblerConfig::default()
            .with_define("DEBUG", Some("1"))
            .with_define("FLAG", None);
        assert_eq!(cfg.pre_exec.as_deref(), Some("%define DEBUG 1\n%define FLAG \n"));
    }
}
