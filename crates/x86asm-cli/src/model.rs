use anyhow::{Context, Result};
use std::path::Path;

use x86asm_rs::compiler::Symbol;
use x86asm_rs::AssemblerConfig;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SymbolKV {
    pub name: String,
    pub addr: i64,
}

impl From<Symbol> for SymbolKV {
    fn from(s: Symbol) -> Self {
        Self {
            name: s.name,
            addr: s.addr,
        }
    }
}

pub fn parse_i64(s: &str) -> Result<i64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Ok(i64::from_str_radix(hex, 16)?)
    } else {
        Ok(s.parse::<i64>()?)
    }
}

/// `NAME` or `NAME=VALUE`.
pub fn parse_define(s: &str) -> (String, Option<String>) {
    match s.split_once('=') {
        Some((name, value)) => (name.trim().to_string(), Some(value.trim().to_string())),
        None => (s.trim().to_string(), None),
    }
}

pub fn load_config(path: Option<&Path>) -> Result<AssemblerConfig> {
    let Some(path) = path else {
        return Ok(AssemblerConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    AssemblerConfig::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_and_numbers() {
        assert_eq!(parse_define("DEBUG"), ("DEBUG".to_string(), None));
        assert_eq!(parse_define("N = 4"), ("N".to_string(), Some("4".to_string())));
        assert_eq!(parse_i64("0x7C00").unwrap(), 0x7C00);
        assert_eq!(parse_i64("-3").unwrap(), -3);
        assert!(parse_i64("zz").is_err());
    }
}
