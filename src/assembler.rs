use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::compiler::{CompiledUnit, Compiler, Symbol};
use crate::config::AssemblerConfig;
use crate::error::{AsmError, ParserError};
use crate::parser::{AstParser, AstTree};
use crate::preprocessor::PreprocessorInterpreter;
use crate::token::{Lexer, Tokenizer};

#[derive(Debug, Clone)]
pub struct AssembledOutput {
    pub bytes: Vec<u8>,
    pub labels: BTreeMap<String, i64>,
    /// Macro-free source the parser consumed.
    pub preprocessed: String,
    pub unit: CompiledUnit,
}

impl AssembledOutput {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.unit.symbols()
    }
}

/// Runs a single translation unit through preprocessor, parser and compiler.
pub fn assemble(source: &str, config: &AssemblerConfig) -> Result<AssembledOutput, AsmError> {
    let mut interpreter = PreprocessorInterpreter::new(config.clone());
    let (preprocessed, _) = interpreter.exec(source)?;
    debug!(lines = preprocessed.lines().count(), "preprocessed");

    let tokens = Lexer::new(config.prefix_char).tokenize(&preprocessed)?;
    let tree = match AstParser::new(tokens).get_tree() {
        Ok(tree) => tree,
        Err(errors) => {
            for err in errors.iter().skip(1) {
                warn!(%err, "additional parse error");
            }
            match errors.into_iter().next() {
                Some(first) => return Err(first.into()),
                None => AstTree::default(),
            }
        }
    };

    let unit = Compiler::from_config(config).compile(&tree)?;
    let bytes = unit.to_bytes().ok_or_else(|| ParserError::UnresolvedSymbols {
        symbols: unit.unresolved_symbols(),
    })?;
    info!(size = bytes.len(), labels = unit.labels.len(), "assembled");

    Ok(AssembledOutput {
        bytes,
        labels: unit.labels.clone(),
        preprocessed,
        unit,
    })
}
