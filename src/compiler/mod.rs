//! Address layout and the offset resolution loop.

pub mod blob;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::AssemblerConfig;
use crate::error::{ParserError, UnresolvedSymbol};
use crate::expr::{rpn, NoKeywords};
use crate::parser::{AstNode, AstTree};
use crate::token::{join_tokens, TokenLocation};

pub use blob::{encode_define_token, BinaryBlob, BinaryDefinition, BinaryInstruction, UnresolvedOffset};

/// Blob together with the address its first byte lands on.
#[derive(Debug, Clone)]
pub struct PlacedBlob {
    pub addr: i64,
    pub blob: BinaryBlob,
}

#[derive(Debug, Clone)]
struct PendingEqu {
    name: String,
    expression: String,
    addr: i64,
    loc: TokenLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub addr: i64,
}

/// `$` is the address of the blob being resolved, `$$` the unit origin.
fn lookup_symbol(labels: &BTreeMap<String, i64>, origin: i64, here: i64, name: &str) -> Option<i64> {
    match name {
        "$" => Some(here),
        "$$" => Some(origin),
        _ => labels.get(name).copied(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompiledUnit {
    pub origin: i64,
    pub blobs: Vec<PlacedBlob>,
    /// Labels and resolved `equ` constants.
    pub labels: BTreeMap<String, i64>,
    equs: Vec<PendingEqu>,
}

impl CompiledUnit {
    pub fn pending_count(&self) -> usize {
        self.equs.len() + self.blobs.iter().map(|b| b.blob.pending_count()).sum::<usize>()
    }

    pub fn size(&self) -> usize {
        self.blobs.iter().map(|b| b.blob.len()).sum()
    }

    /// One pass over every pending constant and placeholder. Returns the
    /// pending count afterwards.
    pub fn resolve_pass(&mut self) -> usize {
        let Self {
            origin,
            blobs,
            labels,
            equs,
        } = self;

        let mut resolved = Vec::new();
        equs.retain(|equ| {
            let value = rpn(&equ.expression, &|n: &str| lookup_symbol(labels, *origin, equ.addr, n));
            match value {
                Ok(value) => {
                    resolved.push((equ.name.clone(), value));
                    false
                }
                Err(_) => true,
            }
        });
        labels.extend(resolved);

        for placed in blobs.iter_mut() {
            let addr = placed.addr;
            placed
                .blob
                .try_resolve_offsets(&|n: &str| lookup_symbol(labels, *origin, addr, n));
        }

        self.pending_count()
    }

    /// Runs passes until nothing is pending or a pass makes no progress.
    pub fn resolve(&mut self) -> Result<(), ParserError> {
        let mut pass = 0;
        loop {
            let before = self.pending_count();
            if before == 0 {
                return Ok(());
            }
            pass += 1;
            let after = self.resolve_pass();
            debug!(pass, before, after, "resolution pass");
            if after == 0 {
                return Ok(());
            }
            if after == before {
                return Err(ParserError::UnresolvedSymbols {
                    symbols: self.unresolved_symbols(),
                });
            }
        }
    }

    /// Every pending constant and placeholder, each with the error it fails on
    /// against the current symbol table.
    pub fn unresolved_symbols(&self) -> Vec<UnresolvedSymbol> {
        let (labels, origin) = (&self.labels, self.origin);
        let equs = self.equs.iter().filter_map(|equ| {
            let source = rpn(&equ.expression, &|n: &str| lookup_symbol(labels, origin, equ.addr, n)).err()?;
            Some(UnresolvedSymbol {
                expression: equ.expression.clone(),
                loc: equ.loc,
                source,
            })
        });
        let blobs = self.blobs.iter().flat_map(|placed| {
            let addr = placed.addr;
            placed
                .blob
                .unresolved_symbols(&|n: &str| lookup_symbol(labels, origin, addr, n))
        });
        equs.chain(blobs).collect()
    }

    /// Final image, `None` while any slot is still a placeholder.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        self.blobs.iter().flat_map(|b| b.blob.binary()).collect()
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.labels
            .iter()
            .map(|(name, addr)| Symbol {
                name: name.clone(),
                addr: *addr,
            })
            .collect()
    }

    fn ensure_undefined(&self, name: &str, loc: TokenLocation) -> Result<(), ParserError> {
        if self.labels.contains_key(name) || self.equs.iter().any(|e| e.name == name) {
            return Err(ParserError::LabelAlreadyDefined {
                name: name.to_string(),
                loc,
            });
        }
        Ok(())
    }

    fn define_label(&mut self, name: &str, value: i64, loc: TokenLocation) -> Result<(), ParserError> {
        self.ensure_undefined(name, loc)?;
        self.labels.insert(name.to_string(), value);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Compiler {
    origin: i64,
    max_times_iterations: usize,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::from_config(&AssemblerConfig::default())
    }
}

impl Compiler {
    pub fn new(origin: i64) -> Self {
        Self {
            origin,
            ..Self::default()
        }
    }

    pub fn from_config(config: &AssemblerConfig) -> Self {
        Self {
            origin: config.origin,
            max_times_iterations: config.max_times_iterations,
        }
    }

    /// Caps the total number of `times` repetitions unrolled per unit.
    pub fn with_times_limit(mut self, limit: usize) -> Self {
        self.max_times_iterations = limit;
        self
    }

    /// Layout followed by resolution to a fixed point.
    pub fn compile(&self, tree: &AstTree) -> Result<CompiledUnit, ParserError> {
        let mut unit = self.layout(tree)?;
        unit.resolve()?;
        Ok(unit)
    }

    /// Encodes every node and assigns addresses. Placeholders stay pending.
    pub fn layout(&self, tree: &AstTree) -> Result<CompiledUnit, ParserError> {
        let mut unit = CompiledUnit {
            origin: self.origin_of(tree)?,
            ..CompiledUnit::default()
        };
        let mut state = LayoutState {
            cursor: unit.origin,
            unrolled: 0,
            times_limit: self.max_times_iterations,
        };
        place(&tree.nodes, &mut unit, &mut state)?;
        debug!(
            origin = unit.origin,
            size = unit.size(),
            blobs = unit.blobs.len(),
            pending = unit.pending_count(),
            "layout done"
        );
        Ok(unit)
    }

    fn origin_of(&self, tree: &AstTree) -> Result<i64, ParserError> {
        let mut origin = self.origin;
        let mut seen = false;
        for node in &tree.nodes {
            if let AstNode::Org(org) = node {
                if seen {
                    warn!(loc = %org.loc.start, "org redefined, last one wins");
                }
                seen = true;
                origin = rpn(&join_tokens(&org.expression), &NoKeywords).map_err(|source| ParserError::Math {
                    source,
                    loc: org.loc.start,
                })?;
            }
        }
        Ok(origin)
    }
}

struct LayoutState {
    cursor: i64,
    /// `times` repetitions placed so far, nested ones included.
    unrolled: usize,
    times_limit: usize,
}

fn place(nodes: &[AstNode], unit: &mut CompiledUnit, state: &mut LayoutState) -> Result<(), ParserError> {
    for node in nodes {
        let cursor = state.cursor;
        trace!(%node, addr = cursor, "place");
        match node {
            AstNode::Label(label) => unit.define_label(&label.name, cursor, label.loc.start)?,
            AstNode::Equ(equ) => {
                let expression = join_tokens(&equ.expression);
                let value = rpn(&expression, &|n: &str| lookup_symbol(&unit.labels, unit.origin, cursor, n));
                match value {
                    Ok(value) => unit.define_label(&equ.name, value, equ.loc.start)?,
                    Err(_) => {
                        unit.ensure_undefined(&equ.name, equ.loc.start)?;
                        unit.equs.push(PendingEqu {
                            name: equ.name.clone(),
                            expression,
                            addr: cursor,
                            loc: equ.loc.start,
                        });
                    }
                }
            }
            AstNode::Org(_) => {}
            AstNode::Def(def) => {
                let blob = BinaryBlob::Definition(BinaryDefinition::from_ast(def).compile()?);
                push_blob(unit, &mut state.cursor, blob);
            }
            AstNode::Instruction(instr) => {
                let blob = BinaryBlob::Instruction(BinaryInstruction::compile(instr)?);
                push_blob(unit, &mut state.cursor, blob);
            }
            AstNode::Times(times) => {
                let expression = join_tokens(&times.expression);
                let count = rpn(&expression, &|n: &str| lookup_symbol(&unit.labels, unit.origin, cursor, n))
                    .map_err(|source| ParserError::Math {
                        source,
                        loc: times.loc.start,
                    })?;
                let Ok(repeats) = usize::try_from(count) else {
                    return Err(ParserError::IncorrectTimesValue {
                        value: count,
                        loc: times.loc.start,
                    });
                };
                state.unrolled = state.unrolled.saturating_add(repeats);
                if state.unrolled > state.times_limit {
                    return Err(ParserError::TimesLimitExceeded {
                        limit: state.times_limit,
                        loc: times.loc.start,
                    });
                }
                debug!(%expression, count, addr = cursor, "unrolling times");
                for _ in 0..repeats {
                    place(&times.repeated.nodes, unit, state)?;
                }
            }
        }
    }
    Ok(())
}

fn push_blob(unit: &mut CompiledUnit, cursor: &mut i64, blob: BinaryBlob) {
    let addr = *cursor;
    *cursor += blob.len() as i64;
    unit.blobs.push(PlacedBlob { addr, blob });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::AstParser;
    use crate::token::tokenize;

    fn layout(src: &str) -> CompiledUnit {
        let tree = AstParser::new(tokenize(src).unwrap()).get_tree().unwrap();
        Compiler::default().layout(&tree).unwrap()
    }

    #[test]
    fn forward_reference_pending_until_resolved() {
        let mut unit = layout("dw target\ntarget: db 1\n");
        assert_eq!(unit.pending_count(), 1);
        assert_eq!(unit.to_bytes(), None);
        unit.resolve().unwrap();
        assert_eq!(unit.pending_count(), 0);
        assert_eq!(unit.to_bytes(), Some(vec![0x02, 0x00, 0x01]));
    }

    #[test]
    fn equ_chain_resolves_over_passes() {
        let mut unit = layout("dw c\nc equ b + 1\nb equ a * 2\na equ end\nend:\n");
        unit.resolve().unwrap();
        assert_eq!(unit.labels.get("c"), Some(&5));
        assert_eq!(unit.to_bytes(), Some(vec![5, 0]));
    }

    #[test]
    fn unresolved_symbols_are_reported_together() {
        let mut unit = layout("db missing\ndw other + 1\n");
        match unit.resolve() {
            Err(ParserError::UnresolvedSymbols { symbols }) => {
                let names: Vec<&str> = symbols.iter().map(|s| s.expression.as_str()).collect();
                assert_eq!(names, vec!["missing", "other + 1"]);
                assert!(symbols[1].to_string().contains("unknown keyword `other`"));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn duplicate_labels_fail() {
        let tree = AstParser::new(tokenize("a:\nnop\na:\n").unwrap()).get_tree().unwrap();
        assert!(matches!(
            Compiler::default().layout(&tree),
            Err(ParserError::LabelAlreadyDefined { .. })
        ));
    }

    #[test]
    fn dollar_is_blob_address() {
        let mut unit = layout("org 0x100\nnop\ndw $, $$\ntimes 2 db $ - $$\n");
        unit.resolve().unwrap();
        assert_eq!(
            unit.to_bytes(),
            Some(vec![0x90, 0x01, 0x01, 0x00, 0x01, 0x05, 0x06])
        );
    }
}
