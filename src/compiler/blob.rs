//! Byte-level encoding of data definitions and instructions.
//!
//! A compiled blob is a sequence of byte slots. A slot is `None` while it
//! still waits for a symbol; zero is an ordinary byte value.

use tracing::trace;

use crate::bits::{extract_bytes_from_text, extract_multiple_number_bytes, float_encoder};
use crate::error::{ParserError, UnresolvedSymbol};
use crate::expr::{rpn, KeywordResolver};
use crate::instructions::InstrDesc;
use crate::parser::{AstDef, AstInstruction};
use crate::token::{Token, TokenType};

/// Start of a placeholder run and the argument it was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnresolvedOffset {
    pub offset: usize,
    pub arg_index: usize,
}

/// Encodes one definition argument into `byte_size`-aligned slots.
pub fn encode_define_token(byte_size: usize, token: &Token) -> Result<Vec<Option<u8>>, ParserError> {
    let bytes = match token.ty {
        TokenType::FloatNumber => {
            let encoder = float_encoder(byte_size).ok_or_else(|| ParserError::IncorrectFloatSize {
                number: token.text.clone(),
                loc: token.loc,
            })?;
            let value = token.float_value().unwrap_or_default();
            // encoders are big-endian
            encoder(value).into_iter().rev().map(Some).collect()
        }
        TokenType::Number => {
            let number = token.number_value().unwrap_or_default();
            extract_multiple_number_bytes(byte_size, number)
                .into_iter()
                .map(Some)
                .collect()
        }
        TokenType::Quote => {
            let text = extract_bytes_from_text(&token.text);
            let padded = text.len().div_ceil(byte_size) * byte_size;
            let mut out: Vec<Option<u8>> = text.into_iter().map(Some).collect();
            out.resize(padded, Some(0));
            out
        }
        TokenType::Bracket | TokenType::Keyword => vec![None; byte_size],
        _ => {
            return Err(ParserError::UnsupportedDefineToken {
                token: token.to_source(),
                loc: token.loc,
            })
        }
    };
    Ok(bytes)
}

#[derive(Debug, Clone)]
pub struct BinaryDefinition {
    byte_size: usize,
    args: Vec<Token>,
    binary: Vec<Option<u8>>,
    unresolved: Vec<UnresolvedOffset>,
}

impl BinaryDefinition {
    pub fn new(byte_size: usize, args: Vec<Token>) -> Self {
        Self {
            byte_size,
            args,
            binary: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    pub fn from_ast(def: &AstDef) -> Self {
        Self::new(def.byte_size, def.args.clone())
    }

    /// Encodes every argument in declaration order.
    pub fn compile(mut self) -> Result<Self, ParserError> {
        let mut binary = Vec::new();
        let mut unresolved = Vec::new();

        for (arg_index, arg) in self.args.iter().enumerate() {
            let offset = binary.len();
            let encoded = encode_define_token(self.byte_size, arg)?;
            if encoded.first().is_some_and(Option::is_none) {
                unresolved.push(UnresolvedOffset { offset, arg_index });
            }
            binary.extend(encoded);
        }

        self.binary = binary;
        self.unresolved = unresolved;
        Ok(self)
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn args(&self) -> &[Token] {
        &self.args
    }

    pub fn binary(&self) -> &[Option<u8>] {
        &self.binary
    }

    pub fn unresolved_offsets(&self) -> &[UnresolvedOffset] {
        &self.unresolved
    }

    pub fn has_unresolved_definitions(&self) -> bool {
        !self.unresolved.is_empty()
    }

    /// Evaluates every pending argument once. Entries that still fail stay
    /// pending for a later call. Returns whether nothing is pending anymore.
    pub fn try_resolve_offsets(&mut self, resolver: &dyn KeywordResolver) -> bool {
        let byte_size = self.byte_size;
        let args = &self.args;
        let binary = &mut self.binary;

        self.unresolved.retain(|pending| {
            let arg = &args[pending.arg_index];
            match rpn(&arg.text, resolver) {
                Ok(value) => {
                    let bytes = extract_multiple_number_bytes(byte_size, value);
                    for (slot, byte) in binary[pending.offset..].iter_mut().zip(bytes) {
                        *slot = Some(byte);
                    }
                    trace!(expression = %arg.text, value, "resolved");
                    false
                }
                Err(_) => true,
            }
        });

        self.unresolved.is_empty()
    }

    /// Pending arguments that still fail against `resolver`, with the failure.
    pub fn unresolved_symbols(&self, resolver: &dyn KeywordResolver) -> Vec<UnresolvedSymbol> {
        self.unresolved
            .iter()
            .filter_map(|pending| {
                let arg = &self.args[pending.arg_index];
                let source = rpn(&arg.text, resolver).err()?;
                Some(UnresolvedSymbol {
                    expression: arg.text.clone(),
                    loc: arg.loc,
                    source,
                })
            })
            .collect()
    }
}

/// Opcode bytes followed by an optional immediate.
#[derive(Debug, Clone)]
pub struct BinaryInstruction {
    desc: &'static InstrDesc,
    operand: BinaryDefinition,
}

impl BinaryInstruction {
    pub fn compile(ast: &AstInstruction) -> Result<Self, ParserError> {
        let operand = BinaryDefinition::new(ast.desc.operand.byte_size(), ast.args.clone()).compile()?;
        Ok(Self { desc: ast.desc, operand })
    }

    pub fn binary(&self) -> Vec<Option<u8>> {
        self.desc
            .opcode
            .iter()
            .copied()
            .map(Some)
            .chain(self.operand.binary().iter().copied())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum BinaryBlob {
    Definition(BinaryDefinition),
    Instruction(BinaryInstruction),
}

impl BinaryBlob {
    fn slots(&self) -> &BinaryDefinition {
        match self {
            BinaryBlob::Definition(def) => def,
            BinaryBlob::Instruction(instr) => &instr.operand,
        }
    }

    fn slots_mut(&mut self) -> &mut BinaryDefinition {
        match self {
            BinaryBlob::Definition(def) => def,
            BinaryBlob::Instruction(instr) => &mut instr.operand,
        }
    }

    pub fn binary(&self) -> Vec<Option<u8>> {
        match self {
            BinaryBlob::Definition(def) => def.binary().to_vec(),
            BinaryBlob::Instruction(instr) => instr.binary(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BinaryBlob::Definition(def) => def.binary().len(),
            BinaryBlob::Instruction(instr) => instr.desc.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.slots().unresolved_offsets().len()
    }

    pub fn try_resolve_offsets(&mut self, resolver: &dyn KeywordResolver) -> bool {
        self.slots_mut().try_resolve_offsets(resolver)
    }

    pub fn unresolved_symbols(&self, resolver: &dyn KeywordResolver) -> Vec<UnresolvedSymbol> {
        self.slots().unresolved_symbols(resolver)
    }
}
