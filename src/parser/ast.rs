use std::fmt;

use crate::instructions::InstrDesc;
use crate::preprocessor::NodeLocation;
use crate::token::{join_tokens, Token};

/// Data directive keywords and their element size.
pub const DEF_KEYWORDS: &[(&str, usize)] = &[("db", 1), ("dw", 2), ("dd", 4), ("dq", 8), ("dt", 10)];

pub fn def_byte_size(name: &str) -> Option<usize> {
    let lower = name.to_ascii_lowercase();
    DEF_KEYWORDS.iter().find(|(k, _)| *k == lower).map(|(_, size)| *size)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstLabel {
    pub name: String,
    pub loc: NodeLocation,
}

#[derive(Debug, Clone)]
pub struct AstInstruction {
    pub desc: &'static InstrDesc,
    /// One expression token per operand.
    pub args: Vec<Token>,
    pub loc: NodeLocation,
}

/// `db`/`dw`/`dd`/`dq`/`dt` with one token per comma separated argument.
#[derive(Debug, Clone, PartialEq)]
pub struct AstDef {
    pub byte_size: usize,
    pub args: Vec<Token>,
    pub loc: NodeLocation,
}

#[derive(Debug, Clone)]
pub struct AstTimes {
    /// Count expression, evaluated once addresses are being assigned.
    pub expression: Vec<Token>,
    pub repeated: AstTree,
    pub loc: NodeLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstEqu {
    pub name: String,
    pub expression: Vec<Token>,
    pub loc: NodeLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstOrg {
    pub expression: Vec<Token>,
    pub loc: NodeLocation,
}

#[derive(Debug, Clone)]
pub enum AstNode {
    Label(AstLabel),
    Instruction(AstInstruction),
    Def(AstDef),
    Times(AstTimes),
    Equ(AstEqu),
    Org(AstOrg),
}

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AstNode::Label(n) => write!(f, "{}:", n.name),
            AstNode::Instruction(n) => {
                f.write_str(n.desc.mnemonic)?;
                if !n.args.is_empty() {
                    write!(f, " {}", join_tokens(&n.args))?;
                }
                Ok(())
            }
            AstNode::Def(n) => {
                let keyword = DEF_KEYWORDS
                    .iter()
                    .find(|(_, size)| *size == n.byte_size)
                    .map_or("db", |(k, _)| k);
                let args: Vec<String> = n.args.iter().map(Token::to_source).collect();
                write!(f, "{keyword} {}", args.join(", "))
            }
            AstNode::Times(n) => write!(f, "times {}", join_tokens(&n.expression)),
            AstNode::Equ(n) => write!(f, "{} equ {}", n.name, join_tokens(&n.expression)),
            AstNode::Org(n) => write!(f, "org {}", join_tokens(&n.expression)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AstTree {
    pub nodes: Vec<AstNode>,
}

impl AstTree {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
