use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::token::{Token, TokenLocation};

use super::grammar::PreprocessorNode;

#[derive(Debug, Clone, PartialEq)]
pub enum InterpreterValue {
    Text(String),
    Number(i64),
}

impl InterpreterValue {
    pub fn as_number(&self) -> Option<i64> {
        match self {
            InterpreterValue::Number(n) => Some(*n),
            InterpreterValue::Text(_) => None,
        }
    }
}

impl fmt::Display for InterpreterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpreterValue::Text(s) => f.write_str(s),
            InterpreterValue::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallableBody {
    /// `%define` body, params are bound by name.
    Inline { params: Vec<String>, tokens: Vec<Token> },
    /// `%macro` body, params are bound as `%1..%N`.
    MultiLine(Vec<PreprocessorNode>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Callable {
    pub name: String,
    pub case_sensitive: bool,
    pub args_count: usize,
    pub body: CallableBody,
    pub loc: TokenLocation,
}

#[derive(Debug, Clone, Default)]
pub struct CallableTable {
    pub sensitive: HashMap<String, Vec<Rc<Callable>>>,
    pub non_sensitive: HashMap<String, Vec<Rc<Callable>>>,
}

impl CallableTable {
    /// Table a callable lives in, keyed the way that table is keyed.
    pub fn slot_mut(&mut self, name: &str, case_sensitive: bool) -> (&mut HashMap<String, Vec<Rc<Callable>>>, String) {
        if case_sensitive {
            (&mut self.sensitive, name.to_string())
        } else {
            (&mut self.non_sensitive, name.to_lowercase())
        }
    }

    pub fn lookup(&self, name: &str) -> Vec<Rc<Callable>> {
        let mut found: Vec<Rc<Callable>> = self.sensitive.get(name).cloned().unwrap_or_default();
        if let Some(list) = self.non_sensitive.get(&name.to_lowercase()) {
            found.extend(list.iter().cloned());
        }
        found
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "..@{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PreprocessorScope {
    pub variables: HashMap<String, InterpreterValue>,
    pub callables: CallableTable,
    pub id: ScopeId,
}

impl PreprocessorScope {
    pub fn new(id: ScopeId) -> Self {
        Self {
            variables: HashMap::new(),
            callables: CallableTable::default(),
            id,
        }
    }
}
