use serde::Serialize;

/// Immediate operand following the opcode bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperandForm {
    None,
    Imm8,
    Imm16,
}

impl OperandForm {
    pub fn args_count(self) -> usize {
        match self {
            OperandForm::None => 0,
            OperandForm::Imm8 | OperandForm::Imm16 => 1,
        }
    }

    pub fn byte_size(self) -> usize {
        match self {
            OperandForm::None => 0,
            OperandForm::Imm8 => 1,
            OperandForm::Imm16 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct InstrDesc {
    pub mnemonic: &'static str,
    pub opcode: &'static [u8],
    pub operand: OperandForm,
}

impl InstrDesc {
    pub fn size(&self) -> usize {
        self.opcode.len() + self.operand.byte_size()
    }
}

const fn op(mnemonic: &'static str, opcode: &'static [u8], operand: OperandForm) -> InstrDesc {
    InstrDesc {
        mnemonic,
        opcode,
        operand,
    }
}

pub const TABLE: &[InstrDesc] = &[
    op("nop", &[0x90], OperandForm::None),
    op("hlt", &[0xF4], OperandForm::None),
    op("ret", &[0xC3], OperandForm::None),
    op("ret", &[0xC2], OperandForm::Imm16),
    op("retf", &[0xCB], OperandForm::None),
    op("retf", &[0xCA], OperandForm::Imm16),
    op("cli", &[0xFA], OperandForm::None),
    op("sti", &[0xFB], OperandForm::None),
    op("clc", &[0xF8], OperandForm::None),
    op("stc", &[0xF9], OperandForm::None),
    op("cld", &[0xFC], OperandForm::None),
    op("std", &[0xFD], OperandForm::None),
    op("cmc", &[0xF5], OperandForm::None),
    op("pushf", &[0x9C], OperandForm::None),
    op("popf", &[0x9D], OperandForm::None),
    op("pusha", &[0x60], OperandForm::None),
    op("popa", &[0x61], OperandForm::None),
    op("lodsb", &[0xAC], OperandForm::None),
    op("stosb", &[0xAA], OperandForm::None),
    op("movsb", &[0xA4], OperandForm::None),
    op("int3", &[0xCC], OperandForm::None),
    op("int", &[0xCD], OperandForm::Imm8),
    op("into", &[0xCE], OperandForm::None),
    op("iret", &[0xCF], OperandForm::None),
    op("cbw", &[0x98], OperandForm::None),
    op("cwd", &[0x99], OperandForm::None),
    op("lahf", &[0x9F], OperandForm::None),
    op("sahf", &[0x9E], OperandForm::None),
    op("xlatb", &[0xD7], OperandForm::None),
    op("push", &[0x68], OperandForm::Imm16),
    op("aam", &[0xD4], OperandForm::Imm8),
    op("aad", &[0xD5], OperandForm::Imm8),
];

/// Register names; reserved like mnemonics.
pub const REGISTERS: &[&str] = &[
    "al", "cl", "dl", "bl", "ah", "ch", "dh", "bh", "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "eax", "ecx",
    "edx", "ebx", "esp", "ebp", "esi", "edi", "cs", "ds", "es", "fs", "gs", "ss",
];

pub fn is_mnemonic(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    TABLE.iter().any(|d| d.mnemonic == lower)
}

pub fn is_register(name: &str) -> bool {
    REGISTERS.contains(&name.to_ascii_lowercase().as_str())
}

/// Forms of `mnemonic`, in table order.
pub fn forms(mnemonic: &str) -> impl Iterator<Item = &'static InstrDesc> {
    let lower = mnemonic.to_ascii_lowercase();
    TABLE.iter().filter(move |d| d.mnemonic == lower)
}

pub fn lookup(mnemonic: &str, args_count: usize) -> Option<&'static InstrDesc> {
    forms(mnemonic).find(|d| d.operand.args_count() == args_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overloaded_ret() {
        assert_eq!(lookup("RET", 0).map(|d| d.opcode), Some(&[0xC3u8][..]));
        let ret_imm = lookup("ret", 1).unwrap();
        assert_eq!(ret_imm.opcode, &[0xC2]);
        assert_eq!(ret_imm.size(), 3);
        assert!(lookup("nop", 1).is_none());
        assert!(lookup("mov", 2).is_none());
    }

    #[test]
    fn reserved_names() {
        assert!(is_mnemonic("NOP"));
        assert!(is_register("Ax"));
        assert!(!is_register("foo"));
    }
}
