use pretty_assertions::assert_eq;
use x86asm_rs::bits::extract_multiple_number_bytes;
use x86asm_rs::compiler::{BinaryBlob, Compiler};
use x86asm_rs::{tokenize, AstParser, AstTree, ParserError};

fn tree(src: &str) -> AstTree {
    AstParser::new(tokenize(src).unwrap()).get_tree().unwrap()
}

#[test]
fn pending_offsets_before_and_after_resolution() {
    let mut unit = Compiler::default().layout(&tree("dw target\ntarget: db 1\n")).unwrap();
    assert_eq!(unit.pending_count(), 1);

    let remaining = unit.resolve_pass();
    assert_eq!(remaining, 0);
    let target = unit.labels["target"];
    let bytes = unit.to_bytes().unwrap();
    assert_eq!(bytes[..2].to_vec(), extract_multiple_number_bytes(2, target));
}

#[test]
fn resolved_blobs_are_not_rewritten() {
    let mut unit = Compiler::default().layout(&tree("dd here\nhere:\n")).unwrap();
    unit.resolve().unwrap();
    let first = unit.to_bytes();

    unit.labels.insert("here".into(), 0x5555);
    unit.resolve_pass();
    assert_eq!(unit.to_bytes(), first);
}

#[test]
fn each_times_repetition_is_its_own_blob() {
    let unit = Compiler::new(0x10).compile(&tree("times 3 dw $\n")).unwrap();
    let addrs: Vec<i64> = unit.blobs.iter().map(|b| b.addr).collect();
    assert_eq!(addrs, vec![0x10, 0x12, 0x14]);
    assert!(unit.blobs.iter().all(|b| matches!(b.blob, BinaryBlob::Definition(_))));
    assert_eq!(unit.to_bytes().unwrap(), vec![0x10, 0, 0x12, 0, 0x14, 0]);
}

#[test]
fn partially_resolvable_unit_stops_without_progress() {
    let mut unit = Compiler::default()
        .layout(&tree("db known\ndb unknown\nknown:\n"))
        .unwrap();
    assert_eq!(unit.pending_count(), 2);
    match unit.resolve() {
        Err(ParserError::UnresolvedSymbols { symbols }) => {
            assert_eq!(symbols.len(), 1);
            assert_eq!(symbols[0].expression, "unknown");
        }
        other => panic!("{other:?}"),
    }
    assert_eq!(unit.pending_count(), 1);
    assert_eq!(unit.to_bytes(), None);
}

#[test]
fn times_count_sees_earlier_labels() {
    let unit = Compiler::default()
        .compile(&tree("start: db 1, 2\ntimes 4 - ($ - start) db 0xFF\n"))
        .unwrap();
    assert_eq!(unit.to_bytes().unwrap(), vec![1, 2, 0xFF, 0xFF]);
}

#[test]
fn org_sets_label_base() {
    let unit = Compiler::default()
        .compile(&tree("org 0x7C00\nentry: jmp_table dw entry\n"))
        .unwrap();
    assert_eq!(unit.labels["entry"], 0x7C00);
    assert_eq!(unit.labels["jmp_table"], 0x7C00);
    assert_eq!(unit.to_bytes().unwrap(), vec![0x00, 0x7C]);
}

#[test]
fn times_limit_counts_every_repetition() {
    let compiler = Compiler::default().with_times_limit(5);
    assert_eq!(compiler.compile(&tree("times 5 db $\n")).unwrap().size(), 5);
    assert!(matches!(
        compiler.compile(&tree("times 3 db 1\ntimes 3 db 2\n")),
        Err(ParserError::TimesLimitExceeded { limit: 5, .. })
    ));
}
