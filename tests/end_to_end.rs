use pretty_assertions::assert_eq;
use x86asm_rs::{assemble, AssemblerConfig};

fn build(src: &str) -> Vec<u8> {
    assemble(src, &AssemblerConfig::default()).unwrap().bytes
}

#[test]
fn label_and_single_byte() {
    let out = assemble("foo: db 0x41\n", &AssemblerConfig::default()).unwrap();
    assert_eq!(out.bytes, vec![0x41]);
    assert_eq!(out.labels.get("foo"), Some(&0));
}

#[test]
fn times_repeats_definition() {
    assert_eq!(build("times 2 db 0xAB\n"), vec![0xAB, 0xAB]);
    assert_eq!(build("times 3 db 1\n"), build("db 1\ndb 1\ndb 1\n"));
}

#[test]
fn forward_reference_patched() {
    assert_eq!(build("dw target\ntarget: db 1\n"), vec![0x02, 0x00, 0x01]);
}

#[test]
fn quote_padding() {
    assert_eq!(build("dw \"AB\"\n"), b"AB".to_vec());
    assert_eq!(build("dw \"ABC\"\n"), vec![b'A', b'B', b'C', 0]);
}

#[test]
fn string_holding_both_quote_kinds() {
    assert_eq!(build("db `a'b\"c`\n"), b"a'b\"c".to_vec());
    assert_eq!(build("%define MSG `it's \"x\"`\ndb MSG, 0\n"), b"it's \"x\"\0".to_vec());
}

#[test]
fn mixed_quote_and_label_arguments() {
    // placeholder after an odd-length string still maps back to its own argument
    assert_eq!(
        build("dw 'ABC', end\nend:\n"),
        vec![b'A', b'B', b'C', 0, 0x06, 0x00]
    );
}

#[test]
fn boot_sector_layout() {
    let src = "\
[org 0x7C00]
start:
    cli
    int 0x10
    hlt
msg db 'Hi', 0
times 510 - ($ - $$) db 0
dw 0xAA55
";
    let out = assemble(src, &AssemblerConfig::default()).unwrap();
    assert_eq!(out.bytes.len(), 512);
    assert_eq!(&out.bytes[..4], &[0xFA, 0xCD, 0x10, 0xF4]);
    assert_eq!(&out.bytes[4..7], b"Hi\0");
    assert_eq!(&out.bytes[510..], &[0x55, 0xAA]);
    assert_eq!(out.labels.get("start"), Some(&0x7C00));
    assert_eq!(out.labels.get("msg"), Some(&0x7C04));
}

#[test]
fn equ_constants_and_instruction_immediates() {
    let src = "\
len equ end - msg
int VIDEO
ret len
msg: db 'abc'
end:
VIDEO equ 0x10
";
    assert_eq!(build(src), vec![0xCD, 0x10, 0xC2, 0x03, 0x00, b'a', b'b', b'c']);
}

#[test]
fn floats_in_definitions() {
    assert_eq!(build("dd 1.0\n"), vec![0x00, 0x00, 0x80, 0x3F]);
    assert_eq!(build("dq -2.0\n"), vec![0, 0, 0, 0, 0, 0, 0, 0xC0]);
    assert_eq!(build("dt 1.0\n"), vec![0, 0, 0, 0, 0, 0, 0, 0x80, 0xFF, 0x3F]);
}

#[test]
fn macros_feed_the_compiler() {
    let src = "\
%define COUNT 3
%macro fill 2
times %1 db %2
%endmacro
fill COUNT, 0x90
%assign n 0
%rep 2
db n
%assign n n + 1
%endrep
";
    assert_eq!(build(src), vec![0x90, 0x90, 0x90, 0, 1]);
}

#[test]
fn local_labels_per_macro_call() {
    let src = "\
%macro mark 0
%%here: dw %%here
%endmacro
mark
mark
";
    assert_eq!(build(src), vec![0x00, 0x00, 0x02, 0x00]);
}

#[test]
fn config_origin_and_defines() {
    let config = AssemblerConfig {
        origin: 0x100,
        ..AssemblerConfig::default()
    }
    .with_define("VALUE", Some("7"));
    let out = assemble("here: dw here\ndb VALUE\n", &config).unwrap();
    assert_eq!(out.bytes, vec![0x00, 0x01, 0x07]);
}
