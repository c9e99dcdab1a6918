use x86asm_rs::error::UnresolvedSymbol;
use x86asm_rs::token::TokenLocation;
use x86asm_rs::{assemble, AsmError, AssemblerConfig, MathError, ParserError, PreprocessorError};

fn error_of(src: &str) -> AsmError {
    assemble(src, &AssemblerConfig::default()).unwrap_err()
}

fn parser_error(src: &str) -> ParserError {
    match error_of(src) {
        AsmError::Parser(err) => err,
        other => panic!("expected parser error, got {other:?}"),
    }
}

#[test]
fn equ_with_unknown_label() {
    match parser_error("test3 equ test_label + 3") {
        ParserError::UnresolvedSymbols { symbols } => {
            assert_eq!(symbols.len(), 1);
            assert_eq!(symbols[0].expression, "test_label + 3");
            assert_eq!(
                symbols[0].source,
                MathError::UnknownKeyword {
                    name: "test_label".into()
                }
            );
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn equ_without_expression() {
    assert!(matches!(parser_error("test3 equ"), ParserError::IncorrectEquArgsCount { .. }));
}

#[test]
fn equ_defined_twice() {
    let src = "test3 equ 0xFF\ntest4 equ 0xFE\ntest3 equ 2+2\n";
    assert!(matches!(parser_error(src), ParserError::EquAlreadyDefined { .. }));
}

#[test]
fn equ_on_register_name() {
    assert!(matches!(parser_error("nop\nax equ 0xFF\n"), ParserError::UsedReservedName { .. }));
}

#[test]
fn times_without_instruction() {
    assert!(matches!(
        parser_error("times -1 dyoa"),
        ParserError::MissingTimesRepeatedInstruction { .. }
    ));
}

#[test]
fn times_negative_count() {
    assert!(matches!(
        parser_error("times (1-10) nop"),
        ParserError::IncorrectTimesValue { value: -9, .. }
    ));
}

#[test]
fn times_count_is_capped() {
    let config = AssemblerConfig {
        max_times_iterations: 10,
        ..AssemblerConfig::default()
    };
    assert_eq!(assemble("times 10 db 0\n", &config).unwrap().bytes.len(), 10);
    match assemble("times 4 db 0\ntimes 7 nop\n", &config).unwrap_err() {
        AsmError::Parser(ParserError::TimesLimitExceeded { limit, loc }) => {
            assert_eq!(limit, 10);
            assert_eq!(loc.row, 2);
        }
        other => panic!("{other:?}"),
    }
    assert!(matches!(
        parser_error("times 0x7FFFFFFF db 0\n"),
        ParserError::TimesLimitExceeded { limit: 1_000_000, .. }
    ));
}

#[test]
fn times_unknown_count() {
    match parser_error("times dupa nop") {
        ParserError::Math {
            source: MathError::UnknownKeyword { name },
            ..
        } => assert_eq!(name, "dupa"),
        other => panic!("{other:?}"),
    }
}

#[test]
fn times_reserved_define_operand() {
    assert!(matches!(
        parser_error("times 2 db nop"),
        ParserError::UnsupportedDefineToken { .. }
    ));
}

#[test]
fn unmatched_macro_call_reaches_parser() {
    let src = "%macro pair 2\ndb %1, %2\n%endmacro\npair 1\n";
    match parser_error(src) {
        ParserError::UnknownInstruction { mnemonic, .. } => assert_eq!(mnemonic, "pair"),
        other => panic!("{other:?}"),
    }
}

#[test]
fn every_unresolved_symbol_is_listed() {
    let err = parser_error("db first\nnop\ndw second, third\n");
    let ParserError::UnresolvedSymbols { symbols } = err else {
        panic!("expected unresolved symbols");
    };
    let names: Vec<&str> = symbols.iter().map(|s: &UnresolvedSymbol| s.expression.as_str()).collect();
    assert_eq!(names, vec!["first", "second", "third"]);
    assert_eq!(symbols[1].loc.row, 3);
}

#[test]
fn duplicate_label() {
    assert!(matches!(
        parser_error("a: nop\na: hlt\n"),
        ParserError::LabelAlreadyDefined { .. }
    ));
}

#[test]
fn float_in_byte_definition() {
    assert!(matches!(parser_error("db 1.5"), ParserError::IncorrectFloatSize { .. }));
}

#[test]
fn preprocessor_errors_surface() {
    assert!(matches!(
        error_of("%macro m 1\nnop\n%endmacro\n%imacro m 1\nhlt\n%endmacro\n%macro m 1\nret\n%endmacro\n"),
        AsmError::Preprocessor(PreprocessorError::MacroAlreadyExists { .. })
    ));
    assert!(matches!(
        error_of("%if 1\nnop\n"),
        AsmError::Preprocessor(PreprocessorError::UnterminatedBlock { .. })
    ));
    assert!(matches!(
        error_of("%error stop here\n"),
        AsmError::Preprocessor(PreprocessorError::UserError { .. })
    ));
}

#[test]
fn preprocessor_errors_carry_locations() {
    match error_of("%define f(a, a) a\ndb f(1, 2)\n") {
        AsmError::Preprocessor(PreprocessorError::VariableAlreadyExistsInCurrentScope { name, loc }) => {
            assert_eq!(name, "a");
            assert_eq!(loc, TokenLocation::new(2, 4));
        }
        other => panic!("{other:?}"),
    }

    let err = error_of("nop\n%if 1 +\nnop\n%endif\n");
    match &err {
        AsmError::Preprocessor(PreprocessorError::IncorrectMathExpression { loc, .. }) => {
            assert_eq!(*loc, TokenLocation::new(2, 5));
        }
        other => panic!("{other:?}"),
    }
    assert!(err.to_string().contains("2:5"));
}

#[test]
fn lexer_errors_surface() {
    assert!(matches!(
        error_of("db 'oops\n"),
        AsmError::Preprocessor(PreprocessorError::Lexer(_))
    ));
}
