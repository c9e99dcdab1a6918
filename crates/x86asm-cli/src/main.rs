use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use x86asm_rs::preprocessor::PreprocessorInterpreter;
use x86asm_rs::{assemble, Lexer, Tokenizer};

mod model;
use model::{load_config, parse_define, parse_i64, SymbolKV};

#[derive(Parser, Debug)]
#[command(author, version, about = "NASM-style x86 assembler", long_about = None)]
struct Cli {
    /// Raise log level (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Assembler config (JSON)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    /// Predefine a macro, NAME or NAME=VALUE. Repeat to add more.
    #[arg(short = 'D', value_name = "NAME[=VALUE]", global = true)]
    defines: Vec<String>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble a source file into a flat binary
    Build {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        /// Output binary (default: input with .bin extension)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Base address (hex or dec), overridden by `org`
        #[arg(long)]
        origin: Option<String>,
        /// Write the symbol table to a file
        #[arg(long, value_name = "FILE")]
        symbols: Option<PathBuf>,
        /// Symbol table format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the macro-expanded source
    Preprocess {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
    /// Print the token stream as JSON
    Tokens {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn render_symbols(symbols: &[SymbolKV], format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(symbols)?,
        OutputFormat::Text => symbols
            .iter()
            .map(|s| format!("{:#010x} {}\n", s.addr, s.name))
            .collect(),
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;
    for define in &cli.defines {
        let (name, value) = parse_define(define);
        config = config.with_define(&name, value.as_deref());
    }

    match cli.cmd {
        Command::Build {
            input,
            output,
            origin,
            symbols,
            format,
        } => {
            if let Some(origin) = origin {
                config.origin = parse_i64(&origin).with_context(|| format!("bad --origin {origin}"))?;
            }
            let source = read_source(&input)?;
            let out = assemble(&source, &config).with_context(|| format!("assembling {}", input.display()))?;

            let output = output.unwrap_or_else(|| input.with_extension("bin"));
            std::fs::write(&output, &out.bytes).with_context(|| format!("writing {}", output.display()))?;
            info!(bytes = out.bytes.len(), path = %output.display(), "written");

            if let Some(path) = symbols {
                let table: Vec<SymbolKV> = out.symbols().into_iter().map(SymbolKV::from).collect();
                let text = render_symbols(&table, format)?;
                std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
            }
        }
        Command::Preprocess { input } => {
            let source = read_source(&input)?;
            let (text, _) = PreprocessorInterpreter::new(config).exec(&source)?;
            print!("{text}");
        }
        Command::Tokens { input } => {
            let source = read_source(&input)?;
            let tokens = Lexer::new(config.prefix_char).tokenize(&source)?;
            println!("{}", serde_json::to_string_pretty(&tokens)?);
        }
    }

    Ok(())
}
