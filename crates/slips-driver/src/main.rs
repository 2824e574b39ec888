use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use slips_codegen::{CompileOptions, OptLevel};
use slips_driver::{SlipsError, Value};

/// Compile and run Slips programs.
#[derive(Parser, Debug)]
#[command(name = "slips", version)]
struct Opt {
    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the token stream of a source file
    Lex { file: PathBuf },
    /// Print the parsed expressions of a source file
    Parse { file: PathBuf },
    /// Compile a source file with the JIT and print its result
    Run {
        file: PathBuf,
        /// Cranelift optimization level
        #[arg(long, value_enum, default_value_t = OptArg::None)]
        opt_level: OptArg,
        /// Log the IR of every compiled function (needs -vv)
        #[arg(long)]
        dump_ir: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OptArg {
    None,
    Speed,
    SpeedAndSize,
}

impl From<OptArg> for OptLevel {
    fn from(arg: OptArg) -> Self {
        match arg {
            OptArg::None => OptLevel::None,
            OptArg::Speed => OptLevel::Speed,
            OptArg::SpeedAndSize => OptLevel::SpeedAndSize,
        }
    }
}

fn main() {
    let opt = Opt::parse();
    enable_log(opt.verbose);

    match opt.command {
        Command::Lex { file } => cmd_lex(&read_source(&file)),
        Command::Parse { file } => cmd_parse(&read_source(&file)),
        Command::Run {
            file,
            opt_level,
            dump_ir,
        } => {
            let options = CompileOptions {
                opt_level: opt_level.into(),
                dump_ir,
            };
            cmd_run(&read_source(&file), &options);
        }
    }
}

fn enable_log(verbose: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    match verbose {
        0 => {}
        1 => {
            builder.filter_level(LevelFilter::Info);
        }
        2 => {
            builder.filter_level(LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(LevelFilter::Trace);
        }
    }
    builder.init();
}

fn read_source(file: &Path) -> String {
    fs::read_to_string(file).unwrap_or_else(|e| {
        eprintln!("Error reading {}: {}", file.display(), e);
        process::exit(1);
    })
}

fn cmd_lex(source: &str) {
    match slips_lexer::lex(source) {
        Ok(tokens) => {
            for tok in tokens {
                println!("{:?}", tok);
            }
        }
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            process::exit(1);
        }
    }
}

fn cmd_parse(source: &str) {
    let tokens = slips_lexer::lex(source).unwrap_or_else(|e| {
        eprintln!("Lexer error: {}", e);
        process::exit(1);
    });
    match slips_parser::parse(tokens) {
        Ok(program) => {
            for expr in &program {
                println!("{}", expr);
            }
        }
        Err(errors) => {
            for e in &errors.0 {
                eprintln!("{}", e);
            }
            process::exit(1);
        }
    }
}

fn cmd_run(source: &str, options: &CompileOptions) {
    match slips_driver::run_with(source, options) {
        Ok(Value::Int(n)) => println!("{}", n),
        Ok(Value::Error(msg)) => {
            eprintln!("Error: {}", msg);
            process::exit(1);
        }
        Err(SlipsError::Parse(errors)) => {
            for e in &errors.0 {
                eprintln!("{}", e);
            }
            process::exit(1);
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}
