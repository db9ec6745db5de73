//! `interpreter [-m MEMORY_LIMIT_MB] FILE [ARG...]`
//!
//! Source parsing is an external collaborator this crate doesn't include (see
//! [`corelang::runner`]), so `FILE` is read only to honor the usage contract — existence,
//! readability — and `ARG...` is forwarded verbatim into the injected `sys.args`. What
//! actually runs is a small program built directly against `corelang::ast`, standing in for
//! the output a real frontend would hand the runner.

use std::{env, fs, process::ExitCode};

use corelang::{
    ast::{expr::Literal, stmt::Block, BinaryOp, Expr, Program, Stmt},
    pos::TextPos,
    MemoryLimitTracker, NoLimitTracker, ResourceTracker, RunError, Runner,
};

const MIN_MEMORY_MB: u64 = 1;
const MAX_MEMORY_MB: u64 = 2048;

struct Options {
    memory_limit_mb: Option<u64>,
    file: String,
    script_args: Vec<String>,
}

fn main() -> ExitCode {
    let options = match parse_args(env::args().skip(1).collect()) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("usage error: {message}");
            eprintln!("usage: interpreter [-m MEMORY_LIMIT_MB] FILE [ARG...]");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = fs::metadata(&options.file) {
        eprintln!("usage error: cannot read {}: {err}", options.file);
        return ExitCode::FAILURE;
    }

    let tracker: Box<dyn ResourceTracker> = match options.memory_limit_mb {
        Some(mb) => Box::new(MemoryLimitTracker::new((mb as usize) * 1024 * 1024)),
        None => Box::new(NoLimitTracker),
    };

    let runner = Runner::new(options.script_args);
    let program = demo_program(&runner, &options.file);

    match runner.run(&program, tracker.as_ref()) {
        Ok(value) => {
            if let Ok(text) = value.to_display_string() {
                println!("{text}");
            }
            ExitCode::SUCCESS
        }
        Err(RunError::Compile(err)) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
        Err(err @ RunError::Unhandled(_)) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: Vec<String>) -> Result<Options, String> {
    let mut iter = args.into_iter();
    let mut memory_limit_mb = None;
    let mut file = None;

    while let Some(arg) = iter.next() {
        if arg == "-m" {
            let value = iter.next().ok_or("-m requires a value")?;
            let mb: u64 = value.parse().map_err(|_| format!("-m expects a number, got '{value}'"))?;
            if !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&mb) {
                return Err(format!("-m must be between {MIN_MEMORY_MB} and {MAX_MEMORY_MB}, got {mb}"));
            }
            memory_limit_mb = Some(mb);
        } else {
            file = Some(arg);
            break;
        }
    }

    let file = file.ok_or("missing FILE argument")?;
    let script_args = iter.collect();
    Ok(Options { memory_limit_mb, file, script_args })
}

/// Builds the stand-in program run for `file`: prints a greeting through `sys.out` and
/// returns the process exit code `0`. Exercises name lookup, member access, and a native
/// call through the host bridge without requiring a parser.
fn demo_program(runner: &Runner, file: &str) -> Program {
    let pos = TextPos::new(file.to_owned(), 1, 1);
    let sys = runner.registry().register("sys");
    let out = runner.registry().register("out");
    let println = runner.registry().register("println");
    let current_time_str = runner.registry().register("current_time_str");

    let sys_name = || Expr::Name { pos: pos.clone(), name: sys.clone(), descriptor: std::cell::OnceCell::new() };
    let sys_out = Expr::Member { pos: pos.clone(), object: Box::new(sys_name()), name: out };
    let timestamp = Expr::Invoke {
        pos: pos.clone(),
        callee: Box::new(Expr::Member { pos: pos.clone(), object: Box::new(sys_name()), name: current_time_str }),
        args: Vec::new(),
    };
    let greeting = Expr::Binary {
        pos: pos.clone(),
        op: BinaryOp::Add,
        left: Box::new(Expr::Literal { pos: pos.clone(), value: Literal::Str("corelang ".into()) }),
        right: Box::new(timestamp),
    };
    let print_call = Expr::Invoke {
        pos: pos.clone(),
        callee: Box::new(Expr::Member { pos: pos.clone(), object: Box::new(sys_out), name: println }),
        args: vec![greeting],
    };

    let statements = vec![
        Stmt::Expression(print_call),
        Stmt::Return { pos: pos.clone(), value: Some(Expr::Literal { pos, value: Literal::Integer(0) }) },
    ];
    Program::new(Block::new(statements))
}
