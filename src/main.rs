use std::fs;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use pyrite::interpreter::Interpreter;
use pyrite::{lexer, parser};

const DEMO_PROGRAM: &str = r#"# Demo program
x = 10
y = 20
total = x + y
print("Sum of", x, "and", y, "is", total)

if total > 25:
    print("total is greater than 25")
else:
    print("total is not greater than 25")

counter = 0
while counter < 3:
    print("Counter:", counter)
    counter = counter + 1

print("Done!")
"#;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let mut args = std::env::args().skip(1);
    let input_path = args.next();
    if args.next().is_some() {
        bail!("Only one input file is supported");
    }

    let source = match &input_path {
        Some(path) => fs::read_to_string(path).with_context(|| format!("Reading {path}"))?,
        None => DEMO_PROGRAM.to_string(),
    };

    let tokens = lexer::tokenize(&source);
    let parsed = parser::parse_tokens(tokens);
    for error in &parsed.errors {
        eprintln!("Parse error: {error}");
    }

    let mut interpreter = Interpreter::new();
    let result = interpreter.interpret(&parsed.program);
    let output = interpreter.take_output();
    if !output.is_empty() {
        println!("{output}");
    }

    if let Err(error) = result {
        eprintln!("Runtime error: {error}");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
