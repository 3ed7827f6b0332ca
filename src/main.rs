use std::io::{self, BufRead, Write};

use rmdb::database::{print_result, Engine};
use rmdb::lexer_parser::{self, Command};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let data_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./data".to_string());

    let mut engine = match Engine::new(&data_dir) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("Failed to start: {}", err);
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command = match lexer_parser::parse(line) {
            Ok(command) => command,
            Err(err) => {
                eprintln!("{}", err);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        match engine.execute(command) {
            Ok(result) => print_result(&result),
            Err(err) => eprintln!("Error: {}", err),
        }
        stdout.flush().unwrap();
    }
}
