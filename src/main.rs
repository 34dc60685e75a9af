//! dice-miner - proof-of-work unit miner and trading client
//!
//! Single binary with subcommands:
//!   dice-miner mine | validate | register   - Work with units
//!   dice-miner trade-*                      - Transfer ownership
//!   dice-miner keygen                       - Create a key file

mod cli;
mod keygen;

use dice_miner::{Notice, Reporter};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("keygen") => {
            if let Err(e) = keygen::run(&args[2..]) {
                Reporter::console().report(Notice::CommandFailed(format!("{e:#}")));
                std::process::exit(1);
            }
        }
        None | Some("help" | "--help" | "-h") => {
            cli::print_help();
        }
        Some("version" | "--version" | "-V") => {
            println!("dice-miner {}", dice_miner::VERSION);
        }
        Some(command) => {
            std::process::exit(run_command(command, &args[2..]));
        }
    }
}

fn run_command(command: &str, rest: &[String]) -> i32 {
    let invocation = match cli::parse(command, rest) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Run 'dice-miner --help' for usage.");
            return 1;
        }
    };

    match cli::run(invocation) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            let reporter = Reporter::console();
            reporter.report(Notice::CommandFailed(format!("{e:#}")));
            reporter.report(Notice::Exiting);
            1
        }
    }
}
