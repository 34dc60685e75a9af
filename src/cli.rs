//! Workflow command parsing and execution.

use std::path::PathBuf;

use dice_miner::pow::SearchMode;
use dice_miner::{dispatch, Address, AppArgs, Command, MinerConfig, Outcome};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// A parsed workflow command
#[derive(Debug)]
pub struct Invocation {
    pub command: Command,
    pub args: AppArgs,
    pub config_path: PathBuf,
}

/// Command-line errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("unknown option '{0}'")]
    UnknownOption(String),
    #[error("option {0} needs a value")]
    MissingValue(String),
    #[error("{option}: invalid address '{value}'")]
    InvalidAddress { option: String, value: String },
    #[error("--value: expected a positive number, got '{0}'")]
    InvalidValue(String),
}

fn address(option: &str, value: &str) -> Result<Address, CliError> {
    Address::parse(value).map_err(|_| CliError::InvalidAddress {
        option: option.to_string(),
        value: value.to_string(),
    })
}

/// Parse `command` and its options
pub fn parse(command: &str, rest: &[String]) -> Result<Invocation, CliError> {
    let mut args = AppArgs::default();
    let command = match command {
        "mine-accelerated" => {
            args.search_mode = SearchMode::Accelerated;
            Command::Mine
        }
        other => other
            .parse::<Command>()
            .map_err(|_| CliError::UnknownCommand(other.to_string()))?,
    };
    let mut config_path = MinerConfig::default_path();

    let mut i = 0;
    while i < rest.len() {
        let option = rest[i].as_str();
        if option == "--accelerated" {
            args.search_mode = SearchMode::Accelerated;
            i += 1;
            continue;
        }

        let value = rest
            .get(i + 1)
            .ok_or_else(|| CliError::MissingValue(option.to_string()))?;
        match option {
            "--key" | "-k" => args.key_file = Some(PathBuf::from(value)),
            "--operator" | "-o" => args.operator = Some(address(option, value)?),
            "--new-owner" | "-n" => args.counterparty = Some(address(option, value)?),
            "--unit" | "-u" => args.unit_file = Some(PathBuf::from(value)),
            "--out" => args.output = Some(PathBuf::from(value)),
            "--value" => {
                let parsed: f64 = value
                    .parse()
                    .map_err(|_| CliError::InvalidValue(value.clone()))?;
                if !(parsed.is_finite() && parsed > 0.0) {
                    return Err(CliError::InvalidValue(value.clone()));
                }
                args.unit_value = Some(parsed);
            }
            "--config" => config_path = PathBuf::from(value),
            _ => return Err(CliError::UnknownOption(option.to_string())),
        }
        i += 2;
    }

    Ok(Invocation {
        command,
        args,
        config_path,
    })
}

/// Run a parsed command on a single-threaded runtime
#[tokio::main(flavor = "current_thread")]
pub async fn run(invocation: Invocation) -> anyhow::Result<Outcome> {
    // Notices go to stdout; keep logs quiet unless RUST_LOG asks for more
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = MinerConfig::load_or_default(&invocation.config_path)?;
    info!(
        command = %invocation.command,
        config = %invocation.config_path.display(),
        "starting"
    );
    Ok(dispatch(invocation.command, invocation.args, config).await?)
}

pub fn print_help() {
    println!("dice-miner v{}", dice_miner::VERSION);
    println!("Proof-of-work unit miner and trading client");
    println!();
    println!("USAGE:");
    println!("    dice-miner <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    mine               Mine a unit, save it and register it with its operator");
    println!("    mine-accelerated   Same as mine, searching on every core");
    println!("    validate           Print a unit file and its current value");
    println!("    register           Register a stored unit if it is still valid");
    println!("    trade-ownerless    Release a unit to no owner");
    println!("    trade-current      Seal a unit to its new owner and announce the transfer");
    println!("    trade-new          Claim a unit sealed to you");
    println!("    keygen             Generate a key file");
    println!("                         --out <PATH>   Base path (default: ~/.dice-miner/keys/miner)");
    println!("                         --seed         Derive from an existing seed phrase");
    println!("                         --name <NAME>  Label stored in the key file");
    println!();
    println!("OPTIONS:");
    println!("    -k, --key <PATH>         Key file of the local owner");
    println!("    -o, --operator <ADDR>    Operator to mine for");
    println!("    -n, --new-owner <ADDR>   Address receiving the unit (trade-current)");
    println!("    -u, --unit <PATH>        Input unit or sealed bundle");
    println!("        --out <PATH>         Output base path; never overwrites");
    println!("        --value <V>          Mine for a unit worth at least V");
    println!("        --accelerated        Search on every core");
    println!("        --config <PATH>      Config file (default: ~/.dice-miner/miner.toml)");
    println!("    -h, --help               Print help");
    println!("    -V, --version            Print version");
    println!();
    println!("EXAMPLES:");
    println!("    dice-miner keygen --out me");
    println!("    dice-miner mine -k me.key -o 0x<operator> --out unit");
    println!("    dice-miner trade-current -k me.key -u unit.dice -n <address> --out gift");
    println!("    dice-miner trade-new -k buyer.key -u gift.edice");
}
