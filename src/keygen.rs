//! Key generation for miner identities.
//!
//! Usage:
//!   dice-miner keygen                  Generate a new key from a fresh seed phrase
//!   dice-miner keygen --seed           Derive the key from an existing seed phrase
//!   dice-miner keygen --out <path>     Write `<path>.key` instead of the default

use std::path::PathBuf;

use anyhow::{bail, Context};
use dialoguer::Input;
use dice_miner::store::unique_path;
use dice_miner::{
    generate_mnemonic, keypair_from_mnemonic, keypair_from_phrase, KeyFile, KeyPair, MinerConfig,
    Notice, Reporter,
};

struct KeygenArgs {
    from_seed: bool,
    out: PathBuf,
    name: Option<String>,
    config: PathBuf,
}

fn parse_args(args: &[String]) -> anyhow::Result<KeygenArgs> {
    let mut parsed = KeygenArgs {
        from_seed: false,
        out: KeyFile::default_dir().join("miner"),
        name: None,
        config: MinerConfig::default_path(),
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => parsed.from_seed = true,
            flag @ ("--out" | "--name" | "--config") => {
                i += 1;
                let Some(value) = args.get(i) else {
                    bail!("option {flag} needs a value");
                };
                match flag {
                    "--out" => parsed.out = PathBuf::from(value),
                    "--name" => parsed.name = Some(value.clone()),
                    _ => parsed.config = PathBuf::from(value),
                }
            }
            other => bail!("unknown keygen option '{other}'"),
        }
        i += 1;
    }
    Ok(parsed)
}

pub fn run(args: &[String]) -> anyhow::Result<()> {
    let args = parse_args(args)?;
    let config = MinerConfig::load_or_default(&args.config)?;
    let reporter = Reporter::console();

    reporter.report(Notice::KeyGeneration);
    let keypair = if args.from_seed {
        from_seed()?
    } else {
        generate()
    };

    reporter.report(Notice::PrivateKey(hex::encode(*keypair.secret_bytes())));
    reporter.report(Notice::DigitalAddress(keypair.address()));

    let mut key_file = KeyFile::from_keypair(keypair);
    key_file.name = args.name;
    let path = unique_path(&args.out, &config.extensions.key);
    key_file
        .save(&path)
        .with_context(|| format!("cannot write {}", path.display()))?;

    reporter.report(Notice::Saved(path));
    reporter.report(Notice::Exiting);
    Ok(())
}

/// Fresh key pair from a new mnemonic
fn generate() -> KeyPair {
    let mnemonic = generate_mnemonic();

    println!("----------------------------------------------------------------");
    println!("Seed phrase (write it down; it restores this key):");
    println!("{mnemonic}");
    println!("----------------------------------------------------------------");

    keypair_from_mnemonic(&mnemonic, "")
}

/// Key pair from a phrase typed by the user
fn from_seed() -> anyhow::Result<KeyPair> {
    let phrase: String = Input::new()
        .with_prompt("Seed phrase")
        .interact_text()
        .context("failed to read seed phrase")?;
    let phrase = phrase.trim();
    if phrase.is_empty() {
        bail!("empty seed phrase");
    }
    keypair_from_phrase(phrase, "").context("invalid seed phrase")
}
