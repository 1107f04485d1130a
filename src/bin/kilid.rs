//! # kilid
//!
//! Command line front end: generate keys from a seed phrase, encrypt a file
//! to a public key, decrypt it with the private key.
//!
//! Passphrases are best supplied through `KILID_PASSPHRASE` rather than on
//! the command line.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kilid_core::identity::UserId;
use kilid_core::logging::{self, LogFormat};
use kilid_core::ops::{self, GenerateRequest, OperationReport, SeedSource};
use kilid_core::{KilidConfig, KilidError};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use zeroize::Zeroizing;

/// Deterministic keys from seed phrases, and file encryption.
#[derive(Parser, Debug)]
#[command(name = "kilid", version, propagate_version = true)]
struct Cli {
    /// JSON configuration file.
    #[arg(long, short = 'c', global = true, env = "KILID_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format: pretty or json.
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// Log level when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a key pair from a new or existing seed phrase.
    Generate(GenerateArgs),
    /// Encrypt a file to a public key.
    Encrypt(EncryptArgs),
    /// Decrypt a file with a private key.
    Decrypt(DecryptArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Name in the user id.
    #[arg(long, default_value = "")]
    name: String,

    /// Email in the user id.
    #[arg(long, default_value = "")]
    email: String,

    /// Comment in the user id. Defaults to "Mnemonic-Generated Key".
    #[arg(long)]
    comment: Option<String>,

    /// Leave the comment out of the user id.
    #[arg(long, conflicts_with = "comment")]
    no_comment: bool,

    /// Words in a new seed phrase: 12, 15, 18, 21 or 24.
    #[arg(long, short = 'w')]
    words: Option<usize>,

    /// Recover keys from the seed phrase stored in this file.
    #[arg(long, conflicts_with = "words")]
    phrase_file: Option<PathBuf>,

    /// Directory for public.asc, private.asc and mnemonic.txt.
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,

    /// Key creation time in unix seconds. Must match to recover the same keys.
    #[arg(long)]
    created_at: Option<u64>,

    /// Optional BIP39 passphrase.
    #[arg(long, env = "KILID_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,
}

#[derive(Args, Debug)]
struct EncryptArgs {
    /// Recipient public key file.
    #[arg(long, short = 'k')]
    key: PathBuf,

    /// File to encrypt.
    input: PathBuf,

    /// Output file. Defaults to the input with `.kld` appended.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Write armored text instead of binary.
    #[arg(long, short = 'a')]
    armor: bool,
}

#[derive(Args, Debug)]
struct DecryptArgs {
    /// Private key file.
    #[arg(long, short = 'k')]
    key: PathBuf,

    /// Encrypted file, binary or armored.
    input: PathBuf,

    /// Output file. Defaults to the input without its `.kld` or `.asc` extension.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level, cli.log_format);

    match run(cli) {
        Ok(report) => {
            println!("{}", report.message);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code(&e)
        }
    }
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<KilidError>() {
        Some(KilidError::Config(_)) => ExitCode::from(2),
        Some(KilidError::Identity(_)) => ExitCode::from(3),
        Some(KilidError::Crypto(_)) => ExitCode::from(4),
        Some(KilidError::Io(_)) | None => ExitCode::FAILURE,
    }
}

fn run(cli: Cli) -> Result<OperationReport> {
    let mut config = match &cli.config {
        Some(path) => KilidConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => KilidConfig::default(),
    };

    match cli.command {
        Commands::Generate(args) => generate(&mut config, args),
        Commands::Encrypt(args) => {
            config.armor |= args.armor;
            let output = args
                .output
                .unwrap_or_else(|| encrypted_path(&args.input, config.armor));
            ops::encrypt_file(&config, &args.key, &args.input, &output)
                .with_context(|| format!("failed to encrypt {}", args.input.display()))
        }
        Commands::Decrypt(args) => {
            let output = args.output.unwrap_or_else(|| decrypted_path(&args.input));
            ops::decrypt_file(&config, &args.key, &args.input, &output)
                .with_context(|| format!("failed to decrypt {}", args.input.display()))
        }
    }
}

fn generate(config: &mut KilidConfig, args: GenerateArgs) -> Result<OperationReport> {
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(created_at) = args.created_at {
        config.key_params.created_at = created_at;
    }
    if let Some(words) = args.words {
        config.word_count = words;
    }
    config.validate()?;

    let mut user_id = UserId::new(args.name, args.email);
    if args.no_comment {
        user_id = user_id.with_comment(None);
    } else if args.comment.is_some() {
        user_id = user_id.with_comment(args.comment);
    }

    let seed = match &args.phrase_file {
        Some(path) => SeedSource::Phrase(Zeroizing::new(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read seed phrase from {}", path.display()))?,
        )),
        None => SeedSource::Fresh {
            word_count: config.word_count,
        },
    };

    let request = GenerateRequest {
        user_id,
        seed,
        passphrase: args.passphrase.map(Zeroizing::new),
    };
    Ok(ops::generate_and_save(config, request)?)
}

fn encrypted_path(input: &Path, armor: bool) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(if armor { ".asc" } else { ".kld" });
    PathBuf::from(name)
}

fn decrypted_path(input: &Path) -> PathBuf {
    match input.extension().and_then(|e| e.to_str()) {
        Some("kld" | "asc") => input.with_extension(""),
        _ => {
            let mut name = input.as_os_str().to_owned();
            name.push(".out");
            PathBuf::from(name)
        }
    }
}
