use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use keepsafe_core::config::KeepsafeConfig;
use keepsafe_core::generator::PasswordGenerator;
use keepsafe_core::paths::data_dir;
use keepsafe_core::strength;
use keepsafe_core::transfer::{export_csv_file, import_csv, ImportPolicy};
use keepsafe_core::{CredentialStore, KeyManager, NewCredential};
use std::fs::File;
use std::path::PathBuf;
use tracing::debug;
use zeroize::Zeroizing;

const MASK: &str = "********";

#[derive(Parser, Debug)]
#[command(
    name = "keepsafe",
    author,
    version,
    about = "Encrypted local password manager",
    long_about = None
)]
struct Cli {
    /// Directory holding config.json, the database and the key file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Database file (overrides config)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Master key file (overrides config)
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a new credential; the secret is prompted for
    Add {
        title: String,
        username: String,
        #[arg(long, default_value = "")]
        note: String,
        /// Generate the secret instead of prompting
        #[arg(long)]
        generate: bool,
    },

    /// List credentials whose title or username contains FILTER
    List {
        #[arg(default_value = "")]
        filter: String,
        /// Print secrets instead of masking them
        #[arg(long)]
        show: bool,
    },

    /// Print the secret of one credential
    Get { id: i64 },

    /// Change a credential; omitted fields keep their current value
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        note: Option<String>,
        /// Generate a new secret instead of prompting
        #[arg(long, conflicts_with = "keep_secret")]
        generate: bool,
        /// Leave the secret unchanged
        #[arg(long)]
        keep_secret: bool,
    },

    /// Remove a credential (no error if it does not exist)
    Delete { id: i64 },

    /// Write all credentials, decrypted, to a CSV file
    Export { path: PathBuf },

    /// Add every row of a CSV file (title,username,secret,note)
    Import {
        path: PathBuf,
        /// Keep going past rows that fail validation
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Print a random password
    Generate {
        #[arg(short, long)]
        length: Option<usize>,
        #[arg(long)]
        no_digits: bool,
        #[arg(long)]
        no_special: bool,
    },

    /// Rate a password read from the terminal
    Strength,

    /// Show the master key fingerprint
    KeyInfo,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keepsafe=info,keepsafe_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    debug!(
        database = %config.database_path.display(),
        key = %config.key_path.display(),
        "resolved locations"
    );

    match cli.command {
        Commands::Generate {
            length,
            no_digits,
            no_special,
        } => {
            let mut generator = config.generator.clone();
            if let Some(length) = length {
                generator.length = length;
            }
            generator.use_digits &= !no_digits;
            generator.use_special_chars &= !no_special;
            println!("{}", generator.generate()?);
            Ok(())
        }
        Commands::Strength => {
            let password = Zeroizing::new(rpassword::prompt_password("Password: ")?);
            let score = strength::evaluate(&password);
            println!("{}/5 ({})", score, strength::Strength::from_score(score));
            Ok(())
        }
        Commands::KeyInfo => {
            let keys = KeyManager::new(&config.key_path);
            match keys.load()? {
                Some(key) => println!("{}  {}", key.fingerprint(), keys.path().display()),
                None => println!("no key yet at {}", keys.path().display()),
            }
            Ok(())
        }
        command => {
            let store = config.store();
            store
                .open()
                .await
                .with_context(|| format!("open store {}", store.location().display()))?;
            let result = run_store_command(&store, &config.generator, command).await;
            store.close().await;
            result
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<KeepsafeConfig> {
    let dir = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => data_dir()?,
    };
    let mut config = KeepsafeConfig::load(&dir)?;
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if let Some(key_file) = &cli.key_file {
        config.key_path = key_file.clone();
    }
    Ok(config)
}

async fn run_store_command(
    store: &CredentialStore,
    generator: &PasswordGenerator,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Add {
            title,
            username,
            note,
            generate,
        } => {
            let secret = obtain_secret(generator, generate)?;
            let entry = NewCredential::new(title, username, secret.as_str()).with_note(note);
            let id = store.add(&entry).await?;
            println!("added credential {id}");
        }
        Commands::List { filter, show } => {
            let records = store.list(&filter)?.collect().await?;
            for record in &records {
                let secret = if show { record.secret.as_str() } else { MASK };
                println!(
                    "{:>5}  {}  {}  {}  {}",
                    record.id, record.title, record.username, secret, record.note
                );
            }
            if records.is_empty() {
                println!("no credentials");
            }
        }
        Commands::Get { id } => {
            let secret = Zeroizing::new(store.get_secret(id).await?);
            println!("{}", secret.as_str());
        }
        Commands::Update {
            id,
            title,
            username,
            note,
            generate,
            keep_secret,
        } => {
            let current = store.get(id).await?;
            let secret = if keep_secret {
                Zeroizing::new(current.secret.clone())
            } else {
                obtain_secret(generator, generate)?
            };
            let entry = NewCredential {
                title: title.unwrap_or(current.title.clone()),
                username: username.unwrap_or(current.username.clone()),
                secret: secret.to_string(),
                note: note.unwrap_or(current.note.clone()),
            };
            store.update(id, &entry).await?;
            println!("updated credential {id}");
        }
        Commands::Delete { id } => {
            store.delete(id).await?;
            println!("deleted credential {id}");
        }
        Commands::Export { path } => {
            let written = export_csv_file(store, &path).await?;
            println!("exported {written} credentials to {}", path.display());
        }
        Commands::Import {
            path,
            continue_on_error,
        } => {
            let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
            let policy = if continue_on_error {
                ImportPolicy::Continue
            } else {
                ImportPolicy::Abort
            };
            let report = import_csv(store, file, policy).await?;
            println!(
                "imported {}, skipped {} malformed, rejected {}",
                report.imported.len(),
                report.skipped.len(),
                report.rejected.len()
            );
            for (line, error) in &report.rejected {
                eprintln!("line {line}: {error}");
            }
        }
        Commands::Generate { .. } | Commands::Strength | Commands::KeyInfo => {
            return Err(anyhow!("command does not use the store"));
        }
    }
    Ok(())
}

fn obtain_secret(generator: &PasswordGenerator, generate: bool) -> Result<Zeroizing<String>> {
    if generate {
        let secret = Zeroizing::new(generator.generate()?);
        println!("generated a {}-character secret", secret.chars().count());
        return Ok(secret);
    }
    prompt_secret_twice()
}

fn prompt_secret_twice() -> Result<Zeroizing<String>> {
    let first = Zeroizing::new(rpassword::prompt_password("Secret: ")?);
    let second = Zeroizing::new(rpassword::prompt_password("Repeat secret: ")?);
    if *first != *second {
        bail!("secrets do not match");
    }
    let score = strength::evaluate(&first);
    if score < 3 {
        eprintln!("warning: {} secret", strength::Strength::from_score(score));
    }
    Ok(first)
}
