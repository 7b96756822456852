#![expect(clippy::print_stdout, reason = "command line output")]

use {
    anyhow::{Context as _, Result, bail},
    clap::{ArgGroup, Parser, Subcommand},
    kontecst_protocol::{AccessToken, EncryptionKey, FileKey, VersionKey},
    kontecst_proxy::{Config, access::PgDirectory, storage::Storage, util::migrate},
    std::path::PathBuf,
};

#[derive(Debug, Parser)]
pub struct Cli {
    /// Path to a json5 config file. Environment variables override it.
    #[clap(long)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Print a new random encryption key.
    GenerateKey,
    /// Print a new access token and the hash to store in the access directory.
    GenerateToken,
    /// Print metadata of the files stored for a package version.
    List { package_id: String, version: String },
    /// Make stored files public or private. Applies to the whole version if
    /// no filename is given.
    #[clap(group(ArgGroup::new("visibility").required(true).args(["public", "private"])))]
    SetVisibility {
        package_id: String,
        version: String,
        filename: Option<String>,
        #[clap(long)]
        public: bool,
        #[clap(long)]
        private: bool,
    },
    /// Create the access directory tables.
    Migrate,
}

fn open_storage(config: &Config) -> Result<Storage> {
    Ok(Storage::new(config.storage_path.clone(), config.cipher()?)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::GenerateKey => {
            let key = EncryptionKey::generate()?;
            println!("{}", key.display_unmasked());
        }
        Command::GenerateToken => {
            let token = AccessToken::generate()?;
            println!("Access token:\n{}", token.as_unmasked_str());
            println!(
                "SHA-256 hash (store this in the access directory):\n{}",
                token.hash_hex()
            );
        }
        Command::List {
            package_id,
            version,
        } => {
            let config = Config::load(cli.config.as_deref())?;
            let storage = open_storage(&config)?;
            let key = VersionKey::new(&package_id, &version)?;
            let mut files = storage.list(&key)?;
            if files.is_empty() {
                println!("No files stored for {key}.");
            }
            files.sort_by(|a, b| a.filename.cmp(&b.filename));
            for file in files {
                let visibility = if file.is_public { "public" } else { "private" };
                println!("{}\t{visibility}\t{}", file.filename, file.created_at);
            }
        }
        Command::SetVisibility {
            package_id,
            version,
            filename,
            public,
            private,
        } => {
            if public == private {
                bail!("exactly one of --public and --private is required");
            }
            let config = Config::load(cli.config.as_deref())?;
            let storage = open_storage(&config)?;
            let keys = match filename {
                Some(filename) => vec![FileKey::new(&package_id, &version, &filename)?],
                None => {
                    let version_key = VersionKey::new(&package_id, &version)?;
                    storage
                        .list(&version_key)?
                        .iter()
                        .map(|metadata| version_key.file(&metadata.filename))
                        .collect::<Result<_, _>>()?
                }
            };
            if keys.is_empty() {
                bail!("no files found");
            }
            for key in keys {
                if storage.set_visibility(&key, public)?.is_none() {
                    bail!("file not found: {key}");
                }
                println!("{key}: {}", if public { "public" } else { "private" });
            }
        }
        Command::Migrate => {
            let config = Config::load(cli.config.as_deref())?;
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is not configured")?;
            let directory = PgDirectory::connect(database_url).await?;
            println!("Running migrations...");
            migrate(directory.pool()).await?;
            println!("Done");
        }
    }
    Ok(())
}
