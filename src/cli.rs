/*!
LiteHouse Command Line Interface

Validates read-only SQL and runs one-off queries over local data files, using
the same session pipeline as the REST server.
*/

use clap::{Args, Parser, Subcommand};
use litehouse::{validate::validate, Config, QuerySpec, SessionManager, VERSION};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "litehouse")]
#[command(about = "SQL workbench for file-based data")]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clean and validate a query without executing it
    Validate {
        /// The SQL query to validate
        query: String,
    },

    /// Execute a query over one or more data files
    Exec {
        /// The SQL query to execute
        query: String,

        #[command(flatten)]
        options: ExecOptions,
    },

    /// Execute a query read from a .sql file
    Run {
        /// Path to .sql file containing the query
        file: PathBuf,

        #[command(flatten)]
        options: ExecOptions,
    },
}

#[derive(Args)]
pub struct ExecOptions {
    /// Data file to register (csv, parquet, json, sqlite); repeatable
    #[arg(long = "file", short = 'f')]
    files: Vec<PathBuf>,

    /// Rows per page
    #[arg(long, default_value = "100")]
    limit: usize,

    /// Rows to skip
    #[arg(long, default_value = "0")]
    offset: usize,

    /// Query timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Output file path (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { query } => match validate(&query) {
            Ok(cleaned) => println!("{}", cleaned),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },

        Commands::Exec { query, options } => exec(&query, options).await?,

        Commands::Run { file, options } => {
            let query = match std::fs::read_to_string(&file) {
                Ok(query) => query,
                Err(e) => {
                    eprintln!("Failed to read file {}: {}", file.display(), e);
                    std::process::exit(1);
                }
            };
            exec(&query, options).await?
        }
    }

    Ok(())
}

async fn exec(query: &str, options: ExecOptions) -> anyhow::Result<()> {
    let spec = match QuerySpec::new(query, options.limit, options.offset) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let config = Config {
        query_timeout: Duration::from_secs(options.timeout),
        ..Config::default()
    };
    let manager = SessionManager::new(config);
    let session = manager.create()?;

    let mut failed = false;
    for path in &options.files {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let registered = match std::fs::read(path) {
            Ok(bytes) => session
                .register(&filename, bytes, manager.config().registration_timeout)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::Error::from(e)),
        };
        match registered {
            Ok(table) => eprintln!("{} -> {} ({})", path.display(), table.name, table.kind),
            Err(e) => {
                eprintln!("Failed to register {}: {}", path.display(), e);
                failed = true;
                break;
            }
        }
    }

    let result = if failed {
        None
    } else {
        match session.query(&spec, manager.config()).await {
            Ok(response) => Some(serde_json::to_string_pretty(&response)?),
            Err(e) => {
                eprintln!("{}", e);
                None
            }
        }
    };

    manager.shutdown().await;

    let Some(json_output) = result else {
        std::process::exit(1);
    };

    match options.output {
        Some(output_path) => {
            std::fs::write(&output_path, &json_output)?;
            eprintln!("Results written to: {}", output_path.display());
        }
        None => println!("{}", json_output),
    }

    Ok(())
}
