mod formatter;
mod server;

use std::process;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use server::config::BackendKind;
use server::ServeOverrides;

#[derive(Parser, Debug)]
#[command(name = "promtail-config")]
#[command(version)]
#[command(about = "Aggregates workload promtail snippets into one scrape config", long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept workload events over HTTP and keep the document in sync
    Serve {
        /// Path to config file
        #[arg(
            short = 'c',
            long = "config",
            env = "PROMTAIL_CONFIG_FILE",
            default_value = "promtail-config.toml"
        )]
        config: String,

        /// Address to listen on
        #[arg(long = "hostname")]
        hostname: Option<String>,

        /// Port to listen on
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,

        /// Namespace of the object holding the document
        #[arg(short = 'n', long = "namespace")]
        namespace: Option<String>,

        /// Name of the object holding the document
        #[arg(long = "name")]
        name: Option<String>,

        /// Object store backend: kubernetes, sled or memory
        #[arg(short = 'b', long = "backend")]
        backend: Option<BackendKind>,

        /// Data directory of the sled backend
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Rewrite a document file in canonical form
    Fmt {
        /// Path to the document
        file: String,

        /// Exit non-zero if the file is not formatted, without writing
        #[arg(long)]
        check: bool,

        /// Print the changes instead of writing them
        #[arg(long)]
        diff: bool,
    },
    /// Parse a document file and list its records
    Validate {
        /// Path to the document
        file: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("promtail_config_cli=info,promtail_config_lib=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Args::parse();
    let result = match cli.cmd {
        Command::Serve {
            config,
            hostname,
            port,
            namespace,
            name,
            backend,
            data_dir,
        } => {
            let overrides = ServeOverrides {
                hostname,
                port,
                namespace,
                name,
                backend,
                data_dir,
            };
            server::run_serve(&config, overrides).await
        }
        Command::Fmt { file, check, diff } => {
            formatter::run_fmt(&file, check, diff);
            Ok(())
        }
        Command::Validate { file } => {
            formatter::run_validate(&file);
            Ok(())
        }
    };

    if let Err(e) = result {
        error!(error = %e, "promtail-config failed");
        process::exit(1);
    }
}
