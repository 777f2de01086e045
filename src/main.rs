use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::deploy::{self, DeployArgs};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "deedeeploy")]
#[command(version = VERSION)]
#[command(about = "Easy automated deployment of your code")]
struct Cli {
    #[command(flatten)]
    deploy: DeployArgs,

    /// Show verbose / debug output
    #[arg(short, long)]
    debug: bool,
}

/// `--debug` forces debug output; otherwise `RUST_LOG` applies, falling
/// back to warnings only.
fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);
    tracing::debug!("Debug mode on");

    let Some(environment) = cli.deploy.environment() else {
        let mut cmd = Cli::command();
        if cmd.print_help().is_ok() {
            println!();
        }
        return std::process::ExitCode::SUCCESS;
    };

    let result = deploy::run(environment, &cli.deploy);
    let (json_result, exit_code) = output::map_cmd_result_to_json(result);
    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("{}", err);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
