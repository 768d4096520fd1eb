use crate::check::{run_check, CheckArgs};
use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use vaxdrive::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "School Vaccination Drives",
    about = "Schedule vaccination drives and record doses from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk through scheduling and a dose batch against a seeded in-memory roster
    Demo(DemoArgs),
    /// Check whether a drive window would be accepted by the configured store
    Check(CheckArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Load the demo roster into the store before serving
    #[arg(long)]
    pub(crate) seed_demo: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
        Command::Check(args) => run_check(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_check_window() {
        let cli = Cli::try_parse_from([
            "vaxdrive-api",
            "check",
            "--start",
            "2024-04-01",
            "--end",
            "2024-04-10",
            "--classes",
            "5A",
            "--classes",
            "5B",
        ])
        .expect("arguments parse");

        match cli.command {
            Some(Command::Check(args)) => {
                assert_eq!(args.start.to_string(), "2024-04-01");
                assert_eq!(args.classes, vec!["5A".to_string(), "5B".to_string()]);
                assert!(args.today.is_none());
            }
            other => panic!("expected check command, got {other:?}"),
        }
    }

    #[test]
    fn serve_flags_are_optional() {
        let cli = Cli::try_parse_from(["vaxdrive-api", "serve", "--seed-demo", "--port", "8081"])
            .expect("arguments parse");

        match cli.command {
            Some(Command::Serve(args)) => {
                assert!(args.seed_demo);
                assert_eq!(args.port, Some(8081));
                assert!(args.host.is_none());
            }
            other => panic!("expected serve command, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_dates() {
        let result = Cli::try_parse_from(["vaxdrive-api", "demo", "--today", "04/01/2024"]);
        assert!(result.is_err());
    }
}
