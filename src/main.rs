use clap::Parser;
use iam_harvest::cancel::Cancellation;
use iam_harvest::cli::{self, Cli};
use std::time::Duration;

#[tokio::main]
async fn main() {
    cli::init_logging();
    let args = Cli::parse();

    let (handle, cancel) = Cancellation::new();
    cli::spawn_cancel_triggers(handle, args.deadline_secs.map(Duration::from_secs));

    let scope = args.scope.clone();
    match cli::run(args, cancel).await {
        Ok(summary) => println!("{}", summary),
        Err(err) => {
            tracing::error!(%scope, error = %err, "run failed");
            eprintln!("{}", err.report());
            std::process::exit(err.exit_code());
        }
    }
}
