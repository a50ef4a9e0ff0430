use std::process::ExitCode;

use clap::Parser;

use vitalink::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match vitalink::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
