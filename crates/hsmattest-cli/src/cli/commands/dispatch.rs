use super::super::args::*;
use crate::exit_codes::SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Parse(args) => super::parse::run(args).await,
        Command::Inspect(args) => super::inspect::run(args).await,
        Command::Normalize(args) => super::normalize::run(args).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}
