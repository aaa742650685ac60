use super::super::args::*;
use crate::exit_codes::EXIT_SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Resolve(args) => super::resolve::run(&cli.backend, args).await,
        Command::Cache(args) => super::cache::run(&cli.backend, args).await,
        Command::Settings(args) => super::settings::run(args).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(EXIT_SUCCESS)
        }
    }
}
