use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;

pub mod serve;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the WebSocket server with the bundled chat application.
    Serve(ServeArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Host address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, short = 'p', default_value = "12345")]
    pub port: u16,

    /// Message serializer (json, text).
    #[arg(long, default_value = "json")]
    pub serializer: String,

    /// Write ws://host:port to this file so demo pages can find the server.
    #[arg(long, value_name = "PATH")]
    pub artifact: Option<PathBuf>,
}
