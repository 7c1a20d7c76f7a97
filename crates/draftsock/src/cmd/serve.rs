use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use draftsock_server::{ClientFactory, ClientHandler, Server, ServerConfig};

use crate::chat::Chatter;
use crate::cmd::ServeArgs;
use crate::exit::{server_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let mut config =
        ServerConfig::new(&args.host, args.port).with_serializer_name(&args.serializer);
    if let Some(path) = &args.artifact {
        config = config.with_artifact_path(path);
    }

    let factory: ClientFactory = Box::new(
        |info: &draftsock_server::ClientInfo| -> Box<dyn ClientHandler> {
            Box::new(Chatter::new(info.id))
        },
    );
    let mut server = Server::bind(config, factory).map_err(|err| server_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    // A bounded wait keeps the loop responsive to ctrl-c; the reactor
    // itself never needs a timeout.
    while running.load(Ordering::SeqCst) {
        server
            .run_once(Some(Duration::from_millis(200)))
            .map_err(|err| server_error("reactor failed", err))?;
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
