use crate::config::Config;
use crate::hub::BroadcastHub;
use crate::model::ControlCommand;
use crate::session::SessionController;
use crate::upstream::FeedConnector;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const COMMAND_QUEUE: usize = 64;

/// What the process was asked to do on the command line.
#[derive(Debug, PartialEq)]
enum Startup {
    ConfigInit,
    Serve { initial: Option<ControlCommand> },
}

/// Reads `[<streamId>|config-init]`. A stream id becomes the same connect
/// command a downstream client would send.
fn parse_startup<I>(args: I) -> Startup
where
    I: IntoIterator<Item = String>,
{
    match args.into_iter().next() {
        Some(arg) if arg == "config-init" => Startup::ConfigInit,
        Some(stream_id) => Startup::Serve {
            initial: Some(ControlCommand::connect(stream_id)),
        },
        None => Startup::Serve { initial: None },
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let initial = match parse_startup(std::env::args().skip(1)) {
        Startup::ConfigInit => return handle_config_init(),
        Startup::Serve { initial } => initial,
    };

    let config = Config::load()?;
    let addr = config.listen_addr()?;

    let connector = FeedConnector::new(&config.upstream.feed_url, config.upstream.event_buffer)?;
    let hub = BroadcastHub::new();
    let controller = SessionController::new(Arc::new(connector), hub.clone(), config.flush_timings());
    let connection = controller.state();

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let session_task = tokio::spawn(controller.run(cmd_rx, shutdown_rx.clone()));

    if let Some(cmd) = initial {
        tracing::info!(command = ?cmd, "connecting to stream from command line");
        cmd_tx.send(cmd).await?;
    }

    tracing::info!(feed_url = %config.upstream.feed_url, "live event bridge starting");

    let result = tokio::select! {
        res = crate::server::start(addr, hub, cmd_tx, connection, shutdown_rx) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown: ctrl-c");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    let _ = session_task.await;
    result
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn no_argument_idles_waiting_for_commands() {
        assert_eq!(parse_startup(args(&[])), Startup::Serve { initial: None });
    }

    #[test]
    fn stream_id_argument_connects_immediately() {
        assert_eq!(
            parse_startup(args(&["alice"])),
            Startup::Serve {
                initial: Some(ControlCommand::connect("alice"))
            }
        );
    }

    #[test]
    fn leading_at_is_left_for_the_session_to_normalize() {
        assert_eq!(
            parse_startup(args(&["@alice"])),
            Startup::Serve {
                initial: Some(ControlCommand::connect("@alice"))
            }
        );
    }

    #[test]
    fn config_init_is_a_subcommand_not_a_stream_id() {
        assert_eq!(parse_startup(args(&["config-init"])), Startup::ConfigInit);
        assert_eq!(parse_startup(args(&["config-init", "alice"])), Startup::ConfigInit);
    }
}
