//! Service launcher

use std::{process::ExitCode, sync::Arc};

use clap::{Arg, ArgAction, ArgMatches, Command};
use futures::future::{self, Either};
use log::info;
use tokio::runtime::Builder;

use crate::{
    config::{parse_forward_addr, Config, ServerAddr},
    logging,
    monitor,
    relay::tcprelay::run_tcp_tunnel,
};

/// Defines command line options
pub fn define_command_line_options(app: Command) -> Command {
    app.arg(
        Arg::new("LOCAL_PORT")
            .short('p')
            .long("port")
            .num_args(1)
            .value_name("port")
            .value_parser(clap::value_parser!(u16))
            .help("Listen to the port"),
    )
    .arg(
        Arg::new("SOCKS5_HOST")
            .long("socks5-host")
            .num_args(1)
            .value_name("socks5_host")
            .help("Upstream SOCKS5 host"),
    )
    .arg(
        Arg::new("SOCKS5_PORT")
            .long("socks5-port")
            .num_args(1)
            .value_name("socks5_port")
            .value_parser(clap::value_parser!(u16))
            .help("Upstream SOCKS5 port"),
    )
    .arg(
        Arg::new("HTTP_HOST")
            .long("http-host")
            .num_args(1)
            .value_name("http_host")
            .help("Forward to this host"),
    )
    .arg(
        Arg::new("HTTP_PORT")
            .long("http-port")
            .num_args(1)
            .value_name("http_port")
            .value_parser(clap::value_parser!(u16))
            .help("Forward to this port"),
    )
    .arg(
        Arg::new("VERBOSE")
            .short('v')
            .action(ArgAction::Count)
            .help("Log verbosity"),
    )
}

/// Program entry, runs the tunnel until a termination signal arrives
pub fn main(matches: &ArgMatches) -> ExitCode {
    logging::init_with_config("s5tunnel", matches);

    let config = match create_config(matches) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(1);
        }
    };

    info!("s5tunnel {} starting, {:?}", crate::VERSION, config);

    // One cooperative reactor drives the acceptors and every session.
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("create tokio Runtime");

    runtime.block_on(async move {
        let abort_signal = monitor::create_signal_monitor();
        let server = run_tcp_tunnel(Arc::new(config));

        tokio::pin!(abort_signal);
        tokio::pin!(server);

        match future::select(server, abort_signal).await {
            // Server future resolved without an error. This should never happen.
            Either::Left((Ok(..), ..)) => {
                eprintln!("server exited unexpectedly");
                ExitCode::from(1)
            }
            // Server future resolved with error, which are listener errors in most cases
            Either::Left((Err(err), ..)) => {
                eprintln!("server aborted with {err}");
                ExitCode::from(1)
            }
            // The abort signal future resolved. Means we should just exit.
            Either::Right(_) => ExitCode::SUCCESS,
        }
    })
}

fn create_config(matches: &ArgMatches) -> Result<Config, String> {
    let local_port = matches.get_one::<u16>("LOCAL_PORT").copied().unwrap_or(0);
    let socks5_host = matches.get_one::<String>("SOCKS5_HOST").map(String::as_str).unwrap_or("");
    let socks5_port = matches.get_one::<u16>("SOCKS5_PORT").copied().unwrap_or(0);
    let http_host = matches.get_one::<String>("HTTP_HOST").map(String::as_str).unwrap_or("");
    let http_port = matches.get_one::<u16>("HTTP_PORT").copied().unwrap_or(0);

    let config = Config::new(
        local_port,
        ServerAddr::from_parts(socks5_host, socks5_port),
        parse_forward_addr(http_host, http_port),
    );
    config.check_integrity()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use clap::Command;

    use super::*;

    fn app() -> Command {
        define_command_line_options(Command::new("s5tunnel"))
    }

    #[test]
    fn verify_command() {
        app().debug_assert();
    }

    #[test]
    fn config_from_full_arguments() {
        let matches = app()
            .try_get_matches_from([
                "s5tunnel",
                "-p",
                "8000",
                "--socks5-host",
                "proxy.example.org",
                "--socks5-port",
                "1080",
                "--http-host",
                "example.com",
                "--http-port",
                "443",
            ])
            .unwrap();

        let config = create_config(&matches).unwrap();
        assert_eq!(config.local_port, 8000);
        assert_eq!(config.server.host(), "proxy.example.org");
        assert_eq!(config.server.port(), 1080);
        assert_eq!(config.forward.host(), "example.com");
        assert_eq!(config.forward.port(), 443);
    }

    #[test]
    fn config_reports_every_missing_field() {
        let matches = app().try_get_matches_from(["s5tunnel"]).unwrap();

        let err = create_config(&matches).unwrap_err();
        for field in [
            "missing <port>",
            "missing <socks5_host>",
            "missing <socks5_port>",
            "missing <http_port>",
            "invalid <http_host>",
        ] {
            assert!(err.contains(field), "missing diagnostic {field:?} in {err:?}");
        }
    }
}
