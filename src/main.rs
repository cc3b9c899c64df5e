//! Binary entry of the SOCKS5 tunnel daemon

use std::process::ExitCode;

use clap::{error::ErrorKind, Command};

use s5tunnel::service;

fn main() -> ExitCode {
    let mut app = Command::new("s5tunnel")
        .version(s5tunnel::VERSION)
        .about("A TCP port forwarder that tunnels accepted connections through an upstream SOCKS5 proxy");
    app = service::define_command_line_options(app);

    let matches = match app.try_get_matches() {
        Ok(matches) => matches,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    service::main(&matches)
}
