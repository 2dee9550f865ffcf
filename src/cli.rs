// src/cli.rs

use crate::constants::{DEFAULT_PORT, HOME_ENV_VAR, PORT_ENV_VAR};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

/// devloop: a local service that catalogs your scripts and runs them for any UI.
///
/// Scripts are discovered in the folders listed in `config.toml`, run as supervised
/// child processes, and every run is recorded in an append-only history.
///
/// Logging is controlled with `RUST_LOG` (e.g. `RUST_LOG=devloop=debug`).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on. Keep it on loopback unless an API key is configured.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to listen on.
    #[arg(long, env = PORT_ENV_VAR, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding `config.toml`, the history log and in-flight markers.
    /// Defaults to `~/.dev-loop`.
    #[arg(long, env = HOME_ENV_VAR)]
    pub data_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_explicit_flags_are_parsed() {
        let cli = Cli::try_parse_from(["devloop", "--host", "0.0.0.0", "--port", "9000"]).unwrap();
        assert_eq!(cli.host.to_string(), "0.0.0.0");
        assert_eq!(cli.port, 9000);
    }
}
