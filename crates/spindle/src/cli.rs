use std::path::PathBuf;

use bitcoin::Network;
use clap::{ArgAction, Parser, Subcommand};

/// Spindle: talk to an Electrum-style server over one multiplexed connection.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Server endpoint as `host:port:t` (plaintext) or `host:port:s` (TLS).
    #[arg(
        long,
        default_value = "electrum.blockstream.info:50002:s",
        env = "SPINDLE_SERVER"
    )]
    pub server: String,

    /// Configuration directory; pinned certificates live in `<dir>/certs`.
    /// Defaults to `spindle` under the platform config directory.
    #[arg(long, env = "SPINDLE_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Pin a TLS server's certificate on first contact. With `false`,
    /// only hosts pinned beforehand can be reached.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "SPINDLE_TRUST_NEW_CERTS")]
    pub trust_new_certs: bool,

    /// Log every frame sent and received.
    #[arg(long, short)]
    pub verbose: bool,

    /// Fail a read that sees no frame for this many seconds.
    /// Off by default; the session's own timeout applies either way.
    #[arg(long, env = "SPINDLE_READ_TIMEOUT_SECS")]
    pub read_timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Negotiate the protocol version and print the server banner.
    Version,

    /// Print the transaction history of an address.
    History {
        /// Address to look up.
        #[arg(long)]
        address: String,

        /// Network the address belongs to.
        #[arg(long, default_value = "bitcoin")]
        network: Network,
    },

    /// List pinned server certificates.
    Certs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_trust_new_certs() {
        let cli = Cli::try_parse_from(["spindle", "--server", "localhost:50001:t", "version"])
            .expect("parse");
        assert!(cli.trust_new_certs);
        assert!(!cli.verbose);
        assert_eq!(cli.read_timeout_secs, None);
        assert!(matches!(cli.command, Command::Version));
    }

    #[test]
    fn trust_new_certs_can_be_disabled() {
        let cli = Cli::try_parse_from(["spindle", "--trust-new-certs", "false", "certs"])
            .expect("parse");
        assert!(!cli.trust_new_certs);
    }

    #[test]
    fn history_takes_address_and_network() {
        let cli = Cli::try_parse_from([
            "spindle",
            "history",
            "--address",
            "bcrt1qexample",
            "--network",
            "regtest",
        ])
        .expect("parse");
        let Command::History { address, network } = cli.command else {
            panic!("expected history");
        };
        assert_eq!(address, "bcrt1qexample");
        assert_eq!(network, Network::Regtest);
    }
}
