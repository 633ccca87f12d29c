use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keydrop")]
#[command(author, version, about = "Key-gated Telegram bot that hands out lines from shared text files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot (default when no subcommand is given)
    Run,
    /// Create a key directly in the database
    Genkey {
        /// Validity: 1d, 12h or lifetime
        #[arg(default_value = "1d")]
        duration: String,
        /// Use this token instead of a random one
        #[arg(long)]
        token: Option<String>,
    },
    /// Delete a key and unbind its owner
    Revoke { token: String },
    /// Import keys and bindings from a legacy JSON key file
    ImportLegacy { path: PathBuf },
    /// Print remaining lines per resource
    Stock,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_no_subcommand_runs_bot() {
        let cli = Cli::try_parse_from(["keydrop"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_genkey_defaults_to_one_day() {
        let cli = Cli::try_parse_from(["keydrop", "genkey"]).unwrap();
        match cli.command {
            Some(Commands::Genkey { duration, token }) => {
                assert_eq!(duration, "1d");
                assert_eq!(token, None);
            }
            _ => panic!("expected genkey"),
        }
    }

    #[test]
    fn test_genkey_with_token() {
        let cli = Cli::try_parse_from(["keydrop", "genkey", "lifetime", "--token", "ABCD1234"]).unwrap();
        match cli.command {
            Some(Commands::Genkey { duration, token }) => {
                assert_eq!(duration, "lifetime");
                assert_eq!(token.as_deref(), Some("ABCD1234"));
            }
            _ => panic!("expected genkey"),
        }
    }

    #[test]
    fn test_import_legacy_takes_path() {
        let cli = Cli::try_parse_from(["keydrop", "import-legacy", "keys.json"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::ImportLegacy { path }) if path == PathBuf::from("keys.json")));
    }
}
