//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use folio_session::DEFAULT_LOGIN_PATH;
use folio_transport::SocialProvider;

/// Folio dashboard client.
#[derive(Parser, Debug)]
#[command(name = "folio", version, about = "Sign in to the Folio backend and query it")]
pub struct Cli {
    /// File holding the session and cached query results.
    #[arg(long, global = true, env = "FOLIO_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Backend base URL.
    #[arg(long, global = true, env = "FOLIO_API_BASE")]
    pub api_base: Option<String>,

    /// Log filter, e.g. `debug` or `folio_session=trace` (overrides RUST_LOG).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in with email and password.
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "FOLIO_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account and sign in.
    Register {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "FOLIO_PASSWORD", hide_env_values = true)]
        password: String,

        /// Display name.
        #[arg(long)]
        full_name: Option<String>,
    },

    /// Sign in with an identity-provider token.
    Social {
        #[arg(long, value_enum)]
        provider: Provider,

        /// ID token issued by the provider.
        #[arg(long)]
        credential: String,
    },

    /// Sign in as a FAR customer by customer ID.
    FarLogin {
        #[arg(long, env = "FOLIO_CUSTOMER_ID")]
        customer_id: String,
    },

    /// Leave FAR customer mode, keeping the app session.
    FarLogout,

    /// Forget the stored session.
    Logout,

    /// Show the signed-in user.
    Whoami,

    /// POST a JSON body to an endpoint, showing any cached result first.
    Query {
        /// Endpoint path, e.g. `/api/far/metrics`.
        path: String,

        /// JSON request body.
        #[arg(long, default_value = "{}")]
        body: String,

        /// Send with the FAR customer token instead of the app session.
        #[arg(long)]
        far_customer: bool,
    },

    /// Check whether a protected location may be shown.
    Guard {
        location: String,

        #[arg(long, default_value = DEFAULT_LOGIN_PATH)]
        login_path: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    Apple,
}

impl From<Provider> for SocialProvider {
    fn from(provider: Provider) -> Self {
        match provider {
            Provider::Google => Self::Google,
            Provider::Apple => Self::Apple,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_command_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_query_defaults_to_empty_body() {
        let cli = Cli::try_parse_from(["folio", "query", "/api/far/metrics"]).unwrap();
        match cli.command {
            Command::Query {
                path,
                body,
                far_customer,
            } => {
                assert_eq!(path, "/api/far/metrics");
                assert_eq!(body, "{}");
                assert!(!far_customer);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "folio",
            "guard",
            "/far",
            "--api-base",
            "http://127.0.0.1:9000",
            "--state-file",
            "/tmp/folio.json",
        ])
        .unwrap();
        assert_eq!(cli.api_base.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(cli.state_file, Some(PathBuf::from("/tmp/folio.json")));
        assert!(matches!(
            cli.command,
            Command::Guard { ref login_path, .. } if login_path == "/login"
        ));
    }

    #[test]
    fn test_far_login() {
        let cli = Cli::try_parse_from(["folio", "far-login", "--customer-id", "C-100"]).unwrap();
        let Command::FarLogin { customer_id } = cli.command else {
            panic!("expected far-login command");
        };
        assert_eq!(customer_id, "C-100");

        let cli = Cli::try_parse_from([
            "folio",
            "query",
            "/api/far/transactions/C-100",
            "--far-customer",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Query { far_customer: true, .. }));
    }

    #[test]
    fn test_social_provider() {
        let cli = Cli::try_parse_from([
            "folio", "social", "--provider", "apple", "--credential", "id-token",
        ])
        .unwrap();
        let Command::Social { provider, credential } = cli.command else {
            panic!("expected social command");
        };
        assert_eq!(SocialProvider::from(provider), SocialProvider::Apple);
        assert_eq!(credential, "id-token");
    }
}
