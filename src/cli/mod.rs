use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum, builder::PossibleValue};
use clap_complete::Shell;
use std::path::PathBuf;

mod handlers;

pub const DEFAULT_CONFIG_FILE: &str = "portproxy-manager.toml";

#[derive(Parser, Debug)]
#[command(
    name = "portproxy-manager",
    version,
    about = "Port-forward rules and tunnel client manager"
)]
pub struct Cli {
    /// Settings file; missing files fall back to defaults
    #[arg(long, short = 'c', global = true, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    // `serve` when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.config;
        let settings = || crate::config::load_or_default(&config);
        match self.command.unwrap_or_else(|| Command::Serve(ServeArgs::default())) {
            Command::Serve(args) => handlers::serve(settings(), args).await,
            Command::Proxies(ProxiesCommand::List) => handlers::list_proxies(settings()).await,
            Command::Proxies(ProxiesCommand::Delete(args)) => {
                handlers::delete_proxy(settings(), args).await
            }
            Command::Tunnel(action) => handlers::tunnel(settings(), action).await,
            Command::Rules(RulesCommand::List) => handlers::list_rules(settings()).await,
            Command::Completions(args) => handlers::completions(args),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the web UI and JSON API (default)
    Serve(ServeArgs),
    /// Inspect or edit proxy entries in the registry file
    #[command(subcommand)]
    Proxies(ProxiesCommand),
    /// Control the tunnel client process
    #[command(subcommand)]
    Tunnel(TunnelCommand),
    /// Inspect port forwarding rules (netsh backend only)
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Override the listening port from the settings file
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Skip registering the web UI entry on startup
    #[arg(long = "no-register")]
    pub no_register: bool,
}

#[derive(Subcommand, Debug)]
pub enum ProxiesCommand {
    /// List proxy entries
    List,
    /// Delete a proxy entry by name and restart the tunnel client
    Delete(DeleteArgs),
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Exact proxy name
    pub name: String,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum TunnelCommand {
    /// Show whether the tunnel client is running
    Status,
    /// Start the tunnel client
    Start,
    /// Stop the tunnel client
    Stop,
    /// Stop, wait, and start the tunnel client
    Restart,
}

#[derive(Subcommand, Debug)]
pub enum RulesCommand {
    /// List port forwarding rules; simulated rules exist only inside `serve`
    List,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: CompletionShell,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

impl ValueEnum for CompletionShell {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            CompletionShell::Bash,
            CompletionShell::Zsh,
            CompletionShell::Fish,
            CompletionShell::PowerShell,
            CompletionShell::Elvish,
        ]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self {
            CompletionShell::Bash => PossibleValue::new("bash"),
            CompletionShell::Zsh => PossibleValue::new("zsh"),
            CompletionShell::Fish => PossibleValue::new("fish"),
            CompletionShell::PowerShell => PossibleValue::new("powershell"),
            CompletionShell::Elvish => PossibleValue::new("elvish"),
        })
    }
}

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
            CompletionShell::PowerShell => Shell::PowerShell,
            CompletionShell::Elvish => Shell::Elvish,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from([
            "portproxy-manager",
            "proxies",
            "delete",
            "bob-manager-10.0.0.9-443",
            "--config",
            "/etc/ppm.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/ppm.toml"));
        match cli.command.unwrap() {
            Command::Proxies(ProxiesCommand::Delete(args)) => {
                assert_eq!(args.name, "bob-manager-10.0.0.9-443")
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_defaults_to_local_file() {
        let cli = Cli::try_parse_from(["portproxy-manager", "tunnel", "status"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(matches!(cli.command, Some(Command::Tunnel(TunnelCommand::Status))));
    }

    #[test]
    fn missing_subcommand_leaves_serve_implied() {
        let cli = Cli::try_parse_from(["portproxy-manager", "--config", "ppm.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("ppm.toml"));
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["portproxy-manager", "serve", "--port", "9090"]).unwrap();
        match cli.command {
            Some(Command::Serve(args)) => assert_eq!(args.port, Some(9090)),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn help_still_wins_over_implied_serve() {
        let error = Cli::try_parse_from(["portproxy-manager", "--help"]).unwrap_err();
        assert_eq!(error.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
