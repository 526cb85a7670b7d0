use std::{
    io::{self, Write},
    net::SocketAddr,
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap_complete::Shell;
use tokio::signal;

use super::{CompletionsArgs, DeleteArgs, ServeArgs, TunnelCommand};
use crate::{
    config::{RulesBackend, Settings},
    http,
    manager::Manager,
    process::{StopOutcome, SystemHost},
    registration::Registration,
    registry::ProxyRecord,
    rules::{Rule, Rules},
};

type SystemManager = Manager<Rules, SystemHost>;

fn build_manager(settings: Settings) -> SystemManager {
    let rules = Rules::from_settings(&settings);
    let host = Arc::new(SystemHost::new(settings.tunnel.command_timeout));
    Manager::new(settings, rules, host)
}

pub async fn serve(mut settings: Settings, args: ServeArgs) -> Result<()> {
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if args.no_register {
        settings.registration.auto_register = false;
    }
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
    tracing::info!(
        registry = %settings.tunnel.registry.display(),
        binary = %settings.tunnel.binary.display(),
        rules = ?settings.rules.backend.resolve(),
        "starting portproxy-manager"
    );

    let manager = Arc::new(build_manager(settings));
    if let Some(Registration::Appended) = manager.self_register().await {
        // The running client only picks up new entries after a restart.
        tracing::info!("web UI entry added; restart the tunnel client to expose it");
    }

    http::serve(manager, addr, async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::warn!(%error, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await
    .with_context(|| format!("serving web UI on {addr}"))
}

pub async fn list_proxies(settings: Settings) -> Result<()> {
    let manager = build_manager(settings);
    let proxies = manager
        .list_proxies()
        .await
        .context("reading proxy registry")?;
    write_proxies(io::stdout().lock(), &proxies)?;
    Ok(())
}

pub async fn delete_proxy(settings: Settings, args: DeleteArgs) -> Result<()> {
    let manager = build_manager(settings);
    if manager.delete_proxy(&args.name).await? {
        println!("removed proxy {}", args.name);
    } else {
        println!("no proxy named {}; registry unchanged", args.name);
    }
    Ok(())
}

pub async fn tunnel(settings: Settings, action: TunnelCommand) -> Result<()> {
    let manager = build_manager(settings);
    match action {
        TunnelCommand::Status => {
            let state = manager.tunnel_status().await?;
            match state.pid {
                Some(pid) => println!("tunnel client running (pid {pid})"),
                None => println!("tunnel client not running"),
            }
        }
        TunnelCommand::Start => {
            let pid = manager.tunnel_start().await?;
            println!("tunnel client started{}", describe_pid(pid));
        }
        TunnelCommand::Stop => match manager.tunnel_stop().await? {
            StopOutcome::NotRunning => println!("tunnel client was not running"),
            StopOutcome::Stopped { pid } => println!("tunnel client stopped (pid {pid})"),
        },
        TunnelCommand::Restart => {
            let pid = manager.tunnel_restart().await?;
            println!("tunnel client restarted{}", describe_pid(pid));
        }
    }
    Ok(())
}

pub async fn list_rules(settings: Settings) -> Result<()> {
    ensure_rules_listable(&settings)?;
    let manager = build_manager(settings);
    let rules = manager
        .list_rules()
        .await
        .context("listing port forwarding rules")?;
    write_rules(io::stdout().lock(), &rules)?;
    Ok(())
}

pub fn completions(args: CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    let mut cmd = crate::cli::Cli::command();
    let shell: Shell = args.shell.into();
    clap_complete::generate(shell, &mut cmd, "portproxy-manager", &mut std::io::stdout());
    Ok(())
}

/// A simulated table lives in the memory of one `serve` process, so a fresh
/// CLI process would always see it empty.
fn ensure_rules_listable(settings: &Settings) -> Result<()> {
    match settings.rules.backend.resolve() {
        RulesBackend::Simulated => bail!(
            "the simulated rules backend keeps rules inside a running `serve` process; \
             query GET /api/rules there, or set [rules] backend = \"netsh\""
        ),
        _ => Ok(()),
    }
}

fn describe_pid(pid: Option<u32>) -> String {
    pid.map(|pid| format!(" (pid {pid})")).unwrap_or_default()
}

fn write_proxies<W: Write>(mut writer: W, proxies: &[ProxyRecord]) -> io::Result<()> {
    if proxies.is_empty() {
        return writeln!(writer, "no proxies registered");
    }
    let width = proxies
        .iter()
        .map(|proxy| proxy.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    writeln!(writer, "{:<width$}  {:<5}  {:<21}  REMOTE", "NAME", "TYPE", "LOCAL")?;
    for proxy in proxies {
        let local = format!("{}:{}", proxy.local_ip, proxy.local_port);
        writeln!(
            writer,
            "{:<width$}  {:<5}  {:<21}  {}",
            proxy.name, proxy.kind, local, proxy.remote_port
        )?;
    }
    Ok(())
}

fn write_rules<W: Write>(mut writer: W, rules: &[Rule]) -> io::Result<()> {
    if rules.is_empty() {
        return writeln!(writer, "no port forwarding rules");
    }
    writeln!(writer, "{:<21}  CONNECT", "LISTEN")?;
    for rule in rules {
        let listen = format!("{}:{}", rule.listen_address, rule.listen_port);
        writeln!(
            writer,
            "{:<21}  {}:{}",
            listen, rule.connect_address, rule.connect_port
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxies_table_aligns_names() {
        let proxies = vec![
            ProxyRecord::tcp("bob-portproxy-manager-web", "8080", "18080"),
            ProxyRecord::tcp("ssh", "22", "6000"),
        ];
        let mut out = Vec::new();
        write_proxies(&mut out, &proxies).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("NAME "));
        assert!(lines[1].starts_with("bob-portproxy-manager-web  tcp    127.0.0.1:8080"));
        assert!(lines[1].ends_with("18080"));
        let column = lines[1].find("tcp").unwrap();
        assert_eq!(lines[2].find("tcp"), Some(column));
    }

    #[test]
    fn empty_listings_say_so() {
        let mut out = Vec::new();
        write_proxies(&mut out, &[]).unwrap();
        write_rules(&mut out, &[]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "no proxies registered\nno port forwarding rules\n"
        );
    }

    #[test]
    fn rules_listing_needs_a_persistent_backend() {
        let mut settings = Settings::default();
        settings.rules.backend = RulesBackend::Simulated;
        let error = ensure_rules_listable(&settings).unwrap_err();
        assert!(error.to_string().contains("/api/rules"), "{error}");

        settings.rules.backend = RulesBackend::Netsh;
        assert!(ensure_rules_listable(&settings).is_ok());
    }

    #[tokio::test]
    async fn list_rules_refuses_simulated_backend() {
        let mut settings = Settings::default();
        settings.rules.backend = RulesBackend::Simulated;
        assert!(list_rules(settings).await.is_err());
    }

    #[test]
    fn rules_table_lists_endpoints() {
        let rules = vec![Rule {
            listen_address: "0.0.0.0".to_string(),
            listen_port: "9000".to_string(),
            connect_address: "10.0.0.9".to_string(),
            connect_port: "443".to_string(),
        }];
        let mut out = Vec::new();
        write_rules(&mut out, &rules).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with("10.0.0.9:443"));
        assert!(text.contains("0.0.0.0:9000"));
    }
}
