//! Clusterlink CLI - talk to the local cluster connector
//!
//! The connector daemon owns the cluster session; this binary sends it
//! requests over the local IPC socket and prints the results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clusterlink_connector::ipc::{IpcClient, IpcRequest, IpcResponse};
use clusterlink_connector::ConfigManager;
use clusterlink_proto::{
    ConnectInfo, ConnectRequest, DeploymentInfoSnapshot, ListFilter, ListRequest, SessionStatus,
    UninstallRequest, UninstallType,
};
use std::collections::BTreeMap;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Clusterlink - bridge your workstation to a remote cluster
#[derive(Parser, Debug)]
#[command(name = "clusterlink")]
#[command(about = "Bridge your workstation to a remote cluster")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect the connector to a cluster
    #[command(long_about = r#"
Ask the connector to connect to a cluster. Connecting again with the same
cluster only updates the mapped namespaces; switching clusters requires a
connector restart.

EXAMPLES:
  # Connect using the current kubeconfig context
  clusterlink connect

  # Connect to a specific context and map two namespaces
  clusterlink connect --context staging \
    --mapped-namespace default --mapped-namespace billing
    "#)]
    Connect {
        /// Kubeconfig context to use
        #[arg(long)]
        context: Option<String>,

        /// API server address (https://host:port)
        #[arg(long)]
        server: Option<String>,

        /// Default namespace
        #[arg(long)]
        namespace: Option<String>,

        /// Path to the kubeconfig file
        #[arg(long, env = "KUBECONFIG")]
        kubeconfig: Option<String>,

        /// Namespace to make visible (repeatable; "all" for every namespace)
        #[arg(long = "mapped-namespace")]
        mapped_namespaces: Vec<String>,
    },

    /// Show the connector's session status
    Status,

    /// List workloads in the mapped namespaces
    List {
        /// Only workloads that can be intercepted
        #[arg(long, conflicts_with_all = ["intercepts", "agents"])]
        only_interceptable: bool,

        /// Only workloads with an active intercept
        #[arg(long, conflicts_with = "agents")]
        intercepts: bool,

        /// Only workloads with an installed agent
        #[arg(long)]
        agents: bool,

        /// Namespace to list (defaults to the connected namespace)
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Remove agents, or everything, from the cluster
    #[command(long_about = r#"
Remove traffic agents from workloads in the cluster.

EXAMPLES:
  # Remove the agent from one workload
  clusterlink uninstall web

  # Remove every agent
  clusterlink uninstall --all-agents
    "#)]
    Uninstall {
        /// Workloads whose agents should be removed
        #[arg(conflicts_with_all = ["all_agents", "everything"])]
        agents: Vec<String>,

        /// Remove every agent
        #[arg(long, conflicts_with = "everything")]
        all_agents: bool,

        /// Remove every agent and the traffic manager
        #[arg(long)]
        everything: bool,

        /// Namespace of the named workloads
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Show client and connector versions
    Version,

    /// Shut the connector down
    Quit,
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

async fn connect_client() -> Result<IpcClient> {
    let config = ConfigManager::load().context("Failed to load configuration")?;
    let path = config.socket_path()?;
    debug!("Using connector socket {:?}", path);
    IpcClient::connect_to(&path)
        .await
        .context("Is the connector running?")
}

fn print_connect_info(info: &ConnectInfo) {
    println!("Connect: {}", info.error);
    if let Some(text) = &info.error_text {
        println!("  Error:   {}", text);
    }
    if info.cluster_ok {
        println!("  Context: {}", info.cluster_context);
        if !info.cluster_server.is_empty() {
            println!("  Server:  {}", info.cluster_server);
        }
        println!("  Cluster: {}", info.cluster_id);
    }
    println!(
        "  Bridge:  {}",
        if info.bridge_ok { "healthy" } else { "not running" }
    );
    if let Some(version) = &info.manager_version {
        println!("  Traffic manager: {}", version);
    }
    for ingress in &info.ingress_infos {
        println!(
            "  Ingress: {} {}:{}{}",
            ingress.kind,
            ingress.host,
            ingress.port,
            if ingress.use_tls { " (tls)" } else { "" }
        );
    }
}

fn print_status(status: &SessionStatus) {
    println!("{}", status.phase);
    if let Some(context) = &status.cluster_context {
        println!("  Context: {}", context);
    }
    if let Some(server) = &status.cluster_server {
        println!("  Server:  {}", server);
    }
    if let Some(ok) = status.bridge_ok {
        println!("  Bridge:  {}", if ok { "healthy" } else { "unhealthy" });
    }
}

fn print_workloads(snapshot: &DeploymentInfoSnapshot) {
    if snapshot.workloads.is_empty() {
        println!("No workloads found");
        return;
    }
    for workload in &snapshot.workloads {
        let state = match (&workload.intercept, &workload.agent, &workload.not_interceptable_reason) {
            (Some(intercept), _, _) => format!("intercepted ({})", intercept.spec.name),
            (None, Some(_), _) => "ready to intercept (agent installed)".to_string(),
            (None, None, Some(reason)) => format!("not interceptable: {}", reason),
            (None, None, None) => "ready to intercept".to_string(),
        };
        println!(
            "{:<30} {:<12} {}",
            format!("{}.{}", workload.name, workload.namespace),
            workload.resource_type,
            state
        );
    }
}

async fn request(req: IpcRequest) -> Result<IpcResponse> {
    let mut client = connect_client().await?;
    match client.request(&req).await? {
        IpcResponse::Error { message } => anyhow::bail!("Connector error: {}", message),
        response => Ok(response),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Connect {
            context,
            server,
            namespace,
            kubeconfig,
            mapped_namespaces,
        } => {
            let kube_flags: BTreeMap<String, String> = [
                ("context", context),
                ("server", server),
                ("namespace", namespace),
                ("kubeconfig", kubeconfig),
            ]
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
            .collect();

            let req = IpcRequest::Connect {
                request: ConnectRequest {
                    kube_flags,
                    mapped_namespaces,
                },
            };
            match request(req).await? {
                IpcResponse::Connect { info } => {
                    print_connect_info(&info);
                    if !info.is_connected() {
                        std::process::exit(1);
                    }
                }
                other => anyhow::bail!("Unexpected response: {:?}", other),
            }
        }
        Commands::Status => match request(IpcRequest::Status).await? {
            IpcResponse::Status { status } => print_status(&status),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        },
        Commands::List {
            only_interceptable,
            intercepts,
            agents,
            namespace,
        } => {
            let filter = if only_interceptable {
                ListFilter::Interceptable
            } else if intercepts {
                ListFilter::Intercepts
            } else if agents {
                ListFilter::InstalledAgents
            } else {
                ListFilter::Everything
            };
            let req = IpcRequest::List {
                request: ListRequest { filter, namespace },
            };
            match request(req).await? {
                IpcResponse::List { snapshot } => print_workloads(&snapshot),
                other => anyhow::bail!("Unexpected response: {:?}", other),
            }
        }
        Commands::Uninstall {
            agents,
            all_agents,
            everything,
            namespace,
        } => {
            let uninstall_type = if everything {
                UninstallType::Everything
            } else if all_agents {
                UninstallType::AllAgents
            } else if !agents.is_empty() {
                UninstallType::NamedAgents
            } else {
                anyhow::bail!("Name at least one workload, or pass --all-agents or --everything");
            };
            let req = IpcRequest::Uninstall {
                request: UninstallRequest {
                    uninstall_type,
                    agents,
                    namespace,
                },
            };
            match request(req).await? {
                IpcResponse::Uninstall { result } => match result.error_text {
                    Some(text) => anyhow::bail!("Uninstall failed: {}", text),
                    None => println!("Uninstalled"),
                },
                other => anyhow::bail!("Unexpected response: {:?}", other),
            }
        }
        Commands::Version => {
            println!("Client:    {} ({})", env!("GIT_TAG"), env!("GIT_HASH"));
            match request(IpcRequest::Version).await {
                Ok(IpcResponse::Version { info }) => {
                    println!("Connector: {} (API v{})", info.version, info.api_version)
                }
                Ok(other) => anyhow::bail!("Unexpected response: {:?}", other),
                Err(e) => println!("Connector: not running ({:#})", e),
            }
        }
        Commands::Quit => match request(IpcRequest::Quit).await? {
            IpcResponse::Ok { message } => {
                println!("{}", message.unwrap_or_else(|| "Connector stopped".to_string()))
            }
            other => anyhow::bail!("Unexpected response: {:?}", other),
        },
    }

    Ok(())
}
