//! Vanlink - provision a multi-site topology and verify it converges

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vanlink::config::TopologyFile;
use vanlink::convergence::ConvergenceWatcher;
use vanlink::credentials::CredentialStore;
use vanlink::platform::cluster::{create_client, KubePlatform, DEFAULT_ROUTER_IMAGE};
use vanlink::platform::memory::MemoryPlatform;
use vanlink::platform::{SecretClient, SiteConfigSpec, SitePlatform};
use vanlink::telemetry::{init_logging, LogConfig, LogFormat};
use vanlink::token::{TokenArtifact, TokenExchange};
use vanlink::topology::{Site, SiteRole, Teardown, TopologyBuilder};

/// Vanlink - provision a multi-site topology and verify it converges
#[derive(Parser, Debug)]
#[command(name = "vanlink", version, about, long_about = None)]
struct Cli {
    /// Log filter directives (RUST_LOG takes precedence)
    #[arg(long, global = true, env = "VANLINK_LOG")]
    log_filter: Option<String>,

    /// Log line format
    #[arg(long, global = true, env = "VANLINK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Path to a kubeconfig; inferred from the environment when omitted
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Router container image
    #[arg(long, global = true, env = "VANLINK_ROUTER_IMAGE", default_value = DEFAULT_ROUTER_IMAGE)]
    router_image: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision a topology, wait for convergence, then tear it down
    Verify(VerifyArgs),

    /// Delete every namespace a topology file declares
    Teardown(TopologyArgs),

    /// Export or import a connection token
    #[command(subcommand)]
    Token(TokenCommands),
}

/// Topology file argument
#[derive(Parser, Debug)]
struct TopologyArgs {
    /// Path to the topology YAML file
    #[arg(short = 'f', long = "file")]
    file: PathBuf,
}

/// Verify mode arguments
#[derive(Parser, Debug)]
struct VerifyArgs {
    #[command(flatten)]
    topology: TopologyArgs,

    /// Run against an in-memory platform instead of a cluster
    #[arg(long)]
    simulate: bool,

    /// Leave the provisioned sites in place afterwards
    #[arg(long)]
    keep: bool,
}

#[derive(Subcommand, Debug)]
enum TokenCommands {
    /// Write a site's connection token to a directory
    Export {
        /// Namespace of the exporting site
        #[arg(long)]
        namespace: String,
        /// Site id recorded in the token
        #[arg(long)]
        site_id: String,
        /// Directory the token file is written to
        #[arg(long)]
        out: PathBuf,
        /// Advertise the short in-cluster router host
        #[arg(long)]
        cluster_local: bool,
    },

    /// Register a connector from a token file
    Import {
        /// Token file to import
        #[arg(long)]
        file: PathBuf,
        /// Namespace of the importing site
        #[arg(long)]
        namespace: String,
        /// Id of the importing site; defaults to the namespace
        #[arg(long)]
        site_id: Option<String>,
        /// Connector name; defaults to link-{peer}
        #[arg(long, default_value = "")]
        name: String,
        /// Routing cost
        #[arg(long, default_value_t = 0)]
        cost: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig {
        filter: cli.log_filter.clone(),
        format: cli.log_format,
        ansi: std::io::stderr().is_terminal(),
    })?;

    match cli.command {
        Commands::Verify(ref args) => run_verify(&cli, args).await,
        Commands::Teardown(ref args) => run_teardown(&cli, args).await,
        Commands::Token(ref command) => run_token(&cli, command).await,
    }
}

/// Both platform seams backed by the same implementation
fn seams<P>(platform: Arc<P>) -> (Arc<dyn SecretClient>, Arc<dyn SitePlatform>)
where
    P: SecretClient + SitePlatform + 'static,
{
    (platform.clone(), platform)
}

async fn kube_seams(cli: &Cli) -> anyhow::Result<(Arc<dyn SecretClient>, Arc<dyn SitePlatform>)> {
    let client = create_client(cli.kubeconfig.as_deref()).await?;
    Ok(seams(Arc::new(
        KubePlatform::new(client).with_router_image(cli.router_image.clone()),
    )))
}

/// Cancel `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received, canceling");
                token.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for interrupt"),
        }
    });
}

/// Provision, verify, then tear down unless asked to keep the sites
async fn run_verify(cli: &Cli, args: &VerifyArgs) -> anyhow::Result<()> {
    let file = TopologyFile::load(&args.topology.file)?;
    let token_dir = file.token_dir()?;
    let (topology, targets, settings) = file.into_plan()?;

    let (secrets, platform) = if args.simulate {
        seams(Arc::new(MemoryPlatform::new()))
    } else {
        kube_seams(cli).await?
    };

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let builder = TopologyBuilder::new(
        platform.clone(),
        CredentialStore::new(secrets.clone()),
        TokenExchange::new(secrets, platform.clone(), token_dir.path()),
    );
    let watcher = ConvergenceWatcher::new(platform.clone(), settings);

    let outcome = async {
        builder.build(&topology).await?;
        let observed = watcher.verify(&targets, &cancel).await?;
        Ok::<_, vanlink::Error>(observed)
    }
    .await;

    if args.keep {
        info!("keeping provisioned sites");
    } else {
        let deleted = Teardown::new(platform).run(&topology).await;
        info!(deleted, "teardown finished");
    }

    let observed = outcome.context("topology did not converge")?;
    for (target, sites) in targets.iter().zip(&observed) {
        info!(
            site = %target.site_id,
            total = sites.total,
            direct = sites.direct,
            indirect = sites.indirect,
            "converged"
        );
    }
    Ok(())
}

async fn run_teardown(cli: &Cli, args: &TopologyArgs) -> anyhow::Result<()> {
    let (topology, _, _) = TopologyFile::load(&args.file)?.into_plan()?;
    let (_, platform) = kube_seams(cli).await?;
    let deleted = Teardown::new(platform).run(&topology).await;
    info!(deleted, sites = topology.sites.len(), "teardown finished");
    Ok(())
}

async fn run_token(cli: &Cli, command: &TokenCommands) -> anyhow::Result<()> {
    let (secrets, platform) = kube_seams(cli).await?;
    match command {
        TokenCommands::Export {
            namespace,
            site_id,
            out,
            cluster_local,
        } => {
            let config = SiteConfigSpec {
                namespace: namespace.clone(),
                cluster_local: *cluster_local,
                ..Default::default()
            };
            let site = Site::new(site_id, namespace, SiteRole::Interior, config);
            let artifact = TokenExchange::new(secrets, platform, out)
                .export_token(&site)
                .await?;
            println!("{}", artifact.path.display());
        }
        TokenCommands::Import {
            file,
            namespace,
            site_id,
            name,
            cost,
        } => {
            let token = TokenArtifact::from_path("", file).read().await?;
            let peer = token.site_id().unwrap_or_default().to_string();
            let artifact = TokenArtifact::from_path(peer, file);
            let site_id = site_id.clone().unwrap_or_else(|| namespace.clone());
            let site = Site::new(site_id, namespace, SiteRole::Interior, SiteConfigSpec::default());
            let dir = file
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir);
            let connector = TokenExchange::new(secrets, platform, dir)
                .import_token(&artifact, &site, name, *cost)
                .await?;
            println!("{}", connector.name);
        }
    }
    Ok(())
}
