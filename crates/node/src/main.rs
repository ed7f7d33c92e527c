use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, Level};

use echonet_grid::{
    local_ip, AdvertisementPublisher, CapabilityAdvertiser, LoadGauge, MdnsDiscovery,
    PeerDirectory, SystemMetrics,
};
use echonet_skill::{
    HttpRemoteExecutor, LocalExecutor, PipelineDispatcher, PlanValidator, SelectionPolicy,
    SkillRouter, TaskStore,
};
use echonetd::skills::builtin_registry;
use echonetd::{router, AppState, NodeArgs, NodeConfig, UserTable};

#[derive(Parser)]
#[command(name = "echonetd")]
#[command(about = "Echonet node daemon - share skills with peers on your LAN", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    node: NodeArgs,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node daemon
    Start,
    /// Print the resolved node configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    let config = NodeConfig::from_args(cli.node)?;

    match cli.command {
        Some(Commands::Start) | None => {
            run_daemon(config).await?;
        }
        Some(Commands::Info) => {
            println!("id:                 {}", config.id);
            println!("url:                {}", config.url);
            println!("port:               {}", config.port);
            println!("skills:             {}", config.skills.join(", "));
            println!("max load:           {}", config.max_load);
            println!("advertise interval: {:?}", config.advertise_interval);
            println!("peer ttl:           {:?}", config.peer_ttl);
            println!("remote timeout:     {:?}", config.remote_timeout);
            println!("users file:         {}", config.users_file.display());
            println!("health aware:       {}", config.health_aware);
        }
    }

    Ok(())
}

async fn run_daemon(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("🛰️  Echonet Node Daemon");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("");
    info!("📍 Node ID: {}", config.id);
    info!("   URL: {}", config.url);
    info!("   Skills: {:?}", config.skills);
    info!("");

    let users = Arc::new(UserTable::load(&config.users_file)?);
    let directory = Arc::new(PeerDirectory::new(config.id.clone(), config.peer_ttl));
    let load = LoadGauge::new();

    // One mDNS daemon publishes our record and browses for peers.
    let discovery = Arc::new(MdnsDiscovery::new(local_ip(), config.port)?);
    let (listener_tx, listener_rx) = watch::channel(false);
    let listener = discovery.spawn_listener(Arc::clone(&directory), listener_rx)?;
    info!("🔍 Listening for peers...");

    let publisher: Arc<dyn AdvertisementPublisher> = discovery.clone();
    let mut advertiser = CapabilityAdvertiser::new(
        config.id.clone(),
        config.skills.clone(),
        config.max_load,
        Arc::new(SystemMetrics::new()),
        publisher,
        load.clone(),
    )
    .with_interval(config.advertise_interval);
    advertiser.start()?;
    info!("📡 Advertising every {:?}", config.advertise_interval);

    let policy = if config.health_aware {
        SelectionPolicy::HealthAware
    } else {
        SelectionPolicy::FirstMatch
    };
    let skill_router = Arc::new(
        SkillRouter::new(config.skills.iter().cloned(), Arc::clone(&directory))
            .with_policy(policy)
            .with_local_metrics(advertiser.metrics()),
    );
    let local = Arc::new(LocalExecutor::new(Arc::new(builtin_registry(&config.skills))));
    let dispatcher = Arc::new(PipelineDispatcher::new(
        Arc::clone(&skill_router),
        local,
        Arc::new(HttpRemoteExecutor::new(config.remote_timeout)),
        load.clone(),
    ));
    let tasks = Arc::new(TaskStore::new());

    let state = AppState {
        id: config.id.clone(),
        url: config.url.clone(),
        dispatcher,
        validator: Arc::new(PlanValidator::new(skill_router)),
        tasks: Arc::clone(&tasks),
        users,
        metrics: advertiser.metrics(),
        load,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let http = tokio::net::TcpListener::bind(addr).await?;

    info!("");
    info!("═══════════════════════════════════════════════════════════");
    info!("  🚀 Node is running on {}", config.url);
    info!("");
    info!("  Start another node on this LAN to share skills:");
    info!("    cargo run -p echonetd -- --id nodeB --port 5001 --skills uppercase");
    info!("═══════════════════════════════════════════════════════════");
    info!("");

    axum::serve(http, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("🛑 Shutting down...");
    advertiser.stop().await;
    let _ = listener_tx.send(true);
    let _ = listener.await;
    discovery.shutdown();
    directory.clear();
    tasks.clear();
    info!("✅ Node stopped");

    Ok(())
}
