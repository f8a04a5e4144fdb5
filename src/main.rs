//! Blockstore Operator
//!
//! Node-local control plane daemon. Each storage node runs one instance; the
//! instance publishes its LVM inventory, keeps the placement scheduler fed
//! with cluster events, and reconciles the Volume and Snapshot objects whose
//! spec names this node as owner.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blockstore_operator::crd::IscsiInfo;
use blockstore_operator::{
    Error, ErrorAction, KubeStore, Lvm, NodeSyncer, Result, SchedulerManager, Snapshot,
    SnapshotReconciler, StorageNode, TargetCli, TargetCliRunner, Volume, VolumeReconciler,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Blockstore Operator - LVM/iSCSI cluster block storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the node this instance runs on
    #[arg(long, env = "NODE_ID")]
    node_id: String,

    /// Namespace holding the storage objects
    #[arg(long, env = "NAMESPACE", default_value = "blockstore")]
    namespace: String,

    /// iSCSI portal address advertised by this node
    #[arg(long, env = "ISCSI_PORTAL", default_value = "0.0.0.0:3260")]
    iscsi_portal: String,

    /// Network interface the portal binds to
    #[arg(long, env = "ISCSI_IFACE", default_value = "default")]
    iscsi_iface: String,

    /// Initiator IQN this node uses when mounting remote volumes
    #[arg(long, env = "ISCSI_INITIATOR_NAME")]
    initiator_name: String,

    /// CHAP userid set on created targets
    #[arg(long, env = "ISCSI_USERID", default_value = "")]
    iscsi_userid: String,

    /// CHAP password set on created targets
    #[arg(long, env = "ISCSI_PASSWORD", default_value = "")]
    iscsi_password: String,

    /// Inventory publish interval in seconds
    #[arg(long, env = "SYNC_INTERVAL", default_value = "30")]
    sync_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Controller Context
// =============================================================================

struct Context {
    scheduler: Arc<SchedulerManager>,
    volume_reconciler: Arc<VolumeReconciler>,
    snapshot_reconciler: Arc<SnapshotReconciler>,
}

fn requeue_for(err: &Error) -> Action {
    match err.action() {
        ErrorAction::RequeueAfter(d) => Action::requeue(d),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

async fn reconcile_volume(vol: Arc<Volume>, ctx: Arc<Context>) -> Result<Action> {
    ctx.scheduler.on_volume_event(&vol);
    ctx.volume_reconciler.reconcile(vol.name()).await?;
    Ok(Action::await_change())
}

fn volume_error_policy(vol: Arc<Volume>, err: &Error, _ctx: Arc<Context>) -> Action {
    warn!(volume = vol.name(), error = %err, "volume reconcile failed");
    requeue_for(err)
}

async fn reconcile_snapshot(snap: Arc<Snapshot>, ctx: Arc<Context>) -> Result<Action> {
    ctx.scheduler.on_snapshot_event(&snap);
    ctx.snapshot_reconciler.reconcile(snap.name()).await?;
    Ok(Action::await_change())
}

fn snapshot_error_policy(snap: Arc<Snapshot>, err: &Error, _ctx: Arc<Context>) -> Action {
    warn!(snapshot = snap.name(), error = %err, "snapshot reconcile failed");
    requeue_for(err)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Blockstore Operator");
    info!("  Version: {}", blockstore_operator::VERSION);
    info!("  Node: {}", args.node_id);
    info!("  Namespace: {}", args.namespace);
    info!("  Portal: {}", args.iscsi_portal);

    let client = Client::try_default().await?;
    let store = Arc::new(KubeStore::new(client.clone(), &args.namespace));
    let lvm = Arc::new(Lvm::new());
    let device = Arc::new(TargetCli::new(Arc::new(TargetCliRunner::new())));
    let scheduler = Arc::new(SchedulerManager::new());

    let volumes: Api<Volume> = Api::namespaced(client.clone(), &args.namespace);
    let snapshots: Api<Snapshot> = Api::namespaced(client.clone(), &args.namespace);
    let nodes: Api<StorageNode> = Api::namespaced(client.clone(), &args.namespace);

    // Seed the scheduler from a full listing before the watches take over
    resync_scheduler(&scheduler, &volumes, &snapshots, &nodes).await?;

    if !args.iscsi_userid.is_empty() {
        use blockstore_operator::DeviceControl;
        if let Err(e) = device
            .set_discovery_auth(&args.iscsi_userid, &args.iscsi_password)
            .await
        {
            warn!(error = %e, "discovery auth setup failed");
        }
    }

    let cancel = CancellationToken::new();

    // Inventory publisher
    let syncer = NodeSyncer::new(
        args.node_id.clone(),
        IscsiInfo {
            iface: args.iscsi_iface.clone(),
            portal: args.iscsi_portal.clone(),
            initiator_name: args.initiator_name.clone(),
        },
        Duration::from_secs(args.sync_interval_secs),
        store.clone(),
        lvm.clone(),
    );
    let syncer_cancel = cancel.clone();
    tokio::spawn(async move { syncer.run(syncer_cancel).await });

    // Node inventory watch feeding the scheduler
    let node_scheduler = scheduler.clone();
    let node_watch = watcher(nodes, watcher::Config::default())
        .applied_objects()
        .for_each(move |event| {
            let scheduler = node_scheduler.clone();
            async move {
                match event {
                    Ok(node) => scheduler.on_node_event(&node),
                    Err(e) => warn!(error = %e, "node watch error"),
                }
            }
        });
    tokio::spawn(node_watch);

    let context = Arc::new(Context {
        scheduler: scheduler.clone(),
        volume_reconciler: VolumeReconciler::new(
            args.node_id.clone(),
            args.iscsi_userid.clone(),
            args.iscsi_password.clone(),
            store.clone(),
            device,
            lvm.clone(),
        ),
        snapshot_reconciler: SnapshotReconciler::new(args.node_id.clone(), store, lvm),
    });

    let volume_controller = Controller::new(volumes, watcher::Config::default())
        .run(reconcile_volume, volume_error_policy, context.clone())
        .for_each(|result| async {
            if let Err(e) = result {
                error!(error = %e, "volume controller error");
            }
        });

    let snapshot_controller = Controller::new(snapshots, watcher::Config::default())
        .run(reconcile_snapshot, snapshot_error_policy, context)
        .for_each(|result| async {
            if let Err(e) = result {
                error!(error = %e, "snapshot controller error");
            }
        });

    info!("Controllers running");
    tokio::select! {
        _ = volume_controller => {}
        _ = snapshot_controller => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    cancel.cancel();
    info!("Operator shutdown complete");
    Ok(())
}

/// Replay the current cluster contents into the scheduler
async fn resync_scheduler(
    scheduler: &SchedulerManager,
    volumes: &Api<Volume>,
    snapshots: &Api<Snapshot>,
    nodes: &Api<StorageNode>,
) -> Result<()> {
    let node_list = nodes.list(&Default::default()).await?.items;
    let volume_list = volumes.list(&Default::default()).await?.items;
    let snapshot_list = snapshots.list(&Default::default()).await?.items;

    // Patterns come from the volumes themselves
    for vol in &volume_list {
        if let Err(e) = scheduler.scheduler_for(&vol.spec.vg_pattern) {
            warn!(volume = vol.name(), error = %e, "skipping volume with bad pattern");
        }
    }

    scheduler.resync(&node_list, &volume_list, &snapshot_list);
    info!(
        nodes = node_list.len(),
        volumes = volume_list.len(),
        snapshots = snapshot_list.len(),
        "scheduler resynced"
    );
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
