//! Channel node wiring and lifecycle.
//!
//! [`ChannelContext`] builds every component of a node once and hands them
//! to each other as `Arc`s; nothing is global. [`ChannelServer`] drives the
//! startup order:
//!
//! 1. connect and identify with the registry (blocks until it works)
//! 2. start the heartbeat and the scheduler driver
//! 3. bind the client listener, leave maintenance
//! 4. accept clients until stopped

use crate::client_listener::{bind_listener, handle_client};
use crate::clients::ClientRegistry;
use crate::commands::{register_builtins, BuiltinServices, CommandRouter, CommandSet, CommandSetBuilder};
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::registry_link::RegistryLink;
use crate::shutdown::{ProcessExit, ShutdownCoordinator};
use crate::status::{NodeStatus, ServerList, UpstreamLink};
use crate::store::SharedStateStore;
use cluster_protocol::schedule::{spawn_driver, Scheduler};
use cluster_protocol::{AccountStore, Sleeper};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How often the scheduler driver checks for due timers.
pub const SCHEDULER_RESOLUTION: Duration = Duration::from_millis(100);

const CLIENT_BACKLOG: i32 = 1024;

/// Collaborators a node is built with.
pub struct ChannelDeps {
    pub accounts: Arc<dyn AccountStore>,
    pub store: Arc<dyn SharedStateStore>,
    pub exit: Arc<dyn ProcessExit>,
    pub sleeper: Arc<dyn Sleeper>,
}

/// Every component of one channel node.
pub struct ChannelContext {
    pub config: ChannelConfig,
    pub scheduler: Arc<Scheduler>,
    pub clients: Arc<ClientRegistry>,
    pub server_list: Arc<ServerList>,
    pub upstream: Arc<UpstreamLink>,
    pub status: Arc<NodeStatus>,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub router: Arc<CommandRouter>,
    pub registry_link: Arc<RegistryLink>,
    pub accounts: Arc<dyn AccountStore>,
    pub store: Arc<dyn SharedStateStore>,
}

impl ChannelContext {
    /// Builds a node with the built-in commands only.
    pub fn new(config: ChannelConfig, deps: ChannelDeps) -> Arc<Self> {
        Self::with_commands(config, deps, |_| {})
    }

    /// Builds a node; `register` adds commands next to the built-in ones.
    pub fn with_commands<F>(config: ChannelConfig, deps: ChannelDeps, register: F) -> Arc<Self>
    where
        F: FnOnce(&mut CommandSetBuilder),
    {
        let scheduler = Arc::new(Scheduler::new());
        let clients = Arc::new(ClientRegistry::new());
        let server_list = Arc::new(ServerList::new());
        let upstream = Arc::new(UpstreamLink::new());

        let status = Arc::new(NodeStatus::new(
            config.server_group.clone(),
            config.node_name.clone(),
            config.host.clone(),
            config.bind_address.port(),
            config.max_users,
            clients.clone(),
            upstream.clone(),
        ));

        let coordinator = Arc::new(ShutdownCoordinator::new(
            scheduler.clone(),
            status.clone(),
            server_list.clone(),
            clients.clone(),
            deps.store.clone(),
            deps.exit,
        ));

        let mut builder = CommandSet::builder();
        register_builtins(
            &mut builder,
            BuiltinServices {
                coordinator: coordinator.clone(),
                clients: clients.clone(),
                upstream: upstream.clone(),
            },
        );
        register(&mut builder);
        let router = Arc::new(CommandRouter::new(
            builder.build(&config.commands.overrides),
            config.commands.prefix.clone(),
            config.commands.target_prefix.clone(),
            clients.clone(),
        ));

        let registry_link = Arc::new(RegistryLink::new(
            config.registry_address.clone(),
            config.registry_password.clone(),
            config.reconnect_interval(),
            upstream.clone(),
            status.clone(),
            server_list.clone(),
            clients.clone(),
            coordinator.clone(),
            deps.sleeper,
        ));

        Arc::new(Self {
            config,
            scheduler,
            clients,
            server_list,
            upstream,
            status,
            coordinator,
            router,
            registry_link,
            accounts: deps.accounts,
            store: deps.store,
        })
    }
}

pub struct ChannelServer {
    context: Arc<ChannelContext>,
    shutdown_sender: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelServer {
    pub fn new(context: Arc<ChannelContext>) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            context,
            shutdown_sender,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> Arc<ChannelContext> {
        self.context.clone()
    }

    /// Sender that stops the accept loop; also used by the fault hook.
    pub fn stop_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_sender.clone()
    }

    /// Starts the node and serves clients until stopped.
    pub async fn start(&self) -> Result<(), ChannelError> {
        let listener = self.bring_up().await?;
        self.serve(listener).await
    }

    /// Everything before the accept loop. Returns the bound client listener.
    pub async fn bring_up(&self) -> Result<TcpListener, ChannelError> {
        let ctx = &self.context;
        info!("🚀 Starting channel {}", ctx.status.full_name());

        let established = ctx.registry_link.connect_until_ready().await;
        let link_task = tokio::spawn(ctx.registry_link.clone().run(established));

        ctx.status
            .start_heartbeat(&ctx.scheduler, ctx.config.heartbeat_interval());
        let driver = spawn_driver(ctx.scheduler.clone(), SCHEDULER_RESOLUTION);
        info!(
            "💓 Heartbeat every {}s",
            ctx.config.heartbeat_interval().as_secs()
        );

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.push(link_task);
            tasks.push(driver);
        }

        let listener = bind_listener(ctx.config.bind_address, CLIENT_BACKLOG)?;
        let local = listener.local_addr().unwrap_or(ctx.config.bind_address);
        info!("✅ Accepting clients on {}", local);

        ctx.status.set_running(true);
        ctx.status.set_maintenance(false);
        Ok(listener)
    }

    /// Client accept loop.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ChannelError> {
        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        let result = loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                        }
                        let context = self.context.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, peer, context).await {
                                warn!("Client {} ended with error: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        break Err(ChannelError::Network(format!("Accept failed: {e}")));
                    }
                },
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
            }
        };

        info!("🧹 Stopping channel {}", self.context.status.full_name());
        self.context.status.set_running(false);
        self.context.clients.kill_all();
        if let Some(link) = self.context.upstream.current() {
            link.kill();
        }
        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
        info!("Channel stopped");
        result
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_sender.send(());
    }
}
