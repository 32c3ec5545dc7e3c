//! The orchestration state machine: sequences the routing-table builder,
//! resolver-config writer, service manager, and reconciler under every event
//! interleaving (start, update, reload, stop, job outcomes).
//!
//! Implemented as an explicit `(state, event) -> (action, state)` dispatch
//! rather than nested conditionals; any `(state, event)` pair with no listed
//! transition is a programming error and drives the daemon to
//! [`crate::error::ExitCode::FsmFailure`].

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use zbus::{Connection, SignalContext};

use crate::active_set::ResolutionMode;
use crate::bus_server::{self, BusEvent, ManagerInterface, StatusSnapshot};
use crate::config::Config;
use crate::error::{ExitCode, StickyExitCode};
use crate::reconciler::{self, InstalledMap, ReconcileOutcome};
use crate::resolver_config::{self, ResolvConfBackup};
use crate::routing_table::{self, RoutingTable};
use crate::server::{json, Server};
use crate::service_manager::{JobResult, ServiceManager};
use crate::signals::Signals;

const RESOLVER_UNIT: &str = "unbound.service";

/// A live subscription to the service manager's job-removed signal, held for
/// exactly the lifetime of one awaited start/stop job. Scoped to the FSM
/// states that submit and wait on a job; torn down on transition to
/// [`State::Stopping`].
type JobStream<'a> = Pin<Box<dyn Stream<Item = (u32, JobResult)> + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Starting,
    ConfiguringDnsManager,
    SubmittingStartJob,
    WaitingForStartJob,
    SettingResolvConf,
    UpdatingDnsManager,
    Running,
    RevertingResolvConf,
    SubmittingStopJob,
    WaitingStopJob,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    None,
    Update,
    Kickoff,
    Success,
    Failure,
    Reload,
    JobSuccess,
    JobFailure,
    Stop,
}

pub struct FsmContext {
    pub config: Config,
    pub state: State,
    pub mode: ResolutionMode,
    pub static_servers: Vec<Arc<Server>>,
    pub current_dynamic_servers: Vec<Arc<Server>>,
    pub new_dynamic_servers: Option<Vec<Server>>,
    pub all_servers: Vec<Arc<Server>>,
    pub table: RoutingTable,
    pub installed: InstalledMap,
    pub effective_ca: String,
    pub resolv_conf_backup: ResolvConfBackup,
    pub requested_serial: u32,
    pub current_serial: Arc<AtomicU32>,
    pub exit_code: StickyExitCode,
    pub pending_job_id: Option<u32>,
    pub pending_reply: Vec<tokio::sync::oneshot::Sender<u32>>,
}

impl FsmContext {
    pub fn new(config: Config, current_serial: Arc<AtomicU32>) -> Self {
        let static_servers = config.static_servers.clone();
        Self {
            config,
            state: State::Starting,
            mode: ResolutionMode::Backup,
            static_servers,
            current_dynamic_servers: Vec::new(),
            new_dynamic_servers: None,
            all_servers: Vec::new(),
            table: RoutingTable::new(),
            installed: InstalledMap::new(),
            effective_ca: String::new(),
            resolv_conf_backup: ResolvConfBackup::new(),
            requested_serial: 1,
            current_serial,
            exit_code: StickyExitCode::new(),
            pending_job_id: None,
            pending_reply: Vec::new(),
        }
    }

    /// Merges static servers (first) and dynamic servers (second) and
    /// rebuilds the routing table. Matches the original daemon's
    /// `all_servers` ordering.
    fn rebuild_table(&mut self) {
        self.all_servers = self
            .static_servers
            .iter()
            .cloned()
            .chain(self.current_dynamic_servers.iter().cloned())
            .collect();
        self.table = routing_table::build(&self.all_servers, &self.config);
    }

    /// Serial must skip zero: branchless increment that wraps past it.
    fn bump_serial(&mut self) {
        self.requested_serial = self
            .requested_serial
            .wrapping_add(1)
            .wrapping_add((self.requested_serial.wrapping_add(1) == 0) as u32);
    }

    fn swap_dynamic(&mut self) {
        if let Some(new) = self.new_dynamic_servers.take() {
            self.current_dynamic_servers = new.into_iter().map(Arc::new).collect();
        }
        self.bump_serial();
        self.rebuild_table();
    }

    fn status_snapshot(&self) -> StatusSnapshot {
        let mut cache_config = std::collections::HashMap::new();
        for (domain, servers) in &self.installed {
            cache_config.insert(
                domain.clone(),
                servers.iter().map(|s| json::to_uri_string(s)).collect(),
            );
        }
        StatusSnapshot {
            service: "unbound",
            mode: format!("{:?}", self.mode),
            state: format!("{:?}", self.state),
            cache_config,
            servers: self.all_servers.iter().map(|s| json::to_json(s)).collect(),
        }
    }
}

/// Runs the daemon main loop: acquires the bus name, hosts the manager
/// interface, and drives the FSM to completion on every external event.
pub async fn run(config: Config) -> ExitCode {
    let current_serial = Arc::new(AtomicU32::new(1));
    let mut ctx = FsmContext::new(config, current_serial.clone());

    let connection = match Connection::system().await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to the system bus");
            return ExitCode::DbusFailure;
        }
    };

    let (bus_tx, mut bus_rx) = mpsc::channel::<BusEvent>(32);
    let interface = ManagerInterface::new(bus_tx, current_serial);
    if let Err(e) = bus_server::serve(&connection, interface).await {
        tracing::error!(error = %e, "failed to acquire bus name");
        ctx.exit_code.set(ExitCode::DbusFailure);
        return ctx.exit_code.get();
    }
    tracing::info!(name = bus_server::BUS_NAME, "bus name acquired");

    let service_manager = match ServiceManager::connect(&connection).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to systemd manager");
            return ExitCode::DbusFailure;
        }
    };

    let mut signals = match Signals::new() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return ExitCode::DbusFailure;
        }
    };

    let signal_ctx = SignalContext::new(&connection, bus_server::OBJECT_PATH)
        .expect("object path is a valid signal context");

    // The job-removed subscription is created on demand by `submit_start`/
    // `submit_stop` when entering `SubmittingStartJob`/`SubmittingStopJob`,
    // held across the matching `WaitingFor*Job` state, and torn down by
    // `teardown_job_stream` the moment the FSM reaches `Stopping`.
    let mut job_stream: Option<JobStream<'_>> = None;

    // Bus-name acquisition dispatches KICKOFF.
    dispatch_chain(
        &mut ctx,
        &connection,
        &service_manager,
        &signal_ctx,
        &mut job_stream,
        Event::Kickoff,
    )
    .await;

    loop {
        if ctx.state == State::Stopping {
            break;
        }

        let event = tokio::select! {
            _ = signals.terminate.recv() => Event::Stop,
            Some(bus_event) = bus_rx.recv() => {
                handle_bus_event(&mut ctx, bus_event);
                Event::Update
            }
            Some((id, result)) = next_job_event(&mut job_stream) => {
                if Some(id) == ctx.pending_job_id {
                    match result {
                        JobResult::Success => Event::JobSuccess,
                        JobResult::Failure => Event::JobFailure,
                    }
                } else {
                    continue;
                }
            }
        };

        dispatch_chain(
            &mut ctx,
            &connection,
            &service_manager,
            &signal_ctx,
            &mut job_stream,
            event,
        )
        .await;
    }

    ctx.exit_code.get()
}

/// Awaits the next job-removed signal when a subscription is held; never
/// resolves while unsubscribed, so the surrounding `select!` simply ignores
/// this branch until a start/stop job is submitted again.
async fn next_job_event(job_stream: &mut Option<JobStream<'_>>) -> Option<(u32, JobResult)> {
    match job_stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn subscribe_job_stream<'a>(
    service_manager: &'a ServiceManager,
) -> Result<JobStream<'a>, crate::service_manager::ServiceManagerError> {
    let stream = service_manager.job_removed_stream().await?;
    Ok(Box::pin(stream))
}

/// Releases the job-removed subscription. Called once the FSM reaches
/// `Stopping`, regardless of which transition got it there.
fn teardown_job_stream(job_stream: &mut Option<JobStream<'_>>) {
    if job_stream.take().is_some() {
        tracing::debug!("released job-removed subscription");
    }
}

fn handle_bus_event(ctx: &mut FsmContext, event: BusEvent) {
    match event {
        BusEvent::Update(req) => {
            ctx.new_dynamic_servers = Some(req.servers);
            ctx.mode = req.mode;
            ctx.pending_reply.push(req.reply);
        }
        BusEvent::Reload(reply) => {
            ctx.new_dynamic_servers = None;
            let _ = reply.send(());
        }
        BusEvent::Status(reply) => {
            let _ = reply.send(ctx.status_snapshot());
        }
    }
}

/// Runs a single external event to completion: repeatedly applies the
/// transition table until the chained next-event is `None`.
async fn dispatch_chain<'a>(
    ctx: &mut FsmContext,
    connection: &Connection,
    service_manager: &'a ServiceManager,
    signal_ctx: &SignalContext<'_>,
    job_stream: &mut Option<JobStream<'a>>,
    mut event: Event,
) {
    loop {
        let next = step(ctx, connection, service_manager, signal_ctx, job_stream, event).await;
        for reply in ctx.pending_reply.drain(..) {
            let _ = reply.send(ctx.requested_serial);
        }
        if ctx.state == State::Stopping {
            teardown_job_stream(job_stream);
        }
        match next {
            Event::None => break,
            other => event = other,
        }
    }
}

async fn step<'a>(
    ctx: &mut FsmContext,
    connection: &Connection,
    service_manager: &'a ServiceManager,
    signal_ctx: &SignalContext<'_>,
    job_stream: &mut Option<JobStream<'a>>,
    event: Event,
) -> Event {
    use Event::*;
    use State::*;

    match (ctx.state, event) {
        (Starting, Update) => {
            ctx.swap_dynamic();
            None
        }
        (Starting, Kickoff) => {
            // No UPDATE may have arrived yet; build the table from static
            // servers alone and bump the serial the same way an UPDATE would.
            ctx.rebuild_table();
            ctx.bump_serial();
            let outcome = write_full_config(ctx);
            ctx.state = ConfiguringDnsManager;
            outcome
        }
        (Starting, Reload) => None,
        (Starting, Stop) => {
            ctx.state = Stopping;
            Stop
        }

        (ConfiguringDnsManager, Success) => {
            ctx.state = SubmittingStartJob;
            submit_start(ctx, service_manager, job_stream).await
        }
        (ConfiguringDnsManager, Failure) => {
            ctx.state = Stopping;
            Stop
        }

        (SubmittingStartJob, Success) => {
            ctx.state = WaitingForStartJob;
            None
        }
        (SubmittingStartJob, Failure) => {
            ctx.state = Stopping;
            Stop
        }

        (WaitingForStartJob, JobSuccess) => {
            ctx.state = SettingResolvConf;
            write_stub_file(ctx)
        }
        (WaitingForStartJob, JobFailure) => {
            ctx.exit_code.set(ExitCode::ServiceFailure);
            ctx.state = Stopping;
            None
        }
        (WaitingForStartJob, Update) => {
            ctx.swap_dynamic();
            None
        }
        (WaitingForStartJob, Reload) => {
            let outcome = write_full_config(ctx);
            ctx.state = ConfiguringDnsManager;
            outcome
        }
        (WaitingForStartJob, Stop) => {
            ctx.state = SubmittingStopJob;
            submit_stop(ctx, service_manager, job_stream).await
        }

        (SettingResolvConf, Success) => {
            ctx.state = UpdatingDnsManager;
            reconcile(ctx, connection, signal_ctx).await
        }
        (SettingResolvConf, Failure) => {
            ctx.exit_code.set(ExitCode::ResolvConfFailure);
            ctx.state = SubmittingStopJob;
            submit_stop(ctx, service_manager, job_stream).await
        }

        (UpdatingDnsManager, Success) => {
            ctx.current_serial.store(ctx.requested_serial, Ordering::SeqCst);
            let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]);
            let _ = bus_server::notify_serial_changed(signal_ctx).await;
            ctx.state = Running;
            None
        }
        (UpdatingDnsManager, Reload) => {
            let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Reloading]);
            let outcome = write_full_config(ctx);
            ctx.state = ConfiguringDnsManager;
            outcome
        }
        (UpdatingDnsManager, Failure) => {
            ctx.exit_code.set(ExitCode::UpdateFailure);
            let _ = ctx
                .resolv_conf_backup
                .restore(&ctx.config.resolv_conf_path);
            ctx.state = RevertingResolvConf;
            Success
        }

        (Running, Update) => {
            ctx.swap_dynamic();
            ctx.state = SettingResolvConf;
            write_stub_file(ctx)
        }
        (Running, Reload) => {
            let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Reloading]);
            let outcome = write_full_config(ctx);
            ctx.state = ConfiguringDnsManager;
            outcome
        }
        (Running, Stop) => {
            let _ = ctx
                .resolv_conf_backup
                .restore(&ctx.config.resolv_conf_path);
            ctx.state = RevertingResolvConf;
            Success
        }

        (RevertingResolvConf, Success) | (RevertingResolvConf, Failure) => {
            ctx.state = SubmittingStopJob;
            submit_stop(ctx, service_manager, job_stream).await
        }

        (SubmittingStopJob, Success) => {
            ctx.state = WaitingStopJob;
            None
        }
        (SubmittingStopJob, Failure) => {
            ctx.state = Stopping;
            Stop
        }

        (WaitingStopJob, JobSuccess) | (WaitingStopJob, JobFailure) => {
            ctx.state = Stopping;
            Stop
        }
        (WaitingStopJob, Update) | (WaitingStopJob, Reload) | (WaitingStopJob, Stop) => None,

        (Stopping, Stop) => None,

        (state, event) => {
            let err = crate::error::FsmError::IllegalTransition { state, event };
            tracing::error!(error = %err, "programming error");
            ctx.exit_code.set(ExitCode::FsmFailure);
            ctx.state = Stopping;
            None
        }
    }
}

fn write_full_config(ctx: &mut FsmContext) -> Event {
    match resolver_config::write_resolver_config(
        &PathBuf::from(resolver_config::RESOLVER_CONFIG_PATH),
        &ctx.table,
        ctx.mode,
        &ctx.config,
    ) {
        Ok(ca) => {
            ctx.effective_ca = ca;
            Event::Success
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to write resolver configuration");
            Event::Failure
        }
    }
}

fn write_stub_file(ctx: &mut FsmContext) -> Event {
    match resolver_config::write_resolv_conf(
        &ctx.config.resolv_conf_path.clone(),
        &ctx.table,
        ctx.mode,
        &ctx.config,
        &mut ctx.resolv_conf_backup,
    ) {
        Ok(()) => Event::Success,
        Err(e) => {
            tracing::error!(error = %e, "failed to write stub resolver file");
            Event::Failure
        }
    }
}

async fn reconcile(
    ctx: &mut FsmContext,
    _connection: &Connection,
    _signal_ctx: &SignalContext<'_>,
) -> Event {
    match reconciler::reconcile(
        &ctx.table,
        ctx.mode,
        &ctx.config,
        &ctx.installed,
        &ctx.effective_ca,
    )
    .await
    {
        Ok(ReconcileOutcome::Reconciled(installed)) => {
            ctx.installed = installed;
            Event::Success
        }
        Ok(ReconcileOutcome::ReloadRequired) => Event::Reload,
        Err(e) => {
            tracing::error!(error = %e, "failed to reconcile resolver state");
            Event::Failure
        }
    }
}

/// Subscribes to job-removed notifications (if not already subscribed) and
/// submits the resolver start job. Matches the original's "subscribe, then
/// submit" ordering, so a fast/no-op job can never complete before anything
/// is listening for it.
async fn submit_start<'a>(
    ctx: &mut FsmContext,
    service_manager: &'a ServiceManager,
    job_stream: &mut Option<JobStream<'a>>,
) -> Event {
    if job_stream.is_none() {
        match subscribe_job_stream(service_manager).await {
            Ok(stream) => *job_stream = Some(stream),
            Err(e) => {
                tracing::error!(error = %e, "failed to subscribe to job-removed signal");
                return Event::Failure;
            }
        }
    }

    match service_manager.start(RESOLVER_UNIT).await {
        Ok(job_id) => {
            ctx.pending_job_id = Some(job_id);
            Event::Success
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to submit resolver start job");
            Event::Failure
        }
    }
}

/// Subscribes to job-removed notifications (if not already subscribed) and
/// submits the resolver stop job. See [`submit_start`].
async fn submit_stop<'a>(
    ctx: &mut FsmContext,
    service_manager: &'a ServiceManager,
    job_stream: &mut Option<JobStream<'a>>,
) -> Event {
    if job_stream.is_none() {
        match subscribe_job_stream(service_manager).await {
            Ok(stream) => *job_stream = Some(stream),
            Err(e) => {
                tracing::error!(error = %e, "failed to subscribe to job-removed signal");
                return Event::Failure;
            }
        }
    }

    match service_manager.stop(RESOLVER_UNIT).await {
        Ok(job_id) => {
            ctx.pending_job_id = Some(job_id);
            Event::Success
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to submit resolver stop job");
            Event::Failure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_increment_skips_zero() {
        let mut ctx = FsmContext::new(Config::default(), Arc::new(AtomicU32::new(1)));
        ctx.requested_serial = u32::MAX;
        ctx.swap_dynamic();
        assert_ne!(ctx.requested_serial, 0);
    }

    #[test]
    fn kickoff_bumps_serial_and_builds_table_from_static_servers() {
        let mut config = Config::default();
        config.static_servers = vec![Arc::new(Server {
            name: Some("static".to_string()),
            routing_domains: vec![".".to_string()],
            ..Server::default()
        })];
        let mut ctx = FsmContext::new(config, Arc::new(AtomicU32::new(1)));
        assert_eq!(ctx.requested_serial, 1);
        ctx.rebuild_table();
        ctx.bump_serial();
        assert_eq!(ctx.requested_serial, 2);
        assert!(ctx.table.contains_key("."));
    }

    #[test]
    fn all_servers_puts_static_before_dynamic() {
        let mut config = Config::default();
        config.static_servers = vec![Arc::new(Server {
            name: Some("static".to_string()),
            ..Server::default()
        })];
        let mut ctx = FsmContext::new(config, Arc::new(AtomicU32::new(1)));
        ctx.current_dynamic_servers = vec![Arc::new(Server {
            name: Some("dynamic".to_string()),
            ..Server::default()
        })];
        ctx.rebuild_table();
        assert_eq!(ctx.all_servers[0].name.as_deref(), Some("static"));
        assert_eq!(ctx.all_servers[1].name.as_deref(), Some("dynamic"));
    }
}
