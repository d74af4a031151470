use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kestrel_api::{ClusterOverview, Dashboard, HelmReleases, SecurityDashboard, Settings};
use kestrel_core::{MetricHistory, ScopeKey};
use kestrel_ops::{ConnectionStatus, LogConnection, LogStreamParams, WsConnector};
use kestrel_store::Snapshot;
use serde_json::json;
use tokio::signal;
use tracing::{info, warn};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "kestrelctl", version, about = "Kestrel CLI: cluster dashboards and live pod logs")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Cluster to query (default: the backend's current cluster). Not accepted by `logs`
    #[arg(long = "cluster", global = true)]
    cluster: Option<String>,

    /// Backend base URL (overrides KESTREL_API_URL)
    #[arg(long = "api-url", global = true)]
    api_url: Option<Url>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Bundle { Overview, Security, Helm }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cluster health, namespaces, events, utilization and insights
    Overview {
        /// Keep running and re-render on every background refresh
        #[arg(long = "watch", action = ArgAction::SetTrue)]
        watch: bool,
    },
    /// Security score, vulnerabilities, RBAC and network policies
    Security,
    /// Helm releases
    Helm {
        /// Only releases not in `deployed` state
        #[arg(long = "unhealthy", action = ArgAction::SetTrue)]
        unhealthy: bool,
    },
    /// Stream a pod's logs until interrupted or the stream closes
    Logs {
        namespace: String,
        pod: String,
        #[arg(short = 'c', long = "container")]
        container: Option<String>,
        /// Lines of history to start from
        #[arg(long = "tail")]
        tail: Option<u32>,
        #[arg(long = "timestamps", action = ArgAction::SetTrue)]
        timestamps: bool,
        /// Only print lines containing this text (case-insensitive)
        #[arg(long = "grep")]
        grep: Option<String>,
    },
    /// Drop a bundle for every cluster and fetch it again
    Reset { bundle: Bundle },
}

fn init_tracing() {
    let env = std::env::var("KESTREL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KESTREL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KESTREL_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if let Some(url) = cli.api_url.clone() { settings = settings.with_api_url(url); }

    match cli.command {
        Commands::Logs { namespace, pod, container, tail, timestamps, grep } => {
            let params = log_params(cli.cluster.as_deref(), namespace, pod, container, tail, timestamps)?;
            stream_logs(&settings, params, grep.as_deref(), cli.output).await
        }
        command => {
            let dash = Dashboard::from_settings(&settings)?;
            let scope = dash.select_cluster(cli.cluster.as_deref());
            info!(scope = %scope, api = %settings.api_url, "kestrelctl ready");
            run_dashboard(&dash, &scope, command, cli.output).await
        }
    }
}

/// The log socket follows the backend's current cluster; `--cluster` is rejected.
fn log_params(
    cluster: Option<&str>,
    namespace: String,
    pod: String,
    container: Option<String>,
    tail: Option<u32>,
    timestamps: bool,
) -> Result<LogStreamParams> {
    if let Some(cluster) = cluster {
        bail!("--cluster {cluster} is not supported by logs; switch the backend's current cluster instead");
    }
    let mut params = LogStreamParams::new(namespace, pod);
    if let Some(c) = container { params = params.container(c); }
    if let Some(n) = tail { params = params.tail_lines(n); }
    if timestamps { params = params.timestamps(true); }
    Ok(params)
}

async fn run_dashboard(dash: &Dashboard, scope: &ScopeKey, command: Commands, output: Output) -> Result<()> {
    match command {
        Commands::Overview { watch: false } => emit(output, scope, &dash.overview().load().await, render_overview),
        Commands::Overview { watch: true } => {
            let mut sub = dash.overview().subscribe();
            if let Some(snap) = sub.settled().await { emit(output, scope, &snap, render_overview)?; }
            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => { info!("overview watch interrupted"); break; }
                    next = sub.changed() => match next {
                        Some(snap) if !snap.is_fetching => emit(output, scope, &snap, render_overview)?,
                        Some(_) => {}
                        None => break,
                    }
                }
            }
            Ok(())
        }
        Commands::Security => emit(output, scope, &dash.security().load().await, render_security),
        Commands::Helm { unhealthy } => emit(output, scope, &dash.helm_releases().load().await, |h| render_helm(h, unhealthy)),
        Commands::Reset { bundle: Bundle::Overview } => {
            dash.overview().reset();
            emit(output, scope, &dash.overview().load().await, render_overview)
        }
        Commands::Reset { bundle: Bundle::Security } => {
            dash.security().reset();
            emit(output, scope, &dash.security().load().await, render_security)
        }
        Commands::Reset { bundle: Bundle::Helm } => {
            dash.helm_releases().reset();
            emit(output, scope, &dash.helm_releases().load().await, |h| render_helm(h, false))
        }
        Commands::Logs { .. } => bail!("logs does not use the dashboard cache"),
    }
}

/// Print one bundle snapshot. Fails only when there is nothing to show.
fn emit<V: serde::Serialize>(output: Output, scope: &ScopeKey, snap: &Snapshot<V>, render: impl Fn(&V)) -> Result<()> {
    match output {
        Output::Human => {
            if let Some(v) = snap.value.as_deref() { render(v); }
            let age = snap.age.map(|a| format!("{}s", a.as_secs())).unwrap_or_else(|| "-".into());
            println!("\n[cluster {scope} • age {age}{}]", if snap.is_stale { " • stale" } else { "" });
            if let Some(err) = &snap.error { eprintln!("warning: {err}"); }
        }
        Output::Json => {
            let doc = json!({
                "cluster": scope.as_str(),
                "updated_at": snap.updated_at,
                "stale": snap.is_stale,
                "error": snap.error.as_deref(),
                "data": snap.value.as_deref(),
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }
    match (&snap.value, &snap.error) {
        (None, Some(err)) => bail!("{err}"),
        _ => Ok(()),
    }
}

fn render_overview(o: &ClusterOverview) {
    match &o.cluster_health {
        Some(h) => println!("Cluster: {} ({}/{} nodes ready, {}/{} pods running)", h.status, h.ready_nodes, h.node_count, h.running_pods, h.pod_count),
        None => println!("Cluster: unknown"),
    }
    if let Some(m) = o.metrics {
        let pct = |v: Option<f64>| v.map(|v| format!("{v:.1}%")).unwrap_or_else(|| "-".into());
        println!("CPU {:>7}  {}", pct(m.cpu_percent), sparkline(&o.cpu_history));
        println!("MEM {:>7}  {}", pct(m.memory_percent), sparkline(&o.memory_history));
    }
    println!("\nNAMESPACE            PODS    SERVICES");
    for ns in &o.namespaces {
        println!("{:<20} {:>3}/{:<3} {:>8}", ns.name, ns.running_pods, ns.pod_count, ns.service_count);
    }
    if !o.events.is_empty() {
        println!("\nEVENTS");
        for e in o.events.iter().take(10) {
            println!("{:<8} {:<20} {}", e.kind, e.reason, e.message);
        }
    }
    if let Some(p) = &o.security_posture { println!("\nSecurity posture: {} ({}), {} issues", p.score, p.grade, p.issues.len()); }
    println!("\nINSIGHTS");
    for i in &o.insights {
        println!("- [{:?}/{:?}] {}: {}", i.source, i.impact, i.title, i.description);
    }
}

fn render_security(s: &SecurityDashboard) {
    match &s.score {
        Some(score) => println!("Security score: {} ({})", score.score, score.grade),
        None => println!("Security score: unavailable"),
    }
    if let Some(v) = s.vulnerabilities {
        println!("Vulnerabilities: {} total ({} critical, {} high, {} medium, {} low)", v.total(), v.critical, v.high, v.medium, v.low);
    }
    if let Some(r) = &s.rbac {
        println!("RBAC: {} roles, {} cluster-admin bindings, {} risky", r.total_roles, r.cluster_admin_bindings, r.risky_roles.len());
    }
    if let Some(n) = &s.network_policies {
        println!("Network policies: {} ({} namespaces uncovered)", n.total_policies, n.namespaces_without_policy.len());
    }
    if !s.trends.is_empty() {
        let scores: Vec<f64> = s.trends.iter().map(|t| t.score as f64).collect();
        println!("Trend ({} days): {}", s.trends.len(), spark(&scores));
    }
}

fn render_helm(h: &HelmReleases, unhealthy_only: bool) {
    println!("NAMESPACE        NAME                     CHART                    REV  STATUS");
    let rows: Vec<_> = if unhealthy_only { h.unhealthy().collect() } else { h.releases.iter().collect() };
    for r in rows {
        let chart = if r.chart_version.is_empty() { r.chart.clone() } else { format!("{}-{}", r.chart, r.chart_version) };
        println!("{:<16} {:<24} {:<24} {:>3}  {}", r.namespace, r.name, chart, r.revision, r.status);
    }
}

fn sparkline(history: &MetricHistory) -> String {
    let mut s = spark(&history.values());
    if history.is_synthetic() && !s.is_empty() { s.push_str("  (estimated)"); }
    s
}

fn spark(values: &[f64]) -> String {
    const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let (lo, hi) = values.iter().fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let span = (hi - lo).max(f64::EPSILON);
    values.iter().map(|v| BARS[(((v - lo) / span) * 7.0).round() as usize]).collect()
}

async fn stream_logs(settings: &Settings, params: LogStreamParams, grep: Option<&str>, output: Output) -> Result<()> {
    let base = kestrel_gateway::ws_base(&settings.api_url);
    let conn = LogConnection::new(Arc::new(WsConnector::new(settings.ws_ping)), base, settings.log_buffer_cap);
    conn.set_params(params);
    let mut changes = conn.watch();
    conn.connect()?;
    let needle = grep.map(str::to_lowercase);
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => { info!(conn = %conn.id(), "logs interrupted"); break; }
            res = changes.changed() => {
                if res.is_err() { break; }
                for line in conn.take_lines() {
                    if needle.as_deref().is_some_and(|n| !line.to_lowercase().contains(n)) { continue; }
                    match output {
                        Output::Human => println!("{line}"),
                        Output::Json => println!("{}", serde_json::to_string(&line)?),
                    }
                }
                match conn.status() {
                    ConnectionStatus::Error => {
                        conn.disconnect();
                        bail!("log stream failed: {}", conn.last_error().unwrap_or_default());
                    }
                    ConnectionStatus::Disconnected => { info!("log stream closed"); break; }
                    ConnectionStatus::Connecting | ConnectionStatus::Connected => {}
                }
            }
        }
    }
    conn.disconnect();
    Ok(())
}
