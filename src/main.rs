use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process;

mod add;
mod checkpoint;
mod config;
mod exec;
mod fetch;
mod helm;
mod kind;
mod kubectl;
mod manifest;

use crate::add::Session;
use crate::checkpoint::{Checkpoint, Terminal, Unattended};
use crate::config::Settings;
use crate::exec::Shell;
use crate::kind::Kind;
use crate::manifest::{FieldPath, PatchOutcome, Selector};
use structopt::StructOpt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(StructOpt, Debug)]
#[structopt(name = "devops-ready-cluster")]
/// Stands up a kind cluster and installs a catalog of add-ons into it
struct Opt {
    /// Show the output of every kind/kubectl/helm call
    #[structopt(short, long, global = true)]
    verbose: bool,

    /// Don't stop for confirmation, just log what needs checking
    #[structopt(short = "y", long = "yes", global = true)]
    yes: bool,

    /// Settings file, defaults to ~/.devops-ready-cluster/config.yaml
    #[structopt(long, parse(from_os_str), global = true)]
    config: Option<PathBuf>,

    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(StructOpt, Debug)]
enum Cmd {
    /// Get Kind Kubernetes clusters
    GetClusters,
    /// Create Kind Kubernetes cluster
    CreateCluster {
        /// Name of the cluster
        #[structopt(long)]
        name: String,

        /// Extra host port mapping, host[:container][:TCP|UDP|SCTP]
        #[structopt(long = "port")]
        ports: Vec<String>,
    },
    /// Delete Kind Kubernetes cluster
    DeleteCluster {
        /// Name of the cluster
        #[structopt(long)]
        name: String,
    },
    /// Install Metrics Server
    InstallMetrics,
    /// Install Ingress Controller
    InstallIngress,
    /// Install MetalLB
    InstallMetallb,
    /// Install Cert-Manager
    InstallCertManager,
    /// Install Argo CD
    InstallArgocd,
    /// Install Monitoring Stack
    InstallMonitoring,
    /// Install Logging Stack
    InstallLogging,
    /// Install CloudNativePG Database
    InstallDatabase,
    /// Install Kafka
    InstallKafka,
    /// Install demo application
    InstallDemo,
    /// Install all components
    InstallAll,
    /// Print the initial Argo CD admin password
    ArgocdPassword,
    /// Print the Grafana admin password
    GrafanaPassword,
    /// Make sure a container argument is present in a manifest
    PatchManifest {
        #[structopt(long, parse(from_os_str))]
        file: PathBuf,

        #[structopt(long, default_value = "Deployment")]
        kind: String,

        #[structopt(long)]
        name: String,

        /// Sequence to append to
        #[structopt(long, default_value = "spec.template.spec.containers[0].args")]
        path: FieldPath,

        #[structopt(long, allow_hyphen_values = true)]
        arg: String,
    },
}

fn load_settings(opt: &Opt) -> Result<Settings> {
    let path = match &opt.config {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };

    Ok(Settings::load(&path)?.with_flags(opt.verbose, opt.yes))
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn create(name: &str, ports: &[String], s: &Session) -> Result<()> {
    let mut cluster = Kind::new(name)?;
    for port in ports {
        cluster.extra_port_mapping(port)?;
    }

    cluster.create(s.exec, s.settings)
}

fn get_clusters(s: &Session) -> Result<()> {
    info!("Getting Kubernetes clusters with Kind...");

    let clusters = Kind::clusters(s.exec)?;
    if clusters.is_empty() {
        info!("No Kind clusters found.");
    } else {
        info!("Found clusters:\n{}", clusters.join("\n"));
    }

    Ok(())
}

fn patch(file: &Path, selector: Selector, path: &FieldPath, arg: &str) -> Result<i32> {
    let outcome = manifest::patch_file(file, &selector, path, arg)?;

    match outcome {
        PatchOutcome::Patched => info!("added {} to {} in {}", arg, selector, file.display()),
        PatchOutcome::AlreadyPresent => info!("{} already has {}", selector, arg),
        PatchOutcome::NotFound => warn!("no {} in {}", selector, file.display()),
        PatchOutcome::PathMissing => warn!("{} has no sequence at {}", selector, path),
    }

    Ok(if outcome.needs_attention() { 2 } else { 0 })
}

fn run(cmd: Cmd, settings: &Settings) -> Result<i32> {
    let shell = Shell::new(settings.verbose);
    let checkpoint: Box<dyn Checkpoint> = if settings.assume_yes {
        Box::new(Unattended)
    } else {
        Box::new(Terminal::new())
    };
    let s = Session {
        exec: &shell,
        checkpoint: checkpoint.as_ref(),
        settings,
    };

    match cmd {
        Cmd::GetClusters => get_clusters(&s)?,
        Cmd::CreateCluster { name, ports } => create(&name, &ports, &s)?,
        Cmd::DeleteCluster { name } => Kind::new(&name)?.delete(s.exec)?,
        Cmd::InstallMetrics => add::metrics_server(&s)?,
        Cmd::InstallIngress => add::ingress(&s)?,
        Cmd::InstallMetallb => add::metallb(&s)?,
        Cmd::InstallCertManager => add::cert_manager(&s)?,
        Cmd::InstallArgocd => add::argocd(&s)?,
        Cmd::InstallMonitoring => add::monitoring(&s)?,
        Cmd::InstallLogging => add::logging(&s)?,
        Cmd::InstallDatabase => add::database(&s)?,
        Cmd::InstallKafka => add::kafka(&s)?,
        Cmd::InstallDemo => add::demo_app(&s)?,
        Cmd::InstallAll => add::all(&s)?,
        Cmd::ArgocdPassword => println!("{}", add::argocd_password(&s)?),
        Cmd::GrafanaPassword => println!("{}", add::grafana_password(&s)?),
        Cmd::PatchManifest {
            file,
            kind,
            name,
            path,
            arg,
        } => return patch(&file, Selector::new(&kind, &name), &path, &arg),
    }

    Ok(0)
}

fn main() {
    let opt = Opt::from_args();
    let settings = load_settings(&opt);
    init_logging(opt.verbose || settings.as_ref().map_or(false, |s| s.verbose));

    let code = match settings.and_then(|settings| run(opt.cmd, &settings)) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    process::exit(code);
}
