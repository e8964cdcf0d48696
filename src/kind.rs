#![allow(non_snake_case)]

use anyhow::{bail, Context, Result};
use serde_derive::{Deserialize, Serialize};

use std::fs::{create_dir_all, remove_dir_all, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{info, warn};

use crate::config::Settings;
use crate::exec::{path_str, Exec};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PortMapping {
    containerPort: u32,
    hostPort: u32,
    protocol: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct Node {
    role: String,
    kubeadmConfigPatches: Vec<String>,
    extraPortMappings: Vec<PortMapping>,
}

#[derive(Serialize, Deserialize, Debug)]
struct ClusterConfig {
    kind: String,
    apiVersion: String,
    nodes: Vec<Node>,
}

pub struct Kind {
    pub name: String,
    config_dir: PathBuf,
    extra_port_mappings: Vec<PortMapping>,
}

impl Kind {
    pub fn new(name: &str) -> Result<Kind> {
        Kind::in_dir(name, &Settings::config_dir()?)
    }

    /// Keeps the per-cluster state under `base/<name>`.
    pub fn in_dir(name: &str, base: &Path) -> Result<Kind> {
        if name.trim().is_empty() {
            bail!("Cluster name is required (--name)");
        }

        Ok(Kind {
            name: String::from(name),
            config_dir: base.join(name),
            extra_port_mappings: vec![],
        })
    }

    fn init_config_ingress_ready() -> String {
        String::from(
            r#"kind: InitConfiguration
nodeRegistration:
  kubeletExtraArgs:
    node-labels: "ingress-ready=true""#,
        )
    }

    fn port(host: u32, container: u32) -> PortMapping {
        PortMapping {
            containerPort: container,
            hostPort: host,
            protocol: String::from("TCP"),
        }
    }

    /// One control plane node labelled for the ingress controller, with
    /// http and https published on the host.
    fn cluster_config(&self) -> ClusterConfig {
        let mut ports = vec![Kind::port(80, 80), Kind::port(443, 443)];
        ports.extend(self.extra_port_mappings.iter().cloned());

        ClusterConfig {
            kind: String::from("Cluster"),
            apiVersion: String::from("kind.x-k8s.io/v1alpha4"),
            nodes: vec![Node {
                role: String::from("control-plane"),
                kubeadmConfigPatches: vec![Kind::init_config_ingress_ready()],
                extraPortMappings: ports,
            }],
        }
    }

    /// receives a string like: 8080:30080:TCP or 8080:30080 or 9000
    /// (host port first).
    pub fn parse_extra_port_mapping(epm: &str) -> Option<PortMapping> {
        let re = Regex::new(r"^(\d{1,5})(?::(\d{1,5}))?(?::(TCP|UDP|SCTP))?$").ok()?;
        let cap = re.captures(epm.trim())?;

        let host = cap[1].parse::<u32>().ok()?;
        let container = match cap.get(2) {
            Some(port) => port.as_str().parse::<u32>().ok()?,
            None => host,
        };
        if host > 65535 || container > 65535 {
            return None;
        }

        Some(PortMapping {
            containerPort: container,
            hostPort: host,
            protocol: String::from(cap.get(3).map_or("TCP", |p| p.as_str())),
        })
    }

    pub fn extra_port_mapping(&mut self, extra_port_mapping: &str) -> Result<()> {
        match Kind::parse_extra_port_mapping(extra_port_mapping) {
            Some(epm) => {
                self.extra_port_mappings.push(epm);
                Ok(())
            }
            None => bail!(
                "invalid port mapping `{}`, expected host[:container][:TCP|UDP|SCTP]",
                extra_port_mapping
            ),
        }
    }

    fn write_generated_config(&self) -> Result<PathBuf> {
        let kind_cluster_config = serde_yaml::to_string(&self.cluster_config())?;

        let kind_config_path = self.config_dir.join("kind_config");
        let mut kind_config = File::create(&kind_config_path)?;
        kind_config.write_all(kind_cluster_config.as_bytes())?;

        Ok(kind_config_path)
    }

    /// The user's kind-config.yaml wins when there is one; otherwise we
    /// write our own into the cluster directory.
    fn config_file(&self, settings: &Settings) -> Result<PathBuf> {
        let user_config = settings.asset("kind-config.yaml");
        if user_config.exists() {
            if !self.extra_port_mappings.is_empty() {
                warn!(
                    "using {}, extra port mappings are ignored",
                    user_config.display()
                );
            }
            return Ok(user_config);
        }

        self.write_generated_config()
    }

    pub fn create(&self, exec: &dyn Exec, settings: &Settings) -> Result<()> {
        info!("Creating Kubernetes cluster with Kind...");
        create_dir_all(&self.config_dir)
            .with_context(|| format!("could not create {}", self.config_dir.display()))?;

        let config = self.config_file(settings)?;
        let config = path_str(&config)?;
        let args = vec!["create", "cluster", "--name", self.name.as_str(), "--config", config];

        exec.run("kind", &args)
            .with_context(|| format!("Error creating cluster {}", self.name))?;

        let mut saved_args = File::create(self.config_dir.join("kind_args"))?;
        saved_args.write_all(args.join(" ").as_bytes())?;

        info!("Cluster {} created successfully!", self.name);
        Ok(())
    }

    pub fn delete(&self, exec: &dyn Exec) -> Result<()> {
        info!("Deleting Kubernetes cluster with Kind...");
        exec.run("kind", &["delete", "cluster", "--name", self.name.as_str()])
            .with_context(|| format!("Error deleting cluster {}", self.name))?;

        if self.config_dir.exists() {
            remove_dir_all(&self.config_dir)?;
        }

        info!("Cluster {} deleted successfully!", self.name);
        Ok(())
    }

    pub fn clusters(exec: &dyn Exec) -> Result<Vec<String>> {
        let output = exec
            .run("kind", &["get", "clusters"])
            .context("Error listing clusters")?;

        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }
}
