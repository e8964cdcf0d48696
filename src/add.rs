// adds a "capability" to the cluster. Every add-on is a fixed sequence of
// kubectl/helm calls; nothing here retries or rolls back.
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::checkpoint::Checkpoint;
use crate::config::Settings;
use crate::exec::{path_str, Exec};
use crate::fetch;
use crate::helm::{self, Release};
use crate::kubectl::{self, WaitFor};
use crate::manifest::{self, FieldPath, Manifest, PatchOutcome, Selector};

pub const INSECURE_TLS: &str = "--kubelet-insecure-tls";

const INGRESS_NGINX: &str = "https://kind.sigs.k8s.io/examples/ingress/deploy-ingress-nginx.yaml";
const CLOUDNATIVE_PG: &str = "https://raw.githubusercontent.com/cloudnative-pg/cloudnative-pg/release-1.25/releases/cnpg-1.25.1.yaml";
const KAFKA_IMAGE: &str = "quay.io/strimzi/kafka:0.45.0-kafka-3.9.0";

/// Everything an install step needs from the outside world.
pub struct Session<'a> {
    pub exec: &'a dyn Exec,
    pub checkpoint: &'a dyn Checkpoint,
    pub settings: &'a Settings,
}

impl<'a> Session<'a> {
    fn wait(&self, namespace: &str, what: WaitFor) -> Result<()> {
        kubectl::wait(self.exec, namespace, what, &self.settings.wait_timeout)
    }
}

pub fn metrics_server(s: &Session) -> Result<()> {
    let path = s.settings.asset("components.yaml");

    if !path.exists() {
        info!("Downloading Metrics Server components.yaml...");
        fetch::download(&s.settings.metrics_server_url, &path)
            .context("Failed to download components.yaml")?;
    }

    let outcome = manifest::patch_file(
        &path,
        &Selector::new("Deployment", "metrics-server"),
        &FieldPath::container_args(),
        INSECURE_TLS,
    )
    .context("Error reading components.yaml")?;

    match outcome {
        PatchOutcome::Patched => info!("Added {} to {}", INSECURE_TLS, path.display()),
        PatchOutcome::AlreadyPresent => {
            info!("components.yaml already contains {}", INSECURE_TLS);
            info!("Skipping modification.");
        }
        PatchOutcome::NotFound | PatchOutcome::PathMissing => {
            warn!("The Metrics Server requires a modification to the components.yaml file.");
            warn!("Could not find the metrics-server container arguments ({:?}).", outcome);
            s.checkpoint.confirm(&format!(
                "Please add the argument `- {}` after `- --kubelet-use-node-status-port` in {}.",
                INSECURE_TLS,
                path.display()
            ))?;
        }
    }

    info!("Installing Metrics Server...");
    kubectl::apply(s.exec, path_str(&path)?).context("Error installing Metrics Server")?;
    info!("Metrics Server installed successfully!");

    Ok(())
}

pub fn ingress(s: &Session) -> Result<()> {
    info!("Installing Ingress Controller...");
    kubectl::apply(s.exec, INGRESS_NGINX).context("Error installing Ingress Controller")?;

    s.exec.settle(Duration::from_secs(5));
    s.wait(
        "ingress-nginx",
        WaitFor::PodsReady("app.kubernetes.io/component=controller"),
    )
    .context("Ingress Controller is not ready")?;

    info!("Ingress Controller installed successfully!");
    Ok(())
}

/// First address of the first `IPAddressPool` in the MetalLB config.
fn address_range(path: &Path) -> Result<Option<String>> {
    let config = Manifest::load(path)?;
    let addresses: FieldPath = "spec.addresses[0]".parse()?;

    Ok(config
        .first_of_kind("IPAddressPool")
        .and_then(|pool| manifest::lookup(pool, &addresses))
        .and_then(|address| address.as_str())
        .map(String::from))
}

pub fn metallb(s: &Session) -> Result<()> {
    info!("Installing MetalLB...");

    helm::repo_add(s.exec, "metallb", "https://metallb.github.io/metallb", false)
        .context("Error adding MetalLB Helm repo")?;
    Release::new("metallb", "metallb/metallb", "metallb-system")
        .install(s.exec)
        .context("Error installing MetalLB")?;

    // the CRDs have to be served before the pool can be applied
    s.exec.settle(Duration::from_secs(30));

    let config = s.settings.asset("metallb-config.yaml");
    let range = address_range(&config).context("Error reading MetalLB configuration file")?;
    let question = match range {
        Some(range) => format!(
            "Are you sure you want to use the address range {}? If not, edit {} now.",
            range,
            config.display()
        ),
        None => format!(
            "No IPAddressPool address found in {}. Please check it now.",
            config.display()
        ),
    };
    s.checkpoint.confirm(&question)?;

    kubectl::apply(s.exec, path_str(&config)?).context("Error applying MetalLB configuration")?;
    info!("MetalLB installed successfully!");

    Ok(())
}

pub fn cert_manager(s: &Session) -> Result<()> {
    info!("Installing Cert-Manager...");

    helm::repo_add(s.exec, "jetstack", "https://charts.jetstack.io", true)
        .context("Error adding Jetstack Helm repo")?;
    Release::new("cert-manager", "jetstack/cert-manager", "cert-manager")
        .set("crds.enabled=true")
        .set("extraArgs={--dns01-recursive-nameservers-only,--dns01-recursive-nameservers=8.8.8.8:53,1.1.1.1:53}")
        .install(s.exec)
        .context("Error installing Cert-Manager")?;

    info!("Cert-Manager installation initiated. Waiting for readiness check...");
    s.wait(
        "cert-manager",
        WaitFor::PodsReady("app.kubernetes.io/name=cert-manager"),
    )
    .context("Cert-Manager is not ready")?;

    info!("Cert-Manager installation completed successfully!");
    Ok(())
}

pub fn argocd(s: &Session) -> Result<()> {
    info!("Installing Argo CD...");

    helm::repo_add(s.exec, "argo", "https://argoproj.github.io/argo-helm", false)
        .context("Error adding Argo Helm repo")?;
    let values = s.settings.asset("argocd-custom-values.yaml");
    Release::new("argocd", "argo/argo-cd", "argocd")
        .values(path_str(&values)?)
        .install(s.exec)
        .context("Error installing ArgoCD")?;

    info!("ArgoCD installation initiated. Waiting for readiness check...");
    if let Err(e) = s.wait("argocd", WaitFor::DeploymentAvailable("argocd-server")) {
        warn!("ArgoCD server is not ready yet: {:#}", e);
    }

    info!("ArgoCD installation completed successfully!");
    info!("ArgoCD is accessible at: https://argocd.local");
    warn!("Ensure that 'argocd.local' resolves to the correct IP by:");
    warn!("1. Editing your /etc/hosts file");
    warn!("2. Configuring DNS correctly");
    warn!("3. Modifying 'argocd-custom-values.yaml' to use a different domain if needed");
    info!("To retrieve the initial admin password, run: devops-ready-cluster argocd-password");

    Ok(())
}

pub fn monitoring(s: &Session) -> Result<()> {
    info!("Installing Prometheus and Grafana monitoring stack...");

    helm::repo_add(
        s.exec,
        "prometheus-community",
        "https://prometheus-community.github.io/helm-charts",
        false,
    )
    .context("Error adding Prometheus Helm repo")?;
    helm::repo_update(s.exec).context("Error updating Helm repositories")?;
    Release::new(
        "prometheus-stack",
        "prometheus-community/kube-prometheus-stack",
        "monitoring",
    )
    .install(s.exec)
    .context("Error installing Prometheus stack")?;

    info!("Prometheus and Grafana installed successfully!");
    info!("Prometheus dashboard: http://localhost:9090");
    info!("  kubectl port-forward svc/prometheus-stack-kube-prom-prometheus -n monitoring 9090:9090");
    info!("Grafana dashboard: http://localhost:3000");
    info!(r#"  export POD_NAME=$(kubectl --namespace monitoring get pod -l "app.kubernetes.io/name=grafana,app.kubernetes.io/instance=prometheus-stack" -o name)"#);
    info!("  kubectl --namespace monitoring port-forward $POD_NAME 3000:3000");
    info!("Grafana admin password: devops-ready-cluster grafana-password");

    Ok(())
}

pub fn logging(s: &Session) -> Result<()> {
    info!("Installing Grafana Loki for logging...");

    helm::repo_add(s.exec, "grafana", "https://grafana.github.io/helm-charts", false)
        .context("Error adding Grafana Helm repo")?;
    helm::repo_update(s.exec).context("Error updating Helm repositories")?;
    Release::new("loki", "grafana/loki-stack", "logging")
        .upgrade()
        .set("loki.enabled=true")
        .set("promtail.enabled=true")
        .set("promtail.config.server.http_listen_port=9080")
        .set("promtail.config.server.grpc_listen_port=0")
        .install(s.exec)
        .context("Error installing Loki stack")?;

    info!("Grafana Loki installed successfully!");
    info!("To check logs, run: kubectl -n logging logs -l app.kubernetes.io/name=promtail");

    Ok(())
}

pub fn database(s: &Session) -> Result<()> {
    info!("Installing CloudNativePG database...");

    kubectl::apply_server_side(s.exec, CLOUDNATIVE_PG)
        .context("Error applying CloudNativePG manifests")?;

    info!("CloudNativePG installed successfully!");
    warn!("To manage CloudNativePG more easily, install the cnpg plugin:");
    warn!("curl -sSfL https://github.com/cloudnative-pg/cloudnative-pg/raw/main/hack/install-cnpg-plugin.sh | sudo sh -s -- -b /usr/local/bin");
    info!("Once installed, check a PostgreSQL cluster with: kubectl cnpg status <CNPG_CLUSTER> -n <NAMESPACE>");

    Ok(())
}

pub fn kafka(s: &Session) -> Result<()> {
    info!("Installing Kafka...");

    Release::new(
        "strimzi-cluster-operator",
        "oci://quay.io/strimzi-helm/strimzi-kafka-operator",
        "kafka",
    )
    .set("replicas=2")
    .install(s.exec)
    .context("Error installing Kafka")?;

    s.wait("kafka", WaitFor::PodsReady("name=strimzi-cluster-operator"))
        .context("Strimzi cluster operator is not ready")?;

    info!("Kafka installed successfully!");
    info!("To deploy a Kafka cluster, run:");
    info!("  kubectl apply -f https://strimzi.io/examples/latest/kafka/kraft/kafka-single-node.yaml -n kafka");
    info!("To produce messages, run:");
    info!("  kubectl -n kafka run kafka-producer -ti --image={} --rm=true --restart=Never -- bin/kafka-console-producer.sh --bootstrap-server my-cluster-kafka-bootstrap:9092 --topic my-topic", KAFKA_IMAGE);
    info!("To consume messages, run:");
    info!("  kubectl -n kafka run kafka-consumer -ti --image={} --rm=true --restart=Never -- bin/kafka-console-consumer.sh --bootstrap-server my-cluster-kafka-bootstrap:9092 --topic my-topic --from-beginning", KAFKA_IMAGE);
    info!("To delete the Kafka cluster, run: kubectl delete kafka my-cluster -n kafka");

    Ok(())
}

pub fn demo_app(s: &Session) -> Result<()> {
    info!("Deploying ArgoCD demo app...");

    let app = s.settings.asset("argocd-demo-app.yaml");
    kubectl::apply(s.exec, path_str(&app)?).context("Error deploying demo app")?;

    info!("Demo app deployed successfully!");
    Ok(())
}

/// Every add-on except the demo app, in dependency order.
pub fn all(s: &Session) -> Result<()> {
    metrics_server(s)?;
    ingress(s)?;
    metallb(s)?;
    cert_manager(s)?;
    argocd(s)?;
    database(s)?;
    kafka(s)?;
    monitoring(s)?;
    logging(s)
}

pub fn argocd_password(s: &Session) -> Result<String> {
    kubectl::secret_value(s.exec, "argocd", "argocd-initial-admin-secret", "password")
}

pub fn grafana_password(s: &Session) -> Result<String> {
    kubectl::secret_value(
        s.exec,
        "monitoring",
        "prometheus-stack-grafana",
        "admin-password",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::testing::Recorded;
    use crate::exec::testing::Recorder;
    use std::fs;
    use tempfile::TempDir;

    const COMPONENTS: &str = r#"apiVersion: v1
kind: ServiceAccount
metadata:
  name: metrics-server
  namespace: kube-system
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: metrics-server
  namespace: kube-system
spec:
  template:
    spec:
      containers:
      - args:
        - --cert-dir=/tmp
        - --kubelet-use-node-status-port
        name: metrics-server
"#;

    const METALLB_CONFIG: &str = r#"apiVersion: metallb.io/v1beta1
kind: IPAddressPool
metadata:
  name: kind-pool
  namespace: metallb-system
spec:
  addresses:
  - 172.18.255.200-172.18.255.250
---
apiVersion: metallb.io/v1beta1
kind: L2Advertisement
metadata:
  name: kind-l2
  namespace: metallb-system
"#;

    fn assets(files: &[(&str, &str)]) -> (TempDir, Settings) {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            fs::write(dir.path().join(name), contents).unwrap();
        }
        let settings = Settings {
            assets_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        (dir, settings)
    }

    #[test]
    fn test_metrics_server_patches_and_applies() {
        let (dir, settings) = assets(&[("components.yaml", COMPONENTS)]);
        let exec = Recorder::new();
        let checkpoint = Recorded::default();
        let s = Session {
            exec: &exec,
            checkpoint: &checkpoint,
            settings: &settings,
        };

        metrics_server(&s).unwrap();

        let path = dir.path().join("components.yaml");
        let patched = fs::read_to_string(&path).unwrap();
        assert!(patched.contains(INSECURE_TLS));
        assert!(checkpoint.messages.borrow().is_empty());
        assert_eq!(
            exec.calls(),
            vec![format!("kubectl apply -f {}", path.display())]
        );

        // second run leaves the file alone
        metrics_server(&s).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), patched);
    }

    #[test]
    fn test_metrics_server_asks_when_deployment_missing() {
        let other = "apiVersion: v1\nkind: Service\nmetadata:\n  name: metrics-server\n";
        let (_dir, settings) = assets(&[("components.yaml", other)]);
        let exec = Recorder::new();
        let checkpoint = Recorded::default();
        let s = Session {
            exec: &exec,
            checkpoint: &checkpoint,
            settings: &settings,
        };

        metrics_server(&s).unwrap();

        let messages = checkpoint.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains(INSECURE_TLS));
        assert_eq!(exec.calls().len(), 1);
    }

    #[test]
    fn test_metrics_server_aborts_on_bad_yaml() {
        let (_dir, settings) = assets(&[("components.yaml", "kind: [Deployment\n")]);
        let exec = Recorder::new();
        let checkpoint = Recorded::default();
        let s = Session {
            exec: &exec,
            checkpoint: &checkpoint,
            settings: &settings,
        };

        assert!(metrics_server(&s).is_err());
        assert!(exec.calls().is_empty());
        assert!(checkpoint.messages.borrow().is_empty());
    }

    #[test]
    fn test_ingress() {
        let (_dir, settings) = assets(&[]);
        let exec = Recorder::new();
        let checkpoint = Recorded::default();
        let s = Session {
            exec: &exec,
            checkpoint: &checkpoint,
            settings: &settings,
        };

        ingress(&s).unwrap();

        assert_eq!(
            exec.calls(),
            vec![
                format!("kubectl apply -f {}", INGRESS_NGINX),
                String::from("kubectl wait --namespace ingress-nginx --for=condition=ready pod --selector=app.kubernetes.io/component=controller --timeout=90s"),
            ]
        );
        assert_eq!(*exec.waits.borrow(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn test_metallb_confirms_address_range() {
        let (dir, settings) = assets(&[("metallb-config.yaml", METALLB_CONFIG)]);
        let exec = Recorder::new();
        let checkpoint = Recorded::default();
        let s = Session {
            exec: &exec,
            checkpoint: &checkpoint,
            settings: &settings,
        };

        metallb(&s).unwrap();

        let messages = checkpoint.messages.borrow();
        assert!(messages[0].contains("172.18.255.200-172.18.255.250"));
        assert_eq!(
            exec.calls(),
            vec![
                String::from("helm repo add metallb https://metallb.github.io/metallb"),
                String::from("helm install metallb metallb/metallb --namespace metallb-system --create-namespace"),
                format!("kubectl apply -f {}", dir.path().join("metallb-config.yaml").display()),
            ]
        );
    }

    #[test]
    fn test_cert_manager_not_ready_is_fatal() {
        let (_dir, settings) = assets(&[]);
        let exec = Recorder::new().fail_on("kubectl wait");
        let checkpoint = Recorded::default();
        let s = Session {
            exec: &exec,
            checkpoint: &checkpoint,
            settings: &settings,
        };

        let err = cert_manager(&s).unwrap_err();
        assert!(format!("{:#}", err).contains("Cert-Manager is not ready"));
    }

    #[test]
    fn test_argocd_not_ready_is_a_warning() {
        let (_dir, settings) = assets(&[]);
        let exec = Recorder::new().fail_on("kubectl wait");
        let checkpoint = Recorded::default();
        let s = Session {
            exec: &exec,
            checkpoint: &checkpoint,
            settings: &settings,
        };

        argocd(&s).unwrap();
        assert_eq!(exec.calls().len(), 3);
    }

    #[test]
    fn test_all_stops_at_first_failure() {
        let (_dir, settings) = assets(&[
            ("components.yaml", COMPONENTS),
            ("metallb-config.yaml", METALLB_CONFIG),
        ]);
        let exec = Recorder::new().fail_on("helm repo add jetstack");
        let checkpoint = Recorded::default();
        let s = Session {
            exec: &exec,
            checkpoint: &checkpoint,
            settings: &settings,
        };

        assert!(all(&s).is_err());
        let calls = exec.calls();
        assert!(calls[0].starts_with("kubectl apply -f"));
        assert!(calls.last().unwrap().starts_with("helm repo add jetstack"));
        assert!(!calls.iter().any(|c| c.contains("argo")));
    }

    #[test]
    fn test_all() {
        let (_dir, settings) = assets(&[
            ("components.yaml", COMPONENTS),
            ("metallb-config.yaml", METALLB_CONFIG),
        ]);
        let exec = Recorder::new();
        let checkpoint = Recorded::default();
        let s = Session {
            exec: &exec,
            checkpoint: &checkpoint,
            settings: &settings,
        };

        all(&s).unwrap();

        let calls = exec.calls();
        let last = calls.last().unwrap();
        assert!(last.starts_with("helm upgrade --install loki grafana/loki-stack"));
        assert!(calls.iter().any(|c| c.starts_with("kubectl apply --server-side")));
        assert!(!calls.iter().any(|c| c.contains("argocd-demo-app")));
        // only metallb asks, metrics-server was patched automatically
        assert_eq!(checkpoint.messages.borrow().len(), 1);
    }

    #[test]
    fn test_grafana_password() {
        let (_dir, settings) = assets(&[]);
        let exec = Recorder::new().respond(
            "kubectl get secret prometheus-stack-grafana",
            r#"{"data":{"admin-password":"cHJvbS1vcGVyYXRvcg=="}}"#,
        );
        let checkpoint = Recorded::default();
        let s = Session {
            exec: &exec,
            checkpoint: &checkpoint,
            settings: &settings,
        };

        assert_eq!(grafana_password(&s).unwrap(), "prom-operator");
    }
}
