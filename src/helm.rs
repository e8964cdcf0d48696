use anyhow::Result;

use crate::exec::Exec;

pub fn repo_add(exec: &dyn Exec, name: &str, url: &str, force_update: bool) -> Result<()> {
    let mut args = vec!["repo", "add", name, url];
    if force_update {
        args.push("--force-update");
    }
    exec.run("helm", &args)?;
    Ok(())
}

pub fn repo_update(exec: &dyn Exec) -> Result<()> {
    exec.run("helm", &["repo", "update"])?;
    Ok(())
}

/// A chart release, always installed into its own namespace.
pub struct Release<'a> {
    name: &'a str,
    chart: &'a str,
    namespace: &'a str,
    values: Option<String>,
    sets: Vec<&'a str>,
    upgrade: bool,
}

impl<'a> Release<'a> {
    pub fn new(name: &'a str, chart: &'a str, namespace: &'a str) -> Release<'a> {
        Release {
            name,
            chart,
            namespace,
            values: None,
            sets: vec![],
            upgrade: false,
        }
    }

    pub fn values(mut self, file: &str) -> Self {
        self.values = Some(String::from(file));
        self
    }

    /// `--set key=value`
    pub fn set(mut self, value: &'a str) -> Self {
        self.sets.push(value);
        self
    }

    /// `helm upgrade --install` instead of `helm install`.
    pub fn upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }

    fn args(&self) -> Vec<&str> {
        let mut args = if self.upgrade {
            vec!["upgrade", "--install"]
        } else {
            vec!["install"]
        };
        args.extend(&[self.name, self.chart]);
        if let Some(values) = &self.values {
            args.push("-f");
            args.push(values);
        }
        args.extend(&["--namespace", self.namespace, "--create-namespace"]);
        for set in &self.sets {
            args.push("--set");
            args.push(set);
        }
        args
    }

    pub fn install(&self, exec: &dyn Exec) -> Result<()> {
        exec.run("helm", &self.args())?;
        Ok(())
    }
}
