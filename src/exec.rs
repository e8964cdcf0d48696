use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;
use std::{thread, time::Duration};
use tracing::debug;

/// Something that can run the external tools (`kind`, `kubectl`, `helm`).
pub trait Exec {
    /// Runs `program` with `args` to completion and returns its stdout.
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;

    /// Gives the cluster a moment before the next step.
    fn settle(&self, wait: Duration) {
        thread::sleep(wait);
    }
}

/// Runs commands on the local machine.
pub struct Shell {
    verbose: bool,
}

impl Shell {
    pub fn new(verbose: bool) -> Shell {
        Shell { verbose }
    }
}

impl Exec for Shell {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        debug!("running {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("could not start `{}`, is it installed?", program))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if self.verbose && !stdout.trim().is_empty() {
            println!("{}", stdout.trim_end());
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "`{} {}` failed ({}): {}",
                program,
                args.join(" "),
                output.status,
                stderr.trim()
            );
        }

        Ok(stdout)
    }
}

/// Paths end up as command line arguments, which we keep as `&str`.
pub fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("{} is not valid UTF-8", path.display()))
}

#[cfg(test)]
pub mod testing {
    use super::Exec;
    use anyhow::{bail, Result};
    use std::cell::RefCell;
    use std::time::Duration;

    /// Records every invocation instead of running it.
    #[derive(Default)]
    pub struct Recorder {
        pub calls: RefCell<Vec<String>>,
        pub waits: RefCell<Vec<Duration>>,
        outputs: Vec<(String, String)>,
        failing: Option<String>,
    }

    impl Recorder {
        pub fn new() -> Recorder {
            Recorder::default()
        }

        /// Canned stdout for a command line starting with `prefix`; the
        /// first matching prefix wins.
        pub fn respond(mut self, prefix: &str, stdout: &str) -> Recorder {
            self.outputs.push((String::from(prefix), String::from(stdout)));
            self
        }

        /// Make command lines starting with `prefix` fail.
        pub fn fail_on(mut self, prefix: &str) -> Recorder {
            self.failing = Some(String::from(prefix));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl Exec for Recorder {
        fn run(&self, program: &str, args: &[&str]) -> Result<String> {
            let line = format!("{} {}", program, args.join(" "));
            self.calls.borrow_mut().push(line.clone());

            if let Some(prefix) = &self.failing {
                if line.starts_with(prefix.as_str()) {
                    bail!("`{}` failed", line);
                }
            }

            Ok(self
                .outputs
                .iter()
                .find(|(prefix, _)| line.starts_with(prefix.as_str()))
                .map(|(_, out)| out.clone())
                .unwrap_or_default())
        }

        fn settle(&self, wait: Duration) {
            self.waits.borrow_mut().push(wait);
        }
    }
}
