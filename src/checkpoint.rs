use anyhow::{bail, Result};
use console::{style, Term};
use tracing::{info, warn};

/// A point where a human has to look at something before we carry on.
pub trait Checkpoint {
    fn confirm(&self, message: &str) -> Result<()>;
}

/// Blocks until Enter is pressed on the terminal.
pub struct Terminal {
    term: Term,
}

impl Terminal {
    pub fn new() -> Terminal {
        Terminal::on(Term::stderr())
    }

    pub fn on(term: Term) -> Terminal {
        Terminal { term }
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Terminal::new()
    }
}

impl Checkpoint for Terminal {
    fn confirm(&self, message: &str) -> Result<()> {
        // read_line returns straight away when there is no tty to read from
        if !self.term.is_term() {
            bail!(
                "{} This needs a terminal to confirm; re-run interactively or pass --yes.",
                message
            );
        }

        let term = &self.term;
        term.write_line(&format!("{}", style(message).yellow()))?;
        term.write_line(&format!("{}", style("Press Enter to continue...").bold()))?;
        term.read_line()?;
        info!("Continuing...");

        Ok(())
    }
}

/// Used with `--yes`; nobody is there to press Enter.
pub struct Unattended;

impl Checkpoint for Unattended {
    fn confirm(&self, message: &str) -> Result<()> {
        warn!("{}", message);
        warn!("running unattended, continuing without confirmation");

        Ok(())
    }
}
