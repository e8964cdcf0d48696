use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::debug;

/// Downloads `url` into `dest`, replacing whatever was there.
pub fn download(url: &str, dest: &Path) -> Result<()> {
    debug!("downloading {} to {}", url, dest.display());

    let mut resp =
        reqwest::blocking::get(url).with_context(|| format!("could not fetch {}", url))?;
    if !resp.status().is_success() {
        bail!("could not fetch {}, status is {}", url, resp.status());
    }

    let mut out =
        File::create(dest).with_context(|| format!("could not create {}", dest.display()))?;
    if let Err(e) = io::copy(&mut resp, &mut out) {
        // never leave a truncated manifest behind
        let _ = fs::remove_file(dest);
        return Err(e).with_context(|| format!("could not write {}", dest.display()));
    }

    Ok(())
}
