use std::path::Path;
use std::process::Command;

use crate::config::ToolPaths;
use crate::error::VerificationError;

/// Check the archive signature of `apk` with `jarsigner -verify`.
///
/// A non-zero exit status, or jarsigner reporting the archive as unsigned
/// (which it does with a zero status), fails verification.
pub fn verify_signature(apk: &Path, tools: &ToolPaths) -> Result<(), VerificationError> {
    let output = Command::new(&tools.jarsigner)
        .arg("-verify")
        .arg(apk)
        .output()
        .map_err(|err| {
            VerificationError::tool(&tools.jarsigner, format!("could not run: {err}"))
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = first_line(&stdout)
            .or_else(|| first_line(&stderr))
            .unwrap_or("no output");
        return Err(VerificationError::signature_invalid(format!(
            "jarsigner exited with {}: {detail}",
            output.status
        )));
    }

    if stdout.to_ascii_lowercase().contains("jar is unsigned") {
        return Err(VerificationError::signature_invalid("archive is unsigned"));
    }

    Ok(())
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|line| !line.is_empty())
}
