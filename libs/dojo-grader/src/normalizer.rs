/// Output Normalizer - Environment-Independent Text
///
/// **Core Responsibility:**
/// Make captured process text comparable and presentable across machines.
///
/// **Normalization Rules (program output):**
/// - Line endings unified to `\n` (`\r\n` and lone `\r` both)
/// - Trailing whitespace trimmed on every line and at the end
/// - Leading whitespace and case preserved (exact match required)
///
/// **Error Cleaning Rules (stderr):**
/// - The artifact path and its directory become [`ARTIFACT_PLACEHOLDER`]
/// - Common OS temp-path shapes are redacted even when the exact path differs
///   from the recorded one (symlinked `/tmp`, 8.3 short names, ...)
/// - `File "...", line N` and `file.cs(N,M)` framing become `Line N`
///
/// Both functions are pure, total and idempotent. Error cleaning repeats its
/// rewrites until the text stops changing, since one rewrite can expose
/// another (`replace_all` never rescans its own output).

use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

pub const ARTIFACT_PLACEHOLDER: &str = "<submission>";

lazy_static! {
    static ref UNIX_TEMP_PATH: Regex =
        Regex::new(r#"(?:/private)?/(?:tmp|var/folders|var/tmp)/[^\s"'(),:]+"#).unwrap();
    static ref WINDOWS_TEMP_PATH: Regex = Regex::new(
        r#"(?i)[a-z]:[\\/](?:users[\\/][^\\/\s"']+[\\/]appdata[\\/]local[\\/]temp|windows[\\/]temp)[\\/][^\s"'(),:]+"#
    )
    .unwrap();
    static ref PYTHON_FRAME: Regex = Regex::new(r#"File "[^"]*", line (\d+)"#).unwrap();
    static ref DOTNET_FRAME: Regex =
        Regex::new(r"(?:<submission>|[^\s(\[\]]+\.csx?)\((\d+),\d+\)(?:\.csx?\(\d+,\d+\))*")
            .unwrap();
}

/// Rewrite passes shrink the text or remove a path root, so real input
/// settles in two or three; the bound only matters for crafted input.
const MAX_CLEAN_PASSES: usize = 16;

/// Canonicalize program output for comparison
pub fn normalize(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    unified
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

/// Strip machine-specific noise from error text
pub fn clean_error_text(raw: &str, artifact_path: &Path) -> String {
    let mut text = normalize(raw);
    for _ in 0..MAX_CLEAN_PASSES {
        let next = clean_pass(&text, artifact_path);
        if next == text {
            break;
        }
        text = next;
    }
    text
}

fn clean_pass(text: &str, artifact_path: &Path) -> String {
    let mut text = normalize(text);

    let file = artifact_path.to_string_lossy();
    if redactable(&file) {
        text = text.replace(file.as_ref(), ARTIFACT_PLACEHOLDER);
    }
    if let Some(dir) = artifact_path.parent() {
        let dir = dir.to_string_lossy();
        // Never blank out a bare root like "/" or "C:\"
        if redactable(&dir) && dir.trim_matches(|c| c == '/' || c == '\\').len() > 2 {
            text = text.replace(dir.as_ref(), ARTIFACT_PLACEHOLDER);
        }
    }

    let text = UNIX_TEMP_PATH.replace_all(&text, ARTIFACT_PLACEHOLDER);
    let text = WINDOWS_TEMP_PATH.replace_all(&text, ARTIFACT_PLACEHOLDER);
    let text = PYTHON_FRAME.replace_all(&text, "Line $1");
    let text = DOTNET_FRAME.replace_all(&text, "Line $1");
    text.into_owned()
}

/// A path that is part of the placeholder would be re-expanded forever
fn redactable(path: &str) -> bool {
    !path.is_empty() && !ARTIFACT_PLACEHOLDER.contains(path)
}
