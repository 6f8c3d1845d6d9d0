//! External editor integration for composing reviews and replies.

use anyhow::{Context, Result, anyhow};
use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;

/// Lines starting with this marker are instructions and are dropped.
const COMMENT_MARKER: &str = "#";

/// Opens the user's editor on a scratch file seeded with `instructions`
/// (as comment lines) and `initial_text`. Returns `None` when the result is
/// empty after comments are removed.
///
/// Editor priority:
/// 1) `$VISUAL`
/// 2) `$EDITOR`
/// 3) `nvim`
/// 4) `vim`
/// 5) `vi`
pub fn compose_with_system_editor(instructions: &str, initial_text: &str) -> Result<Option<String>> {
    let mut file = tempfile::Builder::new()
        .prefix("nusprofs-compose-")
        .suffix(".md")
        .tempfile()
        .context("failed to create scratch file for editor")?;

    for line in instructions.lines() {
        writeln!(file, "{COMMENT_MARKER} {line}")?;
    }
    file.write_all(initial_text.as_bytes())?;
    file.flush()?;

    run_editor(file.path())?;

    let text = fs::read_to_string(file.path())
        .with_context(|| format!("failed to read {}", file.path().display()))?;
    Ok(strip_instructions(&text))
}

/// Opens a file path in the user's preferred editor.
pub fn edit_file_with_system_editor(path: &Path) -> Result<()> {
    run_editor(path)
}

fn strip_instructions(text: &str) -> Option<String> {
    let body = text
        .lines()
        .filter(|line| !line.starts_with(COMMENT_MARKER))
        .collect::<Vec<_>>()
        .join("\n");
    let body = body.trim();
    (!body.is_empty()).then(|| body.to_owned())
}

fn editor_candidates() -> Vec<String> {
    let mut candidates: Vec<String> = ["VISUAL", "EDITOR"]
        .into_iter()
        .filter_map(env::var_os)
        .map(|value| value.to_string_lossy().trim().to_owned())
        .filter(|value| !value.is_empty())
        .collect();
    candidates.extend(["nvim".to_owned(), "vim".to_owned(), "vi".to_owned()]);
    candidates
}

fn run_editor(path: &Path) -> Result<()> {
    for command in editor_candidates() {
        let Some(words) = shlex::split(&command) else {
            continue;
        };
        let Some((program, args)) = words.split_first() else {
            continue;
        };

        match Command::new(program).args(args).arg(path).status() {
            Ok(status) if status.success() => return Ok(()),
            Ok(status) => {
                return Err(anyhow!(
                    "editor `{}` exited with status {}",
                    command,
                    status
                        .code()
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "unknown".to_owned())
                ));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(anyhow!("failed to launch editor `{}`: {}", command, err));
            }
        }
    }

    Err(anyhow!(
        "no editor found (tried $VISUAL, $EDITOR, nvim, vim, vi)"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_and_blank_edges_are_removed() {
        let text = "# Write your reply.\n# Lines starting with # are ignored.\n\nGreat point\n#tag\nthanks\n\n";

        assert_eq!(
            strip_instructions(text),
            Some("Great point\nthanks".to_owned())
        );
    }

    #[test]
    fn only_instructions_means_nothing_to_send() {
        assert_eq!(strip_instructions("# Write your review.\n\n   \n"), None);
    }
}
