// src/system/editor.rs

use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Placeholder replaced by the script path in an editor command.
const PATH_PLACEHOLDER: &str = "{path}";

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("Editor command '{0}' could not be parsed.")]
    CommandParse(String),
    #[error("No editor configured.")]
    EmptyCommand,
    #[error("Editor '{0}' could not be started: {1}")]
    SpawnFailed(String, #[source] std::io::Error),
}

/// Builds the editor argv: `{path}` is substituted where present, otherwise the
/// path is appended as the last argument.
pub fn editor_argv(template: &str, path: &Path) -> Result<Vec<String>, EditorError> {
    let mut parts =
        shlex::split(template).ok_or_else(|| EditorError::CommandParse(template.to_string()))?;
    if parts.is_empty() {
        return Err(EditorError::EmptyCommand);
    }

    let path = path.to_string_lossy();
    if parts.iter().any(|p| p.contains(PATH_PLACEHOLDER)) {
        for part in parts.iter_mut() {
            *part = part.replace(PATH_PLACEHOLDER, &path);
        }
    } else {
        parts.push(path.into_owned());
    }
    Ok(parts)
}

/// Opens `path` in the configured editor without waiting for it to close.
pub fn launch(template: &str, path: &Path) -> Result<(), EditorError> {
    let argv = editor_argv(template, path)?;
    let Some((program, args)) = argv.split_first() else {
        return Err(EditorError::EmptyCommand);
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = path.parent() {
        command.current_dir(dunce::simplified(dir));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Keep the editor alive when the service is interrupted from its terminal.
        command.process_group(0);
    }

    let mut child = command
        .spawn()
        .map_err(|e| EditorError::SpawnFailed(program.clone(), e))?;
    log::info!("Opened '{}' with '{}'.", path.display(), program);

    // Reap the editor when it exits.
    std::thread::spawn(move || {
        if let Err(e) = child.wait() {
            log::debug!("Could not wait for editor process: {}", e);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_path_is_appended_by_default() {
        let argv = editor_argv("code --wait", &PathBuf::from("/s/run.sh")).unwrap();
        assert_eq!(argv, vec!["code", "--wait", "/s/run.sh"]);
    }

    #[test]
    fn test_placeholder_is_substituted() {
        let argv = editor_argv("vim '+set ft=sh' {path}", &PathBuf::from("/s/my run.sh")).unwrap();
        assert_eq!(argv, vec!["vim", "+set ft=sh", "/s/my run.sh"]);
    }

    #[test]
    fn test_invalid_templates_are_rejected() {
        assert!(matches!(
            editor_argv("  ", Path::new("/x")),
            Err(EditorError::EmptyCommand)
        ));
        assert!(matches!(
            editor_argv("code \"unterminated", Path::new("/x")),
            Err(EditorError::CommandParse(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_reports_missing_editor() {
        assert!(matches!(
            launch("no-such-editor-binary-42", Path::new("/tmp/x.sh")),
            Err(EditorError::SpawnFailed(..))
        ));
    }
}
