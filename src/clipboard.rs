/*!
 * Clipboard support for repoprompt
 *
 * Copies text by piping it into the first working system clipboard command.
 */

use std::env;
use std::io::{self, Write};
use std::process::{Command, Stdio};

use log::{debug, warn};
use strum::{Display, EnumIter, IntoEnumIterator};
use thiserror::Error;

/// Error type for clipboard operations
#[derive(Error, Debug)]
pub enum ClipboardError {
    /// Failed to execute the command
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// No suitable clipboard mechanism was found
    #[error("No suitable clipboard mechanism found")]
    NoClipboardFound,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for clipboard operations
pub type Result<T> = std::result::Result<T, ClipboardError>;

/// Trait for clipboard operations
pub trait Clipboard {
    /// Copy text to the clipboard
    fn copy_to_clipboard(&self, text: &str) -> Result<()>;
}

/// System clipboard commands, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum ClipboardProvider {
    /// tmux paste buffer (only inside a tmux session)
    #[strum(serialize = "tmux")]
    Tmux,
    /// Wayland
    #[strum(serialize = "wl-copy")]
    Wayland,
    /// X11 via xsel
    #[strum(serialize = "xsel")]
    Xsel,
    /// X11 via xclip
    #[strum(serialize = "xclip")]
    Xclip,
    /// macOS
    #[strum(serialize = "pbcopy")]
    MacOS,
    /// Windows, also reachable from WSL
    #[strum(serialize = "clip.exe")]
    Windows,
    /// Termux on Android
    #[strum(serialize = "termux-clipboard-set")]
    Termux,
}

impl ClipboardProvider {
    /// Executable and arguments reading the text from stdin
    pub fn command(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Tmux => ("tmux", &["load-buffer", "-w", "-"]),
            Self::Wayland => ("wl-copy", &[]),
            Self::Xsel => ("xsel", &["-b", "-i"]),
            Self::Xclip => ("xclip", &["-selection", "clipboard", "-in"]),
            Self::MacOS => ("pbcopy", &[]),
            Self::Windows => ("clip.exe", &[]),
            Self::Termux => ("termux-clipboard-set", &[]),
        }
    }

    /// Whether the command can be used right now
    pub fn is_available(self) -> bool {
        let (program, _) = self.command();
        if !command_exists(program) {
            return false;
        }

        match self {
            Self::Tmux => env::var_os("TMUX").is_some(),
            Self::Wayland => env::var_os("WAYLAND_DISPLAY").is_some(),
            Self::Xsel | Self::Xclip => env::var_os("DISPLAY").is_some(),
            _ => true,
        }
    }
}

impl Clipboard for ClipboardProvider {
    fn copy_to_clipboard(&self, text: &str) -> Result<()> {
        let (program, args) = self.command();
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ClipboardError::CommandFailed(format!("Failed to spawn {}: {}", program, e)))?;

        // Dropping stdin closes the pipe so the command sees EOF
        {
            let mut stdin = child.stdin.take().ok_or_else(|| {
                ClipboardError::CommandFailed(format!("Failed to open stdin for {}", program))
            })?;
            stdin.write_all(text.as_bytes())?;
        }

        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(ClipboardError::CommandFailed(format!(
                "{} exited with status: {}",
                program, status
            )))
        }
    }
}

/// Providers usable on this system, in order of preference
pub fn available_providers() -> Vec<ClipboardProvider> {
    ClipboardProvider::iter()
        .filter(|provider| provider.is_available())
        .collect()
}

/// Copy text with the first provider that succeeds
pub fn copy_to_clipboard(text: &str) -> Result<ClipboardProvider> {
    let mut last_error = None;

    for provider in available_providers() {
        debug!("Trying clipboard provider {}", provider);
        match provider.copy_to_clipboard(text) {
            Ok(()) => return Ok(provider),
            Err(e) => {
                warn!("Clipboard provider {} failed: {}", provider, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(ClipboardError::NoClipboardFound))
}

/// Check if a command exists on the PATH
pub fn command_exists(command: &str) -> bool {
    env::var_os("PATH").map_or(false, |paths| {
        env::split_paths(&paths).any(|dir| dir.join(command).is_file())
    })
}
