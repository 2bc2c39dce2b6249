//! Shell scripts standing in for the mock-serving CLI
//!
//! The daemon runs `<bin> start --data <config> --port <port>`, so inside a
//! script `$3` is the config path and `$5` the port.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockScript {
    /// Prints to both streams, then serves until signalled
    LongRunning,
    /// Ignores SIGTERM, so only SIGKILL stops it
    IgnoresTerm,
    /// Runs for `after`, then exits with `code`
    ExitsAfter { after: Duration, code: i32 },
    /// Complains on stderr and exits with `code` right away
    FailsImmediately { code: i32 },
}

impl MockScript {
    pub fn body(&self) -> String {
        match self {
            MockScript::LongRunning => concat!(
                "echo \"serving $3 on port $5\"\n",
                "echo \"ready\" >&2\n",
                "exec sleep 30",
            )
            .to_string(),
            MockScript::IgnoresTerm => concat!(
                "trap '' TERM\n",
                "echo \"stubborn on port $5\"\n",
                "while true; do sleep 1; done",
            )
            .to_string(),
            MockScript::ExitsAfter { after, code } => format!(
                "echo \"starting on port $5\"\nsleep {:.3}\nexit {}",
                after.as_secs_f64(),
                code
            ),
            MockScript::FailsImmediately { code } => {
                format!("echo \"cannot serve $3\" >&2\nexit {}", code)
            }
        }
    }

    /// Write the script into `dir` as an executable and return its path
    #[cfg(unix)]
    pub fn install(&self, dir: &Path) -> io::Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("mock-server.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", self.body()))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    #[cfg(not(unix))]
    pub fn install(&self, _dir: &Path) -> io::Result<PathBuf> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "mock scripts need a unix shell",
        ))
    }
}
