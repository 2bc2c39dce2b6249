//! Command construction and output capture for mock server processes

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::logs::LogWriter;

/// Arguments passed to the mock server executable
pub(super) fn mock_server_args(config_path: &Path, port: u16) -> Vec<String> {
    vec![
        "start".to_string(),
        "--data".to_string(),
        config_path.display().to_string(),
        "--port".to_string(),
        port.to_string(),
    ]
}

/// Build the command for one mock server.
///
/// stdin is closed, stdout/stderr are piped to the capture tasks and the
/// child leads its own process group so stop can signal every descendant.
pub(super) fn build_command(program: &Path, args: &[String]) -> Command {
    debug!("Spawning command: {:?} {:?}", program, args);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

/// Spawn a task that copies lines from a stream into the log.
///
/// Lines are still drained when there is no writer so the child never blocks
/// on a full pipe.
pub(super) fn spawn_capture_task(
    stream: Option<impl tokio::io::AsyncRead + Unpin + Send + 'static>,
    mut writer: Option<LogWriter>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(stream) = stream {
            let reader = BufReader::new(stream);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(ref mut w) = writer {
                    w.write_line(&line);
                }
            }
        }
    })
}
