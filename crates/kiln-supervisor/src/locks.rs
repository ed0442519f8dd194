use std::path::Path;

use crate::logs::LogSink;

/// Session locks the server leaves behind per dimension. A stale copy blocks
/// the next launch, so they are removed after every stop or crash.
pub const SESSION_LOCKS: &[&str] = &[
    "world/session.lock",
    "world_nether/session.lock",
    "world_the_end/session.lock",
];

/// Best-effort removal under the child's working directory. Individual
/// failures are logged and never fail the enclosing stop operation.
pub(crate) async fn remove_session_locks(working_dir: &Path, sink: &LogSink) {
    for rel in SESSION_LOCKS {
        let path = working_dir.join(rel);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                sink.emit(format!("[kiln] removed stale lock {}", path.display()))
                    .await;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                sink.emit(format!(
                    "[kiln] failed to remove lock {}: {err}",
                    path.display()
                ))
                .await;
            }
        }
    }
}
