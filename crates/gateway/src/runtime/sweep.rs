//! Stray engine-process sweep.
//!
//! After a deactivation or a hang, anything still matching the engine
//! command pattern or holding the engine TCP port is killed with a forced
//! signal. The sweep runs a second cycle when the first one found
//! something, then gives up — it is best-effort cleanup, not supervision.

use tokio::process::Command;

use mg_domain::config::EngineConfig;

/// Shell commands one sweep cycle executes, in order.
///
/// Kept as data so the sweep itself stays trivial and the command shapes
/// are testable.
pub fn sweep_commands(pattern: &str, port: u16) -> Vec<(String, Vec<String>)> {
    vec![
        (
            "pkill".to_owned(),
            vec!["-9".to_owned(), "-f".to_owned(), pattern.to_owned()],
        ),
        (
            "fuser".to_owned(),
            vec![
                "-k".to_owned(),
                "-KILL".to_owned(),
                format!("{port}/tcp"),
            ],
        ),
    ]
}

/// Run one sweep cycle. Returns `true` if any command reported a match
/// (exit status 0 for both `pkill` and `fuser` means "found and killed").
async fn sweep_once(engine: &EngineConfig) -> bool {
    let mut found = false;
    for (program, args) in sweep_commands(&engine.command_pattern, engine.port) {
        match Command::new(&program).args(&args).output().await {
            Ok(out) => {
                if out.status.success() {
                    found = true;
                    tracing::info!(program, ?args, "sweep killed stray engine process");
                }
            }
            Err(e) => {
                tracing::warn!(program, error = %e, "sweep command unavailable");
            }
        }
    }
    found
}

/// Sweep stray engine processes and port holders; one retry cycle when the
/// first pass found something.
pub async fn sweep(engine: &EngineConfig) {
    if sweep_once(engine).await {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        sweep_once(engine).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_shapes() {
        let cmds = sweep_commands("vllm.entrypoints.openai.api_server", 8003);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].0, "pkill");
        assert_eq!(
            cmds[0].1,
            vec!["-9", "-f", "vllm.entrypoints.openai.api_server"]
        );
        assert_eq!(cmds[1].0, "fuser");
        assert_eq!(cmds[1].1, vec!["-k", "-KILL", "8003/tcp"]);
    }
}
