//! Test helpers: scripted stand-ins for the agent CLI.

use crate::process::AgentCli;

/// Write an executable shell script that plays the agent CLI for one test.
/// Returns the tempdir (which keeps the script alive) and an `AgentCli`
/// pointing at it.
#[cfg(unix)]
pub(crate) fn fake_agent(script: &str) -> (tempfile::TempDir, AgentCli) {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("fake-agent.sh");
    std::fs::write(&path, script).expect("write fake agent script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("mark fake agent script executable");

    let agent = AgentCli::new(path.to_string_lossy().into_owned());
    (dir, agent)
}
