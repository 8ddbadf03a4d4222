use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check that the engine CLI is installed. Whether its daemon is reachable is
/// a runtime question answered by `ContainerEngine::ping`.
pub fn check_engine_prereqs(command: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists(command) {
        missing.push(MissingPrereq {
            name: command.to_owned(),
            purpose: "talking to the container engine",
            install_hint: "zypper install docker | apt install docker.io | dnf install moby-engine | pacman -S docker",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\ndockvault needs a container engine CLI to back up and restore containers.");
    msg
}
