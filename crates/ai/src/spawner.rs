//! Creation of teammate processes.
//!
//! Peers are full processes running this same binary with the same command
//! line. They are detached: no inherited stdio, their own process group, and
//! no channel back to the parent. Coordination only ever happens through the
//! server's broadcasts. The parent keeps the child handles around solely to
//! count how many are still alive.

use std::io;
use std::process::{Child, Command, Stdio};

use tracing::{debug, info};

use crate::args::AgentConfig;

/// The team is never grown past this many members, the parent included.
pub const MAX_TEAM_MEMBERS: usize = 20;

#[derive(Debug)]
pub struct Spawner {
    children: Vec<Child>,
    /// Action counter value of the last successful spawn batch.
    pub last_spawn_tick: u64,
    /// Action counter value of the last `Fork`.
    pub last_fork_tick: u64,
}

impl Spawner {
    pub fn new() -> Self {
        Self {
            children: Vec::new(),
            last_spawn_tick: 0,
            last_fork_tick: 0,
        }
    }

    /// Launches one detached peer against the same server and team.
    pub fn spawn_peer(&mut self, config: &AgentConfig) -> io::Result<()> {
        let exe = std::env::current_exe()?;
        let mut command = Command::new(exe);
        command
            .arg("-p")
            .arg(config.port.to_string())
            .arg("-n")
            .arg(&config.team_name)
            .arg("-h")
            .arg(&config.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn()?;
        info!(pid = child.id(), "spawned a teammate process");
        self.children.push(child);
        Ok(())
    }

    /// Drops the handles of children that have exited.
    pub fn sweep(&mut self) {
        let before = self.children.len();
        self.children
            .retain_mut(|child| matches!(child.try_wait(), Ok(None)));
        let removed = before - self.children.len();
        if removed > 0 {
            debug!(removed, "reaped finished teammate processes");
        }
    }

    /// Number of spawned peers still running, as of the last sweep.
    pub fn active_children(&self) -> usize {
        self.children.len()
    }
}
