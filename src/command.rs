//! Running `ip`/`tc`/`cat` on a node, inside its namespace when it has one.

use std::io;
use std::process::Output;

use tokio::process::Command;

/// Builds and runs commands, optionally via `sudo -n ip netns exec`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Shell {
    sudo: bool,
}

impl Shell {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    /// Full argument vector, program first.
    pub fn argv(&self, namespace: Option<&str>, program: &str, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 6);
        if self.sudo {
            argv.extend(["sudo".to_string(), "-n".to_string()]);
        }
        if let Some(ns) = namespace {
            argv.extend(["ip", "netns", "exec", ns].map(String::from));
        }
        argv.push(program.to_string());
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    pub async fn output(
        &self,
        namespace: Option<&str>,
        program: &str,
        args: &[&str],
    ) -> io::Result<Output> {
        let argv = self.argv(namespace, program, args);
        Command::new(&argv[0])
            .args(&argv[1..])
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// True when a failing command's stderr says the target state already holds.
pub fn is_benign(stderr: &str, tolerated: &[&str]) -> bool {
    tolerated.iter().any(|t| stderr.contains(t))
}
