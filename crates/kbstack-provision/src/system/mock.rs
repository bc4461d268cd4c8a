// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock system for testing.
//!
//! Simulates a Linux host without touching it: a package manager that puts
//! binaries on a fake PATH, systemctl for the Docker daemon, ufw with a rule
//! list, and compose with a set of running containers. Every command is
//! recorded for assertions.
//!
//! The ufw simulation appends rules blindly (duplicates included), so any
//! idempotence has to come from the caller.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::traits::*;

#[derive(Debug, Default)]
struct MockState {
    binaries: HashSet<String>,
    package_binaries: HashMap<String, String>,
    failing_packages: HashSet<String>,
    compose_plugin: bool,
    docker_active: bool,
    ufw_rules: Vec<String>,
    ufw_enabled: bool,
    ufw_rules_at_enable: Option<Vec<String>>,
    failing_ports: HashSet<String>,
    compose_up_fails: bool,
    containers: Vec<String>,
    launches: u32,
    calls: Vec<CommandSpec>,
}

/// Mock host for testing.
pub struct MockSystem {
    state: Mutex<MockState>,
}

impl Default for MockSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSystem {
    /// A bare host: only the package manager and systemctl are present.
    pub fn new() -> Self {
        let package_binaries = [
            ("docker.io", "docker"),
            ("docker-ce", "docker"),
            ("docker-compose", "docker-compose"),
            ("ufw", "ufw"),
            ("curl", "curl"),
            ("htop", "htop"),
            ("google-cloud-cli", "gcloud"),
        ]
        .into_iter()
        .map(|(p, b)| (p.to_string(), b.to_string()))
        .collect();

        let state = MockState {
            binaries: ["apt-get", "dnf", "systemctl"]
                .into_iter()
                .map(String::from)
                .collect(),
            package_binaries,
            ..MockState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// A host where every default dependency is installed and Docker is running.
    pub fn provisioned() -> Self {
        let system = Self::new();
        {
            let mut state = system.lock();
            for bin in ["docker", "docker-compose", "ufw", "curl", "htop", "gcloud"] {
                state.binaries.insert(bin.to_string());
            }
            state.docker_active = true;
        }
        system
    }

    pub fn with_binary(self, program: &str) -> Self {
        self.lock().binaries.insert(program.to_string());
        self
    }

    pub fn without_binary(self, program: &str) -> Self {
        self.lock().binaries.remove(program);
        self
    }

    /// Installing `package` fails with exit code 100.
    pub fn with_failing_package(self, package: &str) -> Self {
        self.lock().failing_packages.insert(package.to_string());
        self
    }

    /// `ufw allow <rule>` fails for this rule (e.g. "443/tcp").
    pub fn with_failing_port(self, rule: &str) -> Self {
        self.lock().failing_ports.insert(rule.to_string());
        self
    }

    /// `docker compose` (plugin) is available.
    pub fn with_compose_plugin(self) -> Self {
        self.lock().compose_plugin = true;
        self
    }

    /// `compose up` exits non-zero.
    pub fn with_compose_up_failure(self) -> Self {
        self.lock().compose_up_fails = true;
        self
    }

    /// Pretend the service is already running.
    pub fn with_running_service(self) -> Self {
        {
            let mut state = self.lock();
            state.launches += 1;
            let id = container_id(state.launches);
            state.containers = vec![id];
        }
        self
    }

    /// All commands run so far (both captured and attached).
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.lock().calls.clone()
    }

    /// Commands run for `program`, rendered as command lines.
    pub fn command_lines(&self, program: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.program == program)
            .map(|c| c.to_string())
            .collect()
    }

    pub fn ufw_rules(&self) -> Vec<String> {
        self.lock().ufw_rules.clone()
    }

    pub fn ufw_enabled(&self) -> bool {
        self.lock().ufw_enabled
    }

    /// Rules present at the moment enforcement was first enabled.
    pub fn ufw_rules_at_enable(&self) -> Option<Vec<String>> {
        self.lock().ufw_rules_at_enable.clone()
    }

    pub fn docker_active(&self) -> bool {
        self.lock().docker_active
    }

    pub fn containers(&self) -> Vec<String> {
        self.lock().containers.clone()
    }

    /// The last `compose up` invocation, including its environment.
    pub fn last_compose_up(&self) -> Option<CommandSpec> {
        self.lock()
            .calls
            .iter()
            .rev()
            .find(|c| compose_subcommand(c).as_deref() == Some("up"))
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dispatch(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let mut state = self.lock();
        state.calls.push(command.clone());

        if !state.binaries.contains(&command.program) {
            return Err(SystemError::NotFound(command.program.clone()));
        }

        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        let output = match command.program.as_str() {
            "apt-get" | "dnf" => package_manager(&mut state, &args),
            "systemctl" => systemctl(&mut state, &args),
            "ufw" => ufw(&mut state, &args),
            "docker-compose" => compose(&mut state, &args),
            "docker" => match args.first() {
                Some(&"compose") if state.compose_plugin => compose(&mut state, &args[1..]),
                Some(&"compose") => fail(125, "docker: 'compose' is not a docker command."),
                Some(&"ps") => ok(state.containers.join("\n")),
                _ => ok(String::new()),
            },
            _ => ok(String::new()),
        };
        Ok(output)
    }
}

fn container_id(n: u32) -> String {
    format!("c0ffee{:06x}", n)
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn fail(exit_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

fn package_manager(state: &mut MockState, args: &[&str]) -> CommandOutput {
    match args {
        ["update"] | ["makecache"] => ok(""),
        ["install", "-y", package] => {
            if state.failing_packages.contains(*package) {
                return fail(100, &format!("E: Unable to locate package {}", package));
            }
            let binary = state
                .package_binaries
                .get(*package)
                .cloned()
                .unwrap_or_else(|| package.to_string());
            state.binaries.insert(binary);
            ok("")
        }
        _ => fail(100, "E: Invalid operation"),
    }
}

fn systemctl(state: &mut MockState, args: &[&str]) -> CommandOutput {
    match args {
        ["is-active", "--quiet", "docker"] if state.docker_active => ok(""),
        ["is-active", "--quiet", "docker"] => fail(3, ""),
        ["enable", "--now", "docker"] if state.binaries.contains("docker") => {
            state.docker_active = true;
            ok("")
        }
        _ => fail(5, "Failed to enable unit: Unit docker.service not found."),
    }
}

fn ufw(state: &mut MockState, args: &[&str]) -> CommandOutput {
    match args {
        ["show", "added"] => {
            let mut out = String::from("Added user rules (see 'ufw status' for running firewall):\n");
            if state.ufw_rules.is_empty() {
                out = String::from("(None)\n");
            }
            for rule in &state.ufw_rules {
                out.push_str(&format!("ufw allow {}\n", rule));
            }
            ok(out)
        }
        ["status"] if state.ufw_enabled => ok("Status: active\n"),
        ["status"] => ok("Status: inactive\n"),
        ["allow", rule, rest @ ..] => {
            if state.failing_ports.contains(*rule) {
                return fail(1, "ERROR: Could not update running firewall");
            }
            let mut line = rule.to_string();
            for word in rest {
                line.push(' ');
                line.push_str(word);
            }
            state.ufw_rules.push(line);
            ok("Rules updated\n")
        }
        ["--force", "enable"] => {
            if !state.ufw_enabled {
                state.ufw_rules_at_enable = Some(state.ufw_rules.clone());
            }
            state.ufw_enabled = true;
            ok("Firewall is active and enabled on system startup\n")
        }
        _ => fail(1, "ERROR: Invalid syntax"),
    }
}

/// Skip `-f <file>` / `-p <project>` and return the compose subcommand.
fn compose_args<'a>(args: &'a [&'a str]) -> (Option<&'a str>, &'a [&'a str]) {
    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "-f" | "-p" | "--file" | "--project-name" => i += 2,
            sub => return (Some(sub), &args[i + 1..]),
        }
    }
    (None, &[])
}

fn compose_subcommand(command: &CommandSpec) -> Option<String> {
    let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
    let args = match command.program.as_str() {
        "docker-compose" => &args[..],
        "docker" if args.first() == Some(&"compose") => &args[1..],
        _ => return None,
    };
    compose_args(args).0.map(str::to_string)
}

fn compose(state: &mut MockState, args: &[&str]) -> CommandOutput {
    match compose_args(args).0 {
        Some("version") => ok("Docker Compose version v2.29.1\n"),
        Some("build") => ok(""),
        Some("up") if state.compose_up_fails => {
            fail(1, "Error response from daemon: pull access denied")
        }
        Some("up") => {
            if state.containers.is_empty() {
                state.launches += 1;
                let id = container_id(state.launches);
                state.containers.push(id);
            }
            ok("")
        }
        Some("down") => {
            state.containers.clear();
            ok("")
        }
        Some("restart") | Some("logs") => ok(""),
        Some("ps") => ok(state.containers.join("\n")),
        _ => fail(1, "unknown compose command"),
    }
}

#[async_trait]
impl System for MockSystem {
    fn system_type(&self) -> &'static str {
        "mock"
    }

    fn is_available(&self, program: &str) -> bool {
        self.lock().binaries.contains(program)
    }

    async fn output(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.dispatch(command)
    }

    async fn attached(&self, command: &CommandSpec) -> Result<i32> {
        Ok(self.dispatch(command)?.exit_code)
    }
}
