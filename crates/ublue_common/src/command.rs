//! Command execution layer
//!
//! Every external program (topgrade, rpm-ostree, loginctl, notify-send, ...)
//! goes through a [`CommandRunner`]:
//! - `SystemCommandRunner` spawns the real process and captures its output
//! - `FakeCommandRunner` answers from scripted responses and records calls
//!
//! The runner does not interpret exit codes; callers decide what a non-zero
//! status means for them.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use tracing::trace;

/// A program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_string_lossy().to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Space-joined command line, used for logging and fake matching
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: &str) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    /// Output with a specific exit code and empty streams
    pub fn exit(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code with signal deaths reported as 1
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(1)
    }
}

/// Executes external programs
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        (**self).run(spec)
    }
}

/// Runs commands on the real system, blocking until they exit
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        trace!("exec: {}", spec);
        let output = Command::new(&spec.program).args(&spec.args).output()?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// ============================================================================
// Fake Command Runner (Testing)
// ============================================================================

#[derive(Debug)]
struct FakeRule {
    /// Every pattern must occur in the command line
    patterns: Vec<String>,
    responses: VecDeque<io::Result<CommandOutput>>,
    /// Response repeated once `responses` is drained
    fallback: Option<CommandOutput>,
}

/// Scripted command runner for tests.
///
/// Rules match when all their patterns are substrings of the rendered
/// command line; the first matching rule with a response left wins. Unmatched
/// commands succeed with empty output.
#[derive(Debug, Default)]
pub struct FakeCommandRunner {
    rules: Mutex<Vec<FakeRule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every matching command with `output`
    pub fn on(self, pattern: &str, output: CommandOutput) -> Self {
        self.on_all(&[pattern], output)
    }

    /// Answer every command matching all `patterns` with `output`
    pub fn on_all(self, patterns: &[&str], output: CommandOutput) -> Self {
        self.push_rule(FakeRule {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            responses: VecDeque::new(),
            fallback: Some(output),
        });
        self
    }

    /// Answer the next matching command with `output`, once
    pub fn once(self, pattern: &str, output: CommandOutput) -> Self {
        self.push_rule(FakeRule {
            patterns: vec![pattern.to_string()],
            responses: VecDeque::from([Ok(output)]),
            fallback: None,
        });
        self
    }

    /// Make matching commands fail to spawn
    pub fn fail(self, pattern: &str) -> Self {
        self.push_rule(FakeRule {
            patterns: vec![pattern.to_string()],
            responses: VecDeque::from([Err(io::Error::new(
                io::ErrorKind::NotFound,
                "fake spawn failure",
            ))]),
            fallback: None,
        });
        self
    }

    fn push_rule(&self, rule: FakeRule) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(rule);
        }
    }

    /// Every command run so far, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Rendered command lines containing `pattern`
    pub fn calls_matching(&self, pattern: &str) -> Vec<String> {
        self.calls()
            .iter()
            .map(CommandSpec::command_line)
            .filter(|line| line.contains(pattern))
            .collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls_matching(pattern).len()
    }
}

impl CommandRunner for FakeCommandRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }

        let line = spec.command_line();
        let mut rules = self
            .rules
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "fake runner poisoned"))?;

        for rule in rules.iter_mut() {
            if !rule.patterns.iter().all(|p| line.contains(p.as_str())) {
                continue;
            }
            if let Some(response) = rule.responses.pop_front() {
                return response;
            }
            if let Some(fallback) = &rule.fallback {
                return Ok(fallback.clone());
            }
        }

        Ok(CommandOutput::ok(""))
    }
}
