//! Immutable descriptions of the services voxhost manages.
//!
//! A [`ServiceSpec`] carries everything the reconciliation engine needs to
//! observe and mutate one service: how to launch it, how to tell whether it is
//! healthy, which live processes belong to it, and how to stop them. Specs are
//! built once per run and borrowed read-only afterwards.

use std::collections::HashSet;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use nix::sys::signal::Signal;
use regex::Regex;
use thiserror::Error;

/// Program invocation used to start a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    program: Utf8PathBuf,
    args: Vec<String>,
    workdir: Option<Utf8PathBuf>,
    env_file: Option<Utf8PathBuf>,
    env: Vec<(String, String)>,
    log_file: Option<Utf8PathBuf>,
}

impl LaunchCommand {
    /// Creates a command for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            env_file: None,
            env: Vec::new(),
            log_file: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn workdir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Names a key-value file applied to the environment before overrides.
    #[must_use]
    pub fn env_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// Adds an explicit environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Routes stdout and stderr of the launched process to `path`.
    #[must_use]
    pub fn log_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Program path or name resolved through `PATH`.
    #[must_use]
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// Arguments passed to the program.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Working directory, if any.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Utf8Path> {
        self.workdir.as_deref()
    }

    /// Environment file, if any.
    #[must_use]
    pub fn environment_file(&self) -> Option<&Utf8Path> {
        self.env_file.as_deref()
    }

    /// Explicit environment overrides in declaration order.
    #[must_use]
    pub fn env_overrides(&self) -> &[(String, String)] {
        &self.env
    }

    /// Log file receiving the process output, if any.
    #[must_use]
    pub fn output_log(&self) -> Option<&Utf8Path> {
        self.log_file.as_deref()
    }

    /// Renders the command line as a single string for unit files and logs.
    #[must_use]
    pub fn display_line(&self) -> String {
        let mut line = self.program.to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// How the liveness of a service is observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheck {
    /// Healthy when an HTTP exchange with `url` completes within `timeout`.
    Http {
        /// Endpoint that must answer.
        url: String,
        /// Upper bound for the exchange.
        timeout: Duration,
    },
    /// Healthy when a live process matches the service's matcher.
    ProcessPattern,
}

/// One or more regular expressions matched against process command lines.
///
/// A process belongs to the service when any pattern matches.
#[derive(Debug, Clone)]
pub struct ProcessMatcher {
    patterns: Vec<Regex>,
}

impl ProcessMatcher {
    /// Compiles the given patterns.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceSpecError::NoPatterns`] when `patterns` is empty and
    /// [`ServiceSpecError::InvalidPattern`] when one fails to compile.
    pub fn new<I, S>(patterns: I) -> Result<Self, ServiceSpecError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|pattern| {
                let text = pattern.as_ref();
                Regex::new(text).map_err(|source| ServiceSpecError::InvalidPattern {
                    pattern: text.to_owned(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if compiled.is_empty() {
            return Err(ServiceSpecError::NoPatterns);
        }
        Ok(Self { patterns: compiled })
    }

    /// Reports whether `command_line` matches any pattern.
    #[must_use]
    pub fn matches(&self, command_line: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.is_match(command_line))
    }

    /// Source text of each pattern.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Regex::as_str)
    }
}

/// Signals and grace period used when stopping a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// First signal sent to every matching process.
    pub graceful: Signal,
    /// Signal sent to processes still alive after the grace period.
    pub forced: Signal,
    /// Wait between the two signals.
    pub grace: Duration,
}

impl StopPolicy {
    /// `SIGTERM`, then `SIGKILL` after `grace`.
    #[must_use]
    pub const fn terminate_then_kill(grace: Duration) -> Self {
        Self {
            graceful: Signal::SIGTERM,
            forced: Signal::SIGKILL,
            grace,
        }
    }
}

/// Poll cadence used while waiting for a started service to become healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Delay before each poll.
    pub interval: Duration,
    /// Hard cap on the number of polls.
    pub max_attempts: u32,
}

/// Installation facts used by the provisioning steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Installation {
    /// Paths whose presence means the service is installed.
    pub artefacts: Vec<Utf8PathBuf>,
    /// Shell command that installs the service, run through `sh -c`.
    pub installer: Option<String>,
    /// Directories exported through `LD_LIBRARY_PATH`.
    pub lib_dirs: Vec<Utf8PathBuf>,
}

/// Post-start request that checks the service speaks the expected API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiProbe {
    /// Endpoint receiving the deliberately malformed request.
    pub url: String,
    /// Upper bound for the exchange.
    pub timeout: Duration,
}

/// Immutable description of one managed service.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    name: String,
    command: LaunchCommand,
    health: HealthCheck,
    matcher: ProcessMatcher,
    stop: StopPolicy,
    readiness: ReadinessPolicy,
    unit: String,
    installation: Installation,
    api_probe: Option<ApiProbe>,
    required_tools: Vec<String>,
}

impl ServiceSpec {
    /// Starts building a spec.
    #[must_use]
    pub fn builder(
        name: impl Into<String>,
        command: LaunchCommand,
        health: HealthCheck,
    ) -> ServiceSpecBuilder {
        ServiceSpecBuilder {
            name: name.into(),
            command,
            health,
            patterns: Vec::new(),
            stop: StopPolicy::terminate_then_kill(Duration::from_secs(3)),
            readiness: ReadinessPolicy {
                interval: Duration::from_secs(1),
                max_attempts: 30,
            },
            unit: None,
            installation: Installation::default(),
            api_probe: None,
            required_tools: Vec::new(),
        }
    }

    /// Unique service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start invocation.
    #[must_use]
    pub const fn command(&self) -> &LaunchCommand {
        &self.command
    }

    /// Liveness strategy.
    #[must_use]
    pub const fn health(&self) -> &HealthCheck {
        &self.health
    }

    /// Process-table matcher.
    #[must_use]
    pub const fn matcher(&self) -> &ProcessMatcher {
        &self.matcher
    }

    /// Stop policy.
    #[must_use]
    pub const fn stop_policy(&self) -> &StopPolicy {
        &self.stop
    }

    /// Readiness policy.
    #[must_use]
    pub const fn readiness(&self) -> &ReadinessPolicy {
        &self.readiness
    }

    /// Autostart unit name, for example `voxhost-whisper.service`.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Installation facts.
    #[must_use]
    pub const fn installation(&self) -> &Installation {
        &self.installation
    }

    /// API-shape probe, when the service declares one.
    #[must_use]
    pub const fn api_probe(&self) -> Option<&ApiProbe> {
        self.api_probe.as_ref()
    }

    /// Executables that must be on `PATH` before setup proceeds.
    #[must_use]
    pub fn required_tools(&self) -> &[String] {
        &self.required_tools
    }
}

/// Incremental constructor for [`ServiceSpec`].
#[derive(Debug, Clone)]
pub struct ServiceSpecBuilder {
    name: String,
    command: LaunchCommand,
    health: HealthCheck,
    patterns: Vec<String>,
    stop: StopPolicy,
    readiness: ReadinessPolicy,
    unit: Option<String>,
    installation: Installation,
    api_probe: Option<ApiProbe>,
    required_tools: Vec<String>,
}

impl ServiceSpecBuilder {
    /// Adds a process-matching pattern.
    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Overrides the stop policy.
    #[must_use]
    pub const fn stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop = policy;
        self
    }

    /// Overrides the readiness policy.
    #[must_use]
    pub const fn readiness(mut self, policy: ReadinessPolicy) -> Self {
        self.readiness = policy;
        self
    }

    /// Sets the autostart unit name; defaults to `<name>.service`.
    #[must_use]
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the installation facts.
    #[must_use]
    pub fn installation(mut self, installation: Installation) -> Self {
        self.installation = installation;
        self
    }

    /// Declares an API-shape probe.
    #[must_use]
    pub fn api_probe(mut self, probe: ApiProbe) -> Self {
        self.api_probe = Some(probe);
        self
    }

    /// Declares an executable that must be available on `PATH`.
    #[must_use]
    pub fn required_tool(mut self, tool: impl Into<String>) -> Self {
        self.required_tools.push(tool.into());
        self
    }

    /// Validates and builds the spec.
    ///
    /// # Errors
    ///
    /// Fails when the name is blank, when no pattern was given, or when a
    /// pattern does not compile.
    pub fn build(self) -> Result<ServiceSpec, ServiceSpecError> {
        if self.name.trim().is_empty() {
            return Err(ServiceSpecError::EmptyName);
        }
        let matcher = ProcessMatcher::new(&self.patterns)?;
        let unit = self
            .unit
            .unwrap_or_else(|| format!("{}.service", self.name));
        Ok(ServiceSpec {
            name: self.name,
            command: self.command,
            health: self.health,
            matcher,
            stop: self.stop,
            readiness: self.readiness,
            unit,
            installation: self.installation,
            api_probe: self.api_probe,
            required_tools: self.required_tools,
        })
    }
}

/// Ordered collection of specs with unique names.
#[derive(Debug, Clone)]
pub struct ServiceSet {
    specs: Vec<ServiceSpec>,
}

impl ServiceSet {
    /// Builds a set, rejecting duplicate names.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceSetError::DuplicateName`] naming the first repeat.
    pub fn new(specs: Vec<ServiceSpec>) -> Result<Self, ServiceSetError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name()) {
                return Err(ServiceSetError::DuplicateName {
                    name: spec.name().to_owned(),
                });
            }
        }
        Ok(Self { specs })
    }

    /// Specs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.specs.iter()
    }

    /// Looks up a spec by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.specs.iter().find(|spec| spec.name() == name)
    }

    /// Number of specs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl<'a> IntoIterator for &'a ServiceSet {
    type Item = &'a ServiceSpec;
    type IntoIter = std::slice::Iter<'a, ServiceSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.specs.iter()
    }
}

/// Errors raised while building a [`ServiceSpec`].
#[derive(Debug, Error)]
pub enum ServiceSpecError {
    /// The service name was blank.
    #[error("service name must not be empty")]
    EmptyName,
    /// No process pattern was supplied.
    #[error("service needs at least one process pattern")]
    NoPatterns,
    /// A process pattern did not compile.
    #[error("invalid process pattern '{pattern}': {source}")]
    InvalidPattern {
        /// Offending pattern text.
        pattern: String,
        /// Compiler error.
        #[source]
        source: regex::Error,
    },
}

/// Errors raised while assembling a [`ServiceSet`].
#[derive(Debug, Error)]
pub enum ServiceSetError {
    /// Two specs share a name.
    #[error("duplicate service name '{name}'")]
    DuplicateName {
        /// The repeated name.
        name: String,
    },
}
