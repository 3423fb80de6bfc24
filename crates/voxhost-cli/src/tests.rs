use super::*;

use std::cell::RefCell;

use rstest::rstest;
use voxhost_core::workflow::RunStatus;

struct StaticConfigLoader {
    config: Config,
    seen: RefCell<Vec<OsString>>,
}

impl StaticConfigLoader {
    fn new(config: Config) -> Self {
        Self {
            config,
            seen: RefCell::new(Vec::new()),
        }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        self.seen.replace(args.to_vec());
        Ok(self.config.clone())
    }
}

#[derive(Default)]
struct Outcome {
    stdout: String,
    stderr: String,
    exit: Option<ExitCode>,
    commands: Vec<CliCommand>,
    loader_args: Vec<OsString>,
}

fn run_cli(args: &[&str], result: fn() -> Result<ExitCode, AppError>) -> Outcome {
    let loader = StaticConfigLoader::new(Config::default());
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut commands = Vec::new();
    let exit = {
        let mut io = IoStreams::new(&mut stdout, &mut stderr);
        CliRunner::new(&mut io, &loader).run_with_handler(
            args.iter().map(OsString::from),
            |command, _config, _io| {
                commands.push(command);
                result()
            },
        )
    };
    Outcome {
        stdout: String::from_utf8(stdout).expect("utf8 stdout"),
        stderr: String::from_utf8(stderr).expect("utf8 stderr"),
        exit: Some(exit),
        commands,
        loader_args: loader.seen.take(),
    }
}

fn succeed() -> Result<ExitCode, AppError> {
    Ok(ExitCode::SUCCESS)
}

#[rstest]
#[case(&["voxhost", "setup"], CliCommand::Setup)]
#[case(&["voxhost", "teardown"], CliCommand::Teardown { disable: false })]
#[case(&["voxhost", "teardown", "-d"], CliCommand::Teardown { disable: true })]
#[case(&["voxhost", "teardown", "--disable"], CliCommand::Teardown { disable: true })]
#[case(&["voxhost", "status"], CliCommand::Status)]
fn parses_commands(#[case] args: &[&str], #[case] expected: CliCommand) {
    let outcome = run_cli(args, succeed);
    assert_eq!(outcome.commands, [expected]);
    assert_eq!(outcome.exit, Some(ExitCode::SUCCESS));
}

#[test]
fn config_flags_reach_the_loader_only() {
    let outcome = run_cli(
        &["voxhost", "--stt-port", "3022", "--log-filter=debug", "status"],
        succeed,
    );
    assert_eq!(outcome.commands, [CliCommand::Status]);
    let expected: Vec<OsString> = ["voxhost", "--stt-port", "3022", "--log-filter=debug"]
        .into_iter()
        .map(OsString::from)
        .collect();
    assert_eq!(outcome.loader_args, expected);
}

#[test]
fn help_is_printed_to_stdout() {
    let outcome = run_cli(&["voxhost", "--help"], succeed);
    assert_eq!(outcome.exit, Some(ExitCode::SUCCESS));
    assert!(outcome.stdout.contains("Usage"), "{}", outcome.stdout);
    assert!(outcome.commands.is_empty());
}

#[rstest]
#[case(&["voxhost", "restart"])]
#[case(&["voxhost"])]
#[case(&["voxhost", "setup", "--disable"])]
fn usage_errors_fail_without_running(#[case] args: &[&str]) {
    let outcome = run_cli(args, succeed);
    assert_eq!(outcome.exit, Some(ExitCode::FAILURE));
    assert!(!outcome.stderr.is_empty());
    assert!(outcome.commands.is_empty());
}

#[test]
fn handler_errors_are_reported_on_stderr() {
    let outcome = run_cli(&["voxhost", "setup"], || {
        Err(AppError::Signals(std::io::Error::other("no handlers")))
    });
    assert_eq!(outcome.exit, Some(ExitCode::FAILURE));
    assert!(
        outcome
            .stderr
            .starts_with("voxhost: failed to register signal handlers"),
        "{}",
        outcome.stderr
    );
}

#[rstest]
#[case(RunStatus::Succeeded, ExitCode::SUCCESS)]
#[case(RunStatus::CompletedWithWarnings, ExitCode::SUCCESS)]
#[case(RunStatus::Failed, ExitCode::FAILURE)]
fn run_status_maps_to_exit_code(#[case] status: RunStatus, #[case] expected: ExitCode) {
    assert_eq!(commands::exit_code(status), expected);
}
