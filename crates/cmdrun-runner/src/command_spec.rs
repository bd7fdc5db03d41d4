use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::Command;
use tokio::process::Command as TokioCommand;

use crate::error::ExecError;

// ============================================================================
// CommandSpec - argv-style Process Execution Specification
// ============================================================================

/// Specification for a command to execute.
///
/// All process execution goes through this type to ensure argv-style invocation.
/// Arguments are passed to the child as discrete elements, never through a shell.
///
/// # Example
///
/// ```rust
/// use cmdrun_runner::CommandSpec;
/// use std::ffi::OsString;
///
/// let cmd = CommandSpec::new("dd")
///     .arg("if=/dev/zero")
///     .arg("bs=4096")
///     .arg("count=256")
///     .cwd("/tmp");
///
/// assert_eq!(cmd.program, OsString::from("dd"));
/// assert_eq!(cmd.args.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to execute
    pub program: OsString,
    /// Arguments as discrete elements (NOT shell strings)
    pub args: Vec<OsString>,
    /// Optional working directory
    pub cwd: Option<PathBuf>,
    /// Optional environment overrides
    pub env: Option<HashMap<OsString, OsString>>,
}

impl CommandSpec {
    /// Create a new `CommandSpec` with the given program.
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: None,
        }
    }

    /// Build a `CommandSpec` from a complete argument vector.
    ///
    /// The first element is the program, the rest are its arguments. Any
    /// sequence works: arrays, vectors, slices or lazy iterators.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::EmptyCommand`] when the sequence is empty.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cmdrun_runner::CommandSpec;
    ///
    /// let from_array = CommandSpec::from_argv(["echo", "hello world"]).unwrap();
    /// let from_iter = CommandSpec::from_argv("echo|hello world".split('|')).unwrap();
    /// assert_eq!(from_array, from_iter);
    /// assert!(CommandSpec::from_argv(Vec::<String>::new()).is_err());
    /// ```
    pub fn from_argv<I, S>(argv: I) -> Result<Self, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next().ok_or(ExecError::EmptyCommand)?;
        Ok(Self::new(program).args(argv))
    }

    /// Add a single argument to the command.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments to the command.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory for the command.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set an environment variable for the command.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables for the command.
    #[must_use]
    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let env_map = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in envs {
            env_map.insert(key.into(), value.into());
        }
        self
    }

    /// The full argument vector: program followed by its arguments.
    pub fn argv(&self) -> impl Iterator<Item = &OsStr> {
        std::iter::once(self.program.as_os_str()).chain(self.args.iter().map(OsString::as_os_str))
    }

    /// Render the argument vector as a single printable line for logs and
    /// error messages. Arguments that are empty or contain whitespace or
    /// quotes are single-quoted.
    #[must_use]
    pub fn display(&self) -> String {
        self.argv()
            .map(|part| {
                let part = part.to_string_lossy();
                if part.is_empty() || part.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
                    format!("'{}'", part.replace('\'', r"'\''"))
                } else {
                    part.into_owned()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Convert this `CommandSpec` into a `std::process::Command`.
    ///
    /// The resulting `Command` uses argv-style argument passing.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        if let Some(ref env) = self.env {
            cmd.envs(env);
        }

        cmd
    }

    /// Convert this `CommandSpec` into a `tokio::process::Command`.
    #[must_use]
    pub fn to_tokio_command(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        if let Some(ref env) = self.env {
            cmd.envs(env);
        }

        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_new() {
        let cmd = CommandSpec::new("dd");
        assert_eq!(cmd.program, OsString::from("dd"));
        assert!(cmd.args.is_empty());
        assert!(cmd.cwd.is_none());
        assert!(cmd.env.is_none());
    }

    #[test]
    fn test_command_spec_from_argv_sequence_types() {
        let expected = CommandSpec::new("echo").arg("hello world");

        let from_array = CommandSpec::from_argv(["echo", "hello world"]).unwrap();
        let from_vec = CommandSpec::from_argv(vec!["echo".to_string(), "hello world".to_string()]).unwrap();
        let from_slice = CommandSpec::from_argv(["echo", "hello world"].iter().copied()).unwrap();
        let from_lazy = CommandSpec::from_argv(
            ["ECHO", "HELLO WORLD"].into_iter().map(str::to_lowercase),
        )
        .unwrap();

        assert_eq!(from_array, expected);
        assert_eq!(from_vec, expected);
        assert_eq!(from_slice, expected);
        assert_eq!(from_lazy, expected);
    }

    #[test]
    fn test_command_spec_from_argv_empty() {
        let result = CommandSpec::from_argv(std::iter::empty::<&str>());
        assert!(matches!(result, Err(ExecError::EmptyCommand)));
    }

    #[test]
    fn test_command_spec_argv_includes_program() {
        let cmd = CommandSpec::new("ionice").args(["-c", "2"]);
        let argv: Vec<&OsStr> = cmd.argv().collect();
        assert_eq!(argv, vec![OsStr::new("ionice"), OsStr::new("-c"), OsStr::new("2")]);
    }

    #[test]
    fn test_command_spec_display_quotes() {
        let cmd = CommandSpec::new("echo")
            .arg("hello world")
            .arg("")
            .arg("it's")
            .arg("plain");
        assert_eq!(cmd.display(), r"echo 'hello world' '' 'it'\''s' plain");
    }

    #[test]
    fn test_command_spec_env() {
        let cmd = CommandSpec::new("env")
            .env("LC_ALL", "C")
            .envs([("DEBUG", "1"), ("VERBOSE", "true")]);
        let env = cmd.env.as_ref().unwrap();
        assert_eq!(env.len(), 3);
        assert_eq!(env.get(&OsString::from("LC_ALL")), Some(&OsString::from("C")));
    }

    #[test]
    fn test_command_spec_builder_chain() {
        let cmd = CommandSpec::new("dd")
            .arg("if=/dev/zero")
            .args(["bs=4096", "count=256"])
            .cwd("/tmp")
            .env("LC_ALL", "C");

        assert_eq!(cmd.program, OsString::from("dd"));
        assert_eq!(cmd.args.len(), 3);
        assert_eq!(cmd.cwd, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_command_spec_shell_metacharacters_preserved() {
        let cmd = CommandSpec::new("echo")
            .arg("$(whoami)")
            .arg("`id`")
            .arg("${HOME}")
            .arg("a|b;c&d");

        assert_eq!(cmd.args[0], OsString::from("$(whoami)"));
        assert_eq!(cmd.args[1], OsString::from("`id`"));
        assert_eq!(cmd.args[2], OsString::from("${HOME}"));
        assert_eq!(cmd.args[3], OsString::from("a|b;c&d"));
    }

    #[test]
    fn test_command_spec_to_command_keeps_argv() {
        let cmd = CommandSpec::new("echo").arg("hello").arg("world").cwd("/tmp");
        let std_cmd = cmd.to_command();
        assert_eq!(std_cmd.get_program(), "echo");
        let args: Vec<&OsStr> = std_cmd.get_args().collect();
        assert_eq!(args, vec![OsStr::new("hello"), OsStr::new("world")]);
        assert_eq!(std_cmd.get_current_dir(), Some(std::path::Path::new("/tmp")));
    }

    #[test]
    fn test_command_spec_to_tokio_command_keeps_argv() {
        let cmd = CommandSpec::new("echo").arg("hello");
        let tokio_cmd = cmd.to_tokio_command();
        let std_cmd = tokio_cmd.as_std();
        assert_eq!(std_cmd.get_program(), "echo");
        assert_eq!(std_cmd.get_args().count(), 1);
    }
}
