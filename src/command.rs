/// Where a stage's standard output goes.
///
/// `File` targets are opened for truncate-write when the stage runs; the
/// parser only pre-flights that the path is writable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputTarget {
    #[default]
    Inherit,
    File(String),
}

impl OutputTarget {
    pub fn is_file(&self) -> bool {
        matches!(self, OutputTarget::File(_))
    }
}

/// One pipeline stage: the argv it will exec, its output routing, and the
/// exit status written back after the wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// args[0] is the program name, remaining entries in command-line order.
    pub args: Vec<String>,
    pub output: OutputTarget,
    /// `>&`: stderr follows stdout into the output file.
    pub err_to_file: bool,
    /// `|&`: stderr follows stdout into the pipe feeding the next stage.
    pub err_to_pipe: bool,
    /// Meaningful only after execution; 0 until then.
    pub exit_status: i32,
}

impl Command {
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            output: OutputTarget::Inherit,
            err_to_file: false,
            err_to_pipe: false,
            exit_status: 0,
        }
    }

    pub fn program(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }
}

impl Default for Command {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered pipeline of stages; insertion order is connection and
/// execution order. Non-empty after any successful parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSet {
    pub commands: Vec<Command>,
}

impl CommandSet {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn first(&self) -> Option<&Command> {
        self.commands.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }
}

/// Hard caps on a command line, checked during parsing instead of assumed
/// from fixed buffers. `max_args` counts the program name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_stages: usize,
    pub max_args: usize,
    pub max_line: usize,
}

impl Limits {
    /// Pipes needed by a full-depth pipeline.
    pub fn max_pipes(&self) -> usize {
        self.max_stages.saturating_sub(1)
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_stages: 4,
            max_args: 16,
            max_line: 512,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_command_inherits_output() {
        let cmd = Command::new();
        assert_eq!(cmd.output, OutputTarget::Inherit);
        assert!(!cmd.err_to_file);
        assert!(!cmd.err_to_pipe);
        assert_eq!(cmd.exit_status, 0);
        assert_eq!(cmd.program(), "");
    }

    #[test]
    fn default_limits_derive_pipe_count() {
        let limits = Limits::default();
        assert_eq!(limits.max_stages, 4);
        assert_eq!(limits.max_pipes(), 3);
    }
}
