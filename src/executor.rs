use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::process;

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, dup2_stderr, dup2_stdin, dup2_stdout, execvp, fork, ForkResult, Pid};

use crate::command::{Command, CommandSet, OutputTarget};
use crate::pipes::PipeTopology;

/// Status a stage reports when it never makes it into its program.
const STAGE_FAILURE: i32 = 1;

/// Run every stage of the pipeline and write exit statuses back in
/// declaration order.
///
/// The whole topology is opened before the first fork. One child is created
/// per stage; the parent releases its pipe ends and then waits for each
/// child in declaration order. Statuses are collected in that order, actual
/// completions are not reordered.
pub fn execute(set: &mut CommandSet) -> nix::Result<()> {
    if set.is_empty() {
        return Ok(());
    }

    let stage_count = set.len();
    let mut topology = PipeTopology::open(stage_count - 1)?;

    let mut children = Vec::with_capacity(stage_count);
    for (index, command) in set.commands.iter().enumerate() {
        children.push(spawn_stage(command, index, stage_count, &mut topology)?);
    }

    // A write end held here would starve the readers of EOF.
    topology.close_all();

    for (command, child) in set.commands.iter_mut().zip(children) {
        command.exit_status = exit_code(waitpid(child, None)?);
    }
    Ok(())
}

/// Fork the child for the stage at `index`. The parent gets the pid back;
/// the child rewires its stdio for its position and execs, never returning.
fn spawn_stage(
    command: &Command,
    index: usize,
    stage_count: usize,
    topology: &mut PipeTopology,
) -> nix::Result<Pid> {
    // Exec images are built before the fork; the child runs syscalls only.
    let program = exec_cstring(command.program())?;
    let argv = command
        .args
        .iter()
        .map(|arg| exec_cstring(arg))
        .collect::<nix::Result<Vec<_>>>()?;

    match unsafe { fork() }? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => run_stage(command, index, stage_count, topology, &program, &argv),
    }
}

fn exec_cstring(text: &str) -> nix::Result<CString> {
    CString::new(text).map_err(|_| Errno::EINVAL)
}

/// Child side of one stage.
///
/// Wiring order: pipe ends first, then drop the entire topology (the dup'd
/// descriptors hold their own references), then any file-bound redirection,
/// then exec. An exec miss is the stage's only runtime failure mode.
fn run_stage(
    command: &Command,
    index: usize,
    stage_count: usize,
    topology: &mut PipeTopology,
    program: &CString,
    argv: &[CString],
) -> ! {
    if index + 1 < stage_count {
        let write_end = topology.write_end(index);
        if dup2_stdout(write_end).is_err() {
            process::exit(STAGE_FAILURE);
        }
        if command.err_to_pipe && dup2_stderr(write_end).is_err() {
            process::exit(STAGE_FAILURE);
        }
    }
    if index > 0 && dup2_stdin(topology.read_end(index - 1)).is_err() {
        process::exit(STAGE_FAILURE);
    }
    topology.close_all();

    if let OutputTarget::File(name) = &command.output {
        match open_output_file(name) {
            Ok(file) => {
                if dup2_stdout(&file).is_err() {
                    process::exit(STAGE_FAILURE);
                }
                if command.err_to_file && dup2_stderr(&file).is_err() {
                    process::exit(STAGE_FAILURE);
                }
            }
            Err(_) => die("Error: cannot open output file\n"),
        }
    }

    let _ = execvp(program, argv);
    die("Error: command not found\n");
}

/// Truncate-write, create-if-absent, world-readable.
fn open_output_file(name: &str) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(name)
}

/// Report through whatever stderr is wired to and bail out of the child.
/// Raw write: after a fork no lock or allocation can be trusted.
fn die(message: &str) -> ! {
    let _ = unistd::write(io::stderr(), message.as_bytes());
    process::exit(STAGE_FAILURE)
}

fn exit_code(status: WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => 128 + signal as i32,
        _ => STAGE_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Limits;
    use crate::parser::parse;
    use std::fs;

    fn parse_line(line: &str) -> CommandSet {
        parse(line, &Limits::default()).unwrap().unwrap()
    }

    fn statuses(set: &CommandSet) -> Vec<i32> {
        set.iter().map(|cmd| cmd.exit_status).collect()
    }

    fn tmp_path(tag: &str) -> String {
        std::env::temp_dir()
            .join(format!("sshell-exec-{}-{}", tag, std::process::id()))
            .display()
            .to_string()
    }

    #[test]
    fn single_command_records_exit_status() {
        let mut set = parse_line("true");
        execute(&mut set).unwrap();
        assert_eq!(statuses(&set), [0]);

        let mut set = parse_line("false");
        execute(&mut set).unwrap();
        assert_eq!(statuses(&set), [1]);
    }

    #[test]
    fn statuses_land_in_declaration_order() {
        let mut set = parse_line("false | true");
        execute(&mut set).unwrap();
        assert_eq!(statuses(&set), [1, 0]);
    }

    #[test]
    fn redirect_truncates_the_output_file() {
        let path = tmp_path("trunc");
        fs::write(&path, "leftover bytes from an earlier run").unwrap();

        let mut set = parse_line(&format!("printf hello > {}", path));
        execute(&mut set).unwrap();

        assert_eq!(statuses(&set), [0]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn pipeline_moves_bytes_through_every_stage() {
        let path = tmp_path("threaded");
        let mut set = parse_line(&format!("printf one.two.three | cat | wc -c > {}", path));
        execute(&mut set).unwrap();

        assert_eq!(statuses(&set), [0, 0, 0]);
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "13");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn stderr_follows_stdout_into_the_pipe() {
        let path = tmp_path("errpipe");
        let mut set = parse_line(&format!("ls /sshell-no-such-dir |& wc -l > {}", path));
        execute(&mut set).unwrap();

        assert_ne!(set.commands[0].exit_status, 0);
        assert_eq!(set.commands[1].exit_status, 0);
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "1");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_program_reports_not_found_on_its_stderr() {
        let path = tmp_path("notfound");
        let mut set = parse_line(&format!("sshell-no-such-program >& {}", path));
        execute(&mut set).unwrap();

        assert_eq!(statuses(&set), [STAGE_FAILURE]);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Error: command not found\n"
        );
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn upstream_stage_survives_missing_downstream_program() {
        let mut set = parse_line("echo hi | sshell-no-such-program");
        execute(&mut set).unwrap();
        assert_eq!(statuses(&set), [0, STAGE_FAILURE]);
    }
}
