use std::io::{self, IsTerminal, Write};

use crate::builtins::{self, Builtin};
use crate::command::{CommandSet, Limits};
use crate::executor;
use crate::parser;
use crate::prompt::Prompt;

pub struct Shell {
    prompt: Prompt,
    limits: Limits,
    running: bool,
}

impl Shell {
    pub fn new() -> Self {
        Self {
            prompt: Prompt::new(),
            limits: Limits::default(),
            running: true,
        }
    }

    pub fn run(&mut self) {
        // The interpreter itself shrugs off Ctrl+C; only the foreground
        // children should die from it.
        #[cfg(unix)]
        unsafe {
            use libc::{signal, SIGINT, SIG_IGN};
            signal(SIGINT, SIG_IGN);
        }

        let interactive = io::stdin().is_terminal();

        while self.running {
            self.prompt.display();
            let _ = io::stdout().flush();

            let mut line = String::new();
            match io::stdin().read_line(&mut line) {
                Ok(0) => {
                    // EOF ends the session the same way `exit` does.
                    eprintln!("Bye...");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Error: cannot read input: {}", e);
                    break;
                }
            }
            let line = line.trim_end_matches(&['\n', '\r'][..]);

            // Keep piped sessions readable as a transcript.
            if !interactive {
                println!("{}", line);
                let _ = io::stdout().flush();
            }

            if line.len() > self.limits.max_line {
                eprintln!("Error: command line too long");
                continue;
            }

            self.eval(line);
        }
    }

    fn eval(&mut self, line: &str) {
        let mut set = match parser::parse(line, &self.limits) {
            Ok(Some(set)) => set,
            Ok(None) => return,
            Err(e) => {
                eprintln!("Error: {}", e);
                return;
            }
        };

        // Builtins are recognized on the first stage only and never run
        // through the pipe topology.
        match Builtin::lookup(set.commands[0].program()) {
            Some(Builtin::Exit) => {
                eprintln!("Bye...");
                eprintln!("+ completed '{}' [0]", line);
                self.running = false;
            }
            Some(Builtin::Cd) => {
                set.commands[0].exit_status = builtins::cd(&set.commands[0].args);
                report(line, &set);
            }
            Some(Builtin::Pwd) => {
                set.commands[0].exit_status = builtins::pwd();
                report(line, &set);
            }
            Some(Builtin::Sls) => {
                set.commands[0].exit_status = builtins::sls();
                report(line, &set);
            }
            None => match executor::execute(&mut set) {
                Ok(()) => report(line, &set),
                Err(e) => eprintln!("Error: cannot execute pipeline: {}", e),
            },
        }
    }
}

/// Completion line on stderr: the raw input plus every stage's exit status
/// in declaration order, so redirected stdout stays clean.
fn report(line: &str, set: &CommandSet) {
    let statuses: String = set
        .iter()
        .map(|cmd| format!("[{}]", cmd.exit_status))
        .collect();
    eprintln!("+ completed '{}' {}", line, statuses);
}
