use std::fmt;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;

use crate::command::{Command, CommandSet, Limits, OutputTarget};

/// Everything that can go wrong while scanning a line. Each variant renders
/// as the fixed message the loop prints; no partial `CommandSet` survives any
/// of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    MissingCommand,
    MissingOutputFile,
    BadOutputFile,
    TooManyArgs,
    TooManyPipes,
    MislocatedRedirect,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ParseError::MissingCommand => "missing command",
            ParseError::MissingOutputFile => "no output file",
            ParseError::BadOutputFile => "cannot open output file",
            ParseError::TooManyArgs => "too many process arguments",
            ParseError::TooManyPipes => "too many pipes",
            ParseError::MislocatedRedirect => "mislocated output redirection",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ParseError {}

/// Whether the token being collected is a command argument or the filename
/// after a `>`. Decides where flushed tokens land and which missing-token
/// error fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    Command,
    Filename,
}

/// Scan a line into a pipeline. `Ok(None)` means the line was blank; a
/// returned set always holds at least one stage.
///
/// Flushing the filename token pre-flights the redirect target, so a line
/// like `cmd > out | next` creates `out` before failing. That check is the
/// only I/O the parser performs.
pub fn parse(line: &str, limits: &Limits) -> Result<Option<CommandSet>, ParseError> {
    let mut parser = LineParser::new(limits);
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '|' => {
                let merge = chars.peek() == Some(&'&');
                if merge {
                    chars.next();
                }
                parser.on_pipe(merge)?;
            }
            '>' => {
                let merge = chars.peek() == Some(&'&');
                if merge {
                    chars.next();
                }
                parser.on_redirect(merge)?;
            }
            ' ' => parser.on_space(),
            _ => parser.on_char(ch)?,
        }
    }

    parser.finish()
}

/// Single-owner scan state threaded through one `parse` call.
///
/// Token flushes are deferred until the next non-space character (or a
/// meta-character, or end of line) so runs of trailing whitespace never turn
/// into empty tokens.
struct LineParser<'a> {
    limits: &'a Limits,
    /// Completed stages, in command-line order.
    done: Vec<Command>,
    /// The stage currently being populated.
    stage: Command,
    token: String,
    mode: ReadMode,
    /// Unconsumed whitespace since the last token character.
    pending_space: bool,
    /// True until the first token character of a stage; keeps leading
    /// whitespace from flushing a token that does not exist.
    stage_start: bool,
    pipes: usize,
}

impl<'a> LineParser<'a> {
    fn new(limits: &'a Limits) -> Self {
        Self {
            limits,
            done: Vec::new(),
            stage: Command::new(),
            token: String::new(),
            mode: ReadMode::Command,
            pending_space: false,
            stage_start: true,
            pipes: 0,
        }
    }

    /// Move the collected token into its slot: the stage's next argument in
    /// command mode, the (verified) output filename in filename mode. An
    /// empty token is the mode-specific missing-token error.
    fn flush_token(&mut self) -> Result<(), ParseError> {
        if self.token.is_empty() {
            return Err(self.missing_token());
        }
        let token = std::mem::take(&mut self.token);
        match self.mode {
            ReadMode::Command => {
                self.stage.args.push(token);
                if self.stage.args.len() > self.limits.max_args {
                    return Err(ParseError::TooManyArgs);
                }
            }
            ReadMode::Filename => {
                verify_output_file(&token)?;
                self.stage.output = OutputTarget::File(token);
            }
        }
        Ok(())
    }

    fn missing_token(&self) -> ParseError {
        match self.mode {
            ReadMode::Command => ParseError::MissingCommand,
            ReadMode::Filename => ParseError::MissingOutputFile,
        }
    }

    /// `|` (or `|&`): close the current stage and open the next one. A stage
    /// that already redirects to a file cannot also feed a pipe.
    fn on_pipe(&mut self, merge_stderr: bool) -> Result<(), ParseError> {
        self.flush_token()?;
        if self.stage.output.is_file() {
            return Err(ParseError::MislocatedRedirect);
        }
        self.pipes += 1;
        if self.pipes > self.limits.max_pipes() {
            return Err(ParseError::TooManyPipes);
        }
        if merge_stderr {
            self.stage.err_to_pipe = true;
        }
        self.done.push(std::mem::take(&mut self.stage));
        self.mode = ReadMode::Command;
        self.pending_space = false;
        self.stage_start = true;
        Ok(())
    }

    /// `>` (or `>&`): the stage's output becomes file-bound and the scan
    /// starts collecting the filename. A repeated `>` re-targets; the last
    /// name wins.
    fn on_redirect(&mut self, merge_stderr: bool) -> Result<(), ParseError> {
        self.flush_token()?;
        if merge_stderr {
            self.stage.err_to_file = true;
        }
        self.mode = ReadMode::Filename;
        self.pending_space = false;
        Ok(())
    }

    fn on_space(&mut self) {
        // In filename mode whitespace only counts once the name has begun,
        // so `>   out` still reads a single filename.
        if self.mode == ReadMode::Command || !self.token.is_empty() {
            self.pending_space = true;
        }
    }

    fn on_char(&mut self, ch: char) -> Result<(), ParseError> {
        if self.pending_space && !self.stage_start {
            self.flush_token()?;
            // The filename slot is singular; words after it belong to the
            // stage's argument list again.
            self.mode = ReadMode::Command;
        }
        self.stage_start = false;
        self.pending_space = false;
        self.token.push(ch);
        Ok(())
    }

    /// End of line: an empty token buffer is either a blank line or a
    /// dangling meta-character; otherwise the last token flushes exactly as
    /// at a `|` boundary and the final stage joins the set.
    fn finish(mut self) -> Result<Option<CommandSet>, ParseError> {
        if self.token.is_empty() {
            if self.done.is_empty() && self.stage.args.is_empty() {
                return Ok(None);
            }
            return Err(self.missing_token());
        }
        self.flush_token()?;
        self.done.push(self.stage);
        Ok(Some(CommandSet {
            commands: self.done,
        }))
    }
}

/// Pre-flight a redirect target: open write/create (no truncate yet, the
/// stage itself truncates when it runs) and close again.
fn verify_output_file(path: &str) -> Result<(), ParseError> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .mode(0o644)
        .open(path)
        .map(drop)
        .map_err(|_| ParseError::BadOutputFile)
}
