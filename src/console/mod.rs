//! Console input and output
//!
//! The interactive loop never talks to the terminal directly. It writes
//! role-tagged text through [`Console`] and the implementation decides how
//! each role is presented.

use crate::types::message::Role;
use colored::{ColoredString, Colorize};
use std::io::{self, BufRead, Write};

/// Role-aware line console
pub trait Console: Send {
    /// Write `text` as produced by `role` and flush immediately
    fn write(&mut self, role: Role, text: &str) -> io::Result<()>;

    /// Read one line without its terminator, `None` at end of input
    fn read_line(&mut self) -> io::Result<Option<String>>;

    fn write_line(&mut self, role: Role, text: &str) -> io::Result<()> {
        self.write(role, text)?;
        self.write(role, "\n")
    }

    /// Show `prompt` and read the answer
    fn prompt(&mut self, prompt: &str) -> io::Result<Option<String>> {
        self.write(Role::User, prompt)?;
        self.read_line()
    }
}

fn paint(role: Role, text: &str) -> ColoredString {
    match role {
        Role::System => text.yellow(),
        Role::User => text.white(),
        Role::Generated => text.green(),
    }
}

/// Console over any reader/writer pair, ANSI colors optional
pub struct TerminalConsole<R, W> {
    input: R,
    output: W,
    color: bool,
}

impl TerminalConsole<io::BufReader<io::Stdin>, io::Stdout> {
    /// Console on the process's standard streams
    pub fn stdio(color: bool) -> Self {
        Self::new(io::BufReader::new(io::stdin()), io::stdout(), color)
    }
}

impl<R: BufRead, W: Write> TerminalConsole<R, W> {
    pub fn new(input: R, output: W, color: bool) -> Self {
        Self {
            input,
            output,
            color,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R, W> Console for TerminalConsole<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn write(&mut self, role: Role, text: &str) -> io::Result<()> {
        tracing::trace!("{} output: {} bytes", role.label(), text.len());
        if self.color {
            write!(self.output, "{}", paint(role, text))?;
        } else {
            self.output.write_all(text.as_bytes())?;
        }
        self.output.flush()
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed_len = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed_len);
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_plain_output() {
        let mut console = TerminalConsole::new(Cursor::new(""), Vec::new(), false);
        console.write(Role::Generated, "Hello").unwrap();
        console.write_line(Role::System, ", world").unwrap();
        assert_eq!(String::from_utf8(console.into_output()).unwrap(), "Hello, world\n");
    }

    #[test]
    fn test_colored_output() {
        colored::control::set_override(true);
        let mut console = TerminalConsole::new(Cursor::new(""), Vec::new(), true);
        console.write(Role::Generated, "code").unwrap();
        console.write(Role::System, "status").unwrap();
        assert_eq!(
            String::from_utf8(console.into_output()).unwrap(),
            format!("{}{}", "code".green(), "status".yellow())
        );
    }

    #[test]
    fn test_roles_map_to_colors() {
        colored::control::set_override(true);
        assert_eq!(paint(Role::Generated, "x").fgcolor(), Some(colored::Color::Green));
        assert_eq!(paint(Role::System, "x").fgcolor(), Some(colored::Color::Yellow));
        assert_eq!(paint(Role::User, "x").fgcolor(), Some(colored::Color::White));
    }

    #[test]
    fn test_read_lines_and_eof() {
        let mut console = TerminalConsole::new(Cursor::new("first\r\n\nlast"), Vec::new(), false);
        assert_eq!(console.read_line().unwrap().as_deref(), Some("first"));
        assert_eq!(console.read_line().unwrap().as_deref(), Some(""));
        assert_eq!(console.read_line().unwrap().as_deref(), Some("last"));
        assert_eq!(console.read_line().unwrap(), None);
    }

    #[test]
    fn test_prompt_writes_before_reading() {
        let mut console = TerminalConsole::new(Cursor::new("answer\n"), Vec::new(), false);
        assert_eq!(console.prompt("Question: ").unwrap().as_deref(), Some("answer"));
        assert_eq!(String::from_utf8(console.into_output()).unwrap(), "Question: ");
    }
}
