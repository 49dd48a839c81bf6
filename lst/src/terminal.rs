//! Operator interaction on the controlling terminal.

use std::io::{self, BufRead, Write};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use crossterm::tty::IsTty;

use stash::{MorePrompt, Result};

const MORE_PROMPT: &str = "Fetch more logs or quit (m/q)? ";

/// Asks on stdout, answers from stdin. `m` fetches another page.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl MorePrompt for TerminalPrompt {
    fn fetch_more(&mut self) -> Result<bool> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", MORE_PROMPT)?;
        stdout.flush()?;

        if !io::stdin().is_tty() {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            return Ok(line.trim_start().starts_with('m'));
        }

        terminal::enable_raw_mode()?;
        let answer = read_answer();
        let _ = terminal::disable_raw_mode();
        writeln!(stdout)?;
        answer
    }
}

fn read_answer() -> Result<bool> {
    loop {
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            return Ok(matches!(key.code, KeyCode::Char('m')));
        }
    }
}

/// Read a password without echoing it.
pub fn read_password(prompt: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;

    if !io::stdin().is_tty() {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        return Ok(line.trim_end_matches(['\r', '\n']).to_string());
    }

    terminal::enable_raw_mode()?;
    let password = read_hidden();
    let _ = terminal::disable_raw_mode();
    writeln!(stdout)?;
    password
}

fn read_hidden() -> Result<String> {
    let mut password = String::new();
    loop {
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Enter => return Ok(password),
                KeyCode::Backspace => {
                    password.pop();
                }
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "password entry cancelled").into());
                }
                KeyCode::Char(c) => password.push(c),
                _ => {}
            }
        }
    }
}
