// src/engine/command.rs

//! Parsing of prompt input into [`UserCommand`]s.

use std::str::FromStr;

use crate::types::RunMode;

/// One line typed at the prompt. Indices are 1-based, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    ListTasks,
    RunTask { index: usize, mode: RunMode },
    ListHistory,
    SelectHistory(usize),
    TogglePin,
    ShowOutput,
    ListTests,
    ShowTest(usize),
    RerunTest { index: usize, under_debugger: bool },
    SearchTest { index: usize, pattern: String },
    Help,
    Quit,
}

pub const HELP: &[&str] = &[
    "t            list tasks",
    "t N          run task N",
    "tr N         run task N until it fails",
    "td N         run task N under the debugger",
    "h            list history",
    "h N          select history entry N (0 selects the most recent)",
    "p            pin/unpin the selected execution",
    "o            show output of the selected execution",
    "g            list failed tests of the selected execution",
    "g N          show output of test N",
    "gt N         re-run test N",
    "gd N         re-run test N under the debugger",
    "gs N REGEX   search output of test N",
    "q            quit",
];

fn index_arg(command: &str, arg: Option<&str>) -> Result<usize, String> {
    let arg = arg.ok_or_else(|| format!("'{command}' expects a number"))?;
    arg.parse::<usize>()
        .map_err(|_| format!("'{command}' expects a number, got '{arg}'"))
}

fn positive_index_arg(command: &str, arg: Option<&str>) -> Result<usize, String> {
    match index_arg(command, arg)? {
        0 => Err(format!("'{command}' numbers start at 1")),
        n => Ok(n),
    }
}

impl FromStr for UserCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let mut args = rest.split_whitespace();
        let arg = args.next();

        let command = match (word, arg) {
            ("t", None) => UserCommand::ListTasks,
            ("t" | "tr" | "td", _) => UserCommand::RunTask {
                index: positive_index_arg(word, arg)?,
                mode: word.parse()?,
            },
            ("h", None) => UserCommand::ListHistory,
            ("h", Some(_)) => UserCommand::SelectHistory(index_arg(word, arg)?),
            ("p", None) => UserCommand::TogglePin,
            ("o", None) => UserCommand::ShowOutput,
            ("g", None) => UserCommand::ListTests,
            ("g", Some(_)) => UserCommand::ShowTest(positive_index_arg(word, arg)?),
            ("gt" | "gd", _) => UserCommand::RerunTest {
                index: positive_index_arg(word, arg)?,
                under_debugger: word == "gd",
            },
            ("gs", _) => {
                let index = positive_index_arg(word, arg)?;
                // The pattern is everything after the index, spaces included.
                let pattern = rest
                    .split_once(char::is_whitespace)
                    .map(|(_, p)| p.trim())
                    .unwrap_or_default();
                if pattern.is_empty() {
                    return Err("'gs' expects a test number and a pattern".to_string());
                }
                UserCommand::SearchTest {
                    index,
                    pattern: pattern.to_string(),
                }
            }
            ("help" | "?", None) => UserCommand::Help,
            ("q" | "quit", None) => UserCommand::Quit,
            ("p" | "o" | "help" | "?" | "q" | "quit", Some(_)) => {
                return Err(format!("'{word}' takes no arguments"));
            }
            ("", _) => return Err("empty command".to_string()),
            (word, _) => return Err(format!("unknown command '{word}' (type 'help')")),
        };

        if args.next().is_some() && !matches!(command, UserCommand::SearchTest { .. }) {
            return Err(format!("too many arguments for '{word}'"));
        }
        Ok(command)
    }
}
