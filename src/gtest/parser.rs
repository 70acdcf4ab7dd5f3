// src/gtest/parser.rs

//! Line classification and the incremental parse loop.

use tracing::{debug, trace};

use super::{GtestExecution, GtestState, GtestTest};

/// Status tag of a bracketed GoogleTest line, e.g. `[ RUN      ]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Run,
    Ok,
    Failed,
    Skipped,
    /// `[==========]`: opens and closes a test run.
    Separator,
    /// Any other bracketed tag (`[----------]`, `[  PASSED  ]`, ...).
    Other,
}

/// Something the caller may want to show while the binary is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GtestEvent {
    TestStarted {
        index: usize,
        name: String,
        /// Declared number of tests, 0 if not known yet.
        total: usize,
    },
    /// Output line of the open test, only reported for single-test re-runs.
    TestOutput(String),
    TestFinished {
        index: usize,
        failed: bool,
    },
}

/// Split `[<fill><TAG><fill>] <content>` into its tag and content.
pub fn parse_tag(line: &str) -> Option<(Tag, &str)> {
    let rest = line.strip_prefix('[')?;
    let close = rest.find(']')?;
    let inner = &rest[..close];
    let content = rest[close + 1..].trim();

    let tag = match inner.trim_matches(|c| c == ' ' || c == '-' || c == '=') {
        "RUN" => Tag::Run,
        "OK" => Tag::Ok,
        "FAILED" => Tag::Failed,
        "SKIPPED" => Tag::Skipped,
        "" if inner.contains('=') => Tag::Separator,
        _ => Tag::Other,
    };
    Some((tag, content))
}

/// Text of the last `(...)` group in `content`, e.g. `0 ms` in
/// `Suite.Name (0 ms)`.
fn trailing_parenthetical(content: &str) -> Option<&str> {
    let open = content.rfind('(')?;
    let close = content.rfind(')')?;
    (close > open).then(|| &content[open + 1..close])
}

/// Whether `content` of an `OK`/`FAILED` line refers to test `name`.
///
/// Parameterized tests append `, where GetParam() = ...` after the name.
fn refers_to(content: &str, name: &str) -> bool {
    match content.strip_prefix(name) {
        Some(rest) => rest.is_empty() || rest.starts_with(' ') || rest.starts_with(','),
        None => false,
    }
}

fn declared_test_count(content: &str) -> usize {
    content
        .split_whitespace()
        .find_map(|word| word.parse::<usize>().ok())
        .unwrap_or(0)
}

impl GtestExecution {
    /// Consume the lines appended to `lines` since the previous call.
    ///
    /// `lines` is the execution's complete raw line buffer; only the part
    /// not seen before is looked at.
    pub fn consume(&mut self, lines: &[String]) -> Vec<GtestEvent> {
        let mut events = Vec::new();

        while self.lines_consumed < lines.len() {
            if matches!(self.state, GtestState::Parsed | GtestState::Finished) {
                self.lines_consumed = lines.len();
                break;
            }

            let line = lines[self.lines_consumed].as_str();
            self.lines_consumed += 1;

            if let Some(open) = self.current_test {
                self.consume_in_test(open, line, &mut events);
            } else {
                self.consume_between_tests(line, &mut events);
            }
        }

        events
    }

    fn consume_in_test(&mut self, open: usize, line: &str, events: &mut Vec<GtestEvent>) {
        let closing = match parse_tag(line) {
            Some((tag @ (Tag::Ok | Tag::Failed | Tag::Skipped), content))
                if refers_to(content, &self.tests[open].name) =>
            {
                Some((tag, content))
            }
            _ => None,
        };

        match closing {
            Some((tag, content)) => {
                let failed = tag == Tag::Failed;
                let test = &mut self.tests[open];
                test.duration = trailing_parenthetical(content)
                    .unwrap_or_default()
                    .to_string();
                if failed {
                    self.failed_test_indices.push(open);
                }
                self.current_test = None;
                trace!(test = %self.tests[open].name, failed, "test closed");
                events.push(GtestEvent::TestFinished {
                    index: open,
                    failed,
                });
            }
            None => {
                // Includes `RUN` lines of test binaries launched by the test
                // under test.
                self.tests[open].output_end = self.lines_consumed;
                if self.is_single_test_rerun {
                    events.push(GtestEvent::TestOutput(line.to_string()));
                }
            }
        }
    }

    fn consume_between_tests(&mut self, line: &str, events: &mut Vec<GtestEvent>) {
        let Some((tag, content)) = parse_tag(line) else {
            return;
        };

        match tag {
            Tag::Run => {
                let index = self.tests.len();
                // Output starts on the line after `RUN`.
                let start = self.lines_consumed;
                self.tests.push(GtestTest {
                    name: content.to_string(),
                    duration: String::new(),
                    output_start: start,
                    output_end: start,
                });
                self.current_test = Some(index);
                events.push(GtestEvent::TestStarted {
                    index,
                    name: content.to_string(),
                    total: self.test_count,
                });
            }
            Tag::Separator => match self.state {
                GtestState::Running => {
                    self.test_count = declared_test_count(content);
                    self.state = GtestState::Parsing;
                    debug!(test_count = self.test_count, "test run started");
                }
                GtestState::Parsing => {
                    self.total_duration = trailing_parenthetical(content)
                        .map(|d| d.trim_end_matches("total").trim().to_string())
                        .unwrap_or_default();
                    self.state = GtestState::Parsed;
                    debug!(
                        tests = self.tests.len(),
                        failed = self.failed_test_indices.len(),
                        "test run summary reached"
                    );
                }
                GtestState::Parsed | GtestState::Finished => {}
            },
            _ => {}
        }
    }
}
