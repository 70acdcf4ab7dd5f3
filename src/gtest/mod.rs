// src/gtest/mod.rs

//! Streamed parsing of GoogleTest binary output.
//!
//! A test binary prints bracketed status lines:
//!
//! ```text
//! [==========] Running 3 tests from 2 test suites.
//! [ RUN      ] Suite.Name
//! ...test output...
//! [       OK ] Suite.Name (0 ms)
//! [==========] 3 tests from 2 test suites ran. (1 ms total)
//! ```
//!
//! [`GtestExecution`] consumes an execution's raw lines incrementally, as
//! they arrive, and builds one [`GtestTest`] record per test case.

mod parser;

pub use parser::{parse_tag, GtestEvent, Tag};

/// Progress of the parse.
///
/// `Running -> Parsing -> Parsed`, with `Finished` applied once the pipeline
/// has consumed the result (the process has exited).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GtestState {
    /// Waiting for the opening `[====]` line with the test count.
    Running,
    /// Inside the test run.
    Parsing,
    /// Saw the closing `[====]` summary line.
    Parsed,
    Finished,
}

/// One test case. The output bounds index into the raw line buffer the
/// parse consumes (the execution's `lines`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtestTest {
    pub name: String,
    pub duration: String,
    pub output_start: usize,
    pub output_end: usize,
}

/// Parse state attached to an execution of a test binary.
#[derive(Debug, Clone)]
pub struct GtestExecution {
    pub state: GtestState,
    /// Declared number of tests; 0 until the opening line was seen.
    pub test_count: usize,
    pub tests: Vec<GtestTest>,
    pub failed_test_indices: Vec<usize>,
    pub total_duration: String,
    /// The test whose `RUN` line was seen but not yet its `OK`/`FAILED`.
    pub current_test: Option<usize>,
    pub is_single_test_rerun: bool,
    /// How many raw execution lines have been looked at.
    lines_consumed: usize,
}

/// Message attached to an execution that never printed the test count.
pub const NOT_A_TEST_EXECUTABLE: &str = "not a test executable";
/// Message attached to an execution that exited before the summary line.
pub const FINISHED_PREMATURELY: &str = "tests finished prematurely";

impl GtestExecution {
    pub fn new(is_single_test_rerun: bool) -> Self {
        Self {
            state: GtestState::Running,
            test_count: 0,
            tests: Vec::new(),
            failed_test_indices: Vec::new(),
            total_duration: String::new(),
            current_test: None,
            is_single_test_rerun,
            lines_consumed: 0,
        }
    }

    /// Captured output of test `index`, sliced out of `lines`, the buffer
    /// given to [`consume`](Self::consume).
    pub fn test_output<'a>(&self, index: usize, lines: &'a [String]) -> &'a [String] {
        self.tests
            .get(index)
            .and_then(|test| lines.get(test.output_start..test.output_end))
            .unwrap_or_default()
    }

    pub fn failed_tests(&self) -> impl Iterator<Item = &GtestTest> {
        self.failed_test_indices
            .iter()
            .filter_map(|&i| self.tests.get(i))
    }

    /// Apply the end-of-process policy and mark the parse `Finished`.
    ///
    /// Returns the failure message when the output was truncated:
    /// - never saw the test count: not a test executable;
    /// - saw tests but no summary: finished prematurely, and the test left
    ///   open (if any) is counted as failed. A crash between two tests
    ///   blames nobody.
    pub fn finish(&mut self) -> Option<&'static str> {
        let message = match self.state {
            GtestState::Running => Some(NOT_A_TEST_EXECUTABLE),
            GtestState::Parsing => {
                if let Some(open) = self.current_test.take() {
                    if let Some(test) = self.tests.get_mut(open) {
                        test.output_end = self.lines_consumed;
                    }
                    self.failed_test_indices.push(open);
                }
                Some(FINISHED_PREMATURELY)
            }
            GtestState::Parsed | GtestState::Finished => None,
        };
        self.state = GtestState::Finished;
        message
    }
}
