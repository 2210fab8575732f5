//! Checker-output parsing (`spec.md` §4.9) and the built-in default checker
//! (`spec.md` §4.9, "no checker declared" case).
//!
//! A checker (custom or default) reports one of three outcomes on a single
//! test: the judgee's answer is correct, wrong, or the checker itself could
//! not make a determination. A custom checker communicates this by writing
//! to its standard error stream; `parse_checker_output` reads that stream.
//! The default checker never shells out to an external process: it performs
//! the same whitespace-tolerant byte comparison directly.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::{ErrorKind, Result};

/// Disposition of a checker run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckerOutcome {
    /// The answer is correct, possibly only partially (see
    /// `CheckerVerdict::score_fraction`).
    Ok,

    /// The answer is incorrect.
    WrongAnswer,

    /// The checker failed to render a verdict (bad output format, crashed,
    /// ...). The test this checker ran against is inconclusive.
    CheckerError,
}

/// The fully parsed result of a checker run.
#[derive(Clone, Debug)]
pub struct CheckerVerdict {
    /// `Ok`, `WrongAnswer`, or `CheckerError`.
    pub outcome: CheckerOutcome,

    /// Free-form diagnostic text, truncated to the configured bound.
    pub comment: String,

    /// Fraction of the test's points to award, in `[0, 1]`. Always `0` for
    /// `WrongAnswer`/`CheckerError`.
    pub score_fraction: f64,
}

impl CheckerVerdict {
    fn checker_error(comment: impl Into<String>) -> CheckerVerdict {
        CheckerVerdict { outcome: CheckerOutcome::CheckerError, comment: comment.into(), score_fraction: 0.0 }
    }
}

/// Parse a checker's raw standard-error output into a `CheckerVerdict`.
///
/// Wire format, one value per line:
///   1. `OK` or `WRONG`.
///   2. (optional, ignored when line 1 is `WRONG`) a real number in
///      `[0, 100]`, the percentage of the test's points to award; an empty
///      line means 100.
///   3. onward: a free-form comment, trimmed of trailing whitespace and
///      truncated to `max_comment_len` bytes.
///
/// Any deviation (missing/garbled line 1, unparsable line 2) yields
/// `CheckerError`.
pub fn parse_checker_output(raw: &[u8], max_comment_len: usize) -> CheckerVerdict {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.splitn(3, '\n');

    let line1 = lines.next().unwrap_or("").trim_end_matches('\r');
    let (outcome, mut rest) = match line1 {
        "OK" => (CheckerOutcome::Ok, lines.next()),
        "WRONG" => (CheckerOutcome::WrongAnswer, lines.next()),
        _ => return CheckerVerdict::checker_error(
            "Checker error: invalid first line (expected \"OK\" or \"WRONG\")"),
    };

    let score_fraction = if outcome == CheckerOutcome::Ok {
        let line2 = rest.take().unwrap_or("").trim_end_matches('\r');
        if line2.is_empty() {
            1.0
        } else {
            match line2.parse::<f64>() {
                Ok(pct) if (0.0..=100.0).contains(&pct) => pct * 0.01,
                _ => return CheckerVerdict::checker_error(
                    "Checker error: invalid second line (expected real number in range \
                     [0, 100] or empty line)"),
            }
        }
    } else {
        0.0
    };

    let mut comment = lines.next().unwrap_or("").to_owned();
    while comment.ends_with(|c: char| c.is_whitespace()) {
        comment.pop();
    }
    comment.truncate(max_comment_len);

    CheckerVerdict { outcome, comment, score_fraction }
}

const HISTORY_LEN: usize = 24;
const FUTURE_LEN: usize = 64;

/// Compare the judgee's answer against the expected output directly,
/// without shelling out to an external checker. Whitespace runs (spaces and
/// newlines) are equivalent wherever both streams have one; any other
/// byte-level mismatch is reported with a line/column location and a window
/// of surrounding context taken from both streams.
pub fn default_checker(answer_path: &Path, expected_path: &Path) -> Result<CheckerVerdict> {
    let answer = read_all(answer_path)?;
    let expected = read_all(expected_path)?;

    let mut a = 0usize; // cursor into `answer`
    let mut e = 0usize; // cursor into `expected`
    let mut line = 1u64;
    let mut column = 1u64;

    loop {
        let a_done = a >= answer.len();
        let e_done = e >= expected.len();

        if a_done || e_done {
            // One stream ended; the other may still hold only whitespace,
            // which is acceptable.
            let (longer, mut cursor) = if a_done { (&expected, e) } else { (&answer, a) };
            while cursor < longer.len() {
                let c = longer[cursor];
                if c == b' ' || c == b'\n' {
                    cursor += 1;
                    continue;
                }
                return Ok(mismatch_report(&answer, &expected, a, e, line, column, true));
            }
            return Ok(CheckerVerdict { outcome: CheckerOutcome::Ok, comment: String::new(), score_fraction: 1.0 });
        }

        let ac = answer[a];
        let ec = expected[e];

        if ac == ec {
            if ec == b'\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
            a += 1;
            e += 1;
            continue;
        }

        if ac == b'\n' || ec == b'\n' {
            // One side hit a line break before the other; skip spaces on
            // whichever side is still mid-line, expecting it to also reach
            // a newline.
            if ec == b'\n' {
                let mut cursor = a;
                while cursor < answer.len() && answer[cursor] == b' ' {
                    cursor += 1;
                }
                if cursor < answer.len() && answer[cursor] == b'\n' {
                    a = cursor + 1;
                    e += 1;
                    line += 1;
                    column = 1;
                    continue;
                }
            } else {
                let mut cursor = e;
                while cursor < expected.len() && expected[cursor] == b' ' {
                    cursor += 1;
                }
                if cursor < expected.len() && expected[cursor] == b'\n' {
                    e = cursor + 1;
                    a += 1;
                    line += 1;
                    column = 1;
                    continue;
                }
            }
        }

        return Ok(mismatch_report(&answer, &expected, a, e, line, column, false));
    }
}

fn read_all(path: &Path) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Context strings to print around a mismatch at `pos` in `buf`: the bytes
/// before it (`history`, up to `HISTORY_LEN`, `...`-truncated) and the bytes
/// from it onward (`future`), stopped at the first `\n` (not included) or
/// `FUTURE_LEN`, whichever comes first, with trailing spaces trimmed and a
/// trailing `...` only when the cutoff was the length cap, not a newline.
/// Also returns the number of bytes of `buf` actually printed in `history`,
/// so the caller can walk the reported column back to where it starts.
fn context_window(buf: &[u8], pos: usize) -> (String, usize, String) {
    let hist_start = pos.saturating_sub(HISTORY_LEN);
    let (history, hist_len) = if hist_start > 0 {
        let keep = HISTORY_LEN - 3;
        let start = pos - keep;
        (format!("...{}", String::from_utf8_lossy(&buf[start..pos])), keep)
    } else {
        (String::from_utf8_lossy(&buf[hist_start..pos]).into_owned(), pos - hist_start)
    };

    let mut end = pos;
    let mut hit_newline = false;
    while end < buf.len() && end - pos < FUTURE_LEN {
        if buf[end] == b'\n' {
            hit_newline = true;
            break;
        }
        end += 1;
    }
    let capped = !hit_newline && end - pos == FUTURE_LEN;

    let mut future_slice = &buf[pos..end];
    while future_slice.last() == Some(&b' ') {
        future_slice = &future_slice[..future_slice.len() - 1];
    }
    let mut future = String::from_utf8_lossy(future_slice).into_owned();
    if capped {
        future.truncate(future.len().saturating_sub(3));
        future.push_str("...");
    }

    (history, hist_len, future)
}

fn mismatch_report(
    answer: &[u8],
    expected: &[u8],
    a_pos: usize,
    e_pos: usize,
    line: u64,
    column: u64,
    one_side_exhausted: bool,
) -> CheckerVerdict {
    let (a_history, a_hist_len, a_future) = context_window(answer, a_pos);
    let (e_history, _, e_future) = context_window(expected, e_pos);

    let read = if one_side_exhausted && a_pos >= answer.len() {
        "end of file".to_owned()
    } else {
        format!("{}{}", a_history, a_future)
    };
    let expected_str = if one_side_exhausted && e_pos >= expected.len() {
        "end of file".to_owned()
    } else {
        format!("{}{}", e_history, e_future)
    };

    // `column` was tracked at the mismatching byte; walk it back to where
    // the printed history actually starts, per `advance_file_loc`/
    // `fill_histories_to_print` in the original checker.
    let column = column.saturating_sub(a_hist_len as u64);

    let comment = format!("Line {} column {}: read '{}', expected '{}'", line, column, read, expected_str);
    CheckerVerdict { outcome: CheckerOutcome::WrongAnswer, comment, score_fraction: 0.0 }
}

/// Run an external checker binary (a custom checker or the interactor's
/// judge-facing channel) and parse its verdict.
pub fn run_external_checker_output(raw_stderr: &[u8]) -> Result<CheckerVerdict> {
    if raw_stderr.is_empty() {
        bail!(ErrorKind::JudgeError("checker produced no output".to_owned()));
    }
    Ok(parse_checker_output(raw_stderr, 1 << 16))
}

#[cfg(test)]
mod tests {
    use super::{default_checker, parse_checker_output, CheckerOutcome};

    #[test]
    fn parse_checker_output_accepts_bare_ok() {
        let verdict = parse_checker_output(b"OK\n", 1024);
        assert_eq!(CheckerOutcome::Ok, verdict.outcome);
        assert_eq!(1.0, verdict.score_fraction);
    }

    #[test]
    fn parse_checker_output_reads_partial_score_and_comment() {
        let verdict = parse_checker_output(b"OK\n50\nclose enough\n", 1024);
        assert_eq!(CheckerOutcome::Ok, verdict.outcome);
        assert_eq!(0.5, verdict.score_fraction);
        assert_eq!("close enough", verdict.comment);
    }

    #[test]
    fn parse_checker_output_rejects_unknown_first_line() {
        let verdict = parse_checker_output(b"MAYBE\n", 1024);
        assert_eq!(CheckerOutcome::CheckerError, verdict.outcome);
    }

    #[test]
    fn parse_checker_output_wrong_forces_zero_score() {
        let verdict = parse_checker_output(b"WRONG\nwhatever\n", 1024);
        assert_eq!(CheckerOutcome::WrongAnswer, verdict.outcome);
        assert_eq!(0.0, verdict.score_fraction);
    }

    #[test]
    fn default_checker_accepts_identical_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "42\n").unwrap();
        std::fs::write(&b, "42\n").unwrap();
        let verdict = default_checker(&a, &b).unwrap();
        assert_eq!(CheckerOutcome::Ok, verdict.outcome);
    }

    #[test]
    fn default_checker_is_tolerant_of_whitespace_differences() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "1 2 3\n").unwrap();
        std::fs::write(&b, "1  2  3\n\n").unwrap();
        let verdict = default_checker(&a, &b).unwrap();
        assert_eq!(CheckerOutcome::Ok, verdict.outcome);
    }

    #[test]
    fn default_checker_rejects_differing_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "41\n").unwrap();
        std::fs::write(&b, "42\n").unwrap();
        let verdict = default_checker(&a, &b).unwrap();
        assert_eq!(CheckerOutcome::WrongAnswer, verdict.outcome);
        assert_eq!("Line 1 column 1: read '41', expected '42'", verdict.comment);
    }

    #[test]
    fn default_checker_mismatch_report_excludes_embedded_newline() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "0\n").unwrap();
        std::fs::write(&b, "1\n").unwrap();
        let verdict = default_checker(&a, &b).unwrap();
        assert_eq!(CheckerOutcome::WrongAnswer, verdict.outcome);
        assert_eq!("Line 1 column 1: read '0', expected '1'", verdict.comment);
    }

    #[test]
    fn default_checker_rejects_extra_trailing_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "42 43\n").unwrap();
        std::fs::write(&b, "42\n").unwrap();
        let verdict = default_checker(&a, &b).unwrap();
        assert_eq!(CheckerOutcome::WrongAnswer, verdict.outcome);
    }
}
