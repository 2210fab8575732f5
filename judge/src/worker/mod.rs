//! `JudgeWorker`: orchestrates one full evaluation of a submission against
//! a `Simfile`, implementing the group/scoring algorithm of `spec.md`
//! §4.10 and the skip-and-resume behavior of §4.11/§5.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::CompilationCache;
use crate::languages::{LanguageBranch, LanguageIdentifier, LanguageManager, ProgramKind};
use crate::runner::{test_on_test, test_on_test_interactive, CheckerPlan, ProgramLimits, TestOutcome};
use crate::{Error, ErrorKind, GroupReport, JudgeReport, Program, Result, Simfile, Test, TestGroup, TestReport, Verdict};

/// Which half of a `Simfile`'s groups to judge: the initial/sample group
/// (id `"0"`) or every scored group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JudgeHalf {
    /// Only group `"0"`.
    Initial,

    /// Every group except `"0"`.
    Final,
}

/// Controls how aggressively a test's score decays as its runtime
/// approaches the time limit (§4.10 step 2). `1.0` means full credit is
/// kept until the limit is hit; lower values start decaying earlier.
#[derive(Clone, Copy, Debug)]
pub struct JudgeOptions {
    /// `λ` in the time-ratio formula.
    pub score_cut_lambda: f64,

    /// Maximum length of a checker comment retained in reports.
    pub max_comment_len: usize,
}

impl Default for JudgeOptions {
    fn default() -> Self {
        JudgeOptions { score_cut_lambda: 1.0, max_comment_len: 512 }
    }
}

/// `(x/t - 1)/(λ - 1)` clamped to `[0, 1]` when `λ < 1`; a hard step at `x
/// == t` when `λ == 1` (full credit until the limit, matching the open
/// question's "λ defaults to 1.0" resolution).
fn time_ratio(runtime: Duration, time_limit: Duration, lambda: f64) -> f64 {
    let x = runtime.as_secs_f64();
    let t = time_limit.as_secs_f64();
    if t <= 0.0 {
        return if x <= 0.0 { 1.0 } else { 0.0 };
    }

    if lambda >= 1.0 {
        return if x < t { 1.0 } else { 0.0 };
    }

    let ratio = (x / t - 1.0) / (lambda - 1.0);
    ratio.max(0.0).min(1.0)
}

/// Called once, strictly between the first full pass over a group and the
/// skip-catch-up pass, when skip-and-resume triggers.
pub type PartialReportCallback<'a> = dyn FnMut(&JudgeReport) + 'a;

/// Orchestrates compiling and judging one submission against one `Simfile`.
pub struct JudgeWorker {
    languages: Arc<LanguageManager>,
    cache: Arc<CompilationCache>,
    options: JudgeOptions,
}

impl JudgeWorker {
    /// Create a new worker over the given language registry and
    /// compilation cache.
    pub fn new(languages: Arc<LanguageManager>, cache: Arc<CompilationCache>, options: JudgeOptions) -> JudgeWorker {
        JudgeWorker { languages, cache, options }
    }

    /// Compile `program` (if its language needs it), returning the
    /// executable `Program` to hand to the runner. Results are cached under
    /// `cache_key` so repeated judging of the same artifact (e.g. the model
    /// solution across many submissions) skips recompilation.
    fn compile(&self, program: &Program, kind: ProgramKind, cache_key: &str, output_dir: &Path) -> Result<crate::languages::ExecutionInfo> {
        let provider = self.languages.find(&program.language)
            .ok_or_else(|| Error::from(ErrorKind::LanguageNotFound(program.language.clone())))?;

        let compiled_path = match program.format {
            crate::ProgramFormat::Executable => program.file.clone(),
            crate::ProgramFormat::Source => {
                self.cache.get_or_insert(cache_key, Duration::from_secs(3600), || {
                    let compiled = provider.compile(program, program.language.branch(), output_dir)
                        .map_err(|e| Error::from(ErrorKind::CompilationError(e.to_string())))?;
                    match compiled {
                        Some(info) => Ok(info.output_file),
                        None => Ok(program.file.clone()),
                    }
                })?
            }
        };

        let compiled_program = Program { file: compiled_path, language: program.language.clone(), format: crate::ProgramFormat::Executable };
        provider.execute(&compiled_program, kind)
            .map_err(|e| Error::from(ErrorKind::JudgeError(e.to_string())))
    }

    /// Judge `judgee` against `simfile`, restricted to `half`, writing
    /// per-test program output to scratch files under `work_dir`.
    /// `on_partial` is invoked at most once, if skip-and-resume triggers
    /// anywhere in the evaluation.
    pub fn judge(
        &self,
        simfile: &Simfile,
        judgee: &Program,
        work_dir: &Path,
        half: JudgeHalf,
        mut on_partial: Option<&mut PartialReportCallback<'_>>,
    ) -> Result<JudgeReport> {
        let judgee_cache_key = format!("judgee:{}", judgee.file.display());
        let judgee_exec = self.compile(judgee, ProgramKind::Judgee, &judgee_cache_key, work_dir)?;

        let checker_exec: Option<crate::languages::ExecutionInfo> = match &simfile.checker {
            Some(checker_source) => {
                let language = language_from_extension(checker_source);
                let checker_program = Program::source(checker_source.clone(), language);
                let kind = if simfile.interactive { ProgramKind::Interactor } else { ProgramKind::Checker };
                Some(self.compile(&checker_program, kind, "checker", work_dir)?)
            }
            None => None,
        };
        let checker_plan: CheckerPlan = match &checker_exec {
            Some(exec) => CheckerPlan::Custom(exec),
            None => CheckerPlan::Default,
        };

        let mut groups_out = Vec::new();
        let mut partial_sent = false;
        // Groups where skip-and-resume fired, recorded as (index into
        // `groups_out`, the group itself, first skipped test index), so the
        // skipped tests can be rejudged informationally once every group has
        // had its first pass.
        let mut pending_skips: Vec<(usize, &TestGroup, usize)> = Vec::new();

        for group in &simfile.tgroups {
            let wanted = match half {
                JudgeHalf::Initial => group.is_initial(),
                JudgeHalf::Final => !group.is_initial(),
            };
            if !wanted {
                continue;
            }

            let (group_report, skip_from) = self.judge_group(
                group, &judgee_exec, &checker_plan, simfile.interactive, work_dir,
                &mut partial_sent, &mut on_partial, &groups_out)?;
            if let Some(from) = skip_from {
                pending_skips.push((groups_out.len(), group, from));
            }
            groups_out.push(group_report);
        }

        // Second round: rejudge every test left as SKIPPED by skip-and-resume,
        // replacing the placeholder with its real outcome. This is purely
        // informational — the group's score was already fixed from the first
        // pass and is not revisited here.
        for (group_idx, group, from) in pending_skips {
            for (i, test) in group.tests[from..].iter().enumerate() {
                let outcome = self.run_one_test(test, &judgee_exec, &checker_plan, simfile.interactive, work_dir)?;
                groups_out[group_idx].tests[from + i] = outcome.report;
            }
        }

        let judge_log = render_judge_log(&groups_out);
        Ok(JudgeReport { groups: groups_out, judge_log })
    }

    /// Judge every test in `group` until skip-and-resume triggers or the
    /// group is exhausted. Returns the group's report plus, if
    /// skip-and-resume fired, the index of the first test it skipped (so the
    /// caller can rejudge those tests informationally in a second pass).
    fn judge_group(
        &self,
        group: &TestGroup,
        judgee_exec: &crate::languages::ExecutionInfo,
        checker_plan: &CheckerPlan,
        interactive: bool,
        work_dir: &Path,
        partial_sent: &mut bool,
        on_partial: &mut Option<&mut PartialReportCallback<'_>>,
        groups_so_far: &[GroupReport],
    ) -> Result<(GroupReport, Option<usize>)> {
        let mut ratio = 1.0f64;
        let mut reports = Vec::with_capacity(group.tests.len());
        let mut skip_from = None;

        for (idx, test) in group.tests.iter().enumerate() {
            // Skip-and-resume only applies when the caller can actually
            // observe the partial report it produces; without a callback
            // there is no point abandoning the rest of the group early.
            if on_partial.is_some() && ratio < 1e-6 {
                skip_from = Some(idx);
                break;
            }

            let outcome = self.run_one_test(test, judgee_exec, checker_plan, interactive, work_dir)?;
            let tr = time_ratio(outcome.report.runtime, test.time_limit, self.options.score_cut_lambda);
            ratio = ratio.min(outcome.checker_score).min(tr);
            reports.push(outcome.report);
        }

        if let Some(from) = skip_from {
            for test in &group.tests[from..] {
                reports.push(TestReport::skipped(test));
            }

            if !*partial_sent {
                if let Some(callback) = on_partial.as_deref_mut() {
                    let mut partial_groups = groups_so_far.to_vec();
                    partial_groups.push(GroupReport {
                        score: 0,
                        max_score: group.score,
                        tests: reports.clone(),
                    });
                    let partial = JudgeReport { groups: partial_groups, judge_log: String::new() };
                    callback(&partial);
                    *partial_sent = true;
                }
            }
        }

        let score = (group.score as f64 * ratio).round() as i64;
        Ok((GroupReport { score, max_score: group.score, tests: reports }, skip_from))
    }

    fn run_one_test(
        &self,
        test: &Test,
        judgee_exec: &crate::languages::ExecutionInfo,
        checker_plan: &CheckerPlan,
        interactive: bool,
        work_dir: &Path,
    ) -> Result<TestOutcome> {
        let program_limits = ProgramLimits::for_test(test);
        let checker_limits = ProgramLimits {
            time_limit: test.time_limit * 2,
            cpu_time_limit: test.time_limit * 2,
            memory_limit: test.memory_limit,
            max_stack: Some(test.memory_limit),
            output_size_limit_bytes: 16 * 1024 * 1024,
        };

        if interactive {
            let checker_exec = match checker_plan {
                CheckerPlan::Custom(exec) => exec,
                CheckerPlan::Default => bail!(ErrorKind::PackageInvalid(
                    "interactive problem has no checker/interactor".to_owned())),
            };
            test_on_test_interactive(judgee_exec, checker_exec, test, &program_limits, &checker_limits, self.options.max_comment_len)
        } else {
            test_on_test(judgee_exec, checker_plan, test, work_dir, &program_limits, &checker_limits, self.options.max_comment_len)
        }
    }
}

/// Checkers are compiled independently of the judgee's own submission
/// language; this infers a reasonable language environment from the
/// checker source file's extension, defaulting to C++ (the language the
/// default checker itself, and most custom checkers in practice, are
/// written in).
fn language_from_extension(path: &Path) -> LanguageIdentifier {
    match path.extension().and_then(|e| e.to_str()) {
        Some("py") => LanguageIdentifier::new("python", LanguageBranch::new("cpython", "3")),
        Some("pas") => LanguageIdentifier::new("pascal", LanguageBranch::new("fpc", "3")),
        Some("rs") => LanguageIdentifier::new("rust", LanguageBranch::new("stable", "2018")),
        Some("c") => LanguageIdentifier::new("c", LanguageBranch::new("gnu", "11")),
        _ => LanguageIdentifier::new("cpp", LanguageBranch::new("gnu", "17")),
    }
}

fn render_judge_log(groups: &[GroupReport]) -> String {
    let mut log = String::new();
    let mut total_score = 0i64;
    let mut total_max = 0i64;

    for group in groups {
        for test in &group.tests {
            log.push_str(&format!(
                "{}  [ TL: {} s ML: {} KiB ]  Status: {}",
                test.name,
                test.time_limit.as_secs_f64(),
                test.memory_limit.bytes() / 1024,
                test.status.short_name(),
            ));
            if let Some(comment) = &test.comment {
                log.push_str(&format!(" ({})", comment));
            }
            log.push('\n');
        }

        total_score += group.score;
        if group.max_score > 0 {
            total_max += group.max_score;
        }
    }

    let ratio = if total_max > 0 { total_score as f64 / total_max as f64 } else { 0.0 };
    log.push_str(&format!("Score: {} / {} (ratio: {:.4})\n", total_score, total_max, ratio));
    log
}

/// Collapse a dumped-core signal description into a plain "killed" one, so
/// judge logs stay deterministic regardless of whether core dumps are
/// enabled on the machine running the judge (§6, "Normalization").
pub fn normalize_signal_description(verdict: Verdict, status: i32) -> String {
    match verdict {
        Verdict::RuntimeError => format!("killed by signal {}", status),
        other => other.short_name().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::time_ratio;

    #[test]
    fn lambda_one_is_a_hard_step_at_the_limit() {
        assert_eq!(1.0, time_ratio(Duration::from_millis(900), Duration::from_secs(1), 1.0));
        assert_eq!(0.0, time_ratio(Duration::from_millis(1000), Duration::from_secs(1), 1.0));
    }

    #[test]
    fn lambda_below_one_decays_linearly_before_the_limit() {
        let ratio = time_ratio(Duration::from_millis(900), Duration::from_secs(1), 0.5);
        assert!(ratio > 0.0 && ratio < 1.0);
    }

    #[test]
    fn zero_time_limit_only_accepts_instant_runs() {
        assert_eq!(1.0, time_ratio(Duration::from_millis(0), Duration::from_millis(0), 1.0));
        assert_eq!(0.0, time_ratio(Duration::from_millis(1), Duration::from_millis(0), 1.0));
    }
}
