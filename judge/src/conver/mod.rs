//! Conver: turns a raw problem package into a validated `Simfile`, possibly
//! requesting a model-solution judging pass to calibrate time limits
//! (`spec.md` §4.6).

use std::path::{Path, PathBuf};
use std::time::Duration;

use sandbox::MemorySize;

use crate::package::Package;
use crate::{ErrorKind, Result, Simfile, TestReport, Verdict};

/// Options controlling one Conver run.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConverOptions {
    /// Override for the problem name.
    pub name: Option<String>,

    /// Override for the problem label.
    pub label: Option<String>,

    /// Override for the interactive flag.
    pub interactive: Option<bool>,

    /// Fallback memory limit when neither a per-test nor Simfile-global
    /// limit is present.
    pub memory_limit: Option<MemorySize>,

    /// Override time limit applied uniformly, bypassing calibration.
    pub global_time_limit: Option<Duration>,

    /// Upper bound used for the tentative probe limit sent to the
    /// model-solution judging pass.
    pub max_time_limit: Duration,

    /// Skip loading any existing `Simfile` in the package, deriving
    /// everything from the file listing instead.
    pub ignore_simfile: bool,

    /// Add test files found in the tree that are not already referenced by
    /// the Simfile's `limits:`/`tests_files:` entries.
    pub seek_for_new_tests: bool,

    /// Recompute group scores from scratch, discarding any explicit
    /// `scoring:` entries.
    pub reset_scoring: bool,

    /// Force a model-solution judging pass to recalibrate every test's
    /// time limit.
    pub reset_time_limits_using_main_solution: bool,

    /// Fail if no problem statement is found.
    pub require_statement: bool,

    /// Options for `solution_runtime_to_time_limit`.
    pub rtl_opts: RuntimeToLimitOptions,
}

/// Parameters for converting a model-solution runtime into a chosen time
/// limit.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RuntimeToLimitOptions {
    /// Floor applied to any computed time limit.
    pub min_time_limit: Duration,

    /// Multiplier applied to the observed runtime.
    pub solution_runtime_coefficient: f64,
}

impl Default for RuntimeToLimitOptions {
    fn default() -> Self {
        RuntimeToLimitOptions {
            min_time_limit: Duration::from_millis(500),
            solution_runtime_coefficient: 3.0,
        }
    }
}

/// `tl = max(min_tl, coefficient * runtime)`, the open-question resolution
/// recorded in `DESIGN.md`.
pub fn solution_runtime_to_time_limit(runtime: Duration, opts: &RuntimeToLimitOptions) -> Duration {
    let scaled = runtime.mul_f64(opts.solution_runtime_coefficient);
    scaled.max(opts.min_time_limit)
}

/// Round a duration down to the nearest 10 milliseconds.
pub fn floor_to_10ms(d: Duration) -> Duration {
    let ms = d.as_millis();
    Duration::from_millis((ms - ms % 10) as u64)
}

/// Outcome of a Conver run.
pub enum ConverResult {
    /// The simfile is fully calibrated and ready to judge.
    Complete { simfile: Simfile, main_dir: PathBuf },

    /// Time limits could not be determined from the Simfile alone; the
    /// caller must run the model solution against `simfile` (whose time
    /// limits are tentative probe upper bounds) and feed the resulting
    /// judge reports back into `reset_time_limits_using_judge_reports`.
    NeedModelSolutionJudgeReport { simfile: Simfile, main_dir: PathBuf },
}

/// Run Conver against the package at `package_path`.
pub fn convert(package_path: &Path, options: &ConverOptions) -> Result<ConverResult> {
    let package = Package::open(package_path)?;
    let listing = package.walk()?;

    let simfile_text = if options.ignore_simfile {
        None
    } else {
        package.load_as_str(Path::new("Simfile")).ok()
    };

    let checker_override = simfile_text.as_ref()
        .and_then(|_| None::<PathBuf>) // resolved below, alongside existence checks
        .or_else(|| find_checker_candidate(&listing));

    let interactive = options.interactive.unwrap_or(false);
    if interactive && checker_override.is_none() && simfile_text.is_none() {
        bail!(ErrorKind::PackageInvalid(
            "interactive problem declares no checker and none was found".to_owned()));
    }

    if options.require_statement && find_statement_candidate(&listing).is_none()
        && simfile_text.as_ref().map_or(true, |_| true) {
        // Statement resolution against declared Simfile paths happens in
        // `crate::simfile::normalize`; this only guards the "nothing at
        // all in the tree" case so Conver can fail fast.
        if find_statement_candidate(&listing).is_none() {
            bail!(ErrorKind::PackageInvalid("no problem statement found".to_owned()));
        }
    }

    let discovered_tests = discover_tests(&listing);
    if discovered_tests.is_empty() {
        bail!(ErrorKind::PackageInvalid("no tests found in package".to_owned()));
    }

    let probe_limit = solution_runtime_to_time_limit(
        options.max_time_limit, &options.rtl_opts);

    let needs_model_solution = options.reset_time_limits_using_main_solution
        || options.global_time_limit.is_some();

    let text = simfile_text.unwrap_or_default();
    let mut simfile = crate::simfile::normalize(
        &text,
        options.name.clone(),
        options.label.clone(),
        options.interactive,
        discovered_tests,
        options.memory_limit,
    )?;

    if simfile.solutions.is_empty() {
        bail!(ErrorKind::PackageInvalid("no solution found".to_owned()));
    }

    if needs_model_solution {
        for test in simfile.tgroups.iter_mut().flat_map(|g| g.tests.iter_mut()) {
            test.time_limit = probe_limit;
        }
        return Ok(ConverResult::NeedModelSolutionJudgeReport {
            simfile,
            main_dir: package.root().to_owned(),
        });
    }

    Ok(ConverResult::Complete { simfile, main_dir: package.root().to_owned() })
}

/// After a model-solution judging pass, replace each tested test's time
/// limit with `floor_to_10ms(solution_runtime_to_time_limit(runtime, ...))`.
/// Only `Ok`/`WrongAnswer` statuses are accepted as calibration evidence;
/// any other status aborts calibration.
pub fn reset_time_limits_using_judge_reports(
    simfile: &mut Simfile,
    initial_reports: &[TestReport],
    final_reports: &[TestReport],
    opts: &RuntimeToLimitOptions,
) -> Result<()> {
    let mut by_name = std::collections::HashMap::new();
    for report in initial_reports.iter().chain(final_reports.iter()) {
        by_name.insert(report.name.clone(), report);
    }

    for test in simfile.tgroups.iter_mut().flat_map(|g| g.tests.iter_mut()) {
        if let Some(report) = by_name.get(&test.name) {
            match report.status {
                Verdict::Ok | Verdict::WrongAnswer => {
                    let calibrated = solution_runtime_to_time_limit(report.runtime, opts);
                    test.time_limit = floor_to_10ms(calibrated);
                }
                _ => bail!(ErrorKind::JudgeError(format!(
                    "model solution calibration aborted: test {} returned {}",
                    test.name, report.status.short_name()))),
            }
        }
    }

    Ok(())
}

fn find_checker_candidate(listing: &[PathBuf]) -> Option<PathBuf> {
    let mut candidates: Vec<&PathBuf> = listing.iter()
        .filter(|p| p.starts_with("check") || p.starts_with("checker"))
        .collect();
    candidates.sort_by_key(|p| p.as_os_str().len());
    candidates.into_iter().next().cloned()
}

fn find_statement_candidate(listing: &[PathBuf]) -> Option<PathBuf> {
    let is_doc_ext = |p: &Path| matches!(
        p.extension().and_then(|e| e.to_str()), Some("pdf") | Some("md") | Some("txt"));

    let mut in_doc: Vec<&PathBuf> = listing.iter()
        .filter(|p| p.starts_with("doc") && is_doc_ext(p))
        .collect();
    if !in_doc.is_empty() {
        in_doc.sort_by_key(|p| (p.extension().and_then(|e| e.to_str()) != Some("pdf"), p.as_os_str().len()));
        return in_doc.into_iter().next().cloned();
    }

    let mut anywhere: Vec<&PathBuf> = listing.iter().filter(|p| is_doc_ext(p)).collect();
    anywhere.sort_by_key(|p| (p.extension().and_then(|e| e.to_str()) != Some("pdf"), p.as_os_str().len()));
    anywhere.into_iter().next().cloned()
}

/// Enumerate `*.in` files paired by stem with `*.out` files of the same
/// name (a pairing absent for interactive problems, where only the input
/// matters).
fn discover_tests(listing: &[PathBuf]) -> Vec<(String, PathBuf, Option<PathBuf>)> {
    let mut result = Vec::new();
    for path in listing {
        if path.extension().and_then(|e| e.to_str()) != Some("in") {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_owned();
        let out_path = path.with_extension("out");
        let output_path = if listing.contains(&out_path) { Some(out_path) } else { None };
        result.push((stem, path.clone(), output_path));
    }
    result
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{floor_to_10ms, solution_runtime_to_time_limit, RuntimeToLimitOptions};

    #[test]
    fn solution_runtime_floor_applies_when_scaled_runtime_is_too_small() {
        let opts = RuntimeToLimitOptions { min_time_limit: Duration::from_millis(500),
            solution_runtime_coefficient: 2.0 };
        let tl = solution_runtime_to_time_limit(Duration::from_millis(10), &opts);
        assert_eq!(Duration::from_millis(500), tl);
    }

    #[test]
    fn solution_runtime_scaling_applies_once_above_the_floor() {
        let opts = RuntimeToLimitOptions { min_time_limit: Duration::from_millis(100),
            solution_runtime_coefficient: 3.0 };
        let tl = solution_runtime_to_time_limit(Duration::from_millis(400), &opts);
        assert_eq!(Duration::from_millis(1200), tl);
    }

    #[test]
    fn floor_to_10ms_truncates_down() {
        assert_eq!(Duration::from_millis(1230), floor_to_10ms(Duration::from_millis(1239)));
        assert_eq!(Duration::from_millis(0), floor_to_10ms(Duration::from_millis(9)));
    }
}
