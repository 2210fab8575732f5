//! `Simfile` parsing and normalization (`spec.md` §4.5). The on-disk format
//! is a tolerant `key: value` block, arrays written as `key: [ a, b, c ]`;
//! unknown keys are ignored rather than rejected.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use sandbox::MemorySize;

use crate::{Error, ErrorKind, Result, Simfile, Test, TestGroup};

/// A parsed, but not yet normalized, raw key/value view of a `Simfile`
/// document. Kept separate from `Simfile` itself because several keys
/// (`limits`, `tests_files`, `scoring`) need multi-pass resolution against
/// the package's file listing before they become `Test`/`TestGroup` values.
#[derive(Default)]
struct RawSimfile {
    scalars: BTreeMap<String, String>,
    arrays: BTreeMap<String, Vec<String>>,
}

/// Parse the textual `Simfile` format into its raw key/value form. Lines
/// starting with `#` and blank lines are ignored. An array value spans
/// until its closing `]`; entries are separated by commas or newlines.
fn parse_raw(text: &str) -> Result<RawSimfile> {
    let mut raw = RawSimfile::default();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let colon = match line.find(':') {
            Some(idx) => idx,
            None => continue,
        };
        let key = line[..colon].trim().to_owned();
        let rest = line[colon + 1..].trim();

        if rest.starts_with('[') {
            let mut items = Vec::new();
            let mut body = rest[1..].to_owned();
            loop {
                if let Some(end) = body.find(']') {
                    push_array_items(&body[..end], &mut items);
                    break;
                }
                push_array_items(&body, &mut items);
                body = match lines.next() {
                    Some(l) => l.to_owned(),
                    None => break,
                };
            }
            raw.arrays.insert(key, items);
        } else {
            raw.scalars.insert(key, rest.to_owned());
        }
    }

    Ok(raw)
}

fn push_array_items(fragment: &str, out: &mut Vec<String>) {
    for item in fragment.split(',') {
        let item = item.trim();
        if !item.is_empty() {
            out.push(item.to_owned());
        }
    }
}

/// Strip any leading `/` and `..` path components, per the safe-path
/// rewriting rule.
fn safe_path(raw: &str) -> PathBuf {
    let mut result = PathBuf::new();
    for component in PathBuf::from(raw).components() {
        use std::path::Component;
        if let Component::Normal(part) = component {
            result.push(part);
        }
    }
    result
}

/// Extract a test's group id from its name: the leading run of digits (or
/// the literal alias `ocen`, mapped to group `0`), per the stable splitter
/// named in `spec.md` §3. Tests with no leading digits fall into the empty
/// group.
pub fn group_id_of(test_name: &str) -> String {
    if test_name == "ocen" || test_name.starts_with("ocen") {
        return "0".to_owned();
    }

    let digits: String = test_name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits
}

/// A single parsed `limits:` array entry: `testname tl [ml]`.
struct LimitEntry {
    test_name: String,
    time_limit: Duration,
    memory_limit: Option<MemorySize>,
}

fn parse_limit_entry(entry: &str) -> Result<LimitEntry> {
    let parts: Vec<&str> = entry.split_whitespace().collect();
    if parts.len() < 2 {
        bail!(ErrorKind::PackageInvalid(format!("malformed limits entry: {}", entry)));
    }

    let tl_secs: f64 = parts[1].parse()
        .map_err(|_| Error::from(ErrorKind::PackageInvalid(format!("bad time limit: {}", entry))))?;
    let memory_limit = if parts.len() >= 3 {
        let mib: u64 = parts[2].parse()
            .map_err(|_| Error::from(ErrorKind::PackageInvalid(format!("bad memory limit: {}", entry))))?;
        Some(MemorySize::MegaBytes(mib as usize))
    } else {
        None
    };

    Ok(LimitEntry {
        test_name: parts[0].to_owned(),
        time_limit: Duration::from_secs_f64(tl_secs),
        memory_limit,
    })
}

/// Normalize a raw `Simfile` document plus the package's discovered test
/// files into a `Simfile`. `discovered_tests` pairs a test name with its
/// input path and (for non-interactive problems) output path, as found by
/// scanning the package tree for `*.in`/`*.out` files (`spec.md` §4.6 step
/// 7); `default_memory_limit` is the options-level fallback used when
/// neither a per-test nor a Simfile-global memory limit is present.
pub fn normalize(
    text: &str,
    name_override: Option<String>,
    label_override: Option<String>,
    interactive_override: Option<bool>,
    discovered_tests: Vec<(String, PathBuf, Option<PathBuf>)>,
    default_memory_limit: Option<MemorySize>,
) -> Result<Simfile> {
    let raw = parse_raw(text)?;

    let name = name_override
        .or_else(|| raw.scalars.get("name").cloned())
        .ok_or_else(|| Error::from(ErrorKind::PackageInvalid("no problem name".to_owned())))?;
    let label = label_override
        .or_else(|| raw.scalars.get("label").cloned())
        .unwrap_or_else(|| name.clone());

    let interactive = interactive_override
        .or_else(|| raw.scalars.get("interactive").map(|v| v == "true" || v == "yes"))
        .unwrap_or(false);

    let global_memory_limit = raw.scalars.get("memory_limit")
        .and_then(|v| v.parse::<usize>().ok())
        .map(MemorySize::MegaBytes)
        .or(default_memory_limit);

    let checker = raw.scalars.get("checker").map(|p| safe_path(p));
    let statement = raw.scalars.get("statement").map(|p| safe_path(p));

    let solutions = raw.arrays.get("solutions")
        .map(|list| list.iter().map(|p| safe_path(p)).collect())
        .unwrap_or_else(Vec::new);

    let mut limits: BTreeMap<String, LimitEntry> = BTreeMap::new();
    if let Some(entries) = raw.arrays.get("limits") {
        for entry in entries {
            let parsed = parse_limit_entry(entry)?;
            limits.insert(parsed.test_name.clone(), parsed);
        }
    }

    let mut groups: BTreeMap<String, Vec<Test>> = BTreeMap::new();
    for (test_name, input_path, output_path) in discovered_tests {
        if !interactive && output_path.is_none() {
            bail!(ErrorKind::PackageInvalid(format!("test {} has no output file", test_name)));
        }

        let limit = limits.get(&test_name);
        let time_limit = limit.map(|l| l.time_limit)
            .ok_or_else(|| Error::from(ErrorKind::PackageInvalid(
                format!("test {} has no time limit", test_name))))?;
        let memory_limit = limit.and_then(|l| l.memory_limit)
            .or(global_memory_limit)
            .ok_or_else(|| Error::from(ErrorKind::PackageInvalid(
                format!("test {} has no memory limit", test_name))))?;

        let group_id = group_id_of(&test_name);
        groups.entry(group_id).or_insert_with(Vec::new).push(Test {
            name: test_name,
            input_path,
            output_path,
            time_limit,
            memory_limit,
        });
    }

    let explicit_scores: BTreeMap<String, i64> = raw.arrays.get("scoring")
        .map(|entries| {
            entries.iter().filter_map(|entry| {
                let parts: Vec<&str> = entry.split_whitespace().collect();
                if parts.len() == 2 {
                    parts[1].parse::<i64>().ok().map(|score| (parts[0].to_owned(), score))
                } else {
                    None
                }
            }).collect()
        })
        .unwrap_or_else(BTreeMap::new);

    let explicit_sum: i64 = explicit_scores.values().filter(|s| **s > 0).sum();
    let remaining = (100 - explicit_sum).max(0);
    let auto_scored_group_count = groups.keys()
        .filter(|id| id.as_str() != "0" && !explicit_scores.contains_key(*id))
        .count();
    let per_group_auto_score = if auto_scored_group_count > 0 {
        remaining / auto_scored_group_count as i64
    } else {
        0
    };

    let mut tgroups: Vec<TestGroup> = groups.into_iter().map(|(id, tests)| {
        let score = if id == "0" {
            0
        } else {
            *explicit_scores.get(&id).unwrap_or(&per_group_auto_score)
        };
        TestGroup { id, score, tests }
    }).collect();
    tgroups.sort_by(|a, b| a.id.cmp(&b.id));

    let mut simfile = Simfile::new(name, label);
    simfile.statement = statement;
    simfile.checker = checker;
    simfile.memory_limit = global_memory_limit;
    simfile.interactive = interactive;
    simfile.solutions = solutions;
    simfile.tgroups = tgroups;

    Ok(simfile)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::{group_id_of, normalize, parse_raw};

    #[test]
    fn parse_raw_reads_scalars_and_arrays() {
        let text = "name: foo\nlabel: bar\nsolutions: [\n  sol1.cpp,\n  sol2.cpp\n]\n";
        let raw = parse_raw(text).unwrap();
        assert_eq!(Some(&"foo".to_owned()), raw.scalars.get("name"));
        assert_eq!(Some(&vec!["sol1.cpp".to_owned(), "sol2.cpp".to_owned()]),
            raw.arrays.get("solutions"));
    }

    #[test]
    fn ocen_tests_route_to_group_zero() {
        assert_eq!("0", group_id_of("ocen1"));
        assert_eq!("0", group_id_of("ocen"));
        assert_eq!("3", group_id_of("3a"));
        assert_eq!("", group_id_of("extra"));
    }

    #[test]
    fn auto_scoring_distributes_remaining_points_evenly_and_zeroes_group_zero() {
        let text = "name: foo\nlimits: [\n  0a 1.0 64,\n  1a 1.0 64,\n  2a 1.0 64\n]\n";
        let tests = vec![
            ("0a".to_owned(), PathBuf::from("0a.in"), Some(PathBuf::from("0a.out"))),
            ("1a".to_owned(), PathBuf::from("1a.in"), Some(PathBuf::from("1a.out"))),
            ("2a".to_owned(), PathBuf::from("2a.in"), Some(PathBuf::from("2a.out"))),
        ];
        let simfile = normalize(text, None, None, None, tests, None).unwrap();

        let group0 = simfile.tgroups.iter().find(|g| g.id == "0").unwrap();
        assert_eq!(0, group0.score);

        let scored_total: i64 = simfile.tgroups.iter()
            .filter(|g| g.id != "0")
            .map(|g| g.score)
            .sum();
        assert_eq!(100, scored_total);
    }

    #[test]
    fn missing_time_limit_is_an_error() {
        let text = "name: foo\n";
        let tests = vec![("1a".to_owned(), PathBuf::from("1a.in"), Some(PathBuf::from("1a.out")))];
        assert!(normalize(text, None, None, None, tests, None).is_err());
    }

    #[test]
    fn per_test_memory_limit_overrides_global() {
        let text = "name: foo\nmemory_limit: 256\nlimits: [\n  1a 1.0 64\n]\n";
        let tests = vec![("1a".to_owned(), PathBuf::from("1a.in"), Some(PathBuf::from("1a.out")))];
        let simfile = normalize(text, None, None, None, tests, None).unwrap();
        let test = simfile.tests().next().unwrap();
        assert_eq!(sandbox::MemorySize::MegaBytes(64), test.memory_limit);
        assert_eq!(Duration::from_secs_f64(1.0), test.time_limit);
    }
}
