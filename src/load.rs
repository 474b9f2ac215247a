use std::{
    collections::BTreeMap,
    ffi::OsStr,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use jane_eyre::eyre::{self, bail, Context, OptionExt};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, error_span, info, trace, warn};

use crate::row::RawRow;

static LOG_FILE_PREFIX: &'static str = "performance_";
static LOG_FILE_EXTENSION: &'static str = "csv";

/// Finds the log files in `dir`, sorted by name.
pub fn log_files(dir: impl AsRef<Path>) -> eyre::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut result = vec![];
    for entry in
        std::fs::read_dir(dir).wrap_err_with(|| format!("Failed to read {}", dir.display()))?
    {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(OsStr::to_str) else {
            continue;
        };
        if name.starts_with(LOG_FILE_PREFIX)
            && path.extension() == Some(OsStr::new(LOG_FILE_EXTENSION))
            && path.is_file()
        {
            result.push(path);
        }
    }
    result.sort();

    Ok(result)
}

/// Loads every log file in `dir`. Files that fail to load are skipped with a
/// warning; finding no rows at all is left to the caller to judge.
pub fn load_dir(dir: impl AsRef<Path>) -> eyre::Result<Vec<RawRow>> {
    let dir = dir.as_ref();
    let paths = log_files(dir)?;
    if paths.is_empty() {
        warn!(?dir, "No {LOG_FILE_PREFIX}*.{LOG_FILE_EXTENSION} files found");
    }
    info!("Found {} log files", paths.len());

    let results = paths
        .par_iter()
        .map(|path| (path, load_file(path)))
        .collect::<Vec<_>>();

    let mut rows = vec![];
    for (path, result) in results {
        let span = error_span!("load", ?path);
        let _enter = span.enter();
        match result {
            Ok(result) => {
                info!("Loaded {} rows", result.len());
                rows.extend(result);
            }
            Err(error) => warn!("Failed to load file: {error:#}"),
        }
    }

    Ok(rows)
}

#[tracing::instrument(level = "error")]
pub fn load_file(path: &Path) -> eyre::Result<Vec<RawRow>> {
    let mut text = String::default();
    File::open(path)?.read_to_string(&mut text)?;
    let source_file = path
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_eyre("Unsupported path")?;

    parse_csv(&text, source_file)
}

/// Parses one log file. The first non-empty line is the header.
pub fn parse_csv(text: &str, source_file: &str) -> eyre::Result<Vec<RawRow>> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());
    let Some((_, header)) = lines.next() else {
        bail!("File is empty");
    };
    let header = split_line(header.trim_start_matches('\u{FEFF}'))
        .into_iter()
        .map(|column| column.trim().to_owned())
        .collect::<Vec<_>>();
    let Some(timestamp_index) = header.iter().position(|column| column == "timestamp") else {
        bail!("Header has no timestamp column");
    };

    let mut result = vec![];
    for (lineno, line) in lines {
        let lno = lineno + 1;
        let fields = split_line(line);
        if fields.len() > header.len() {
            trace!(
                lno,
                "Dropping {} fields beyond the header",
                fields.len() - header.len()
            );
        }
        let Some(timestamp) = fields.get(timestamp_index).and_then(|t| parse_timestamp(t))
        else {
            debug!(lno, "Skipping row without a usable timestamp");
            continue;
        };
        let fields = header
            .iter()
            .zip(fields)
            .enumerate()
            .filter(|&(i, _)| i != timestamp_index)
            .map(|(_, (column, value))| (column.clone(), value))
            .collect::<BTreeMap<_, _>>();
        result.push(RawRow {
            timestamp,
            source_file: source_file.to_owned(),
            fields,
        });
    }

    Ok(result)
}

fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(timestamp) = text.parse::<i64>() {
        return Some(timestamp);
    }
    let timestamp = text.parse::<f64>().ok()?;

    (timestamp.is_finite() && timestamp.abs() < i64::MAX as f64).then_some(timestamp as i64)
}

/// Splits one CSV line. Double-quoted fields may contain commas, and `""`
/// inside quotes is a literal quote.
fn split_line(line: &str) -> Vec<String> {
    let mut result = vec![];
    let mut field = String::default();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => quoted = false,
            ('"', false) if field.is_empty() => quoted = true,
            (',', false) => result.push(std::mem::take(&mut field)),
            (c, _) => field.push(c),
        }
    }
    result.push(field);

    result
}

#[test]
fn test_split_line() {
    assert_eq!(split_line("a,b,,c"), ["a", "b", "", "c"]);
    assert_eq!(
        split_line(r#"1,CUSTOM_EVENT,"direction:up,velocity:5.0",x"#),
        ["1", "CUSTOM_EVENT", "direction:up,velocity:5.0", "x"]
    );
    assert_eq!(split_line(r#""say ""hi""",2"#), [r#"say "hi""#, "2"]);
    assert_eq!(split_line(""), [""]);
}

#[test]
fn test_parse_csv() -> eyre::Result<()> {
    let text = "\
timestamp,uptime_ms,heap_used_mb,heap_max_mb,native_heap_mb,cpu_usage_percent
1700000000000,100,12.5,256.0,8.0,3.5

1700000001000,CUSTOM_EVENT,SCROLL_ACTION,,\"direction:up,velocity:5.0\",
not-a-time,200,13.0,256.0,8.0,4.0
1700000002000.0,300,14.0
";
    let rows = parse_csv(text, "performance_a.csv")?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].timestamp, 1_700_000_000_000);
    assert_eq!(rows[0].get("heap_used_mb"), Some("12.5"));
    assert_eq!(rows[0].get("timestamp"), None);
    assert_eq!(rows[1].get("native_heap_mb"), Some("direction:up,velocity:5.0"));
    assert_eq!(rows[2].timestamp, 1_700_000_002_000);
    assert_eq!(rows[2].get("cpu_usage_percent"), None);
    assert_eq!(rows[2].source_file, "performance_a.csv");
    Ok(())
}

#[test]
fn test_parse_csv_requires_timestamp_column() {
    assert!(parse_csv("time,heap\n1,2\n", "performance_a.csv").is_err());
    assert!(parse_csv("\n\n", "performance_a.csv").is_err());
}

#[test]
fn test_load_dir() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join("performance_2.csv"),
        "timestamp,uptime_ms,heap_used_mb\n2000,1,20.0\n",
    )?;
    std::fs::write(
        dir.path().join("performance_1.csv"),
        "timestamp,uptime_ms,heap_used_mb\n1000,1,10.0\n1001,1,11.0\n",
    )?;
    std::fs::write(dir.path().join("performance_3.csv"), "")?;
    std::fs::write(dir.path().join("other.csv"), "timestamp\n5\n")?;
    std::fs::write(dir.path().join("performance_4.txt"), "timestamp\n5\n")?;

    let rows = load_dir(dir.path())?;
    assert_eq!(
        rows.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
        [1000, 1001, 2000]
    );
    assert_eq!(rows[2].source_file, "performance_2.csv");
    Ok(())
}

#[test]
fn test_load_empty_dir() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    assert!(load_dir(dir.path())?.is_empty());
    assert!(load_dir(dir.path().join("missing")).is_err());
    Ok(())
}
