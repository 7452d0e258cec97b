#![forbid(unsafe_code)]

//! Golden-fixture harness for nullseries columns.
//!
//! Fixture files are JSON documents under `fixtures/`, each holding a list
//! of cases. A case names one column operation, its inputs, and the
//! expected rendering, comparison outcome, derived column or error kind.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use ns_columnar::{Column, ColumnError, ColumnSet, CompareOutcome, SetOutcome};
use ns_types::{Timestamp, TypeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    /// Treat a fixture file with zero cases as a failure.
    pub strict_mode: bool,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            strict_mode: true,
        }
    }

    #[must_use]
    pub fn fixture_path(&self, file_name: &str) -> PathBuf {
        self.fixture_root.join(file_name)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("fixture file {0} has no cases")]
    EmptyFixture(String),
}

/// Coarse error classification used by fixtures to name expected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedType,
    IndexOutOfRange,
    UnknownUnit,
    TimestampOutOfRange,
    Other,
}

impl ErrorKind {
    #[must_use]
    pub fn of(error: &ColumnError) -> Self {
        match error {
            ColumnError::UnsupportedType { .. } => Self::UnsupportedType,
            ColumnError::IndexOutOfRange { .. } => Self::IndexOutOfRange,
            ColumnError::Type(TypeError::UnknownUnit { .. }) => Self::UnknownUnit,
            ColumnError::TimestampOutOfRange { .. } => Self::TimestampOutOfRange,
            ColumnError::Type(TypeError::UnknownDType { .. })
            | ColumnError::Io(_)
            | ColumnError::Format(_) => Self::Other,
        }
    }
}

/// Named string transforms available to `map_strings` fixtures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringTransform {
    Trim,
    Uppercase,
    Lowercase,
}

impl StringTransform {
    #[must_use]
    pub fn apply(self, text: &str) -> String {
        match self {
            Self::Trim => text.trim().to_owned(),
            Self::Uppercase => text.to_uppercase(),
            Self::Lowercase => text.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expected {
    Column(Column),
    Error(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FixtureOperation {
    Render {
        column: Column,
        #[serde(default)]
        range: Option<[usize; 2]>,
        expected: RenderExpectation,
    },
    AllClose {
        left: Column,
        right: Column,
        #[serde(default)]
        tolerance: f64,
        expected: CompareOutcome,
    },
    SetAllClose {
        left: ColumnSet,
        right: ColumnSet,
        #[serde(default)]
        tolerance: f64,
        expected: SetOutcome,
    },
    UpcastNumeric {
        column: Column,
        expected: Expected,
    },
    ForceNumeric {
        column: Column,
        expected: Expected,
    },
    MapStrings {
        column: Column,
        transform: StringTransform,
        expected: Expected,
    },
    ToText {
        column: Column,
        expected: Expected,
    },
    NullEmptyStrings {
        column: Column,
        expected: Expected,
    },
    DateFromDuration {
        column: Column,
        base: Timestamp,
        unit: String,
        expected: Expected,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderExpectation {
    Text(String),
    Error(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureCase {
    pub case_id: String,
    #[serde(flatten)]
    pub operation: FixtureOperation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureFile {
    pub suite: String,
    pub cases: Vec<FixtureCase>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    pub case_id: String,
    pub passed: bool,
    pub mismatch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    #[must_use]
    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|c| c.passed).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.cases.len() - self.passed()
    }

    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases.iter().filter(|c| !c.passed)
    }
}

pub fn load_fixtures(path: &Path) -> Result<FixtureFile, HarnessError> {
    let body = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&body)?)
}

/// Run a single fixture file relative to the configured fixture root.
pub fn run_fixture_file(
    config: &HarnessConfig,
    file_name: &str,
) -> Result<SuiteReport, HarnessError> {
    let fixture = load_fixtures(&config.fixture_path(file_name))?;
    if config.strict_mode && fixture.cases.is_empty() {
        return Err(HarnessError::EmptyFixture(file_name.to_owned()));
    }
    let report = run_suite(&fixture);
    info!(
        "fixture suite {}: {} passed, {} failed",
        report.suite,
        report.passed(),
        report.failed()
    );
    Ok(report)
}

/// Run every `*.json` fixture file under the fixture root, in file-name
/// order.
pub fn run_all_fixtures(config: &HarnessConfig) -> Result<Vec<SuiteReport>, HarnessError> {
    let mut names = fs::read_dir(&config.fixture_root)?
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".json"))
        .collect::<Vec<_>>();
    names.sort();
    names
        .iter()
        .map(|name| run_fixture_file(config, name))
        .collect()
}

#[must_use]
pub fn run_suite(fixture: &FixtureFile) -> SuiteReport {
    let cases = fixture
        .cases
        .iter()
        .map(|case| {
            let mismatch = run_case(&case.operation).err();
            if let Some(detail) = &mismatch {
                warn!("fixture case {} failed: {detail}", case.case_id);
            }
            CaseReport {
                case_id: case.case_id.clone(),
                passed: mismatch.is_none(),
                mismatch,
            }
        })
        .collect();
    SuiteReport {
        suite: fixture.suite.clone(),
        cases,
    }
}

fn run_case(operation: &FixtureOperation) -> Result<(), String> {
    match operation {
        FixtureOperation::Render {
            column,
            range,
            expected,
        } => {
            let actual = match range {
                Some([first, last]) => column.render_range(*first..*last),
                None => column.render(),
            };
            check_render(actual, expected)
        }
        FixtureOperation::AllClose {
            left,
            right,
            tolerance,
            expected,
        } => check_eq(&left.all_close(right, *tolerance), expected),
        FixtureOperation::SetAllClose {
            left,
            right,
            tolerance,
            expected,
        } => check_eq(&left.all_close(right, *tolerance), expected),
        FixtureOperation::UpcastNumeric { column, expected } => {
            check_column(Ok(column.upcast_numeric().into_owned()), expected)
        }
        FixtureOperation::ForceNumeric { column, expected } => {
            check_column(Ok(column.force_numeric().into_owned()), expected)
        }
        FixtureOperation::MapStrings {
            column,
            transform,
            expected,
        } => check_column(
            Ok(column.map_strings(|s| transform.apply(s)).into_owned()),
            expected,
        ),
        FixtureOperation::ToText { column, expected } => {
            check_column(column.to_text().map(std::borrow::Cow::into_owned), expected)
        }
        FixtureOperation::NullEmptyStrings { column, expected } => {
            check_column(Ok(column.null_empty_strings().into_owned()), expected)
        }
        FixtureOperation::DateFromDuration {
            column,
            base,
            unit,
            expected,
        } => check_column(column.date_from_duration(*base, unit), expected),
    }
}

fn check_eq<T: PartialEq + std::fmt::Debug>(actual: &T, expected: &T) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected:?}, got {actual:?}"))
    }
}

fn check_render(
    actual: Result<String, ColumnError>,
    expected: &RenderExpectation,
) -> Result<(), String> {
    match (actual, expected) {
        (Ok(text), RenderExpectation::Text(want)) => check_eq(&text, want),
        (Err(err), RenderExpectation::Error(kind)) => check_eq(&ErrorKind::of(&err), kind),
        (Ok(text), RenderExpectation::Error(kind)) => {
            Err(format!("expected {kind:?} error, rendered {text:?}"))
        }
        (Err(err), RenderExpectation::Text(_)) => Err(format!("render failed: {err}")),
    }
}

/// Derived columns match when name, dtype and values agree (via
/// `all_equal`, so an absent mask equals an all-present one).
fn check_column(actual: Result<Column, ColumnError>, expected: &Expected) -> Result<(), String> {
    match (actual, expected) {
        (Ok(column), Expected::Column(want)) => {
            if column.name() != want.name() {
                return Err(format!(
                    "expected name {:?}, got {:?}",
                    want.name(),
                    column.name()
                ));
            }
            if column.dtype() != want.dtype() {
                return Err(format!(
                    "expected dtype {}, got {}",
                    want.dtype(),
                    column.dtype()
                ));
            }
            match column.all_equal(want) {
                CompareOutcome::Equal => Ok(()),
                outcome => Err(format!("column mismatch: {outcome:?}")),
            }
        }
        (Err(err), Expected::Error(kind)) => check_eq(&ErrorKind::of(&err), kind),
        (Ok(column), Expected::Error(kind)) => Err(format!(
            "expected {kind:?} error, got a {} column",
            column.dtype()
        )),
        (Err(err), Expected::Column(_)) => Err(format!("operation failed: {err}")),
    }
}
