//! Loader for the fixture cases under `tests/programs/`.
//!
//! Each case directory holds a `program.my` source file and a `case.yaml`
//! spec describing how the harness should judge the run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseClass {
    RuntimeSuccess,
    FrontendError,
    RuntimeError,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpectedOutcome {
    #[serde(default)]
    pub stdout_file: Option<String>,
    #[serde(default)]
    pub error_contains: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaseSpec {
    pub class: CaseClass,
    pub expected: ExpectedOutcome,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub dir: PathBuf,
    pub program_path: PathBuf,
    pub spec: CaseSpec,
}

impl Case {
    pub fn read_text(&self, relative_path: &str) -> Result<String> {
        fs::read_to_string(self.dir.join(relative_path))
            .with_context(|| format!("Reading {} fixture file {}", self.name, relative_path))
    }
}

/// Every directory under `programs_dir` is one case; anything a case is
/// missing is an error rather than a skip.
pub fn load_cases(programs_dir: &Path) -> Result<Vec<Case>> {
    let entries = fs::read_dir(programs_dir)
        .with_context(|| format!("Reading {}", programs_dir.display()))?;

    let mut cases = Vec::new();
    for entry in entries {
        let dir = entry?.path();
        if dir.is_dir() {
            cases.push(load_case(dir)?);
        }
    }
    ensure!(
        !cases.is_empty(),
        "No test cases found in {}",
        programs_dir.display()
    );
    cases.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(cases)
}

fn load_case(dir: PathBuf) -> Result<Case> {
    let name = dir
        .file_name()
        .and_then(|value| value.to_str())
        .with_context(|| format!("Invalid case directory name {}", dir.display()))?
        .to_string();

    let spec_raw = fs::read_to_string(dir.join("case.yaml"))
        .with_context(|| format!("Case {name} has no readable case.yaml"))?;
    let spec: CaseSpec = serde_yaml::from_str(&spec_raw)
        .with_context(|| format!("Parsing case.yaml of {name}"))?;
    match spec.class {
        CaseClass::RuntimeSuccess => ensure!(
            spec.expected.stdout_file.is_some(),
            "Case {name} needs expected.stdout_file"
        ),
        CaseClass::FrontendError | CaseClass::RuntimeError => ensure!(
            spec.expected.error_contains.is_some(),
            "Case {name} needs expected.error_contains"
        ),
    }

    let program_path = dir.join("program.my");
    ensure!(program_path.exists(), "Case {name} has no program.my");
    Ok(Case {
        name,
        dir,
        program_path,
        spec,
    })
}
