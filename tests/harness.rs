use std::fs;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};

use mython::fixtures::{load_cases, Case, CaseClass};
use mython::Error;

fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim_end().to_string()
}

fn expected_error(case: &Case) -> Result<&str> {
    case.spec
        .expected
        .error_contains
        .as_deref()
        .with_context(|| format!("Missing error_contains in {}", case.name))
}

fn expect_err(case: &Case, result: Result<String, Error>) -> Result<Error> {
    match result {
        Err(error) => Ok(error),
        Ok(output) => bail!(
            "Case {} unexpectedly succeeded with output '{}'",
            case.name,
            output
        ),
    }
}

#[test]
fn runs_fixture_programs() -> Result<()> {
    let cases = load_cases(Path::new("tests/programs"))?;

    for case in cases {
        let source = fs::read_to_string(&case.program_path)
            .with_context(|| format!("Reading {}", case.name))?;
        let result = mython::run(&source);

        match case.spec.class {
            CaseClass::RuntimeSuccess => {
                let stdout_file = case
                    .spec
                    .expected
                    .stdout_file
                    .as_deref()
                    .with_context(|| format!("Missing stdout_file in {}", case.name))?;
                let expected = case.read_text(stdout_file)?;
                let output = match result {
                    Ok(output) => output,
                    Err(error) => bail!("Case {} failed: {error}", case.name),
                };
                assert_eq!(
                    normalize_output(&output),
                    normalize_output(&expected),
                    "Output mismatch for {}",
                    case.name
                );
            }
            CaseClass::FrontendError => {
                let expected = expected_error(&case)?.to_string();
                let error = expect_err(&case, result)?;
                ensure!(
                    matches!(error, Error::Lex(_) | Error::Parse(_)),
                    "Case {} expected a frontend error, got: {error}",
                    case.name
                );
                ensure!(
                    error.to_string().contains(&expected),
                    "Case {} expected error containing '{expected}', got '{error}'",
                    case.name
                );
            }
            CaseClass::RuntimeError => {
                let expected = expected_error(&case)?.to_string();
                let error = expect_err(&case, result)?;
                ensure!(
                    matches!(error, Error::Runtime(_)),
                    "Case {} expected a runtime error, got: {error}",
                    case.name
                );
                ensure!(
                    error.to_string().contains(&expected),
                    "Case {} expected error containing '{expected}', got '{error}'",
                    case.name
                );
            }
        }
    }

    Ok(())
}
