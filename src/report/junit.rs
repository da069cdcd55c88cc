use super::types::TestResults;
use crate::runner::state::{StepStateReport, StepStatus};
use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::Path;

/// Generate JUnit XML report string from TestResults
pub fn generate_junit_xml(results: &TestResults) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let total_tests = results.steps.len();
    let failures = results
        .steps
        .iter()
        .filter(|s| matches!(s.status, StepStatus::Failed { .. }))
        .count();
    let errors = results
        .steps
        .iter()
        .filter(|s| matches!(s.status, StepStatus::Aborted))
        .count();
    // Steps the session never reached count as skipped too
    let skipped = results
        .steps
        .iter()
        .filter(|s| {
            matches!(
                s.status,
                StepStatus::Skipped { .. } | StepStatus::Pending | StepStatus::Running
            )
        })
        .count();
    let total_seconds = results.summary.total_duration_ms.unwrap_or(0) as f64 / 1000.0;

    let mut suites_start = BytesStart::new("testsuites");
    suites_start.push_attribute(("name", "spotify-selftest"));
    suites_start.push_attribute(("tests", total_tests.to_string().as_str()));
    suites_start.push_attribute(("failures", failures.to_string().as_str()));
    suites_start.push_attribute(("errors", errors.to_string().as_str()));
    suites_start.push_attribute(("skipped", skipped.to_string().as_str()));
    suites_start.push_attribute(("time", total_seconds.to_string().as_str()));
    writer.write_event(Event::Start(suites_start))?;

    let mut suite_start = BytesStart::new("testsuite");
    suite_start.push_attribute(("name", results.helper_url.as_str()));
    suite_start.push_attribute(("tests", total_tests.to_string().as_str()));
    suite_start.push_attribute(("failures", failures.to_string().as_str()));
    suite_start.push_attribute(("errors", errors.to_string().as_str()));
    suite_start.push_attribute(("skipped", skipped.to_string().as_str()));
    suite_start.push_attribute(("id", results.session_id.as_str()));
    suite_start.push_attribute(("time", total_seconds.to_string().as_str()));
    suite_start.push_attribute(("timestamp", results.generated_at.as_str()));
    writer.write_event(Event::Start(suite_start))?;

    for step in &results.steps {
        write_test_case(&mut writer, step)?;
    }

    if let Some(message) = &results.summary.message {
        writer.write_event(Event::Start(BytesStart::new("system-out")))?;
        writer.write_event(Event::Text(BytesText::new(message)))?;
        writer.write_event(Event::End(BytesEnd::new("system-out")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let result = writer.into_inner().into_inner();
    let xml = String::from_utf8(result)?;
    Ok(xml)
}

fn write_test_case<W: std::io::Write>(writer: &mut Writer<W>, step: &StepStateReport) -> Result<()> {
    let mut case_start = BytesStart::new("testcase");
    case_start.push_attribute(("name", step.label.as_str()));
    case_start.push_attribute(("classname", "selftest"));
    case_start.push_attribute((
        "time",
        (step.duration_ms.unwrap_or(0) as f64 / 1000.0)
            .to_string()
            .as_str(),
    ));
    writer.write_event(Event::Start(case_start))?;

    match &step.status {
        StepStatus::Failed { reason } => {
            let mut fail_start = BytesStart::new("failure");
            fail_start.push_attribute(("message", reason.as_str()));
            fail_start.push_attribute(("type", "SelfTestFailure"));
            writer.write_event(Event::Start(fail_start))?;
            if let Some(detail) = &step.detail {
                writer.write_event(Event::Text(BytesText::new(detail)))?;
            }
            writer.write_event(Event::End(BytesEnd::new("failure")))?;
        }
        StepStatus::Aborted => {
            let mut error = BytesStart::new("error");
            error.push_attribute(("message", "Self test ended during this step"));
            writer.write_event(Event::Empty(error))?;
        }
        StepStatus::Skipped { reason } => {
            let mut skipped = BytesStart::new("skipped");
            skipped.push_attribute(("message", reason.as_str()));
            writer.write_event(Event::Empty(skipped))?;
        }
        StepStatus::Pending | StepStatus::Running => {
            let mut skipped = BytesStart::new("skipped");
            skipped.push_attribute(("message", "Not run"));
            writer.write_event(Event::Empty(skipped))?;
        }
        StepStatus::Passed => {}
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

/// Write report to file
pub fn write_report(results: &TestResults, output_dir: &Path) -> Result<()> {
    let xml = generate_junit_xml(results)?;
    let path = output_dir.join("junit.xml");
    std::fs::write(&path, xml)?;
    println!("JUnit report saved to: {}", path.display());
    Ok(())
}
