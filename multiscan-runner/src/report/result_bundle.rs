// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TestRecord;
use crate::errors::DecodeError;
use camino::Utf8Path;
use multiscan_metadata::FailureDetail;
use serde::Deserialize;

const TOOL: &str = "xcresulttool";

/// Decodes a result bundle.
///
/// The bundle is summarized with `xcrun xcresulttool get test-results tests`, and the test tree
/// in its output is flattened into `bundle/suite/case` records.
pub fn parse_test_results(path: &Utf8Path) -> Result<Vec<TestRecord>, DecodeError> {
    let output = duct::cmd!(
        "xcrun",
        TOOL,
        "get",
        "test-results",
        "tests",
        "--path",
        path.as_str()
    )
    .stdout_capture()
    .stderr_capture()
    .run()
    .map_err(|error| DecodeError::Tool {
        path: path.to_owned(),
        tool: TOOL,
        error,
    })?;

    parse_test_results_json(&output.stdout).map_err(|error| DecodeError::Json {
        path: path.to_owned(),
        error,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestResults {
    #[serde(default)]
    test_nodes: Vec<TestNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestNode {
    name: String,
    node_type: String,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    children: Vec<TestNode>,
}

#[derive(Clone, Debug, Default)]
struct Scope<'a> {
    bundle: Option<&'a str>,
    suites: Vec<&'a str>,
}

pub(super) fn parse_test_results_json(json: &[u8]) -> Result<Vec<TestRecord>, serde_json::Error> {
    let results: TestResults = serde_json::from_slice(json)?;
    let mut records = Vec::new();
    for node in &results.test_nodes {
        collect(node, Scope::default(), &mut records);
    }
    Ok(records)
}

fn collect<'a>(node: &'a TestNode, mut scope: Scope<'a>, records: &mut Vec<TestRecord>) {
    match node.node_type.as_str() {
        "Unit test bundle" | "UI test bundle" => scope.bundle = Some(&node.name),
        "Test Suite" => scope.suites.push(&node.name),
        "Test Case" => {
            if let Some(record) = case_record(node, &scope) {
                records.push(record);
            }
            return;
        }
        _ => {}
    }

    for child in &node.children {
        collect(child, scope.clone(), records);
    }
}

fn case_record(node: &TestNode, scope: &Scope<'_>) -> Option<TestRecord> {
    let name = node.name.strip_suffix("()").unwrap_or(&node.name);
    let id = scope
        .bundle
        .into_iter()
        .chain(scope.suites.iter().copied())
        .chain(std::iter::once(name))
        .collect::<Vec<_>>()
        .join("/");

    match node.result.as_deref() {
        Some("Passed") | Some("Expected Failure") => Some(TestRecord::passing(id)),
        Some("Failed") => {
            let detail = node
                .children
                .iter()
                .filter(|child| child.node_type == "Failure Message")
                .find_map(|child| parse_failure_message(&child.name));
            Some(TestRecord::failed(id, detail))
        }
        _ => None,
    }
}

/// Parses a failure message of the form `file:line: message`.
fn parse_failure_message(text: &str) -> Option<FailureDetail> {
    let (file, rest) = text.split_once(':')?;
    let (line, message) = rest.split_once(':')?;
    if file.is_empty() || line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(FailureDetail::new(message.trim(), format!("{file}:{line}")))
}
