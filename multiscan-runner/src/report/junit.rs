// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TestRecord;
use crate::errors::DecodeError;
use camino::Utf8Path;
use multiscan_metadata::{FailureDetail, TestIdentifier};
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};

/// Decodes a JUnit XML report.
///
/// A test case is identified as `<classname>/<name>`, with `.` in the class name replaced by `/`.
/// A `<failure>` or `<error>` child marks the test as failed: its `message` attribute becomes the
/// failure message and its text the location. Skipped tests produce no record.
pub fn parse_junit(path: &Utf8Path) -> Result<Vec<TestRecord>, DecodeError> {
    let contents = std::fs::read_to_string(path).map_err(|error| DecodeError::Read {
        path: path.to_owned(),
        error,
    })?;
    parse_junit_str(&contents).map_err(|error| DecodeError::Xml {
        path: path.to_owned(),
        error,
    })
}

#[derive(Debug)]
struct OpenCase {
    id: TestIdentifier,
    failure: Option<FailureDetail>,
    in_failure: bool,
    skipped: bool,
}

impl OpenCase {
    fn new(start: &BytesStart<'_>) -> Result<Self, quick_xml::Error> {
        let name = attribute(start, "name")?.unwrap_or_default();
        let classname = attribute(start, "classname")?.unwrap_or_default();
        let id = if classname.is_empty() {
            TestIdentifier::new(&name)
        } else {
            TestIdentifier::new(format!("{}/{name}", classname.replace('.', "/")))
        };
        Ok(Self {
            id,
            failure: None,
            in_failure: false,
            skipped: false,
        })
    }

    fn start_child(&mut self, child: &BytesStart<'_>, empty: bool) -> Result<(), quick_xml::Error> {
        match child.local_name().as_ref() {
            b"failure" | b"error" => {
                // Only the first failure is kept.
                if self.failure.is_none() {
                    let message = attribute(child, "message")?.unwrap_or_default();
                    self.failure = Some(FailureDetail::new(message, ""));
                    self.in_failure = !empty;
                }
            }
            b"skipped" => self.skipped = true,
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if let (true, Some(failure)) = (self.in_failure, &mut self.failure) {
            failure.location.push_str(text.trim());
        }
    }

    fn finish(self) -> Option<TestRecord> {
        if self.skipped {
            return None;
        }
        Some(match self.failure {
            Some(detail) => TestRecord::failed(self.id, Some(detail)),
            None => TestRecord::passing(self.id),
        })
    }
}

pub(super) fn parse_junit_str(contents: &str) -> Result<Vec<TestRecord>, quick_xml::Error> {
    let mut reader = Reader::from_str(contents);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut open: Option<OpenCase> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => match (&mut open, start.local_name().as_ref()) {
                (None, b"testcase") => open = Some(OpenCase::new(&start)?),
                (Some(case), _) => case.start_child(&start, false)?,
                (None, _) => {}
            },
            Event::Empty(start) => match (&mut open, start.local_name().as_ref()) {
                (None, b"testcase") => records.extend(OpenCase::new(&start)?.finish()),
                (Some(case), _) => case.start_child(&start, true)?,
                (None, _) => {}
            },
            Event::Text(text) => {
                if let Some(case) = &mut open {
                    case.text(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(case) = &mut open {
                    case.text(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(end) => match end.local_name().as_ref() {
                b"testcase" => {
                    if let Some(case) = open.take() {
                        records.extend(case.finish());
                    }
                }
                b"failure" | b"error" => {
                    if let Some(case) = &mut open {
                        case.in_failure = false;
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(records)
}

fn attribute(start: &BytesStart<'_>, name: &str) -> Result<Option<String>, quick_xml::Error> {
    match start.try_get_attribute(name)? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}
