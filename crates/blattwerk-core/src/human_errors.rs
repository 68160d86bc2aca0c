// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for host applications.
//
// Every technical error is mapped to plain English with a clear suggestion.
// The job/message boundary attaches these strings to failed and stopped jobs.

use crate::error::BlattwerkError;

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// More data may still fix it — keep the connection open and retry.
    Transient,
    /// User must do something (pick another file, re-download it).
    ActionRequired,
    /// Cannot be fixed by retrying — the file itself is damaged.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether the system should auto-retry.
    pub retriable: bool,
    /// Severity level (drives icon/colour in a host UI).
    pub severity: Severity,
}

/// Convert a `BlattwerkError` into a `HumanError` suitable for end users.
pub fn humanize_error(err: &BlattwerkError) -> HumanError {
    match err {
        BlattwerkError::MalformedChunk { chunk, detail } => HumanError {
            message: "Part of this document is damaged.".into(),
            suggestion: format!(
                "The rest of the document may still display. If pages are missing, \
                 try downloading the file again. ({chunk}: {detail})"
            ),
            retriable: false,
            severity: Severity::Permanent,
        },

        BlattwerkError::BadDirectory(detail) => HumanError {
            message: "The document's table of contents is damaged.".into(),
            suggestion: format!(
                "Individual pages may still open. Try downloading the file again. ({detail})"
            ),
            retriable: false,
            severity: Severity::Permanent,
        },

        BlattwerkError::UnknownDocument(detail) => HumanError {
            message: "This doesn't look like a supported document.".into(),
            suggestion: format!("Check that the file is a DjVu document. (found: {detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        BlattwerkError::MissingData { .. } => HumanError {
            message: "The document transfer ended before the page arrived.".into(),
            suggestion: "Check your connection and reload the document.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        BlattwerkError::Stopped => HumanError {
            message: "Loading was cancelled.".into(),
            suggestion: "Open the document again to continue.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        BlattwerkError::Unresolved(id) => HumanError {
            message: "A part of this document could not be located.".into(),
            suggestion: format!(
                "A shared file the page depends on is missing. Re-download the whole \
                 document, including companion files. (missing: \"{id}\")"
            ),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        BlattwerkError::PageOutOfRange(page) => HumanError {
            message: format!("There is no page {} in this document.", page + 1),
            suggestion: "Pick a page within the document's page count.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        BlattwerkError::Io(detail) => HumanError {
            message: "The file could not be read.".into(),
            suggestion: format!("Check that the file exists and is readable. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        BlattwerkError::Serialization(detail) => HumanError {
            message: "An internal bookkeeping step failed.".into(),
            suggestion: format!("This is a bug worth reporting. ({detail})"),
            retriable: false,
            severity: Severity::Permanent,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_reads_as_transient() {
        let human = humanize_error(&BlattwerkError::Stopped);
        assert_eq!(human.severity, Severity::Transient);
        assert!(human.retriable);
    }

    #[test]
    fn malformed_chunk_is_permanent_and_names_the_chunk() {
        let human = humanize_error(&BlattwerkError::malformed("Sjbz", "bad arith data"));
        assert_eq!(human.severity, Severity::Permanent);
        assert!(human.suggestion.contains("Sjbz"));
    }

    #[test]
    fn page_out_of_range_is_one_indexed_for_humans() {
        let human = humanize_error(&BlattwerkError::PageOutOfRange(0));
        assert!(human.message.contains("page 1"));
    }
}
