//! Universal Worker Service job phases and job documents.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt;
use std::str::FromStr;

use crate::errors::{VoError, VoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    Queued,
    Executing,
    Completed,
    Error,
    Aborted,
    Unknown,
    Held,
    Suspended,
    Archived,
}

impl JobPhase {
    /// The job will not change phase again on its own.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Error | JobPhase::Aborted | JobPhase::Archived
        )
    }
}

impl FromStr for JobPhase {
    type Err = VoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobPhase::Pending),
            "QUEUED" => Ok(JobPhase::Queued),
            "EXECUTING" => Ok(JobPhase::Executing),
            "COMPLETED" => Ok(JobPhase::Completed),
            "ERROR" => Ok(JobPhase::Error),
            "ABORTED" => Ok(JobPhase::Aborted),
            "UNKNOWN" => Ok(JobPhase::Unknown),
            "HELD" => Ok(JobPhase::Held),
            "SUSPENDED" => Ok(JobPhase::Suspended),
            "ARCHIVED" => Ok(JobPhase::Archived),
            other => Err(VoError::votable(format!("unknown UWS phase '{}'", other))),
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPhase::Pending => "PENDING",
            JobPhase::Queued => "QUEUED",
            JobPhase::Executing => "EXECUTING",
            JobPhase::Completed => "COMPLETED",
            JobPhase::Error => "ERROR",
            JobPhase::Aborted => "ABORTED",
            JobPhase::Unknown => "UNKNOWN",
            JobPhase::Held => "HELD",
            JobPhase::Suspended => "SUSPENDED",
            JobPhase::Archived => "ARCHIVED",
        };
        f.write_str(name)
    }
}

/// `jobId` and `phase` from a `uws:job` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub job_id: Option<String>,
    pub phase: Option<JobPhase>,
}

pub fn parse_job_document(xml: &str) -> VoResult<JobSummary> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut summary = JobSummary {
        job_id: None,
        phase: None,
    };
    let mut current: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = match e.local_name().as_ref() {
                    b"jobId" => Some("jobId"),
                    b"phase" => Some("phase"),
                    _ => None,
                };
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| VoError::votable(format!("bad UWS text: {}", e)))?;
                match current {
                    Some("jobId") => summary.job_id = Some(text.trim().to_string()),
                    Some("phase") => summary.phase = Some(text.parse()?),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(VoError::votable(format!("UWS parse error: {}", e))),
            _ => {}
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parsing() {
        assert_eq!("COMPLETED".parse::<JobPhase>().unwrap(), JobPhase::Completed);
        assert_eq!(" executing\n".parse::<JobPhase>().unwrap(), JobPhase::Executing);
        assert!("DONE".parse::<JobPhase>().is_err());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(JobPhase::Completed.is_terminal());
        assert!(JobPhase::Error.is_terminal());
        assert!(JobPhase::Aborted.is_terminal());
        assert!(!JobPhase::Queued.is_terminal());
        assert!(!JobPhase::Executing.is_terminal());
    }

    #[test]
    fn test_job_document() {
        let xml = r#"<?xml version="1.0"?>
<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0">
  <uws:jobId>hx7k2q</uws:jobId>
  <uws:runId/>
  <uws:phase>EXECUTING</uws:phase>
  <uws:parameters><uws:parameter id="QUERY">SELECT 1</uws:parameter></uws:parameters>
</uws:job>"#;
        let summary = parse_job_document(xml).unwrap();
        assert_eq!(summary.job_id.as_deref(), Some("hx7k2q"));
        assert_eq!(summary.phase, Some(JobPhase::Executing));
    }
}
