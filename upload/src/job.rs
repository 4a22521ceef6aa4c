use crate::UploadError;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Pending,
    Resizing,
    Uploading,
    Inserting,
    Done,
    Failed,
}

impl JobState {
    fn rank(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Resizing => 1,
            JobState::Uploading => 2,
            JobState::Inserting => 3,
            JobState::Done | JobState::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// States only move forward, one step at a time, except that any
    /// non-terminal state may fail.
    pub fn can_advance_to(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobState::Failed => true,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

/// One asset's trip through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct UploadJob {
    pub index: usize,
    pub local_path: PathBuf,
    pub target_path: String,
    pub state: JobState,
    pub error: Option<String>,
    pub media_id: Option<String>,
}

impl UploadJob {
    pub fn new(index: usize, local_path: PathBuf, target_path: String) -> Self {
        Self {
            index,
            local_path,
            target_path,
            state: JobState::Pending,
            error: None,
            media_id: None,
        }
    }

    pub fn advance(&mut self, next: JobState) -> Result<(), UploadError> {
        if !self.state.can_advance_to(next) {
            return Err(UploadError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn fail(&mut self, error: &UploadError) {
        if self.state.is_terminal() {
            return;
        }
        self.state = JobState::Failed;
        self.error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> UploadJob {
        UploadJob::new(0, PathBuf::from("a.jpg"), "e1/u1_1_0.jpg".into())
    }

    #[test]
    fn test_forward_transitions() {
        let mut job = job();
        for next in [JobState::Resizing, JobState::Uploading, JobState::Inserting, JobState::Done] {
            job.advance(next).expect("forward step");
        }
        assert!(job.state.is_terminal());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut job = job();
        assert!(job.advance(JobState::Uploading).is_err());
        job.advance(JobState::Resizing).expect("step");
        assert!(job.advance(JobState::Pending).is_err());
        job.advance(JobState::Failed).expect("fail from any live state");
        assert!(job.advance(JobState::Done).is_err());
        assert!(job.advance(JobState::Failed).is_err());
    }

    #[test]
    fn test_fail_records_error_once() {
        let mut job = job();
        job.fail(&UploadError::ReadError("gone".into()));
        job.fail(&UploadError::NotSignedIn);
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("Read Error: gone"));
    }
}
