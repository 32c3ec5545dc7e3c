//! A thin client over `org.freedesktop.systemd1`'s Manager interface: start,
//! stop, and a job-completion signal stream, translated by the FSM into
//! `JOB_SUCCESS`/`JOB_FAILURE` events.

use futures_util::stream::StreamExt;
use zbus::Connection;
use zbus_systemd::systemd1::ManagerProxy;

#[derive(Debug, thiserror::Error)]
pub enum ServiceManagerError {
    #[error("systemd bus call failed: {0}")]
    Bus(#[from] zbus::Error),
    #[error("could not parse job id from path {0}")]
    BadJobPath(String),
}

/// The outcome of a completed systemd job. `"done"` and `"skipped"` both
/// count as success; anything else is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failure,
}

impl JobResult {
    fn from_str(result: &str) -> Self {
        match result {
            "done" | "skipped" => JobResult::Success,
            _ => JobResult::Failure,
        }
    }
}

pub struct ServiceManager {
    proxy: ManagerProxy<'static>,
}

impl ServiceManager {
    pub async fn connect(connection: &Connection) -> Result<Self, ServiceManagerError> {
        let proxy = ManagerProxy::new(connection).await?;
        Ok(Self { proxy })
    }

    /// `RestartUnit(unit, "replace")`, returning the numeric job id.
    pub async fn start(&self, unit: &str) -> Result<u32, ServiceManagerError> {
        let job_path = self.proxy.restart_unit(unit.to_string(), "replace".to_string()).await?;
        job_id_from_path(job_path.as_str())
    }

    /// `StopUnit(unit, "replace")`, returning the numeric job id.
    pub async fn stop(&self, unit: &str) -> Result<u32, ServiceManagerError> {
        let job_path = self.proxy.stop_unit(unit.to_string(), "replace".to_string()).await?;
        job_id_from_path(job_path.as_str())
    }

    /// Streams every `JobRemoved` signal as `(id, result)`. The FSM filters
    /// by the job id it is currently waiting on.
    pub async fn job_removed_stream(
        &self,
    ) -> Result<impl futures_util::Stream<Item = (u32, JobResult)> + '_, ServiceManagerError> {
        let stream = self.proxy.receive_job_removed().await?;
        Ok(stream.filter_map(|signal| async move {
            let args = signal.args().ok()?;
            Some((args.id, JobResult::from_str(args.result.as_str())))
        }))
    }
}

fn job_id_from_path(path: &str) -> Result<u32, ServiceManagerError> {
    path.rsplit('/')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ServiceManagerError::BadJobPath(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_result_maps_done_and_skipped_to_success() {
        assert_eq!(JobResult::from_str("done"), JobResult::Success);
        assert_eq!(JobResult::from_str("skipped"), JobResult::Success);
        assert_eq!(JobResult::from_str("failed"), JobResult::Failure);
        assert_eq!(JobResult::from_str("canceled"), JobResult::Failure);
    }

    #[test]
    fn job_id_parsed_from_object_path() {
        assert_eq!(
            job_id_from_path("/org/freedesktop/systemd1/job/42").unwrap(),
            42
        );
        assert!(job_id_from_path("/org/freedesktop/systemd1/job/not-a-number").is_err());
    }
}
