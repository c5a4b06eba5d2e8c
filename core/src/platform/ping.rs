// ICMP liveness probe via the system `ping`

use super::command::{argv, CommandError, CommandRunner};
use crate::provisioning::{LivenessProbe, ProbeError};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

pub struct PingProbe {
    runner: Arc<dyn CommandRunner>,
}

impl PingProbe {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl LivenessProbe for PingProbe {
    async fn probe(&self, addr: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
        // `-W` takes whole seconds
        let secs = timeout.as_secs().max(1).to_string();
        let target = addr.to_string();
        let output = self
            .runner
            .run("ping", &argv(["-c", "1", "-W", secs.as_str(), target.as_str()]))
            .await
            .map_err(|e| match e {
                CommandError::Timeout { .. } => ProbeError::Timeout(timeout),
                CommandError::Spawn { .. } => ProbeError::Failed(e.to_string()),
            })?;

        match (output.success, parse_round_trip(&output.stdout)) {
            (true, Some(rtt)) => Ok(rtt),
            (true, None) => Ok(Duration::ZERO),
            (false, _) if output.status == Some(1) => Err(ProbeError::Timeout(timeout)),
            (false, _) => Err(ProbeError::Unreachable(output.failure_summary())),
        }
    }
}

/// Round-trip time from a `time=12.3 ms` reply line
pub fn parse_round_trip(output: &str) -> Option<Duration> {
    let rest = output.split("time=").nth(1)?;
    let millis: f64 = rest.split_whitespace().next()?.parse().ok()?;
    (millis.is_finite() && millis >= 0.0).then(|| Duration::from_secs_f64(millis / 1000.0))
}
