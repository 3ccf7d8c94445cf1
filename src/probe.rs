//! Prober collaborator: network ping and kubelet HTTPS calls
//!
//! All probe failures are negative signals for the health state machine,
//! never errors to propagate. The ICMP probe shells out to the system
//! `ping` binary so the process does not need raw-socket capabilities.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Response of an HTTPS probe
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeResponse {
    /// Whether the status code was 2xx
    pub ok: bool,
    /// Response body
    pub body: String,
}

/// Seam for node reachability and kubelet probes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Prober: Send + Sync {
    /// ICMP-style reachability check; `false` on any failure or timeout
    async fn ping(&self, ip: &str, timeout: Duration) -> bool;

    /// HTTPS GET against a kubelet endpoint
    async fn https_get(&self, url: &str) -> Result<ProbeResponse, Error>;
}

/// Production prober: system `ping` + an HTTPS client that accepts the
/// kubelet's self-signed serving certificate.
pub struct SystemProber {
    http: reqwest::Client,
}

impl SystemProber {
    /// Create a prober whose HTTP requests time out after `http_timeout`
    pub fn new(http_timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(http_timeout)
            .build()
            .map_err(|e| Error::internal("prober", format!("failed to build client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Prober for SystemProber {
    async fn ping(&self, ip: &str, timeout: Duration) -> bool {
        // -W takes whole seconds; round up so sub-second timeouts still wait
        let wait_secs = timeout.as_secs().max(1);
        let result = tokio::process::Command::new("ping")
            .args(["-c", "1", "-W", &wait_secs.to_string(), ip])
            .output()
            .await;

        match result {
            Ok(output) => {
                trace!(ip = %ip, success = output.status.success(), "ping probe");
                output.status.success()
            }
            Err(e) => {
                debug!(ip = %ip, error = %e, "ping binary failed to run");
                false
            }
        }
    }

    async fn https_get(&self, url: &str) -> Result<ProbeResponse, Error> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::probe(url, e.to_string()))?;

        let ok = response.status().is_success();
        let body = response
            .text()
            .await
            .map_err(|e| Error::probe(url, e.to_string()))?;

        Ok(ProbeResponse { ok, body })
    }
}

/// Kubelet health endpoint for a node
pub fn kubelet_healthz_url(ip: &str, port: u16) -> String {
    format!("https://{}:{}/healthz", ip, port)
}

/// Kubelet running-pods listing for a node
pub fn kubelet_running_pods_url(ip: &str, port: u16) -> String {
    format!("https://{}:{}/runningpods/", ip, port)
}

/// Kubelet container-log tail for a specific pod
pub fn kubelet_container_logs_url(
    ip: &str,
    port: u16,
    namespace: &str,
    pod: &str,
    container: &str,
    tail_lines: u32,
) -> String {
    format!(
        "https://{}:{}/containerLogs/{}/{}/{}?tailLines={}",
        ip, port, namespace, pod, container, tail_lines
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kubelet_urls_are_parameterized_by_node_ip() {
        assert_eq!(
            kubelet_healthz_url("10.0.0.7", 10250),
            "https://10.0.0.7:10250/healthz"
        );
        assert_eq!(
            kubelet_running_pods_url("10.0.0.7", 10250),
            "https://10.0.0.7:10250/runningpods/"
        );
        assert_eq!(
            kubelet_container_logs_url("10.0.0.7", 10250, "kube-system", "flannel-ds-x1", "flannel", 20),
            "https://10.0.0.7:10250/containerLogs/kube-system/flannel-ds-x1/flannel?tailLines=20"
        );
    }

    #[tokio::test]
    async fn ping_of_invalid_host_is_false_not_error() {
        let prober = SystemProber::new(Duration::from_millis(500)).unwrap();
        // invalid address: ping exits non-zero (or the binary is missing);
        // either way the probe reports unreachable
        assert!(!prober.ping("256.256.256.256", Duration::from_millis(100)).await);
    }
}
