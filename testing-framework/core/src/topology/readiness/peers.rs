use super::ReadinessCheck;
use crate::nodes::{CommunicationError, NodeApi};

/// A node expected to report at least `min_peers` connected peers.
pub struct PeerExpectation<'a> {
    pub label: String,
    pub api: &'a NodeApi,
    pub min_peers: usize,
}

#[derive(Debug)]
pub struct PeerStatus {
    label: String,
    expected: usize,
    result: Result<usize, CommunicationError>,
}

pub struct PeerReadiness<'a> {
    pub(crate) expectations: Vec<PeerExpectation<'a>>,
}

impl<'a> PeerReadiness<'a> {
    #[must_use]
    pub const fn new(expectations: Vec<PeerExpectation<'a>>) -> Self {
        Self { expectations }
    }
}

#[async_trait::async_trait]
impl<'a> ReadinessCheck<'a> for PeerReadiness<'a> {
    type Data = Vec<PeerStatus>;

    async fn collect(&'a self) -> Self::Data {
        let futures = self.expectations.iter().map(|expectation| async move {
            let result = expectation
                .api
                .connected_peers()
                .await
                .map(|peers| peers.len());
            PeerStatus {
                label: expectation.label.clone(),
                expected: expectation.min_peers,
                result,
            }
        });
        futures::future::join_all(futures).await
    }

    fn is_ready(&self, data: &Self::Data) -> bool {
        data.iter().all(|status| {
            status
                .result
                .as_ref()
                .is_ok_and(|peers| *peers >= status.expected)
        })
    }

    fn timeout_message(&self, data: Self::Data) -> String {
        let summary = data
            .iter()
            .map(|status| match &status.result {
                Ok(peers) => format!(
                    "{}: peers={peers}, expected={}",
                    status.label, status.expected
                ),
                Err(err) => format!(
                    "{}: error={err}, expected_peers={}",
                    status.label, status.expected
                ),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("timed out waiting for peer readiness: {summary}")
    }
}
