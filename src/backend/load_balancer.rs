//! Weighted least-busy load balancing with health demotion.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatch::{Connection, Request, RequestHandler};
use crate::error::GatewayError;

const MIN_REQUIRED_BACKENDS: usize = 2;

/// Default consecutive-error count after which a node is demoted.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

/// One balanced backend with its selection state.
struct LoadBalancerNode {
    handler: Arc<dyn RequestHandler>,
    weight: u32,
    in_flight: AtomicU64,
    errors: AtomicU32,
    alive: AtomicBool,
}

/// Spreads requests over backends, preferring the node with the lowest
/// `in_flight / weight` score.
///
/// Nodes with weight zero never receive traffic under normal selection, and
/// nodes whose consecutive error count reached the threshold are demoted
/// until one of their probes succeeds. When every node is down, all of them
/// become eligible again so traffic keeps probing.
pub struct LoadBalancer {
    nodes: Vec<LoadBalancerNode>,
    error_threshold: u32,
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("nodes", &self.nodes.len())
            .field("error_threshold", &self.error_threshold)
            .finish()
    }
}

impl LoadBalancer {
    /// Builds a balancer over `(handler, weight)` pairs.
    ///
    /// Fails with `NotEnoughBackends` for fewer than two nodes.
    pub fn new(
        backends: Vec<(Arc<dyn RequestHandler>, u32)>,
        error_threshold: u32,
    ) -> Result<Self, GatewayError> {
        if backends.len() < MIN_REQUIRED_BACKENDS {
            return Err(GatewayError::NotEnoughBackends);
        }

        let nodes = backends
            .into_iter()
            .map(|(handler, weight)| LoadBalancerNode {
                handler,
                weight,
                in_flight: AtomicU64::new(0),
                errors: AtomicU32::new(0),
                alive: AtomicBool::new(true),
            })
            .collect();

        Ok(Self {
            nodes,
            error_threshold,
        })
    }

    /// Picks the least-busy eligible node; ties go to the first in the
    /// slice.
    fn least_busy(&self) -> &LoadBalancerNode {
        let eligible = |node: &&LoadBalancerNode| {
            node.weight > 0 && node.alive.load(Ordering::Acquire)
        };

        let best = self.nodes.iter().filter(eligible).fold(
            None::<&LoadBalancerNode>,
            fold_least_busy,
        );

        // Every node is down (or weightless): keep probing across all of
        // them rather than failing outright.
        match best {
            Some(node) => node,
            None => self
                .nodes
                .iter()
                .fold(None, fold_least_busy)
                .expect("load balancer has at least two nodes"),
        }
    }
}

/// Keeps the node with the lower `in_flight / max(weight, 1)` score,
/// compared by cross-multiplication to stay in integers.
fn fold_least_busy<'a>(
    best: Option<&'a LoadBalancerNode>,
    candidate: &'a LoadBalancerNode,
) -> Option<&'a LoadBalancerNode> {
    let Some(best) = best else {
        return Some(candidate);
    };

    let best_weight = u64::from(best.weight.max(1));
    let candidate_weight = u64::from(candidate.weight.max(1));

    let best_score = best.in_flight.load(Ordering::Acquire) * candidate_weight;
    let candidate_score = candidate.in_flight.load(Ordering::Acquire) * best_weight;

    if candidate_score < best_score {
        Some(candidate)
    } else {
        Some(best)
    }
}

/// Decrements a node's in-flight counter when the request finishes.
struct InFlightGuard<'a> {
    node: &'a LoadBalancerNode,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(node: &'a LoadBalancerNode) -> Self {
        node.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { node }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.node.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl RequestHandler for LoadBalancer {
    async fn handle(&self, conn: Arc<dyn Connection>, req: Request) -> Result<(), GatewayError> {
        let node = self.least_busy();
        let _guard = InFlightGuard::acquire(node);

        match node.handler.handle(conn, req).await {
            Ok(()) => {
                if node.errors.load(Ordering::Acquire) > 0 {
                    node.errors.store(0, Ordering::Release);
                    node.alive.store(true, Ordering::Release);
                }

                Ok(())
            }
            Err(err) => {
                let errors = node.errors.fetch_add(1, Ordering::AcqRel) + 1;

                if errors >= self.error_threshold {
                    node.alive.store(false, Ordering::Release);
                }

                Err(err)
            }
        }
    }
}
