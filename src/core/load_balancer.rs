use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use rand::Rng;

use crate::{config::models::LoadBalanceStrategy, core::route::TargetState};

/// Per-request inputs a strategy may consult
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub client_ip: &'a str,
}

/// Trait defining the interface for target selection strategies.
///
/// Callers hand in the route's *healthy* target set; selection never has to
/// re-check health. Every strategy returns `None` iff that set is empty.
pub trait TargetSelector: Send + Sync + 'static {
    /// Select a target from a list of healthy targets
    fn select(
        &self,
        targets: &[Arc<TargetState>],
        context: &SelectionContext<'_>,
    ) -> Option<Arc<TargetState>>;

    /// Create a new instance of this strategy as a boxed trait object
    fn boxed(self) -> Box<dyn TargetSelector>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}

/// Round-robin selection. The cursor lives on the selector instance, and each
/// route owns its own instance, giving the per-route rotation a durable state.
pub struct RoundRobinSelector {
    counter: AtomicUsize,
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinSelector {
    /// Create a new round-robin selector
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl TargetSelector for RoundRobinSelector {
    fn select(
        &self,
        targets: &[Arc<TargetState>],
        _context: &SelectionContext<'_>,
    ) -> Option<Arc<TargetState>> {
        if targets.is_empty() {
            return None;
        }
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        Some(targets[count % targets.len()].clone())
    }
}

/// Uniform random selection
pub struct RandomSelector;

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSelector {
    /// Create a new random selector
    pub fn new() -> Self {
        Self
    }
}

impl TargetSelector for RandomSelector {
    fn select(
        &self,
        targets: &[Arc<TargetState>],
        _context: &SelectionContext<'_>,
    ) -> Option<Arc<TargetState>> {
        if targets.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..targets.len());
        Some(targets[index].clone())
    }
}

/// Weighted random selection: draw `r` uniform in `[0, total_weight)`, then walk
/// the targets subtracting weights until the draw lands. Falls back to the
/// first target when the total weight is zero.
pub struct WeightedSelector;

impl Default for WeightedSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightedSelector {
    pub fn new() -> Self {
        Self
    }
}

impl TargetSelector for WeightedSelector {
    fn select(
        &self,
        targets: &[Arc<TargetState>],
        _context: &SelectionContext<'_>,
    ) -> Option<Arc<TargetState>> {
        if targets.is_empty() {
            return None;
        }

        let total: u64 = targets.iter().map(|t| u64::from(t.weight)).sum();
        if total == 0 {
            return Some(targets[0].clone());
        }

        let mut draw = rand::rng().random_range(0..total);
        for target in targets {
            let weight = u64::from(target.weight);
            if draw < weight {
                return Some(target.clone());
            }
            draw -= weight;
        }
        // Unreachable with integer weights, kept as the documented fallback
        Some(targets[0].clone())
    }
}

/// Picks the target with the fewest active connections; ties go to the
/// earliest target in iteration order
pub struct LeastConnectionsSelector;

impl Default for LeastConnectionsSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl LeastConnectionsSelector {
    pub fn new() -> Self {
        Self
    }
}

impl TargetSelector for LeastConnectionsSelector {
    fn select(
        &self,
        targets: &[Arc<TargetState>],
        _context: &SelectionContext<'_>,
    ) -> Option<Arc<TargetState>> {
        let mut best: Option<&Arc<TargetState>> = None;
        let mut best_count = u32::MAX;
        for target in targets {
            let connections = target.connections();
            if connections < best_count {
                best = Some(target);
                best_count = connections;
            }
        }
        best.cloned()
    }
}

/// Sticky selection: FNV-1a over the client IP, modulo the healthy count.
/// The same client maps to the same target as long as the healthy set is
/// stable.
pub struct IpHashSelector;

impl Default for IpHashSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl IpHashSelector {
    pub fn new() -> Self {
        Self
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

impl TargetSelector for IpHashSelector {
    fn select(
        &self,
        targets: &[Arc<TargetState>],
        context: &SelectionContext<'_>,
    ) -> Option<Arc<TargetState>> {
        if targets.is_empty() {
            return None;
        }
        let index = fnv1a(context.client_ip.as_bytes()) as usize % targets.len();
        Some(targets[index].clone())
    }
}

/// Factory for creating selection strategies from configuration
pub struct LoadBalancerFactory;

impl LoadBalancerFactory {
    /// Create a new selector for the configured strategy
    pub fn create_selector(strategy: LoadBalanceStrategy) -> Box<dyn TargetSelector> {
        match strategy {
            LoadBalanceStrategy::RoundRobin => RoundRobinSelector::new().boxed(),
            LoadBalanceStrategy::Random => RandomSelector::new().boxed(),
            LoadBalanceStrategy::Weighted => WeightedSelector::new().boxed(),
            LoadBalanceStrategy::LeastConnections => LeastConnectionsSelector::new().boxed(),
            LoadBalanceStrategy::IpHash => IpHashSelector::new().boxed(),
        }
    }
}
