// Discovery — jittered announce replies and the discovered-node registry
//
// Every node that hears a Discover answers with an Announce. If they all
// answered immediately the replies would collide on air, so each reply is
// delayed by a uniform random draw from a configured window. The wait is
// scheduled off the receive path; polling continues while the reply is
// pending.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;

/// Bounds for the announce-reply delay, milliseconds.
///
/// The window deliberately spans hundreds of milliseconds to seconds — wide
/// enough that two co-located nodes rarely pick the same slot at LoRa
/// airtime scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterWindow {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl JitterWindow {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        JitterWindow {
            min_ms: min_ms.min(max_ms),
            max_ms: min_ms.max(max_ms),
        }
    }

    /// Draw a reply delay uniformly from the window.
    pub fn sample(&self) -> Duration {
        let ms = if self.min_ms == self.max_ms {
            self.min_ms
        } else {
            rand::thread_rng().gen_range(self.min_ms..=self.max_ms)
        };
        Duration::from_millis(ms)
    }
}

impl Default for JitterWindow {
    fn default() -> Self {
        JitterWindow {
            min_ms: 100,
            max_ms: 3000,
        }
    }
}

/// Registry of node ids learned from Announce packets.
///
/// Ordered so operator listings are stable. Written from the receive path,
/// read from the prompt loop.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Mutex<BTreeSet<String>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry::default()
    }

    /// Record an announced node. Returns `true` the first time the id is
    /// seen, `false` on re-announcements.
    pub fn insert(&self, node_id: &str) -> bool {
        self.nodes.lock().insert(node_id.to_string())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.lock().contains(node_id)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.nodes.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}
