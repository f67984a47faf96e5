pub mod domain {
    use std::time::Duration;

    /// One captured link-layer frame.
    #[derive(Debug, Clone)]
    pub struct Frame {
        /// Monotonic capture counter, only used for shard routing.
        pub id: u64,
        /// Capture time in milliseconds since the Unix epoch.
        pub timestamp: u64,
        pub data: Vec<u8>,
    }

    impl Frame {
        pub fn new(id: u64, timestamp: u64, data: Vec<u8>) -> Self {
            Frame { id, timestamp, data }
        }
    }

    /// A memcache response observation handed from a worker to the stats
    /// aggregator.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Event {
        pub key: String,
        pub size: u64,
    }

    impl Event {
        pub fn new(key: impl Into<String>, size: u64) -> Self {
            Event {
                key: key.into(),
                size,
            }
        }
    }

    /// Point-in-time copy of one key's statistics.
    #[derive(Debug, Clone, PartialEq)]
    pub struct KeyStat {
        pub key: String,
        /// Total responses observed for this key.
        pub count: u64,
        /// Requests per second over the measurement window.
        pub rate: f64,
        /// Object size carried by the most recent response, in bytes.
        pub size: u64,
        /// Time since the key was last observed.
        pub last_seen: Duration,
    }

    impl KeyStat {
        /// Bytes per second served for this key.
        pub fn bandwidth(&self) -> f64 {
            self.rate * self.size as f64
        }
    }
}
