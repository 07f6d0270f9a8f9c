use crate::OverlayError;
use quadcloud_can::{Element, RoundRobin, SplitStrategy, Zone};
use quadcloud_semantic::{DopingFunction, SemanticMapper, SEMANTIC_DIMENSIONS};
use std::sync::Arc;
use std::time::Duration;

/// The configuration of an overlay. It is built once and shared by every peer of a network.
#[derive(Clone, Debug)]
pub struct OverlayConfig {
    /// The number of dimensions of the coordinate space.
    pub dimensions: usize,
    /// The inclusive lower bound of every dimension.
    pub lower_bound: char,
    /// The exclusive upper bound of every dimension.
    pub upper_bound: char,
    /// Chooses the dimension that is split when a peer joins.
    pub split_strategy: Arc<dyn SplitStrategy>,
    /// How long a caller waits for the reply of a peer.
    pub request_timeout: Duration,
    /// The time each anycast hop reserves for aggregating the replies of its children.
    pub anycast_hop_margin: Duration,
    /// How often a leave is attempted before giving up.
    pub leave_retries: usize,
    pub leave_retry_min: Duration,
    pub leave_retry_max: Duration,
    /// The interval of the neighbor refresh. Disabled if `None`.
    pub maintenance_interval: Option<Duration>,
    /// The maximum length of the chain of peers vacating their zone during a hand-off.
    pub max_handoff_depth: usize,
    /// The number of anycast requests remembered per peer to detect duplicate deliveries.
    pub duplicate_cache_size: usize,
    /// Sinks that fail this many consecutive notifications are removed with their subscriptions.
    pub max_notification_failures: usize,
    /// How often a lookup is retried when an entry peer is unreachable.
    pub lookup_attempts: usize,
    pub doping: DopingFunction,
    /// The maximum number of code points of a mapped term.
    pub max_element_length: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            dimensions: SEMANTIC_DIMENSIONS,
            lower_bound: '0',
            upper_bound: '{',
            split_strategy: Arc::new(RoundRobin),
            request_timeout: Duration::from_secs(10),
            anycast_hop_margin: Duration::from_millis(20),
            leave_retries: 5,
            leave_retry_min: Duration::from_millis(2000),
            leave_retry_max: Duration::from_millis(5000),
            maintenance_interval: Some(Duration::from_millis(500)),
            max_handoff_depth: 64,
            duplicate_cache_size: 4096,
            max_notification_failures: 3,
            lookup_attempts: 3,
            doping: DopingFunction::default(),
            max_element_length: 256,
        }
    }
}

impl OverlayConfig {
    /// The configuration of a semantic overlay, in which quadruples are mapped to the
    /// four-dimensional space.
    pub fn semantic() -> Self {
        Self::default()
    }

    /// Overlays with another number of dimensions than [SEMANTIC_DIMENSIONS] cannot store
    /// quadruples.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_bounds(mut self, lower: char, upper: char) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    pub fn with_split_strategy(mut self, strategy: impl SplitStrategy + 'static) -> Self {
        self.split_strategy = Arc::new(strategy);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_anycast_hop_margin(mut self, margin: Duration) -> Self {
        self.anycast_hop_margin = margin;
        self
    }

    pub fn with_leave_retries(mut self, retries: usize, min: Duration, max: Duration) -> Self {
        self.leave_retries = retries;
        self.leave_retry_min = min;
        self.leave_retry_max = max;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Option<Duration>) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_max_handoff_depth(mut self, depth: usize) -> Self {
        self.max_handoff_depth = depth;
        self
    }

    pub fn with_duplicate_cache_size(mut self, size: usize) -> Self {
        self.duplicate_cache_size = size;
        self
    }

    pub fn with_max_notification_failures(mut self, failures: usize) -> Self {
        self.max_notification_failures = failures;
        self
    }

    pub fn with_doping(mut self, doping: DopingFunction) -> Self {
        self.doping = doping;
        self
    }

    pub fn with_max_element_length(mut self, length: usize) -> Self {
        self.max_element_length = length;
        self
    }

    /// Checks the consistency of the configuration.
    pub fn validate(&self) -> Result<(), OverlayError> {
        if self.dimensions == 0 {
            return Err(OverlayError::InvalidConfig(
                "the space needs at least one dimension".to_owned(),
            ));
        }
        if self.lower_bound >= self.upper_bound {
            return Err(OverlayError::InvalidConfig(format!(
                "the lower bound {:?} must be smaller than the upper bound {:?}",
                self.lower_bound, self.upper_bound
            )));
        }
        if self.leave_retry_min > self.leave_retry_max {
            return Err(OverlayError::InvalidConfig(
                "the minimum leave back-off exceeds the maximum".to_owned(),
            ));
        }
        if self.max_element_length == 0 {
            return Err(OverlayError::InvalidConfig(
                "mapped terms need at least one code point".to_owned(),
            ));
        }
        if self.duplicate_cache_size == 0 || self.lookup_attempts == 0 {
            return Err(OverlayError::InvalidConfig(
                "the duplicate cache and the lookup attempts must not be empty".to_owned(),
            ));
        }
        Ok(())
    }

    /// Whether quadruples can be mapped to the space.
    pub fn is_semantic(&self) -> bool {
        self.dimensions == SEMANTIC_DIMENSIONS
    }

    /// The zone covering the whole space.
    pub fn space(&self) -> Result<Zone, OverlayError> {
        Ok(Zone::space(
            self.dimensions,
            Element::from(self.lower_bound),
            Element::from(self.upper_bound),
        )?)
    }

    pub fn mapper(&self) -> SemanticMapper {
        SemanticMapper::new(
            self.doping,
            self.lower_bound,
            self.upper_bound,
            self.max_element_length,
        )
    }
}
