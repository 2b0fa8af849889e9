//! Network Monitor
//!
//! Classifies connection quality into fast / slow / offline and notifies
//! listeners on class transitions. Observational only.

use std::fmt;

use serde::Deserialize;

/// Effective connection type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EffectiveType {
    Slow2G,
    TwoG,
    ThreeG,
    #[default]
    FourG,
}

impl EffectiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slow2G => "slow-2g",
            Self::TwoG => "2g",
            Self::ThreeG => "3g",
            Self::FourG => "4g",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Some(Self::Slow2G),
            "2g" => Some(Self::TwoG),
            "3g" => Some(Self::ThreeG),
            "4g" => Some(Self::FourG),
            _ => None,
        }
    }

    /// Estimate effective type from RTT and downlink
    pub fn estimate(rtt_ms: u32, downlink_mbps: f64) -> Self {
        if rtt_ms >= 2000 || downlink_mbps < 0.05 {
            Self::Slow2G
        } else if rtt_ms >= 1400 || downlink_mbps < 0.07 {
            Self::TwoG
        } else if rtt_ms >= 270 || downlink_mbps < 1.5 {
            Self::ThreeG
        } else {
            Self::FourG
        }
    }

    pub fn is_slow(&self) -> bool {
        matches!(self, Self::Slow2G | Self::TwoG)
    }
}

/// Coarse network class consumed by variant selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkClass {
    #[default]
    Fast,
    Slow,
    Offline,
}

/// Raw reading from a network status probe
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkReading {
    pub online: bool,
    pub effective_type: Option<String>,
    /// Round-trip time in ms
    pub rtt: Option<u32>,
    /// Mbps
    pub downlink: Option<f64>,
    pub save_data: bool,
}

impl Default for NetworkReading {
    fn default() -> Self {
        Self {
            online: true,
            effective_type: None,
            rtt: None,
            downlink: None,
            save_data: false,
        }
    }
}

impl NetworkReading {
    pub fn online(effective_type: &str) -> Self {
        Self {
            effective_type: Some(effective_type.to_string()),
            ..Default::default()
        }
    }

    pub fn offline() -> Self {
        Self {
            online: false,
            ..Default::default()
        }
    }
}

/// Current network condition
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkCondition {
    pub class: NetworkClass,
    /// Raw effective-type string as reported
    pub effective_type: String,
}

impl NetworkCondition {
    pub fn new(class: NetworkClass, effective_type: &str) -> Self {
        Self {
            class,
            effective_type: effective_type.to_string(),
        }
    }

    /// Condition used when no network probe exists
    pub fn unmonitored() -> Self {
        Self::new(NetworkClass::Fast, "unknown")
    }

    pub fn is_offline(&self) -> bool {
        self.class == NetworkClass::Offline
    }

    pub fn is_slow(&self) -> bool {
        self.class == NetworkClass::Slow
    }

    /// Classify a probe reading
    pub fn classify(reading: &NetworkReading) -> Self {
        let raw = reading.effective_type.clone().unwrap_or_else(|| {
            match (reading.rtt, reading.downlink) {
                (Some(rtt), Some(downlink)) => EffectiveType::estimate(rtt, downlink).as_str().to_string(),
                _ => "unknown".to_string(),
            }
        });

        let class = if !reading.online {
            NetworkClass::Offline
        } else if reading.save_data || EffectiveType::parse(&raw).is_some_and(|t| t.is_slow()) {
            NetworkClass::Slow
        } else {
            NetworkClass::Fast
        };

        Self { class, effective_type: raw }
    }
}

/// Listener handle returned by [`NetworkMonitor::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&NetworkCondition)>;

/// Tracks the current network class
pub struct NetworkMonitor {
    current: NetworkCondition,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("current", &self.current)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkCondition::unmonitored())
    }
}

impl NetworkMonitor {
    pub fn new(initial: NetworkCondition) -> Self {
        Self {
            current: initial,
            listeners: Vec::new(),
            next_listener: 1,
        }
    }

    pub fn from_reading(reading: &NetworkReading) -> Self {
        Self::new(NetworkCondition::classify(reading))
    }

    pub fn current(&self) -> &NetworkCondition {
        &self.current
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&NetworkCondition) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) {
        self.listeners.retain(|(listener, _)| *listener != id);
    }

    /// Apply a reading. Returns the new condition when the class changed.
    pub fn update(&mut self, reading: &NetworkReading) -> Option<NetworkCondition> {
        let next = NetworkCondition::classify(reading);
        let changed = next.class != self.current.class;
        self.current = next;

        if !changed {
            return None;
        }

        tracing::debug!("network class -> {:?} ({})", self.current.class, self.current.effective_type);
        for (_, listener) in &mut self.listeners {
            listener(&self.current);
        }
        Some(self.current.clone())
    }
}
