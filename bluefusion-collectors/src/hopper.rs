use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bluefusion_types::Address;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::sniffer::HopTarget;

const DEFAULT_HOP_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_ACTIVITY_WINDOW: Duration = Duration::from_secs(10);
const ADVERTISING_CHANNELS: [u8; 3] = [37, 38, 39];
const SMART_TOP_N: usize = 10;

fn validate_channels(channels: &[u8]) -> Vec<u8> {
    channels.iter().copied().filter(|&c| c <= 39).collect()
}

/// Rolling statistics kept across the hopper's lifetime.
#[derive(Debug, Clone, Default)]
pub struct HopperStats {
    pub total_hops: u64,
    pub per_channel_packets: HashMap<u8, u64>,
    pub elapsed: Duration,
}

impl HopperStats {
    pub fn hops_per_sec(&self) -> f64 {
        if self.elapsed.as_secs_f64() == 0.0 {
            0.0
        } else {
            self.total_hops as f64 / self.elapsed.as_secs_f64()
        }
    }
}

struct Inner {
    channels: Vec<u8>,
    index: usize,
    stats: HopperStats,
    started_at: Instant,
    window_started_at: Instant,
    window_counts: HashMap<u8, u64>,
    pinned: Option<Address>,
}

/// Periodic channel-hopping scheduler for a sniffer source, in fixed or
/// smart (adaptive) mode.
pub struct ChannelHopper<T> {
    target: Arc<T>,
    inner: Arc<Mutex<Inner>>,
    hop_interval: Duration,
    smart: bool,
    activity_window: Duration,
}

impl<T: HopTarget + 'static> ChannelHopper<T> {
    pub fn advertising(target: Arc<T>) -> Self {
        Self::with_channels(target, ADVERTISING_CHANNELS.to_vec(), false)
    }

    pub fn data(target: Arc<T>) -> Self {
        Self::with_channels(target, (0u8..=36).collect(), false)
    }

    pub fn custom(target: Arc<T>, channels: &[u8]) -> Self {
        Self::with_channels(target, validate_channels(channels), false)
    }

    pub fn smart(target: Arc<T>, channels: &[u8]) -> Self {
        Self::with_channels(target, validate_channels(channels), true)
    }

    fn with_channels(target: Arc<T>, channels: Vec<u8>, smart: bool) -> Self {
        let now = Instant::now();
        ChannelHopper {
            target,
            inner: Arc::new(Mutex::new(Inner {
                channels,
                index: 0,
                stats: HopperStats::default(),
                started_at: now,
                window_started_at: now,
                window_counts: HashMap::new(),
                pinned: None,
            })),
            hop_interval: DEFAULT_HOP_INTERVAL,
            smart,
            activity_window: DEFAULT_ACTIVITY_WINDOW,
        }
    }

    pub fn with_hop_interval(mut self, d: Duration) -> Self {
        self.hop_interval = d;
        self
    }

    pub fn with_activity_window(mut self, d: Duration) -> Self {
        self.activity_window = d;
        self
    }

    /// Record a packet observed on `channel`, feeding the smart variant's
    /// reranking window.
    pub async fn record_packet(&self, channel: u8) {
        let mut inner = self.inner.lock().await;
        *inner.stats.per_channel_packets.entry(channel).or_insert(0) += 1;
        *inner.window_counts.entry(channel).or_insert(0) += 1;
    }

    pub async fn stats(&self) -> HopperStats {
        let mut inner = self.inner.lock().await;
        inner.stats.elapsed = inner.started_at.elapsed();
        inner.stats.clone()
    }

    /// Pin the dongle to `address`'s traffic: sends `FOLLOW <addr>` and
    /// stops hopping until `unfollow` is called.
    pub async fn follow(&self, address: Address) {
        let mut inner = self.inner.lock().await;
        inner.pinned = Some(address);
        drop(inner);
        self.target.follow(address);
    }

    /// Release a previous `follow`, reverting to the prior hop schedule.
    pub async fn unfollow(&self) {
        let mut inner = self.inner.lock().await;
        inner.pinned = None;
        drop(inner);
        self.target.unfollow();
    }

    /// The address currently being followed, if any.
    pub async fn pinned(&self) -> Option<Address> {
        self.inner.lock().await.pinned
    }

    /// Run the hop timer on the current task until cancelled.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.hop_interval);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }

    async fn tick(&self) {
        let mut inner = self.inner.lock().await;

        if inner.pinned.is_some() {
            return;
        }

        if self.smart && inner.window_started_at.elapsed() >= self.activity_window {
            rerank(&mut inner);
        }

        if inner.channels.is_empty() {
            return;
        }
        inner.index %= inner.channels.len();
        let channel = inner.channels[inner.index];
        inner.index = (inner.index + 1) % inner.channels.len();
        inner.stats.total_hops += 1;
        drop(inner);

        self.target.hop(channel);
    }
}

fn rerank(inner: &mut Inner) {
    let mut ranked: Vec<(u8, u64)> = inner.window_counts.iter().map(|(&c, &n)| (c, n)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut kept: Vec<u8> = ranked
        .into_iter()
        .filter(|&(channel, count)| count > 0 || ADVERTISING_CHANNELS.contains(&channel))
        .take(SMART_TOP_N)
        .map(|(channel, _)| channel)
        .collect();

    for &adv in &ADVERTISING_CHANNELS {
        if !kept.contains(&adv) {
            kept.push(adv);
        }
    }
    kept.sort_unstable();
    kept.dedup();

    inner.channels = kept;
    inner.index = 0;
    inner.window_counts.clear();
    inner.window_started_at = Instant::now();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};

    struct RecordingTarget {
        last_hop: AtomicU8,
        hop_count: std::sync::atomic::AtomicUsize,
    }

    impl HopTarget for RecordingTarget {
        fn hop(&self, channel: u8) {
            self.last_hop.store(channel, Ordering::SeqCst);
            self.hop_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn advertising_mode_uses_the_three_advertising_channels() {
        let target = Arc::new(RecordingTarget { last_hop: AtomicU8::new(0), hop_count: Default::default() });
        let hopper = ChannelHopper::advertising(target);
        hopper.tick().await;
        hopper.tick().await;
        hopper.tick().await;
        let inner = hopper.inner.lock().await;
        assert_eq!(inner.channels, ADVERTISING_CHANNELS.to_vec());
    }

    #[tokio::test]
    async fn custom_channel_list_filters_out_of_range_values() {
        let target = Arc::new(RecordingTarget { last_hop: AtomicU8::new(0), hop_count: Default::default() });
        let hopper = ChannelHopper::custom(target, &[10, 40, 200, 20]);
        let inner = hopper.inner.lock().await;
        assert_eq!(inner.channels, vec![10, 20]);
    }

    #[tokio::test]
    async fn smart_rerank_keeps_advertising_channels_even_with_no_activity() {
        let target = Arc::new(RecordingTarget { last_hop: AtomicU8::new(0), hop_count: Default::default() });
        let hopper = ChannelHopper::smart(target, &(0u8..=36).collect::<Vec<_>>());
        {
            let mut inner = hopper.inner.lock().await;
            inner.window_counts.insert(5, 50);
            inner.window_counts.insert(6, 10);
            inner.window_started_at = Instant::now() - Duration::from_secs(11);
        }
        hopper.tick().await;
        let inner = hopper.inner.lock().await;
        for adv in ADVERTISING_CHANNELS {
            assert!(inner.channels.contains(&adv));
        }
        assert!(inner.channels.contains(&5));
    }

    #[tokio::test]
    async fn total_hops_increments_each_tick() {
        let target = Arc::new(RecordingTarget { last_hop: AtomicU8::new(0), hop_count: Default::default() });
        let hopper = ChannelHopper::advertising(target);
        hopper.tick().await;
        hopper.tick().await;
        assert_eq!(hopper.stats().await.total_hops, 2);
    }

    #[tokio::test]
    async fn pinned_mode_stops_hopping_until_unfollowed() {
        let target = Arc::new(RecordingTarget { last_hop: AtomicU8::new(0), hop_count: Default::default() });
        let hopper = ChannelHopper::advertising(target);
        let address: Address = "AA:BB:CC:DD:EE:01".parse().unwrap();

        hopper.follow(address).await;
        assert_eq!(hopper.pinned().await, Some(address));
        hopper.tick().await;
        hopper.tick().await;
        assert_eq!(hopper.stats().await.total_hops, 0);

        hopper.unfollow().await;
        assert_eq!(hopper.pinned().await, None);
        hopper.tick().await;
        assert_eq!(hopper.stats().await.total_hops, 1);
    }
}
