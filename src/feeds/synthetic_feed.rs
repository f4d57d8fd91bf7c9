//! Locally generated readings
//!
//! Interactive mode walks from the last known reading with small drifts and
//! occasional spikes that cross alert thresholds. Simulation mode draws
//! every metric independently from a plausible range.

use crate::config::Mode;
use crate::events::{FeedKind, Reading, Timestamp};
use chrono::Utc;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Starting point when no reading has been seen yet
pub const BASELINE_HEART_RATE: f64 = 75.0;
pub const BASELINE_SPO2: f64 = 96.0;
pub const BASELINE_AIR_QUALITY: f64 = 50.0;

const HEART_RATE_SPIKE_CHANCE: f64 = 0.05;
const SPO2_DROP_CHANCE: f64 = 0.08;
const AIR_QUALITY_SPIKE_CHANCE: f64 = 0.15;

/// Reading generator for the synthetic feed
pub struct SyntheticGenerator<R: Rng> {
    mode: Mode,
    rng: R,
    sequence: u64,
}

impl SyntheticGenerator<StdRng> {
    /// Generator seeded from the operating system
    pub fn from_os_rng(mode: Mode) -> Self {
        Self::with_rng(mode, StdRng::from_os_rng())
    }
}

impl<R: Rng> SyntheticGenerator<R> {
    /// Create a generator drawing from `rng`
    pub fn with_rng(mode: Mode, rng: R) -> Self {
        Self {
            mode,
            rng,
            sequence: 0,
        }
    }

    /// Mode selecting the generation strategy
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Produce the next reading, timestamped `at`
    pub fn next_reading(&mut self, last: Option<Reading>, at: Timestamp) -> Reading {
        self.sequence += 1;
        let id = format!(
            "sim-{}-{}",
            at.timestamp_nanos_opt().unwrap_or_else(|| at.timestamp_micros()),
            self.sequence
        );

        match self.mode {
            Mode::Interactive => self.perturb(id, last, at),
            Mode::Simulation => self.simulate(id, at),
        }
    }

    fn perturb(&mut self, id: String, last: Option<Reading>, at: Timestamp) -> Reading {
        let (heart_rate, spo2, air_quality) = last
            .map(|reading| (reading.heart_rate, reading.spo2, reading.air_quality))
            .unwrap_or((BASELINE_HEART_RATE, BASELINE_SPO2, BASELINE_AIR_QUALITY));

        let roll: f64 = self.rng.random();
        let mut heart_rate_change = self.rng.random_range(-1.0..1.0);
        let mut spo2_change = self.rng.random_range(-0.3..0.3);
        let mut air_quality_change = self.rng.random_range(-2.0..2.0);

        // A spike replaces the drift for that metric
        if roll < HEART_RATE_SPIKE_CHANCE {
            heart_rate_change = if self.rng.random_bool(0.5) { -20.0 } else { 30.0 };
        } else if roll < SPO2_DROP_CHANCE {
            spo2_change = -10.0;
        } else if roll < AIR_QUALITY_SPIKE_CHANCE {
            air_quality_change = 60.0;
        }

        Reading::new(
            id,
            at,
            round1((heart_rate + heart_rate_change).max(0.0)),
            round1((spo2 + spo2_change).clamp(0.0, 100.0)),
            round1((air_quality + air_quality_change).max(0.0)),
            FeedKind::Synthetic,
        )
    }

    fn simulate(&mut self, id: String, at: Timestamp) -> Reading {
        Reading::new(
            id,
            at,
            round1(self.rng.random_range(60.0..=120.0)),
            round1(self.rng.random_range(90.0..=100.0)),
            round1(self.rng.random_range(50.0..=500.0)),
            FeedKind::Synthetic,
        )
        .with_temperature(round1(self.rng.random_range(34.0..=40.0)))
        .with_humidity(round1(self.rng.random_range(30.0..=100.0)))
        .with_respiratory_rate(round1(self.rng.random_range(12.0..=40.0)))
    }
}

/// Round to one decimal place
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Emit one generated reading per tick until cancelled
///
/// The last reading is read from `last_rx` each tick and handed to the
/// generator by value.
pub async fn run_synthetic_feed<R>(
    mut generator: SyntheticGenerator<R>,
    last_rx: watch::Receiver<Option<Reading>>,
    tx: mpsc::Sender<Reading>,
    period: Duration,
    cancel: CancellationToken,
) where
    R: Rng + Send,
{
    info!(
        "Synthetic feed started ({:?} mode, every {:?})",
        generator.mode(),
        period
    );
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let last = last_rx.borrow().clone();
                let reading = generator.next_reading(last, Utc::now());
                debug!("Generated reading {}", reading.id);
                if tx.send(reading).await.is_err() {
                    debug!("Reading channel closed, stopping synthetic feed");
                    break;
                }
            }
        }
    }

    info!("Synthetic feed stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn is_rounded(value: f64) -> bool {
        (value * 10.0 - (value * 10.0).round()).abs() < 1e-9
    }

    #[test]
    fn test_interactive_starts_from_baseline() {
        let mut generator = SyntheticGenerator::with_rng(Mode::Interactive, StdRng::seed_from_u64(7));
        for _ in 0..200 {
            let reading = generator.next_reading(None, at());
            assert!(reading.heart_rate >= BASELINE_HEART_RATE - 20.0);
            assert!(reading.heart_rate <= BASELINE_HEART_RATE + 30.0);
            assert!(reading.spo2 >= BASELINE_SPO2 - 10.0);
            assert!(reading.spo2 <= BASELINE_SPO2 + 0.3);
            assert!(reading.air_quality >= BASELINE_AIR_QUALITY - 2.0);
            assert!(reading.air_quality <= BASELINE_AIR_QUALITY + 60.0);
            assert_eq!(reading.origin, FeedKind::Synthetic);
            assert!(reading.temperature_c.is_none());
        }
    }

    #[test]
    fn test_interactive_walks_from_last_reading() {
        let mut generator = SyntheticGenerator::with_rng(Mode::Interactive, StdRng::seed_from_u64(1));
        let last = Reading::new("prev", at(), 110.0, 88.0, 200.0, FeedKind::Poll);

        let reading = generator.next_reading(Some(last), at());
        assert!((reading.heart_rate - 110.0).abs() <= 30.0);
        assert!((reading.spo2 - 88.0).abs() <= 10.0);
        assert!((reading.air_quality - 200.0).abs() <= 60.0);
    }

    #[test]
    fn test_interactive_values_are_rounded_and_clamped() {
        let mut generator = SyntheticGenerator::with_rng(Mode::Interactive, StdRng::seed_from_u64(3));
        let mut last = Some(Reading::new("edge", at(), 0.0, 100.0, 0.0, FeedKind::Synthetic));

        for _ in 0..500 {
            let reading = generator.next_reading(last.clone(), at());
            assert!(reading.heart_rate >= 0.0);
            assert!(reading.spo2 >= 0.0 && reading.spo2 <= 100.0);
            assert!(reading.air_quality >= 0.0);
            assert!(is_rounded(reading.heart_rate));
            assert!(is_rounded(reading.spo2));
            assert!(is_rounded(reading.air_quality));
            last = Some(reading);
        }
    }

    #[test]
    fn test_interactive_eventually_spikes() {
        let mut generator = SyntheticGenerator::with_rng(Mode::Interactive, StdRng::seed_from_u64(11));
        let spiked = (0..1000)
            .map(|_| generator.next_reading(None, at()))
            .any(|reading| reading.heart_rate < 60.0 || reading.heart_rate > 100.0);
        assert!(spiked);
    }

    #[test]
    fn test_simulation_ranges() {
        let mut generator = SyntheticGenerator::with_rng(Mode::Simulation, StdRng::seed_from_u64(5));
        for _ in 0..200 {
            let reading = generator.next_reading(None, at());
            assert!((60.0..=120.0).contains(&reading.heart_rate));
            assert!((90.0..=100.0).contains(&reading.spo2));
            assert!((50.0..=500.0).contains(&reading.air_quality));
            assert!((34.0..=40.0).contains(&reading.temperature_c.unwrap()));
            assert!((30.0..=100.0).contains(&reading.humidity_pct.unwrap()));
            assert!((12.0..=40.0).contains(&reading.respiratory_rate.unwrap()));
            assert!(reading.validate().is_ok());
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let mut generator = SyntheticGenerator::with_rng(Mode::Simulation, StdRng::seed_from_u64(9));
        let first = generator.next_reading(None, at());
        let second = generator.next_reading(None, at());
        assert_ne!(first.id, second.id);
        assert!(first.id.starts_with("sim-"));
    }

    #[test]
    fn test_round1() {
        assert_eq!(round1(72.46), 72.5);
        assert_eq!(round1(96.04), 96.0);
        assert_eq!(round1(-0.04), -0.0);
    }

    #[tokio::test]
    async fn test_feed_emits_until_cancelled() {
        let generator = SyntheticGenerator::with_rng(Mode::Interactive, StdRng::seed_from_u64(2));
        let (_last_tx, last_rx) = watch::channel(None);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_synthetic_feed(
            generator,
            last_rx,
            tx,
            Duration::from_millis(5),
            cancel.clone(),
        ));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_ne!(first.id, second.id);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_feed_uses_published_last_reading() {
        let generator = SyntheticGenerator::with_rng(Mode::Interactive, StdRng::seed_from_u64(4));
        let last = Reading::new("pushed", at(), 140.0, 80.0, 400.0, FeedKind::Push);
        let (_last_tx, last_rx) = watch::channel(Some(last));
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_synthetic_feed(
            generator,
            last_rx,
            tx,
            Duration::from_millis(5),
            cancel.clone(),
        ));

        let reading = rx.recv().await.unwrap();
        assert!(reading.heart_rate >= 110.0);
        assert!(reading.air_quality >= 340.0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
