//! Relay manager
//!
//! Single owner of the actuator and of each relay's on/off state. Every
//! operation on one relay holds that relay's lock for its whole duration,
//! so schedule, rule and command writes never interleave on a pin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use fleet_model::Relay;
use fleet_rules::RelayActuation;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::hardware::{Actuator, ActuatorError};

/// Default bound for one actuator call
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

struct RelaySlot {
    pin: u8,
    boot_power: bool,
    /// Last state successfully written to the pin
    state: Mutex<bool>,
    /// Set when a timed-out write left the pin level unknown; the next
    /// write goes to hardware even if the cached state already matches
    unverified: AtomicBool,
}

fn on_off(state: bool) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}

/// Owns every relay output of the node
pub struct RelayManager {
    slots: HashMap<String, RelaySlot>,
    /// Declaration order, used for boot initialization
    order: Vec<String>,
    actuator: Arc<dyn Actuator>,
    write_timeout: Duration,
}

impl RelayManager {
    /// Build the manager; duplicate ids or pins are rejected
    pub fn new(
        relays: &[Relay],
        actuator: Arc<dyn Actuator>,
        write_timeout: Duration,
    ) -> Result<Self> {
        let mut slots = HashMap::with_capacity(relays.len());
        let mut order = Vec::with_capacity(relays.len());
        let mut pins = HashMap::new();

        for relay in relays {
            if let Some(other) = pins.insert(relay.pin, relay.id.clone()) {
                bail!(
                    "Relays {} and {} share pin {}",
                    other,
                    relay.id,
                    relay.pin
                );
            }
            let slot = RelaySlot {
                pin: relay.pin,
                boot_power: relay.boot_power,
                state: Mutex::new(relay.boot_power),
                unverified: AtomicBool::new(false),
            };
            if slots.insert(relay.id.clone(), slot).is_some() {
                bail!("Duplicate relay id {}", relay.id);
            }
            order.push(relay.id.clone());
        }

        info!(
            "RelayManager created with {} relays ({} backend)",
            order.len(),
            actuator.backend_name()
        );
        Ok(Self {
            slots,
            order,
            actuator,
            write_timeout,
        })
    }

    /// Configure every pin as output and drive it to `boot_power`
    ///
    /// Runs once, in declaration order. Any failure is fatal: the node must
    /// not run with half-initialized outputs.
    pub async fn init(&self) -> Result<()> {
        for relay_id in &self.order {
            let Some(slot) = self.slots.get(relay_id) else {
                continue;
            };
            let mut state = slot.state.lock().await;

            let pin = slot.pin;
            self.run_blocking(move |actuator| actuator.configure_output(pin))
                .await
                .with_context(|| {
                    format!("Failed to configure pin {} for relay {}", pin, relay_id)
                })?;
            self.hw_write(slot, slot.boot_power)
                .await
                .with_context(|| format!("Failed to set boot state of relay {}", relay_id))?;

            *state = slot.boot_power;
            info!(
                "Relay {} initialized to {} at boot",
                relay_id,
                on_off(slot.boot_power)
            );
        }
        Ok(())
    }

    pub fn contains(&self, relay_id: &str) -> bool {
        self.slots.contains_key(relay_id)
    }

    /// Relay ids in declaration order
    pub fn relay_ids(&self) -> &[String] {
        &self.order
    }

    /// Turn a relay on; `false` when it already was on or the write failed
    pub async fn set_on(&self, relay_id: &str) -> bool {
        self.set_state(relay_id, true).await
    }

    /// Turn a relay off; `false` when it already was off or the write failed
    pub async fn set_off(&self, relay_id: &str) -> bool {
        self.set_state(relay_id, false).await
    }

    /// Flip a relay for `duration`, then restore its previous state
    ///
    /// The relay stays locked for the whole pulse.
    pub async fn pulse(&self, relay_id: &str, duration: Duration) -> bool {
        let Some(slot) = self.slot(relay_id) else {
            return false;
        };
        let mut state = slot.state.lock().await;
        let original = *state;
        let flipped = !original;

        if let Err(e) = self.hw_write(slot, flipped).await {
            error!("Relay {}: pulse aborted, write failed: {}", relay_id, e);
            return false;
        }
        info!(
            "Pulsing relay {}: set to {} for {:?}",
            relay_id,
            on_off(flipped),
            duration
        );

        tokio::time::sleep(duration).await;

        if let Err(e) = self.hw_write(slot, original).await {
            *state = flipped;
            error!(
                "Relay {}: failed to restore {} after pulse, left {}: {}",
                relay_id,
                on_off(original),
                on_off(flipped),
                e
            );
            return false;
        }
        info!("Relay {} returned to {}", relay_id, on_off(original));
        true
    }

    /// Cached state; an unknown id reads as off
    pub async fn read_state(&self, relay_id: &str) -> bool {
        match self.slot(relay_id) {
            Some(slot) => *slot.state.lock().await,
            None => false,
        }
    }

    /// True when no relay operation is in flight
    pub fn is_idle(&self) -> bool {
        self.slots.values().all(|slot| slot.state.try_lock().is_ok())
    }

    async fn set_state(&self, relay_id: &str, on: bool) -> bool {
        let Some(slot) = self.slot(relay_id) else {
            return false;
        };
        let mut state = slot.state.lock().await;
        if *state == on && !slot.unverified.load(Ordering::SeqCst) {
            debug!("Relay {} is already {}", relay_id, on_off(on));
            return false;
        }

        match self.hw_write(slot, on).await {
            Ok(()) => {
                *state = on;
                info!("Relay {} turned {}", relay_id, on_off(on));
                true
            },
            Err(e) => {
                error!(
                    "Relay {}: failed to turn {} (pin {}): {}",
                    relay_id,
                    on_off(on),
                    slot.pin,
                    e
                );
                false
            },
        }
    }

    fn slot(&self, relay_id: &str) -> Option<&RelaySlot> {
        let slot = self.slots.get(relay_id);
        if slot.is_none() {
            warn!("Relay {} not found", relay_id);
        }
        slot
    }

    /// Write one pin level; the caller holds the slot's lock
    ///
    /// A write that outlives the timeout cannot be cancelled, so the lock
    /// stays held until it finishes and the pin is read back. The result
    /// then reflects the level the pin actually ended at.
    async fn hw_write(&self, slot: &RelaySlot, on: bool) -> std::result::Result<(), ActuatorError> {
        let pin = slot.pin;
        let mut task = self.spawn_call(move |actuator| actuator.write(pin, on));
        match tokio::time::timeout(self.write_timeout, &mut task).await {
            Ok(joined) => flatten(joined)?,
            Err(_) => return self.settle_late_write(slot, task, on).await,
        }
        slot.unverified.store(false, Ordering::SeqCst);
        debug!("Set pin {} to {}", pin, if on { "HIGH" } else { "LOW" });
        Ok(())
    }

    async fn settle_late_write(
        &self,
        slot: &RelaySlot,
        task: JoinHandle<std::result::Result<(), ActuatorError>>,
        on: bool,
    ) -> std::result::Result<(), ActuatorError> {
        let pin = slot.pin;
        let timeout_ms = self.write_timeout.as_millis() as u64;
        warn!(
            "Write to pin {} exceeded {} ms, waiting for it to settle",
            pin, timeout_ms
        );
        if let Err(e) = flatten(task.await) {
            warn!("Late write to pin {} failed: {}", pin, e);
        }

        match self.run_blocking(move |actuator| actuator.read(pin)).await {
            Ok(level) => {
                slot.unverified.store(false, Ordering::SeqCst);
                if level == on {
                    warn!("Late write to pin {} landed, pin is {}", pin, on_off(level));
                    Ok(())
                } else {
                    Err(ActuatorError::Timeout(timeout_ms))
                }
            },
            Err(e) => {
                slot.unverified.store(true, Ordering::SeqCst);
                error!("Pin {} level unknown after timed-out write: {}", pin, e);
                Err(ActuatorError::Timeout(timeout_ms))
            },
        }
    }

    fn spawn_call<T, F>(&self, f: F) -> JoinHandle<std::result::Result<T, ActuatorError>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Actuator) -> std::result::Result<T, ActuatorError> + Send + 'static,
    {
        let actuator = self.actuator.clone();
        tokio::task::spawn_blocking(move || f(actuator.as_ref()))
    }

    async fn run_blocking<T, F>(&self, f: F) -> std::result::Result<T, ActuatorError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Actuator) -> std::result::Result<T, ActuatorError> + Send + 'static,
    {
        match tokio::time::timeout(self.write_timeout, self.spawn_call(f)).await {
            Ok(joined) => flatten(joined),
            Err(_) => Err(ActuatorError::Timeout(self.write_timeout.as_millis() as u64)),
        }
    }
}

fn flatten<T>(
    joined: std::result::Result<std::result::Result<T, ActuatorError>, tokio::task::JoinError>,
) -> std::result::Result<T, ActuatorError> {
    joined.map_err(|e| ActuatorError::TaskFailed(e.to_string()))?
}

#[async_trait]
impl RelayActuation for RelayManager {
    async fn set_on(&self, relay_id: &str) -> bool {
        RelayManager::set_on(self, relay_id).await
    }

    async fn set_off(&self, relay_id: &str) -> bool {
        RelayManager::set_off(self, relay_id).await
    }

    async fn pulse(&self, relay_id: &str, duration: Duration) -> bool {
        RelayManager::pulse(self, relay_id, duration).await
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::hardware::MemoryActuator;

    fn relay(id: &str, pin: u8, boot_power: bool) -> Relay {
        Relay {
            id: id.into(),
            name: id.into(),
            pin,
            sensor_address: "0x40".into(),
            boot_power,
            monitor: false,
            schedule: None,
            rules: Vec::new(),
        }
    }

    async fn manager(relays: &[Relay]) -> (RelayManager, Arc<MemoryActuator>) {
        let actuator = Arc::new(MemoryActuator::new());
        let manager = RelayManager::new(relays, actuator.clone(), DEFAULT_WRITE_TIMEOUT).unwrap();
        manager.init().await.unwrap();
        (manager, actuator)
    }

    #[tokio::test]
    async fn test_init_drives_boot_power() {
        let (manager, actuator) =
            manager(&[relay("router", 17, true), relay("camera", 27, false)]).await;

        assert_eq!(actuator.level(17), Some(true));
        assert_eq!(actuator.level(27), Some(false));
        assert_eq!(actuator.write_count(17), 1);
        assert_eq!(actuator.write_count(27), 1);
        assert!(manager.read_state("router").await);
        assert!(!manager.read_state("camera").await);
        assert_eq!(manager.relay_ids(), ["router", "camera"]);
    }

    #[tokio::test]
    async fn test_init_failure_is_fatal() {
        let actuator = Arc::new(MemoryActuator::new());
        actuator.set_failing(Some("no gpio"));
        let manager =
            RelayManager::new(&[relay("router", 17, true)], actuator, DEFAULT_WRITE_TIMEOUT)
                .unwrap();

        let err = manager.init().await.unwrap_err();
        assert!(err.to_string().contains("relay router"));
    }

    #[test]
    fn test_duplicate_pin_rejected() {
        let actuator = Arc::new(MemoryActuator::new());
        let result = RelayManager::new(
            &[relay("router", 17, false), relay("camera", 17, false)],
            actuator,
            DEFAULT_WRITE_TIMEOUT,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_set_on_is_idempotent() {
        let (manager, actuator) = manager(&[relay("router", 17, false)]).await;

        let first = manager.set_on("router").await;
        let second = manager.set_on("router").await;

        assert_eq!((first, second), (true, false));
        // boot write + one state change
        assert_eq!(actuator.write_count(17), 2);
        assert!(manager.read_state("router").await);
    }

    #[tokio::test]
    async fn test_unknown_relay_is_noop() {
        let (manager, _) = manager(&[relay("router", 17, false)]).await;

        assert!(!manager.set_on("ghost").await);
        assert!(!manager.set_off("ghost").await);
        assert!(!manager.pulse("ghost", Duration::from_millis(1)).await);
        assert!(!manager.read_state("ghost").await);
        assert!(!manager.contains("ghost"));
    }

    #[tokio::test]
    async fn test_write_failure_keeps_cached_state() {
        let (manager, actuator) = manager(&[relay("router", 17, false)]).await;

        actuator.set_failing(Some("relay board unpowered"));
        assert!(!manager.set_on("router").await);
        assert!(!manager.read_state("router").await);

        // Next attempt retries the write
        actuator.set_failing(None);
        assert!(manager.set_on("router").await);
        assert_eq!(actuator.level(17), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_restores_original_state() {
        let (manager, actuator) = manager(&[relay("strobe", 22, false)]).await;

        assert!(manager.pulse("strobe", Duration::from_secs(2)).await);

        assert_eq!(actuator.level(22), Some(false));
        assert_eq!(actuator.write_count(22), 3);
        assert!(!manager.read_state("strobe").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_serializes_with_set_calls() {
        let (manager, actuator) = manager(&[relay("strobe", 22, false)]).await;
        let manager = Arc::new(manager);

        let pulsing = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.pulse("strobe", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!manager.is_idle());

        // Waits for the pulse, then sees the restored OFF state
        assert!(manager.set_on("strobe").await);
        assert!(pulsing.await.unwrap());
        assert_eq!(actuator.level(22), Some(true));
        assert!(manager.is_idle());
    }

    #[tokio::test]
    async fn test_concurrent_set_on_writes_once() {
        let (manager, actuator) = manager(&[relay("router", 17, false)]).await;
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.set_on("router").await })
            })
            .collect();
        let mut changed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                changed += 1;
            }
        }

        assert_eq!(changed, 1);
        assert_eq!(actuator.write_count(17), 2);
    }

    /// Memory pins whose writes can be made slower than the manager's timeout
    struct SlowActuator {
        inner: MemoryActuator,
        slow_writes: AtomicBool,
        failing_reads: AtomicBool,
    }

    impl SlowActuator {
        fn new() -> Self {
            Self {
                inner: MemoryActuator::new(),
                slow_writes: AtomicBool::new(false),
                failing_reads: AtomicBool::new(false),
            }
        }
    }

    impl Actuator for SlowActuator {
        fn configure_output(&self, pin: u8) -> std::result::Result<(), ActuatorError> {
            self.inner.configure_output(pin)
        }

        fn write(&self, pin: u8, on: bool) -> std::result::Result<(), ActuatorError> {
            if self.slow_writes.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(300));
            }
            self.inner.write(pin, on)
        }

        fn read(&self, pin: u8) -> std::result::Result<bool, ActuatorError> {
            if self.failing_reads.load(Ordering::SeqCst) {
                return Err(ActuatorError::Hardware {
                    pin,
                    message: "bus busy".into(),
                });
            }
            self.inner.read(pin)
        }

        fn backend_name(&self) -> &'static str {
            "slow"
        }
    }

    async fn slow_manager() -> (RelayManager, Arc<SlowActuator>) {
        let actuator = Arc::new(SlowActuator::new());
        let manager = RelayManager::new(
            &[relay("router", 17, false)],
            actuator.clone(),
            Duration::from_millis(50),
        )
        .unwrap();
        manager.init().await.unwrap();
        actuator.slow_writes.store(true, Ordering::SeqCst);
        (manager, actuator)
    }

    #[tokio::test]
    async fn test_late_write_keeps_cache_in_sync() {
        let (manager, actuator) = slow_manager().await;

        // Times out, then lands while the relay is still locked
        assert!(manager.set_on("router").await);
        assert!(manager.read_state("router").await);
        assert_eq!(actuator.inner.level(17), Some(true));

        assert!(manager.set_off("router").await);
        assert!(!manager.read_state("router").await);
        assert_eq!(actuator.inner.level(17), Some(false));
        assert!(manager.is_idle());
    }

    #[tokio::test]
    async fn test_unknown_level_forces_next_write() {
        let (manager, actuator) = slow_manager().await;
        actuator.failing_reads.store(true, Ordering::SeqCst);

        // The write lands but cannot be confirmed
        assert!(!manager.set_on("router").await);
        assert!(!manager.read_state("router").await);
        assert_eq!(actuator.inner.level(17), Some(true));

        actuator.failing_reads.store(false, Ordering::SeqCst);
        actuator.slow_writes.store(false, Ordering::SeqCst);

        // Cached OFF no longer short-circuits: the pin is driven back to OFF
        assert!(manager.set_off("router").await);
        assert_eq!(actuator.inner.level(17), Some(false));
        assert_eq!(actuator.inner.write_count(17), 3);

        assert!(!manager.set_off("router").await);
        assert_eq!(actuator.inner.write_count(17), 3);
    }
}
