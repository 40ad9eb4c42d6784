//! BLE transport for FTMS trainers.
//!
//! Scans for a trainer advertising the Fitness Machine Service, connects,
//! and exposes Indoor Bike Data notifications and Control Point writes
//! through the [`Transport`] trait.

use crate::sensors::ftms::FTMS_SERVICE_UUID;
use crate::sensors::types::{ConnectionState, DiscoveredTrainer, SensorError};
use crate::session::transport::{
    Characteristic, ConnectionHandle, DisconnectCallback, NotificationStream, Transport,
};
use crate::storage::config::SensorSettings;
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic as GattCharacteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

/// A single FTMS trainer reached over BLE.
pub struct BleTrainer {
    /// Link settings
    settings: SensorSettings,
    /// BLE adapter
    adapter: Adapter,
    /// Connected peripheral
    peripheral: Mutex<Option<Peripheral>>,
    /// Current connection state
    state: Arc<StdMutex<ConnectionState>>,
    /// Callbacks fired on link loss
    disconnect_callbacks: Arc<StdMutex<Vec<DisconnectCallback>>>,
}

impl BleTrainer {
    /// Initialize the first available BLE adapter.
    pub async fn initialize(settings: SensorSettings) -> Result<Self, SensorError> {
        tracing::info!("Initializing BLE adapter");

        let manager = Manager::new()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(SensorError::AdapterNotFound)?;

        tracing::info!("BLE adapter initialized");

        Ok(Self {
            settings,
            adapter,
            peripheral: Mutex::new(None),
            state: Arc::new(StdMutex::new(ConnectionState::Disconnected)),
            disconnect_callbacks: Arc::new(StdMutex::new(Vec::new())),
        })
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Disconnected)
    }

    fn set_state(&self, state: ConnectionState) {
        set_state(&self.state, state);
    }

    /// Scan until a matching trainer is seen.
    async fn find_trainer(&self) -> Result<(Peripheral, DiscoveredTrainer), SensorError> {
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| SensorError::ScanFailed(e.to_string()))?;

        // Peripherals cached from an earlier scan do not emit discovery events.
        let known = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;
        for peripheral in known {
            if let Some(trainer) = self.classify_peripheral(&peripheral).await {
                return Ok((peripheral, trainer));
            }
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };

            let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                continue;
            };

            if let Some(trainer) = self.classify_peripheral(&peripheral).await {
                return Ok((peripheral, trainer));
            }
        }

        Err(SensorError::TrainerNotFound)
    }

    /// Check a peripheral's advertisement against the FTMS service and the
    /// configured name filter.
    async fn classify_peripheral(&self, peripheral: &Peripheral) -> Option<DiscoveredTrainer> {
        let properties = peripheral.properties().await.ok()??;

        if !properties.services.contains(&FTMS_SERVICE_UUID) {
            return None;
        }

        let name = properties
            .local_name
            .unwrap_or_else(|| "Unknown Trainer".to_string());

        if let Some(filter) = &self.settings.device_name_filter {
            if !name.contains(filter.as_str()) {
                tracing::debug!("Skipping trainer {} (name filter)", name);
                return None;
            }
        }

        Some(DiscoveredTrainer {
            device_id: peripheral.id().to_string(),
            name,
            signal_strength: properties.rssi,
        })
    }

    /// Clone of the connected peripheral.
    async fn connected_peripheral(&self) -> Result<Peripheral, SensorError> {
        self.peripheral
            .lock()
            .await
            .clone()
            .ok_or(SensorError::NotConnected)
    }

    /// Look up a GATT characteristic on the connected peripheral.
    fn find_characteristic(
        peripheral: &Peripheral,
        characteristic: Characteristic,
    ) -> Result<GattCharacteristic, SensorError> {
        let uuid = characteristic.uuid();
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| SensorError::CharacteristicNotFound(characteristic.to_string()))
    }

    /// Watch adapter events and fire the disconnect callbacks once.
    fn spawn_disconnect_watcher(&self, peripheral: &Peripheral) {
        let adapter = self.adapter.clone();
        let id = peripheral.id();
        let state = self.state.clone();
        let callbacks = self.disconnect_callbacks.clone();

        tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(disconnected) = event {
                    if disconnected == id {
                        tracing::warn!("Trainer {} disconnected", id);
                        set_state(&state, ConnectionState::Disconnected);
                        if let Ok(callbacks) = callbacks.lock() {
                            for callback in callbacks.iter() {
                                callback();
                            }
                        }
                        break;
                    }
                }
            }
        });
    }
}

fn set_state(state: &StdMutex<ConnectionState>, new_state: ConnectionState) {
    if let Ok(mut current) = state.lock() {
        *current = new_state;
    }
}

#[async_trait]
impl Transport for BleTrainer {
    async fn connect(&self) -> Result<ConnectionHandle, SensorError> {
        self.set_state(ConnectionState::Connecting);

        let result = self.connect_inner().await;
        if result.is_err() {
            self.set_state(ConnectionState::Disconnected);
        }
        result
    }

    async fn disconnect(&self) -> Result<(), SensorError> {
        let peripheral = self.peripheral.lock().await.take();

        if let Some(peripheral) = peripheral {
            tracing::info!("Disconnecting from trainer: {}", peripheral.id());
            peripheral
                .disconnect()
                .await
                .map_err(|e| SensorError::BleError(e.to_string()))?;
        }

        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    async fn subscribe(
        &self,
        characteristic: Characteristic,
    ) -> Result<NotificationStream, SensorError> {
        let peripheral = self.connected_peripheral().await?;
        let gatt = Self::find_characteristic(&peripheral, characteristic)?;

        peripheral
            .subscribe(&gatt)
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;

        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;

        tracing::debug!("Subscribed to characteristic: {}", characteristic);

        let uuid = gatt.uuid;
        let stream = notifications.filter_map(move |notification| {
            futures::future::ready((notification.uuid == uuid).then_some(notification.value))
        });

        Ok(Box::pin(stream))
    }

    async fn write(&self, characteristic: Characteristic, bytes: &[u8]) -> Result<(), SensorError> {
        let peripheral = self.connected_peripheral().await?;

        // The disconnect watcher may not have run yet.
        if !peripheral.is_connected().await.unwrap_or(false) {
            return Err(SensorError::Disconnected(peripheral.id().to_string()));
        }

        let gatt = Self::find_characteristic(&peripheral, characteristic)?;

        peripheral
            .write(&gatt, bytes, WriteType::WithResponse)
            .await
            .map_err(|e| SensorError::WriteFailed(e.to_string()))
    }

    fn on_disconnected(&self, callback: DisconnectCallback) {
        if let Ok(mut callbacks) = self.disconnect_callbacks.lock() {
            callbacks.push(callback);
        }
    }
}

impl BleTrainer {
    async fn connect_inner(&self) -> Result<ConnectionHandle, SensorError> {
        tracing::info!("Scanning for FTMS trainers");

        self.adapter
            .start_scan(ScanFilter {
                services: vec![FTMS_SERVICE_UUID],
            })
            .await
            .map_err(|e| SensorError::ScanFailed(e.to_string()))?;

        let found = tokio::time::timeout(self.settings.scan_timeout(), self.find_trainer()).await;

        if let Err(e) = self.adapter.stop_scan().await {
            tracing::warn!("Failed to stop scanning: {}", e);
        }

        let (peripheral, trainer) = found.map_err(|_| SensorError::TrainerNotFound)??;

        tracing::info!("Connecting to trainer: {} ({})", trainer.name, trainer.device_id);

        let link = async {
            peripheral
                .connect()
                .await
                .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;
            peripheral
                .discover_services()
                .await
                .map_err(|e| SensorError::ConnectionFailed(e.to_string()))
        };

        let linked = tokio::time::timeout(self.settings.connection_timeout(), link)
            .await
            .map_err(|_| SensorError::ConnectionTimeout)
            .and_then(|result| result)
            .and_then(|()| {
                Self::find_characteristic(&peripheral, Characteristic::IndoorBikeData)?;
                Self::find_characteristic(&peripheral, Characteristic::ControlPoint)
            });

        if let Err(e) = linked {
            // connect() may have succeeded before the failure
            if let Err(disconnect_err) = peripheral.disconnect().await {
                tracing::debug!("Cleanup disconnect failed: {}", disconnect_err);
            }
            return Err(e);
        }

        self.spawn_disconnect_watcher(&peripheral);
        *self.peripheral.lock().await = Some(peripheral);
        self.set_state(ConnectionState::Connected);

        tracing::info!("Connected to trainer: {}", trainer.name);

        Ok(ConnectionHandle {
            device_id: trainer.device_id,
            name: trainer.name,
        })
    }
}
