//! Periodic state refresh for the thermostat.
//!
//! This module provides the [`Coordinator`] that owns a [`Client`], keeps the
//! last successfully retrieved [`State`] and republishes every new state to
//! its listeners. Control operations go through the coordinator so the state
//! is refreshed right after a write.

use std::{sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use tokio::{sync::Mutex, task::JoinHandle, time};

use crate::{
    client::{Client, ClientError, SalusClient},
    state::{
        FREEZE_PROTECTION_MAX_TEMP, FREEZE_PROTECTION_MIN_TEMP, HvacMode, MAX_TEMP, MIN_TEMP,
        State, TEMPERATURE_OFFSET_MAX, TEMPERATURE_OFFSET_MIN, TemperatureSpan,
    },
};

/// Callback receiving every refreshed state.
type Listener = Box<dyn Fn(&State) + Send + Sync>;

/// Keeps the thermostat state up to date.
///
/// # Examples
///
/// ```no_run
/// let client = ApiClient::new(ApiClient::DEFAULT_URL, "me@example.com", "secret", "12345");
/// let mut coordinator = Coordinator::new(client);
/// coordinator.subscribe(|state| println!("{}", state));
/// coordinator.refresh().await?;
/// coordinator.set_temperature(21.5).await?;
/// ```
pub struct Coordinator<C: Client> {
    /// Client used to reach the thermostat
    client: C,
    /// Last successfully retrieved state
    data: Option<State>,
    /// Callbacks notified after each successful refresh
    listeners: Vec<Listener>,
}

impl<C: Client> Coordinator<C> {
    /// Create a new [Coordinator].
    ///
    /// No request is made until the first [`Coordinator::refresh`].
    pub fn new(client: C) -> Self {
        Coordinator {
            client,
            data: None,
            listeners: Vec::new(),
        }
    }

    /// Registers a callback called with every refreshed state.
    pub fn subscribe(&mut self, listener: impl Fn(&State) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Last successfully retrieved state, `None` before the first refresh.
    pub fn data(&self) -> Option<&State> {
        self.data.as_ref()
    }

    /// Fetches the state and publishes it to the listeners.
    ///
    /// On failure the previous state is kept and the error is returned.
    pub async fn refresh(&mut self) -> Result<State, ClientError> {
        debug!("refreshing the thermostat state");

        let state = match self.client.get_state().await {
            Ok(state) => state,
            Err(e) => {
                error!("error while refreshing the thermostat state: {}", e);
                return Err(e);
            }
        };

        debug!("refreshed state {}", state);
        for listener in &self.listeners {
            listener(&state);
        }
        self.data = Some(state.clone());

        Ok(state)
    }

    /// Refreshes after a successful write.
    ///
    /// The write already succeeded, a failed refresh is only logged.
    async fn request_refresh(&mut self) {
        if let Err(e) = self.refresh().await {
            warn!("could not refresh the state after an update: {}", e);
        }
    }

    /// Sets the target temperature, between 5 and 35 °C in 0.5 steps.
    pub async fn set_temperature(&mut self, temperature: f64) -> Result<(), ClientError> {
        check_range("target temperature", temperature, MIN_TEMP, MAX_TEMP)?;
        self.client.set_temperature(temperature).await?;
        self.request_refresh().await;
        Ok(())
    }

    /// Sets the heating mode.
    pub async fn set_hvac_mode(&mut self, mode: HvacMode) -> Result<(), ClientError> {
        self.client.set_hvac_mode(mode).await?;
        self.request_refresh().await;
        Ok(())
    }

    /// Switches the heating on.
    pub async fn turn_on(&mut self) -> Result<(), ClientError> {
        self.set_hvac_mode(HvacMode::Heat).await
    }

    /// Switches the heating off.
    pub async fn turn_off(&mut self) -> Result<(), ClientError> {
        self.set_hvac_mode(HvacMode::Off).await
    }

    /// Enables or disables hot water.
    pub async fn set_hot_water(&mut self, enabled: bool) -> Result<(), ClientError> {
        self.client.set_hot_water_mode(enabled).await?;
        self.request_refresh().await;
        Ok(())
    }

    /// Sets the freeze protection temperature, between 5 and 12 °C in 0.5 steps.
    pub async fn set_freeze_protection_temperature(
        &mut self,
        temperature: f64,
    ) -> Result<(), ClientError> {
        check_range(
            "freeze protection temperature",
            temperature,
            FREEZE_PROTECTION_MIN_TEMP,
            FREEZE_PROTECTION_MAX_TEMP,
        )?;
        self.client
            .set_freeze_protection_temperature(temperature)
            .await?;
        self.request_refresh().await;
        Ok(())
    }

    /// Sets the room sensor offset, between -3 and 3 °C in 0.5 steps.
    pub async fn set_temperature_offset(&mut self, offset: f64) -> Result<(), ClientError> {
        check_range(
            "temperature offset",
            offset,
            TEMPERATURE_OFFSET_MIN,
            TEMPERATURE_OFFSET_MAX,
        )?;
        self.client.set_temperature_offset(offset).await?;
        self.request_refresh().await;
        Ok(())
    }

    /// Sets the switching hysteresis.
    pub async fn set_temperature_span(&mut self, span: TemperatureSpan) -> Result<(), ClientError> {
        self.client.set_temperature_span(span).await?;
        self.request_refresh().await;
        Ok(())
    }
}

/// Checks `value` is within `min..=max` and a multiple of 0.5.
fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<(), ClientError> {
    if !(min..=max).contains(&value) {
        return Err(ClientError::InvalidValue(format!(
            "{} must be between {:.1} and {:.1}, got {}",
            name, min, max, value
        )));
    }
    if (value * 2.0).fract() != 0.0 {
        return Err(ClientError::InvalidValue(format!(
            "{} must be a multiple of 0.5, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Starts refreshing the thermostat state in the background.
///
/// The first refresh happens immediately, then every `polling_interval`
/// seconds. Failed refreshes are logged and the loop goes on.
///
/// # Arguments
///
/// * `coordinator` - Thread-safe reference to the coordinator to refresh
/// * `polling_interval` - Number of seconds between refreshes
pub fn start_polling_task(
    coordinator: Arc<Mutex<Coordinator<SalusClient>>>,
    polling_interval: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "polling the thermostat every {} seconds",
            polling_interval
        );
        let mut interval = time::interval(Duration::from_secs(polling_interval));

        loop {
            interval.tick().await;
            // Errors are already logged by refresh
            let _ = coordinator.lock().await.refresh().await;
        }
    })
}
