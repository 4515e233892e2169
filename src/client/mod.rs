//! Salus iT500 cloud clients.
//!
//! Salus exposes the thermostat through two unrelated backends:
//!
//! - `api` - the Arrayent service used by the mobile application (XML responses)
//! - `web` - the legacy salus-it500.com portal (HTML token page and JSON responses)
//!
//! Both keep a session token in a [`token::TokenCache`], log in again when it
//! gets too old, and convert the vendor payload into a [`State`].
//!
//! # Examples
//!
//! ```no_run
//! use salus::client::{ApiClient, Client};
//!
//! # async fn example() -> Result<(), salus::client::ClientError> {
//! let client = ApiClient::new(ApiClient::DEFAULT_URL, "me@example.com", "secret", "12345");
//! let state = client.get_state().await?;
//! println!("{}", state);
//! # Ok(())
//! # }
//! ```

mod api;
mod responses;
mod token;
mod web;

use log::info;
use mockall::automock;

pub use crate::client::api::ApiClient;
pub use crate::client::web::WebClient;
use crate::{
    config::{Backend, Config},
    state::{HvacMode, State, TemperatureSpan},
};

/// Errors surfaced by the clients to the update loop.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport failure or non-success HTTP status.
    #[error("error during communication with the API: {0}")]
    Http(#[from] reqwest::Error),
    /// The login exchange failed or did not yield a token.
    #[error("could not retrieve the session token: {0}")]
    Authentication(String),
    /// The server answered with an explicit error message.
    #[error("server returned: {0}")]
    Api(String),
    /// A write was not acknowledged by the server.
    #[error("{0}")]
    UpdateFailed(String),
    /// The response body could not be decoded.
    #[error("unexpected response: {0}")]
    Parse(String),
    /// The backend cannot perform the operation.
    #[error("{0} is not supported by this client")]
    Unsupported(&'static str),
    /// The value is outside what the device accepts.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Operations every Salus backend offers.
///
/// This trait is the seam between the [`crate::coordinator::Coordinator`] and
/// the HTTP clients, it is mocked in the coordinator tests.
#[automock]
pub trait Client {
    /// Retrieves the current device state.
    async fn get_state(&self) -> Result<State, ClientError>;
    /// Sets the target temperature in °C.
    async fn set_temperature(&self, temperature: f64) -> Result<(), ClientError>;
    /// Switches the heating on or off.
    async fn set_hvac_mode(&self, mode: HvacMode) -> Result<(), ClientError>;
    /// Enables or disables hot water production.
    async fn set_hot_water_mode(&self, enabled: bool) -> Result<(), ClientError>;
    /// Sets the freeze protection temperature in °C.
    async fn set_freeze_protection_temperature(&self, temperature: f64)
    -> Result<(), ClientError>;
    /// Sets the room sensor offset in °C.
    async fn set_temperature_offset(&self, offset: f64) -> Result<(), ClientError>;
    /// Sets the switching hysteresis.
    async fn set_temperature_span(&self, span: TemperatureSpan) -> Result<(), ClientError>;
}

/// The client selected in the configuration.
pub enum SalusClient {
    Api(ApiClient),
    Web(WebClient),
}

/// Creates the client described by `config`.
///
/// # Arguments
///
/// * `config` - Loaded configuration, `gateway.backend` selects the client.
pub fn create_client_from(config: &Config) -> Result<SalusClient, ClientError> {
    let account = &config.account;
    info!(
        "creating {:?} client for device {}",
        config.gateway.backend, account.device_id
    );

    let client = match config.gateway.backend {
        Backend::Api => SalusClient::Api(ApiClient::new(
            config.gateway.api_url.as_deref().unwrap_or(ApiClient::DEFAULT_URL),
            &account.username,
            &account.password,
            &account.device_id,
        )),
        Backend::Web => SalusClient::Web(WebClient::new(
            config.gateway.web_url.as_deref().unwrap_or(WebClient::DEFAULT_URL),
            &account.username,
            &account.password,
            &account.device_id,
        )?),
    };

    Ok(client)
}

impl Client for SalusClient {
    async fn get_state(&self) -> Result<State, ClientError> {
        match self {
            SalusClient::Api(client) => client.get_state().await,
            SalusClient::Web(client) => client.get_state().await,
        }
    }

    async fn set_temperature(&self, temperature: f64) -> Result<(), ClientError> {
        match self {
            SalusClient::Api(client) => client.set_temperature(temperature).await,
            SalusClient::Web(client) => client.set_temperature(temperature).await,
        }
    }

    async fn set_hvac_mode(&self, mode: HvacMode) -> Result<(), ClientError> {
        match self {
            SalusClient::Api(client) => client.set_hvac_mode(mode).await,
            SalusClient::Web(client) => client.set_hvac_mode(mode).await,
        }
    }

    async fn set_hot_water_mode(&self, enabled: bool) -> Result<(), ClientError> {
        match self {
            SalusClient::Api(client) => client.set_hot_water_mode(enabled).await,
            SalusClient::Web(client) => client.set_hot_water_mode(enabled).await,
        }
    }

    async fn set_freeze_protection_temperature(
        &self,
        temperature: f64,
    ) -> Result<(), ClientError> {
        match self {
            SalusClient::Api(client) => client.set_freeze_protection_temperature(temperature).await,
            SalusClient::Web(client) => client.set_freeze_protection_temperature(temperature).await,
        }
    }

    async fn set_temperature_offset(&self, offset: f64) -> Result<(), ClientError> {
        match self {
            SalusClient::Api(client) => client.set_temperature_offset(offset).await,
            SalusClient::Web(client) => client.set_temperature_offset(offset).await,
        }
    }

    async fn set_temperature_span(&self, span: TemperatureSpan) -> Result<(), ClientError> {
        match self {
            SalusClient::Api(client) => client.set_temperature_span(span).await,
            SalusClient::Web(client) => client.set_temperature_span(span).await,
        }
    }
}
