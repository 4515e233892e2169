//! HTTP client for the Salus mobile application API.
//!
//! The mobile application talks to an Arrayent service. Logging in returns a
//! security token valid for an hour, reads and writes are done through device
//! attributes identified by short codes (`A84`, `S09`...).

use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use md5::{Digest, Md5};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use tokio::sync::Mutex;

use crate::{
    client::{
        Client, ClientError,
        responses::{ActionResponse, DeviceAttributes, LoginRequest, LoginResponse},
        token::TokenCache,
    },
    state::{HvacAction, HvacMode, State, TemperatureSpan, offset_from_index, offset_index},
};

const MAX_TOKEN_AGE: Duration = Duration::from_secs(60 * 60);

const LOGIN_PATH: &str = "/acc/applications/SalusService/sessions";
const GET_DATA_PATH: &str = "/zdk/services/zamapi/getDeviceAttributesWithValues";
const SET_DATA_PATH: &str = "/zdk/services/zamapi/setMultiDeviceAttributes2";

/// Application key sent with the login request.
const AUTHORIZATION_TOKEN: &str = "687886-679716122";

const TEMPERATURE_SPAN_ATTR: &str = "S15";
const TEMPERATURE_OFFSET_ATTR: &str = "S17";
const HOT_WATER_STATUS_ATTR: &str = "C45";
const HOT_WATER_MODE_ATTR: &str = "C42";
const FROST_TEMPERATURE_ATTR: &str = "S09";
const CURRENT_TEMPERATURE_ATTR: &str = "A84";
const TARGET_TEMPERATURE_ATTR: &str = "A85";
const CURRENT_STATE_ATTR: &str = "A87";
const AUTO_VS_TEMP_HOLD_MODE_ATTR: &str = "A88";
const OFF_MODE_ATTR: &str = "A89";

/// Client of the Salus iT500 mobile application API.
///
/// # Examples
///
/// ```no_run
/// let client = ApiClient::new(ApiClient::DEFAULT_URL, "me@example.com", "secret", "12345");
/// let state = client.get_state().await.unwrap();
/// println!("State: {}", state);
/// ```
pub struct ApiClient {
    /// Base url of the Arrayent service
    url: String,
    /// Account email
    username: String,
    /// MD5 hex digest of the account password
    password_hash: String,
    /// Thermostat identifier
    device_id: String,
    /// HTTP client
    client: reqwest::Client,
    /// Security token of the current session
    token: Mutex<TokenCache>,
}

impl ApiClient {
    pub const DEFAULT_URL: &'static str = "https://sal-emea-p01-api.arrayent.com";

    /// Create a new [ApiClient].
    ///
    /// # Arguments
    ///
    /// * `url` - Base url of the service, without trailing slash.
    /// * `username` - Account email.
    /// * `password` - Account password, only its MD5 digest is kept.
    /// * `device_id` - Identifier of the thermostat.
    pub fn new(url: &str, username: &str, password: &str, device_id: &str) -> Self {
        ApiClient {
            url: url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password_hash: hash_password(password),
            device_id: device_id.to_string(),
            client: reqwest::Client::new(),
            token: Mutex::new(TokenCache::new(MAX_TOKEN_AGE)),
        }
    }

    /// Returns the cached security token or logs in again when it expired.
    ///
    /// A failed login clears the cache so the next call retries.
    async fn obtain_token(&self) -> Result<String, ClientError> {
        let mut cache = self.token.lock().await;
        if let Some(token) = cache.get(Instant::now()) {
            return Ok(token.to_owned());
        }

        match self.get_token().await {
            Ok(token) => {
                cache.store(token.clone(), Instant::now());
                Ok(token)
            }
            Err(e) => {
                cache.clear();
                error!("error getting the session token: {}", e);
                Err(e)
            }
        }
    }

    /// Request `POST /acc/applications/SalusService/sessions` to log in.
    ///
    /// The reply is a json object:
    /// ```json
    /// { "securityToken": "1234-abcd", "userId": 42 }
    /// ```
    async fn get_token(&self) -> Result<String, ClientError> {
        let url = format!("{}{}", &self.url, LOGIN_PATH);
        info!("getting token from salus gateway");
        debug!("request {}", &url);

        let body = self
            .client
            .post(&url)
            .header(AUTHORIZATION, AUTHORIZATION_TOKEN)
            .header(ACCEPT, "application/json")
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password_hash,
            })
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ClientError::Authentication(e.to_string()))?
            .text()
            .await
            .map_err(|e| ClientError::Authentication(e.to_string()))?;

        let response: LoginResponse = serde_json::from_str(&body)
            .map_err(|e| ClientError::Authentication(format!("invalid login response: {}", e)))?;

        let token = response
            .security_token
            .ok_or_else(|| ClientError::Authentication("no security token in response".to_string()))?;

        info!("successfully retrieved token");
        Ok(token)
    }

    /// Request `PUT /zdk/services/zamapi/setMultiDeviceAttributes2` with the given attributes.
    ///
    /// Attributes are sent as `name1=..&value1=..&name2=..&value2=..`. The reply
    /// is an XML document holding either an `errorMsg` or a `retCode`.
    ///
    /// # Returns
    ///
    /// The return code of the server, `0` on success.
    async fn set_data(&self, attributes: &[(&str, String)]) -> Result<i64, ClientError> {
        let token = self.obtain_token().await?;
        let url = format!("{}{}", &self.url, SET_DATA_PATH);

        let mut form: Vec<(String, String)> = Vec::with_capacity(attributes.len() * 2 + 2);
        for (i, (name, value)) in attributes.iter().enumerate() {
            form.push((format!("name{}", i + 1), name.to_string()));
            form.push((format!("value{}", i + 1), value.to_owned()));
        }
        form.push(("secToken".to_string(), token));
        form.push(("devId".to_string(), self.device_id.to_owned()));
        debug!("request PUT {} with attributes {:?}", &url, attributes);

        let body = self
            .client
            .put(&url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!("response from {} -> {}", &url, &body);

        let response = ActionResponse::parse(&body)?;
        if let Some(message) = response.error_message {
            return Err(ClientError::Api(message));
        }

        let return_code = response.return_code.ok_or_else(|| {
            ClientError::Parse("response does not contain return code".to_string())
        })?;

        return_code
            .trim()
            .parse()
            .map_err(|_| ClientError::Parse(format!("invalid return code {}", return_code)))
    }

    /// Sends the attributes and fails unless the server returns `0`.
    async fn update(
        &self,
        attributes: &[(&str, String)],
        failure: &str,
    ) -> Result<(), ClientError> {
        match self.set_data(attributes).await? {
            0 => Ok(()),
            code => {
                warn!("server returned code {}: {}", code, failure);
                Err(ClientError::UpdateFailed(failure.to_string()))
            }
        }
    }

    /// Converts the attributes of the device into a [State].
    fn convert_to_state(attributes: &DeviceAttributes) -> Result<State, ClientError> {
        let span = match attributes.get_value(TEMPERATURE_SPAN_ATTR) {
            Some(code) => {
                let span = code.trim().parse().ok().and_then(TemperatureSpan::from_code);
                if span.is_none() {
                    warn!("unknown temperature span code: {}", code);
                }
                span
            }
            None => None,
        };

        let offset = match attributes.get_value(TEMPERATURE_OFFSET_ATTR) {
            Some(index) => {
                let offset = index.trim().parse().ok().and_then(offset_from_index);
                if offset.is_none() {
                    warn!("unknown temperature offset index: {}", index);
                }
                offset
            }
            None => None,
        };

        Ok(State {
            current_temperature: hundredths(attributes, CURRENT_TEMPERATURE_ATTR)?,
            target_temperature: hundredths(attributes, TARGET_TEMPERATURE_ATTR)?,
            frost: hundredths(attributes, FROST_TEMPERATURE_ATTR)?,
            action: if attributes.require(CURRENT_STATE_ATTR)? == "1" {
                HvacAction::Heating
            } else {
                HvacAction::Idle
            },
            mode: if attributes.require(OFF_MODE_ATTR)? == "1" {
                HvacMode::Off
            } else {
                HvacMode::Heat
            },
            hot_water_enabled: attributes.require(HOT_WATER_STATUS_ATTR)? != "0",
            temperature_span: span,
            temperature_offset: offset,
        })
    }
}

fn hash_password(password: &str) -> String {
    format!("{:x}", Md5::digest(password.as_bytes()))
}

/// Reads a temperature stored in hundredths of a degree.
fn hundredths(attributes: &DeviceAttributes, attribute: &str) -> Result<f64, ClientError> {
    let raw = attributes.require(attribute)?;
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ClientError::Parse(format!("invalid value {} for {}", raw, attribute)))?;
    Ok(value * 0.01)
}

/// Encodes a temperature in hundredths of a degree.
fn to_hundredths(temperature: f64) -> String {
    ((temperature * 100.0).round() as i64).to_string()
}

impl Client for ApiClient {
    /// Request `GET /zdk/services/zamapi/getDeviceAttributesWithValues` to get the device state.
    async fn get_state(&self) -> Result<State, ClientError> {
        debug!("retrieving the device state");
        let token = self.obtain_token().await?;
        let url = format!("{}{}", &self.url, GET_DATA_PATH);
        debug!("request {}?devId={}&deviceTypeId=1", &url, &self.device_id);

        let body = self
            .client
            .get(&url)
            .query(&[
                ("devId", self.device_id.as_str()),
                ("deviceTypeId", "1"),
                ("secToken", token.as_str()),
            ])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .inspect_err(|e| error!("error getting the data from salus: {}", e))?
            .text()
            .await?;
        debug!("successfully retrieved the device state: {}", &body);

        if let Some(message) = ActionResponse::parse(&body)?.error_message {
            error!("salus refused to return the device state: {}", message);
            return Err(ClientError::Api(message));
        }

        ApiClient::convert_to_state(&DeviceAttributes::parse(&body)?)
    }

    async fn set_temperature(&self, temperature: f64) -> Result<(), ClientError> {
        info!("setting the temperature to {:.1}", temperature);

        self.update(
            &[
                (AUTO_VS_TEMP_HOLD_MODE_ATTR, "1".to_string()),
                (TARGET_TEMPERATURE_ATTR, to_hundredths(temperature)),
            ],
            "could not set the temperature",
        )
        .await?;

        info!("successfully set the temperature to {:.1}", temperature);
        Ok(())
    }

    async fn set_hvac_mode(&self, mode: HvacMode) -> Result<(), ClientError> {
        info!("setting the HVAC mode to {}", mode);

        let off = match mode {
            HvacMode::Off => "1",
            HvacMode::Heat => "0",
        };
        self.update(
            &[(OFF_MODE_ATTR, off.to_string())],
            "could not set the HVAC mode",
        )
        .await?;

        info!("successfully set the HVAC mode to {}", mode);
        Ok(())
    }

    async fn set_hot_water_mode(&self, enabled: bool) -> Result<(), ClientError> {
        info!("setting the hot water mode to {}", enabled);

        let mode = if enabled { "2" } else { "3" };
        self.update(
            &[(HOT_WATER_MODE_ATTR, mode.to_string())],
            "could not set the hot water mode",
        )
        .await?;

        info!("successfully set the hot water mode to {}", enabled);
        Ok(())
    }

    async fn set_freeze_protection_temperature(
        &self,
        temperature: f64,
    ) -> Result<(), ClientError> {
        info!(
            "setting the freeze protection temperature to {:.1}",
            temperature
        );

        self.update(
            &[(FROST_TEMPERATURE_ATTR, to_hundredths(temperature))],
            "could not set the freeze protection temperature",
        )
        .await?;

        info!(
            "successfully set the freeze protection temperature to {:.1}",
            temperature
        );
        Ok(())
    }

    async fn set_temperature_offset(&self, offset: f64) -> Result<(), ClientError> {
        info!("setting the temperature offset to {:.1}", offset);

        let index = offset_index(offset).ok_or_else(|| {
            ClientError::InvalidValue(format!("{} is not a supported temperature offset", offset))
        })?;
        self.update(
            &[(TEMPERATURE_OFFSET_ATTR, index.to_string())],
            "could not set the temperature offset",
        )
        .await?;

        info!("successfully set the temperature offset to {:.1}", offset);
        Ok(())
    }

    async fn set_temperature_span(&self, span: TemperatureSpan) -> Result<(), ClientError> {
        info!("setting the temperature span to {}", span.label());

        self.update(
            &[(TEMPERATURE_SPAN_ATTR, span.code().to_string())],
            "could not set the temperature span",
        )
        .await?;

        info!("successfully set the temperature span to {}", span.label());
        Ok(())
    }
}
