//! HTTP client for the legacy salus-it500.com web portal.
//!
//! The portal is a php application: logging in sets a session cookie, the
//! token needed by the ajax endpoints is scraped from the control page.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, error, info};
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    client::{
        Client, ClientError,
        responses::{DeviceValues, scalar_text},
        token::TokenCache,
    },
    state::{HvacAction, HvacMode, State, TemperatureSpan},
};

const MAX_TOKEN_AGE: Duration = Duration::from_secs(60 * 10);

const LOGIN_PATH: &str = "/public/login.php";
const GET_TOKEN_PATH: &str = "/public/control.php";
const GET_DATA_PATH: &str = "/public/ajax_device_values.php";
const SET_DATA_PATH: &str = "/includes/set.php";

const TOKEN_PATTERN: &str = r#"<input id="token" type="hidden" value="([^"]*)" />"#;

/// Client of the Salus iT500 web portal.
///
/// The web portal does not expose the temperature offset nor the temperature
/// span, [`Client::set_temperature_offset`] and [`Client::set_temperature_span`]
/// always fail with [`ClientError::Unsupported`].
pub struct WebClient {
    /// Base url of the portal
    url: String,
    /// Account email
    username: String,
    /// Account password
    password: String,
    /// Thermostat identifier
    device_id: String,
    /// HTTP client, keeps the php session cookie
    client: reqwest::Client,
    /// Extracts the token from the control page
    token_pattern: Regex,
    /// Token of the current session
    token: Mutex<TokenCache>,
}

impl WebClient {
    pub const DEFAULT_URL: &'static str = "https://salus-it500.com";

    /// Create a new [WebClient].
    ///
    /// # Arguments
    ///
    /// * `url` - Base url of the portal, without trailing slash.
    /// * `username` - Account email.
    /// * `password` - Account password.
    /// * `device_id` - Identifier of the thermostat.
    pub fn new(
        url: &str,
        username: &str,
        password: &str,
        device_id: &str,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        let token_pattern =
            Regex::new(TOKEN_PATTERN).map_err(|e| ClientError::Parse(e.to_string()))?;

        Ok(WebClient {
            url: url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            device_id: device_id.to_string(),
            client,
            token_pattern,
            token: Mutex::new(TokenCache::new(MAX_TOKEN_AGE)),
        })
    }

    /// Returns the cached token or logs in again when it expired.
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

    /// Logs in with `POST /public/login.php` then scrapes the token of
    /// `GET /public/control.php?devId={deviceId}`.
    ///
    /// The control page embeds the token in a hidden input:
    /// ```html
    /// <input id="token" type="hidden" value="1234-abcd" />
    /// ```
    async fn get_token(&self) -> Result<String, ClientError> {
        info!("getting token from salus web portal");

        let login_url = format!("{}{}", &self.url, LOGIN_PATH);
        debug!("request {}", &login_url);
        self.client
            .post(&login_url)
            .form(&[
                ("IDemail", self.username.as_str()),
                ("password", self.password.as_str()),
                ("login", "Login"),
                ("keep_logged_in", "1"),
            ])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ClientError::Authentication(e.to_string()))?;

        let token_url = format!("{}{}", &self.url, GET_TOKEN_PATH);
        debug!("request {}?devId={}", &token_url, &self.device_id);
        let body = self
            .client
            .get(&token_url)
            .query(&[("devId", self.device_id.as_str())])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ClientError::Authentication(e.to_string()))?
            .text()
            .await
            .map_err(|e| ClientError::Authentication(e.to_string()))?;

        let token = self
            .token_pattern
            .captures(&body)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                ClientError::Authentication("no token in the control page".to_string())
            })?;

        info!("successfully retrieved token");
        Ok(token)
    }

    /// Request `POST /includes/set.php` with the given options.
    ///
    /// # Returns
    ///
    /// The json reply, its shape depends on the options.
    async fn set_data(&self, options: &[(&str, String)]) -> Result<Value, ClientError> {
        let token = self.obtain_token().await?;
        let url = format!("{}{}", &self.url, SET_DATA_PATH);

        let mut form: Vec<(&str, String)> = options.to_vec();
        form.push(("token", token));
        form.push(("devId", self.device_id.to_owned()));
        debug!("request POST {} with options {:?}", &url, options);

        let body = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!("response from {} -> {}", &url, &body);

        serde_json::from_str(&body)
            .map_err(|e| ClientError::Parse(format!("invalid json response: {}", e)))
    }

    /// Converts the device values of the portal into a [State].
    fn convert_to_state(values: &DeviceValues) -> Result<State, ClientError> {
        Ok(State {
            current_temperature: parse_temperature("CH1currentRoomTemp", &values.current_room_temp)?,
            target_temperature: parse_temperature("CH1currentSetPoint", &values.current_set_point)?,
            frost: parse_temperature("frost", &values.frost)?,
            action: if values.heat_on_off_status == "1" {
                HvacAction::Heating
            } else {
                HvacAction::Idle
            },
            mode: if values.heat_on_off == "1" {
                HvacMode::Off
            } else {
                HvacMode::Heat
            },
            hot_water_enabled: values.hot_water_on_off_status != "0",
            temperature_span: None,
            temperature_offset: None,
        })
    }
}

fn parse_temperature(field: &str, raw: &str) -> Result<f64, ClientError> {
    raw.trim()
        .parse()
        .map_err(|_| ClientError::Parse(format!("invalid value {} for {}", raw, field)))
}

/// Milliseconds since the epoch, used as cache buster.
fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

impl Client for WebClient {
    /// Request `GET /public/ajax_device_values.php` to get the device state.
    async fn get_state(&self) -> Result<State, ClientError> {
        debug!("retrieving the device state");
        let token = self.obtain_token().await?;
        let url = format!("{}{}", &self.url, GET_DATA_PATH);
        debug!("request {}?devId={}", &url, &self.device_id);

        let body = self
            .client
            .get(&url)
            .query(&[
                ("devId", self.device_id.to_owned()),
                ("token", token),
                ("_", timestamp_millis().to_string()),
            ])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .inspect_err(|e| {
                error!(
                    "error getting the data from salus, check the connection to {}: {}",
                    &self.url, e
                )
            })?
            .text()
            .await?;
        debug!("successfully retrieved the device state: {}", &body);

        let values: DeviceValues = serde_json::from_str(&body)
            .map_err(|e| ClientError::Parse(format!("invalid device values: {}", e)))?;
        debug!("device values {}", values);

        WebClient::convert_to_state(&values)
    }

    async fn set_temperature(&self, temperature: f64) -> Result<(), ClientError> {
        info!("setting the temperature to {:.1}", temperature);

        let reply = self
            .set_data(&[
                ("tempUnit", "0".to_string()),
                ("current_tempZ1_set", "1".to_string()),
                ("current_tempZ1", format!("{:.1}", temperature)),
            ])
            .await?;

        if reply.get("retCode").is_some() {
            info!("successfully set the temperature to {:.1}", temperature);
            return Ok(());
        }
        if let Some(message) = reply.get("errorMsg") {
            let message = scalar_text(message).unwrap_or_else(|| message.to_string());
            return Err(ClientError::Api(message));
        }
        Err(ClientError::UpdateFailed(
            "server returned unknown error".to_string(),
        ))
    }

    async fn set_hvac_mode(&self, mode: HvacMode) -> Result<(), ClientError> {
        info!("setting the HVAC mode to {}", mode);

        let auto = match mode {
            HvacMode::Off => "1",
            HvacMode::Heat => "0",
        };
        let reply = self
            .set_data(&[
                ("auto", auto.to_string()),
                ("auto_setZ1", "1".to_string()),
            ])
            .await?;

        match scalar_text(&reply).as_deref() {
            Some("1") => {
                info!("successfully set the HVAC mode to {}", mode);
                Ok(())
            }
            _ => Err(ClientError::UpdateFailed(
                "could not set the HVAC mode".to_string(),
            )),
        }
    }

    async fn set_hot_water_mode(&self, enabled: bool) -> Result<(), ClientError> {
        info!("setting the hot water mode to {}", enabled);

        let option = if enabled { "hwmode_cont" } else { "hwmode_off" };
        let reply = self.set_data(&[(option, "1".to_string())]).await?;

        match scalar_text(&reply).as_deref() {
            Some("2") | Some("3") => {
                info!("successfully set the hot water mode to {}", enabled);
                Ok(())
            }
            _ => Err(ClientError::UpdateFailed(
                "could not set the hot water mode".to_string(),
            )),
        }
    }

    async fn set_freeze_protection_temperature(
        &self,
        temperature: f64,
    ) -> Result<(), ClientError> {
        info!(
            "setting the freeze protection temperature to {:.1}",
            temperature
        );

        let reply = self
            .set_data(&[
                ("tempUnit", "0".to_string()),
                ("frost_temp_set", "1".to_string()),
                ("frost_temp", format!("{:.1}", temperature)),
            ])
            .await?;

        let confirmed = scalar_text(&reply)
            .and_then(|text| text.trim().parse::<f64>().ok())
            .is_some_and(|value| value == temperature);
        if !confirmed {
            return Err(ClientError::UpdateFailed(
                "could not set the freeze protection temperature".to_string(),
            ));
        }

        info!(
            "successfully set the freeze protection temperature to {:.1}",
            temperature
        );
        Ok(())
    }

    async fn set_temperature_offset(&self, _offset: f64) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("setting the temperature offset"))
    }

    async fn set_temperature_span(&self, _span: TemperatureSpan) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("setting the temperature span"))
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;

    const DEVICE_ID: &str = "12345";
    const USERNAME: &str = "me@example.com";
    const PASSWORD: &str = "secret";
    const TOKEN: &str = "tok-123";

    const CONTROL_PAGE: &str = r#"<html><body>
<form id="control">
<input id="devId" type="hidden" value="12345" />
<input id="token" type="hidden" value="tok-123" />
</form>
</body></html>"#;

    const STATE_BODY: &str = r#"{
        "CH1currentSetPoint": "21.5",
        "CH1currentRoomTemp": "19.8",
        "frost": "7.0",
        "CH1heatOnOffStatus": "1",
        "CH1heatOnOff": "0",
        "HWonOffStatus": "0",
        "CH2currentSetPoint": "32.0"
    }"#;

    /// Mocks the login form and the control page.
    async fn mock_login(server: &mut mockito::ServerGuard) -> (mockito::Mock, mockito::Mock) {
        let login = server
            .mock("POST", LOGIN_PATH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("IDemail".to_owned(), USERNAME.to_owned()),
                Matcher::UrlEncoded("password".to_owned(), PASSWORD.to_owned()),
                Matcher::UrlEncoded("login".to_owned(), "Login".to_owned()),
                Matcher::UrlEncoded("keep_logged_in".to_owned(), "1".to_owned()),
            ]))
            .with_status(200)
            .with_header("set-cookie", "PHPSESSID=abcdef; path=/")
            .with_body("<html></html>")
            .create_async()
            .await;

        let control = server
            .mock("GET", GET_TOKEN_PATH)
            .match_query(Matcher::UrlEncoded(
                "devId".to_owned(),
                DEVICE_ID.to_owned(),
            ))
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(CONTROL_PAGE)
            .create_async()
            .await;

        (login, control)
    }

    async fn mock_set(
        server: &mut mockito::ServerGuard,
        options: Vec<Matcher>,
        response: &str,
    ) -> mockito::Mock {
        let mut matchers = options;
        matchers.push(Matcher::UrlEncoded("token".to_owned(), TOKEN.to_owned()));
        matchers.push(Matcher::UrlEncoded("devId".to_owned(), DEVICE_ID.to_owned()));

        server
            .mock("POST", SET_DATA_PATH)
            .match_body(Matcher::AllOf(matchers))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(response)
            .create_async()
            .await
    }

    fn option(name: &str, value: &str) -> Matcher {
        Matcher::UrlEncoded(name.to_owned(), value.to_owned())
    }

    fn client(url: &str) -> WebClient {
        WebClient::new(url, USERNAME, PASSWORD, DEVICE_ID).unwrap()
    }

    #[tokio::test]
    async fn test_get_state() {
        let mut server = mockito::Server::new_async().await;
        let (login, control) = mock_login(&mut server).await;
        let data = server
            .mock("GET", GET_DATA_PATH)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("devId".to_owned(), DEVICE_ID.to_owned()),
                Matcher::UrlEncoded("token".to_owned(), TOKEN.to_owned()),
                Matcher::Regex("_=[0-9]+".to_owned()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(STATE_BODY)
            .create_async()
            .await;

        let state = client(&server.url()).get_state().await.unwrap();

        login.assert_async().await;
        control.assert_async().await;
        data.assert_async().await;
        assert_eq!(state.current_temperature, 19.8);
        assert_eq!(state.target_temperature, 21.5);
        assert_eq!(state.frost, 7.0);
        assert_eq!(state.action, HvacAction::Heating);
        assert_eq!(state.mode, HvacMode::Heat);
        assert!(!state.hot_water_enabled);
        assert_eq!(state.temperature_span, None);
        assert_eq!(state.temperature_offset, None);
    }

    #[tokio::test]
    async fn test_get_state_without_token_on_control_page() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", LOGIN_PATH)
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("GET", GET_TOKEN_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>Please log in</html>")
            .create_async()
            .await;
        let data = server
            .mock("GET", GET_DATA_PATH)
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let error = client(&server.url()).get_state().await.unwrap_err();
        assert!(
            matches!(error, ClientError::Authentication(message) if message == "no token in the control page")
        );
        data.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_state_invalid_json() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server).await;
        server
            .mock("GET", GET_DATA_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let error = client(&server.url()).get_state().await.unwrap_err();
        assert!(matches!(error, ClientError::Parse(_)));
    }

    #[tokio::test]
    async fn test_get_state_login_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", LOGIN_PATH)
            .with_status(403)
            .expect(2)
            .create_async()
            .await;
        let control = server
            .mock("GET", GET_TOKEN_PATH)
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = client(&server.url());
        let error = client.get_state().await.unwrap_err();
        assert!(matches!(error, ClientError::Authentication(_)));

        // Nothing was cached, the next request logs in again
        let error = client.get_state().await.unwrap_err();
        assert!(matches!(error, ClientError::Authentication(_)));
        control.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_state_server_error() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server).await;
        server
            .mock("GET", GET_DATA_PATH)
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let error = client(&server.url()).get_state().await.unwrap_err();
        assert!(matches!(error, ClientError::Http(_)));
    }

    #[tokio::test]
    async fn test_set_temperature() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server).await;
        let set = mock_set(
            &mut server,
            vec![
                option("tempUnit", "0"),
                option("current_tempZ1_set", "1"),
                option("current_tempZ1", "21.5"),
            ],
            r#"{"retCode": "0"}"#,
        )
        .await;

        client(&server.url()).set_temperature(21.5).await.unwrap();
        set.assert_async().await;
    }

    #[tokio::test]
    async fn test_set_temperature_error_message() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server).await;
        mock_set(
            &mut server,
            vec![option("current_tempZ1", "40.0")],
            r#"{"errorMsg": "Temperature out of range"}"#,
        )
        .await;

        let error = client(&server.url())
            .set_temperature(40.0)
            .await
            .unwrap_err();
        assert!(matches!(error, ClientError::Api(message) if message == "Temperature out of range"));
    }

    #[tokio::test]
    async fn test_set_temperature_unknown_reply() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server).await;
        mock_set(&mut server, vec![option("current_tempZ1", "20.0")], "{}").await;

        let error = client(&server.url())
            .set_temperature(20.0)
            .await
            .unwrap_err();
        assert!(matches!(error, ClientError::UpdateFailed(_)));
    }

    #[tokio::test]
    async fn test_set_hvac_mode() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server).await;
        let off = mock_set(
            &mut server,
            vec![option("auto", "1"), option("auto_setZ1", "1")],
            r#""1""#,
        )
        .await;
        let heat = mock_set(
            &mut server,
            vec![option("auto", "0"), option("auto_setZ1", "1")],
            "1",
        )
        .await;

        let client = client(&server.url());
        client.set_hvac_mode(HvacMode::Off).await.unwrap();
        client.set_hvac_mode(HvacMode::Heat).await.unwrap();

        off.assert_async().await;
        heat.assert_async().await;
    }

    #[tokio::test]
    async fn test_set_hvac_mode_rejected() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server).await;
        mock_set(&mut server, vec![option("auto", "0")], r#""0""#).await;

        let error = client(&server.url())
            .set_hvac_mode(HvacMode::Heat)
            .await
            .unwrap_err();
        assert!(
            matches!(error, ClientError::UpdateFailed(message) if message == "could not set the HVAC mode")
        );
    }

    #[tokio::test]
    async fn test_set_hot_water_mode() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server).await;
        let on = mock_set(&mut server, vec![option("hwmode_cont", "1")], r#""2""#).await;
        let off = mock_set(&mut server, vec![option("hwmode_off", "1")], "3").await;

        let client = client(&server.url());
        client.set_hot_water_mode(true).await.unwrap();
        client.set_hot_water_mode(false).await.unwrap();

        on.assert_async().await;
        off.assert_async().await;
    }

    #[tokio::test]
    async fn test_set_freeze_protection_temperature() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server).await;
        let set = mock_set(
            &mut server,
            vec![
                option("tempUnit", "0"),
                option("frost_temp_set", "1"),
                option("frost_temp", "7.5"),
            ],
            r#""7.5""#,
        )
        .await;

        client(&server.url())
            .set_freeze_protection_temperature(7.5)
            .await
            .unwrap();
        set.assert_async().await;
    }

    #[tokio::test]
    async fn test_set_freeze_protection_temperature_not_applied() {
        let mut server = mockito::Server::new_async().await;
        mock_login(&mut server).await;
        mock_set(&mut server, vec![option("frost_temp", "8.0")], "7").await;

        let error = client(&server.url())
            .set_freeze_protection_temperature(8.0)
            .await
            .unwrap_err();
        assert!(matches!(error, ClientError::UpdateFailed(_)));
    }

    #[tokio::test]
    async fn test_offset_and_span_are_unsupported() {
        let server = mockito::Server::new_async().await;
        let client = client(&server.url());

        assert!(matches!(
            client.set_temperature_offset(1.0).await.unwrap_err(),
            ClientError::Unsupported(_)
        ));
        assert!(matches!(
            client
                .set_temperature_span(TemperatureSpan::One)
                .await
                .unwrap_err(),
            ClientError::Unsupported(_)
        ));
    }

    #[tokio::test]
    async fn test_token_is_reused_between_requests() {
        let mut server = mockito::Server::new_async().await;
        let (login, control) = mock_login(&mut server).await;
        let set = server
            .mock("POST", SET_DATA_PATH)
            .match_body(Matcher::UrlEncoded("token".to_owned(), TOKEN.to_owned()))
            .with_status(200)
            .with_body("1")
            .expect(2)
            .create_async()
            .await;

        let client = client(&server.url());
        client.set_hvac_mode(HvacMode::Heat).await.unwrap();
        client.set_hvac_mode(HvacMode::Heat).await.unwrap();

        login.assert_async().await;
        control.assert_async().await;
        set.assert_async().await;
    }
}
