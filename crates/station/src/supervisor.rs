//! Connection supervisor: the station's single control loop.
//!
//! ```text
//! loop {
//!     connect:  network up (LED on while associating) -> session -> subscribe
//!     serve:    check_messages -> status -> keep-alive -> sleep 0.2 s
//!     on error: log, best-effort disconnect, sleep 1 s
//! }
//! ```
//!
//! There is no backoff growth and no retry limit.  Controller state lives
//! outside the session and survives every reconnect.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{MqttSettings, WifiSettings};
use crate::controller::Controller;
use crate::mqtt::{Outbound, INBOUND_TOPICS};
use crate::network::Network;
use crate::relay::DigitalIo;
use crate::sensor::CurrentProbe;
use crate::session::{Connector, Session, TransportError};

/// Main loop polling interval.
const LOOP_INTERVAL: Duration = Duration::from_millis(200);

/// Delay between network probes and between reconnect attempts.
const RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct Supervisor<N, K, B, P> {
    network: N,
    connector: K,
    controller: Controller<B, P>,
    wifi: WifiSettings,
    mqtt: MqttSettings,
}

impl<N, K, B, P> Supervisor<N, K, B, P>
where
    N: Network,
    K: Connector,
    B: DigitalIo,
    P: CurrentProbe,
{
    pub fn new(
        network: N,
        connector: K,
        controller: Controller<B, P>,
        wifi: WifiSettings,
        mqtt: MqttSettings,
    ) -> Self {
        Self {
            network,
            connector,
            controller,
            wifi,
            mqtt,
        }
    }

    /// Run forever.
    pub async fn run(mut self) {
        loop {
            self.cycle().await;
        }
    }

    /// One connect/serve/teardown round.  Returns after the session has
    /// failed and the retry delay has passed.
    async fn cycle(&mut self) {
        let mut session = match self.connect().await {
            Ok(session) => session,
            Err(e) => {
                error!(server = %self.mqtt.server, "connect failed: {e}");
                sleep(RETRY_DELAY).await;
                return;
            }
        };

        let err = self.serve(&mut session).await;
        error!("session lost: {err}");

        if let Err(e) = session.disconnect().await {
            warn!("disconnect failed: {e}");
        }
        sleep(RETRY_DELAY).await;
    }

    async fn connect(&mut self) -> Result<K::Session, TransportError> {
        self.bring_up_network().await;

        let mut session = self.connector.connect(&self.mqtt).await?;
        for topic in INBOUND_TOPICS {
            if let Err(e) = session.subscribe(topic).await {
                if let Err(e) = session.disconnect().await {
                    debug!("disconnect after failed subscribe: {e}");
                }
                return Err(e);
            }
        }

        info!(
            server = %self.mqtt.server,
            port = self.mqtt.port,
            status_window_open = self.controller.state().status.is_requested(),
            "connected to mqtt"
        );
        Ok(session)
    }

    /// Block (cooperatively) until the network link is up.
    async fn bring_up_network(&mut self) {
        if self.network.is_connected().await {
            return;
        }

        self.controller.set_wifi_indicator(true);
        info!(ssid = %self.wifi.ssid, "connecting to network");
        self.network
            .associate(&self.wifi.ssid, &self.wifi.password)
            .await;
        while !self.network.is_connected().await {
            sleep(RETRY_DELAY).await;
        }
        self.controller.set_wifi_indicator(false);
        info!(ssid = %self.wifi.ssid, "network connected");
    }

    /// Tick until the session fails.
    async fn serve(&mut self, session: &mut K::Session) -> TransportError {
        loop {
            if let Err(e) = self.tick(session).await {
                return e;
            }
            sleep(LOOP_INTERVAL).await;
        }
    }

    /// One loop iteration: inbound messages, then the status report, then
    /// the keep-alive.  Only a failed poll ends the session; publish errors
    /// are logged and dropped.
    async fn tick(&mut self, session: &mut K::Session) -> Result<(), TransportError> {
        for msg in session.check_messages().await? {
            debug!(
                topic = %msg.topic,
                payload = %String::from_utf8_lossy(&msg.payload),
                "message received"
            );
            if let Some(out) = self.controller.dispatch(&msg.topic, Instant::now()) {
                publish(session, out).await;
            }
        }

        let now = Instant::now();
        if let Some(out) = self.controller.poll_status(now) {
            publish(session, out).await;
        }
        if let Some(out) = self.controller.poll_keepalive(now) {
            publish(session, out).await;
        }
        Ok(())
    }
}

async fn publish<S: Session>(session: &mut S, out: Outbound) {
    if let Err(e) = session.publish(out.topic, &out.payload).await {
        warn!(topic = out.topic, "publish failed: {e}");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
