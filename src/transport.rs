// Motion Play — Capture Transport
//
// Outbound path for encoded captures. On the device this is an MQTT publish
// (AWS IoT Core caps a message at 128 KB); host runs log the message instead.

use crate::error::CaptureError;

pub trait Transport {
    /// Largest message the transport accepts, in bytes.
    fn max_payload(&self) -> usize;

    fn send(&mut self, payload: &[u8]) -> Result<(), CaptureError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn max_payload(&self) -> usize {
        (**self).max_payload()
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), CaptureError> {
        (**self).send(payload)
    }
}

/// Logs each capture instead of sending it.
#[derive(Debug)]
pub struct LogTransport {
    max_payload: usize,
    sent: u64,
}

impl LogTransport {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload, sent: 0 }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Transport for LogTransport {
    fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), CaptureError> {
        self.sent += 1;
        log::info!("Capture message #{} ({} bytes)", self.sent, payload.len());
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("{}", String::from_utf8_lossy(payload));
        }
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
pub use mqtt::MqttTransport;

#[cfg(target_os = "espidf")]
mod mqtt {
    use std::thread;

    use esp_idf_svc::mqtt::client::{EspMqttClient, MqttClientConfiguration, QoS};

    use super::Transport;
    use crate::error::CaptureError;

    const STACK_MQTT_EVENTS: usize = 6144;
    /// Outbound buffer; the client fragments larger messages.
    const MQTT_OUT_BUFFER: usize = 32 * 1024;

    pub struct MqttTransport {
        client: EspMqttClient<'static>,
        topic: String,
        max_payload: usize,
    }

    impl MqttTransport {
        pub fn connect(url: &str, client_id: &str, topic: &str, max_payload: usize) -> anyhow::Result<Self> {
            let conf = MqttClientConfiguration {
                client_id: Some(client_id),
                out_buffer_size: MQTT_OUT_BUFFER,
                ..Default::default()
            };
            let (client, mut connection) = EspMqttClient::new(url, &conf)?;

            // The connection must be polled for the client to make progress.
            thread::Builder::new()
                .name("mqtt".into())
                .stack_size(STACK_MQTT_EVENTS)
                .spawn(move || {
                    while let Ok(event) = connection.next() {
                        log::debug!("MQTT: {}", event.payload());
                    }
                    log::warn!("MQTT connection closed");
                })?;

            log::info!("MQTT client started ({url}, topic {topic})");
            Ok(Self {
                client,
                topic: topic.to_string(),
                max_payload,
            })
        }
    }

    impl Transport for MqttTransport {
        fn max_payload(&self) -> usize {
            self.max_payload
        }

        fn send(&mut self, payload: &[u8]) -> Result<(), CaptureError> {
            self.client
                .publish(&self.topic, QoS::AtLeastOnce, false, payload)
                .map(|_| ())
                .map_err(|e| CaptureError::TransmitFailure(e.to_string()))
        }
    }
}
