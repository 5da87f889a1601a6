use crate::config::AppConfig;
use crate::forwarder::{Sink, SinkError};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{info, warn};

/// Kafka producer used as the ingestion sink. A delivery report from the
/// broker counts as the sink's response.
pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
    queue_timeout: Duration,
}

impl KafkaSink {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        info!("Initializing Kafka producer for topic: {}", config.kafka_topic);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_bootstrap_servers)
            .set("security.protocol", &config.kafka_security_protocol)
            // fail the delivery inside the forwarder's own timeout
            .set("message.timeout.ms", config.forward_timeout_ms.to_string());

        // SASL Configuration
        if config.kafka_security_protocol.starts_with("SASL") {
            client_config
                .set("sasl.mechanism", &config.kafka_sasl_mechanism)
                .set("sasl.username", &config.kafka_username)
                .set("sasl.password", &config.kafka_password);
        }

        let producer: FutureProducer = client_config.create()?;

        Ok(Self {
            producer,
            topic: config.kafka_topic.clone(),
            queue_timeout: config.forward_timeout(),
        })
    }

    /// Waits for in-flight deliveries before shutdown.
    pub fn flush(&self, timeout: Duration) {
        if let Err(e) = self.producer.flush(Timeout::After(timeout)) {
            warn!("Kafka flush incomplete: {}", e);
        }
    }
}

#[async_trait]
impl Sink for KafkaSink {
    async fn deliver(&self, key: &str, payload: &[u8]) -> Result<(), SinkError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);
        match self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
        {
            Ok(_) => Ok(()),
            Err((e, _message)) => Err(SinkError::Rejected(e.to_string())),
        }
    }
}
