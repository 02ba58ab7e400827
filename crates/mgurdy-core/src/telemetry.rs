//! Diagnostic telemetry publishing: periodic wheel and key-pressure samples,
//! decimated by the worker so they don't compete with the realtime output
//! path. Grounded on the original's `position_to_websockets` in `worker.c`,
//! generalized behind a trait since this core has no built-in transport.

use mgurdy_protocol::wire::{KeyTelemetry, WheelTelemetry};

/// Receives decimated telemetry samples from the worker thread. A real
/// implementation might publish over a websocket or OSC; tests use
/// [`NullTelemetrySink`] or [`CollectingTelemetrySink`].
pub trait TelemetrySink: Send {
    fn wheel(&mut self, sample: WheelTelemetry);
    fn keys(&mut self, sample: KeyTelemetry);
}

/// Discards every sample.
#[derive(Debug, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn wheel(&mut self, _sample: WheelTelemetry) {}
    fn keys(&mut self, _sample: KeyTelemetry) {}
}

/// Collects every sample it receives, for tests and demo CLIs.
#[derive(Debug, Default)]
pub struct CollectingTelemetrySink {
    pub wheel_samples: Vec<WheelTelemetry>,
    pub key_samples: Vec<KeyTelemetry>,
}

impl TelemetrySink for CollectingTelemetrySink {
    fn wheel(&mut self, sample: WheelTelemetry) {
        self.wheel_samples.push(sample);
    }

    fn keys(&mut self, sample: KeyTelemetry) {
        self.key_samples.push(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink_records_samples() {
        let mut sink = CollectingTelemetrySink::default();
        sink.wheel(WheelTelemetry { position: 1, speed: 2, chien_volume: 3, chien_speed: 4 });
        sink.keys(KeyTelemetry {
            records: vec![mgurdy_protocol::wire::KeyRecord {
                index: 0,
                raw_pressure: 1,
                smoothed_pressure: 2,
                velocity: 3,
                action: 1,
            }],
        });
        assert_eq!(sink.wheel_samples.len(), 1);
        assert_eq!(sink.key_samples.len(), 1);
    }
}
