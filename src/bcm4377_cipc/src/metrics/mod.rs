/*
Copyright 2026  The bcm4377-cipc Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::time::Duration;

#[macro_use]
mod metrics_macro;

static LABEL_KIND: &str = "kind";
static LABEL_REASON: &str = "reason";
static LABEL_RING: &str = "ring";

// These defines all types of metrics in this crate
define_metrics! {
    CounterMetric {
        TxPackets { kind: &'static str } => {
            name: "bcm4377_tx_packets_total",
            description: "Number of HCI packets queued to the controller",
            unit: Count,
        },
        TxBytes { kind: &'static str, bytes: u64 } => {
            name: "bcm4377_tx_bytes_total",
            description: "Number of HCI payload bytes queued to the controller",
            unit: Bytes,
        },
        TxErrors { kind: &'static str } => {
            name: "bcm4377_tx_errors_total",
            description: "Number of HCI packets that could not be queued",
            unit: Count,
        },
        RxPackets { kind: &'static str } => {
            name: "bcm4377_rx_packets_total",
            description: "Number of HCI packets received from the controller",
            unit: Count,
        },
        DroppedCompletions { reason: &'static str } => {
            name: "bcm4377_dropped_completions_total",
            description: "Number of completion entries dropped without being delivered",
            unit: Count,
        },
    }
    HistogramMetric {
        AckWait { ring: &'static str, duration: Duration } => {
            name: "bcm4377_ack_wait_seconds",
            description: "Time a blocking send waited for the controller acknowledgement",
            unit: Seconds,
        },
    }
}

impl CounterMetric {
    #[must_use]
    pub(crate) fn tx_packet(kind: &'static str) -> Self {
        CounterMetric::TxPackets { kind }
    }

    #[must_use]
    pub(crate) fn tx_bytes(kind: &'static str, bytes: usize) -> Self {
        CounterMetric::TxBytes {
            kind,
            bytes: bytes as u64,
        }
    }

    #[must_use]
    pub(crate) fn tx_error(kind: &'static str) -> Self {
        CounterMetric::TxErrors { kind }
    }

    #[must_use]
    pub(crate) fn rx_packet(kind: &'static str) -> Self {
        CounterMetric::RxPackets { kind }
    }

    #[must_use]
    pub(crate) fn dropped_completion(reason: &'static str) -> Self {
        CounterMetric::DroppedCompletions { reason }
    }
}

impl HistogramMetric {
    #[must_use]
    pub(crate) fn ack_wait(ring: &'static str, duration: Duration) -> Self {
        HistogramMetric::AckWait { ring, duration }
    }
}

/// A metric which can be emitted to the underlying metrics system
pub(crate) trait EmittableMetric {
    /// Emits the metric to the underlying metrics system.
    /// The first time this is called for a given metric variant, it will
    /// also describe the metric to the underlying metrics system.
    fn emit(self);
}

impl EmittableMetric for CounterMetric {
    fn emit(self) {
        let info = self.info();
        info.describe_counter();

        let (label, value, by) = match self {
            CounterMetric::TxPackets { kind }
            | CounterMetric::TxErrors { kind }
            | CounterMetric::RxPackets { kind } => (LABEL_KIND, kind, 1),
            CounterMetric::TxBytes { kind, bytes } => (LABEL_KIND, kind, bytes),
            CounterMetric::DroppedCompletions { reason } => (LABEL_REASON, reason, 1),
        };
        metrics::counter!(info.name, label => value).increment(by);
    }
}

impl EmittableMetric for HistogramMetric {
    fn emit(self) {
        let info = self.info();
        info.describe_histogram();

        match self {
            HistogramMetric::AckWait { ring, duration } => {
                metrics::histogram!(info.name, LABEL_RING => ring).record(duration);
            }
        }
    }
}
